//! Error types for the question-group engine.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::reconcile::MemberFailure;
use crate::store::StoreError;

/// Field path → reason, collected before any write happens.
#[derive(Error, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[error("validation failed ({})", summary(.fields))]
pub struct ValidationErrors {
    pub fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn add(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.fields.entry(field.into()).or_insert_with(|| reason.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn into_result(self) -> std::result::Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn summary(fields: &BTreeMap<String, String>) -> String {
    fields.iter().map(|(k, v)| format!("{k}: {v}")).collect::<Vec<_>>().join("; ")
}

/// Main error type of the service layer.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Draft rejected before any storage call
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("record not found: {0}")]
    NotFound(String),

    /// The group changed between load and save
    #[error("group changed since it was loaded (expected epoch '{expected}', found '{found}')")]
    StaleSnapshot { expected: String, found: String },

    /// Some member operations failed; applied ones are not rolled back
    #[error("partial batch failure: {success_count} succeeded, {failure_count} failed")]
    PartialBatchFailure {
        success_count: usize,
        failure_count: usize,
        failures: Vec<MemberFailure>,
    },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
