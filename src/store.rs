//! Storage collaborator: the document-store primitives the engine relies on,
//! plus an in-memory implementation.
//!
//! The memory store owns:
//!   - records by id (each with a version bumped on every update)
//!   - the last issued code sequence per axes prefix
//!
//! Codes look like `EN-VOC-6-F-007` and are never issued twice, even when
//! two callers ask concurrently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{AnswerOption, Axes, FlatQuestionRecord, ModalityTag, TargetRecord};

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StoreError {
  #[error("record not found: {0}")]
  NotFound(String),

  #[error("version conflict on {id}: expected {expected}, found {found}")]
  Conflict { id: String, expected: u64, found: u64 },

  #[error("storage call timed out after {0:?}")]
  Timeout(Duration),

  #[error("storage unavailable: {0}")]
  Unavailable(String),
}

/// Read-path filter; `None` matches anything.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
  #[serde(default)] pub subject_code: Option<String>,
  #[serde(default)] pub topic_code: Option<String>,
  #[serde(default)] pub grade: Option<String>,
  #[serde(default)] pub level_code: Option<String>,
}

impl RecordFilter {
  pub fn for_axes(axes: &Axes) -> Self {
    Self {
      subject_code: Some(axes.subject_code.clone()),
      topic_code: Some(axes.topic_code.clone()),
      grade: Some(axes.grade.clone()),
      level_code: Some(axes.level_code.clone()),
    }
  }

  pub fn matches(&self, rec: &FlatQuestionRecord) -> bool {
    fn ok(want: &Option<String>, have: &str) -> bool {
      want.as_deref().map_or(true, |w| w == have)
    }
    ok(&self.subject_code, &rec.axes.subject_code)
      && ok(&self.topic_code, &rec.axes.topic_code)
      && ok(&self.grade, &rec.axes.grade)
      && ok(&self.level_code, &rec.axes.level_code)
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRecord {
  pub id: String,
  pub code: String,
}

/// Field-level update. `None` leaves the stored value untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
  pub code: Option<String>,
  pub axes: Option<Axes>,
  pub question_text: Option<String>,
  pub informative_text: Option<String>,
  pub informative_images: Option<Vec<String>>,
  pub question_images: Option<Vec<String>>,
  pub options: Option<Vec<AnswerOption>>,
  pub modality: Option<ModalityTag>,
  pub group_id: Option<Option<String>>,
  pub shared_text: Option<Option<String>>,
}

impl RecordPatch {
  pub fn is_empty(&self) -> bool {
    *self == RecordPatch::default()
  }

  pub fn apply_to(&self, rec: &mut FlatQuestionRecord) {
    if let Some(v) = &self.code { rec.code = v.clone(); }
    if let Some(v) = &self.axes { rec.axes = v.clone(); }
    if let Some(v) = &self.question_text { rec.question_text = v.clone(); }
    if let Some(v) = &self.informative_text { rec.informative_text = v.clone(); }
    if let Some(v) = &self.informative_images { rec.informative_images = v.clone(); }
    if let Some(v) = &self.question_images { rec.question_images = v.clone(); }
    if let Some(v) = &self.options { rec.options = v.clone(); }
    if let Some(v) = self.modality { rec.modality = Some(v); }
    if let Some(v) = &self.group_id { rec.group_id = v.clone(); }
    if let Some(v) = &self.shared_text { rec.shared_text = v.clone(); }
  }
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
  async fn list(&self, filter: &RecordFilter) -> Result<Vec<FlatQuestionRecord>, StoreError>;

  async fn get(&self, id: &str) -> Result<FlatQuestionRecord, StoreError>;

  /// Persist a new record; the store assigns id, code and creation time.
  async fn create(&self, shape: &TargetRecord) -> Result<CreatedRecord, StoreError>;

  /// Apply a patch. With `expected_version`, a stale version is a conflict.
  async fn update(&self, id: &str, patch: &RecordPatch, expected_version: Option<u64>) -> Result<(), StoreError>;

  async fn delete(&self, id: &str) -> Result<(), StoreError>;

  /// Next free code for the axes; never returns the same code twice.
  async fn generate_code(&self, axes: &Axes) -> Result<String, StoreError>;
}

/// Await a storage call with its own deadline.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
  F: Future<Output = Result<T, StoreError>>,
{
  match tokio::time::timeout(limit, fut).await {
    Ok(res) => res,
    Err(_) => Err(StoreError::Timeout(limit)),
  }
}

#[derive(Default)]
struct MemoryInner {
  records: HashMap<String, FlatQuestionRecord>,
  issued: HashMap<String, u32>,
}

impl MemoryInner {
  fn next_code(&mut self, axes: &Axes) -> String {
    let prefix = code_prefix(axes);
    let highest_stored = self
      .records
      .values()
      .filter_map(|r| r.code.strip_prefix(&prefix))
      .filter_map(|rest| rest.strip_prefix('-'))
      .filter_map(|n| n.parse::<u32>().ok())
      .max()
      .unwrap_or(0);
    let last = self.issued.entry(prefix.clone()).or_insert(0);
    let next = highest_stored.max(*last) + 1;
    *last = next;
    format!("{prefix}-{next:03}")
  }
}

fn code_prefix(axes: &Axes) -> String {
  format!("{}-{}-{}-{}", axes.subject_code, axes.topic_code, axes.grade, axes.level_code).to_uppercase()
}

#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a store from existing records. Records without an id get one.
  pub fn with_records(records: Vec<FlatQuestionRecord>) -> Self {
    let mut inner = MemoryInner::default();
    for mut rec in records {
      let id = rec.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
      rec.id = Some(id.clone());
      if rec.version == 0 {
        rec.version = 1;
      }
      inner.records.insert(id, rec);
    }
    Self { inner: Arc::new(RwLock::new(inner)) }
  }

  #[cfg(test)]
  pub async fn len(&self) -> usize {
    self.inner.read().await.records.len()
  }
}

#[async_trait]
impl QuestionStore for MemoryStore {
  async fn list(&self, filter: &RecordFilter) -> Result<Vec<FlatQuestionRecord>, StoreError> {
    let inner = self.inner.read().await;
    Ok(inner.records.values().filter(|r| filter.matches(r)).cloned().collect())
  }

  async fn get(&self, id: &str) -> Result<FlatQuestionRecord, StoreError> {
    let inner = self.inner.read().await;
    inner.records.get(id).cloned().ok_or_else(|| StoreError::NotFound(id.to_string()))
  }

  #[instrument(level = "debug", skip_all, fields(modality = ?shape.modality))]
  async fn create(&self, shape: &TargetRecord) -> Result<CreatedRecord, StoreError> {
    let mut inner = self.inner.write().await;
    let id = Uuid::new_v4().to_string();
    let code = inner.next_code(&shape.axes);
    let rec = FlatQuestionRecord {
      id: Some(id.clone()),
      code: code.clone(),
      axes: shape.axes.clone(),
      question_text: shape.question_text.clone(),
      informative_text: shape.informative_text.clone(),
      informative_images: shape.informative_images.clone(),
      question_images: shape.question_images.clone(),
      options: shape.options.clone(),
      created_at: shape.created_at.unwrap_or_else(Utc::now),
      modality: Some(shape.modality),
      group_id: shape.group_id.clone(),
      shared_text: shape.shared_text.clone(),
      version: 1,
    };
    inner.records.insert(id.clone(), rec);
    debug!(target: "store", %id, %code, "Record created");
    Ok(CreatedRecord { id, code })
  }

  async fn update(&self, id: &str, patch: &RecordPatch, expected_version: Option<u64>) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    let rec = inner.records.get_mut(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    if let Some(expected) = expected_version {
      if expected != rec.version {
        return Err(StoreError::Conflict { id: id.to_string(), expected, found: rec.version });
      }
    }
    patch.apply_to(rec);
    rec.version += 1;
    debug!(target: "store", %id, version = rec.version, "Record updated");
    Ok(())
  }

  async fn delete(&self, id: &str) -> Result<(), StoreError> {
    let mut inner = self.inner.write().await;
    inner.records.remove(id).map(|_| ()).ok_or_else(|| StoreError::NotFound(id.to_string()))
  }

  async fn generate_code(&self, axes: &Axes) -> Result<String, StoreError> {
    Ok(self.inner.write().await.next_code(axes))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::{options, record};

  fn shape(question: &str) -> TargetRecord {
    TargetRecord {
      source_id: None,
      axes: Axes::new("en", "voc", "6", "f"),
      question_text: question.into(),
      informative_text: String::new(),
      informative_images: vec![],
      question_images: vec![],
      options: options(&["a", "b"], 1),
      modality: ModalityTag::StandardMc,
      group_id: None,
      shared_text: None,
      created_at: None,
    }
  }

  #[tokio::test]
  async fn codes_continue_after_stored_sequence() {
    let mut existing = record("r1", "EN", "Q");
    existing.code = "EN-VOC-6-F-004".into();
    let store = MemoryStore::with_records(vec![existing]);

    let created = store.create(&shape("new")).await.unwrap();
    assert_eq!(created.code, "EN-VOC-6-F-005");
    assert_eq!(store.generate_code(&Axes::new("EN", "VOC", "6", "F")).await.unwrap(), "EN-VOC-6-F-006");
    assert_eq!(store.generate_code(&Axes::new("EN", "VOC", "6", "F")).await.unwrap(), "EN-VOC-6-F-007");
  }

  #[tokio::test]
  async fn update_bumps_version_and_rejects_stale_writers() {
    let store = MemoryStore::with_records(vec![record("r1", "EN", "Q")]);
    let patch = RecordPatch { question_text: Some("Q2".into()), ..Default::default() };

    store.update("r1", &patch, Some(1)).await.unwrap();
    let rec = store.get("r1").await.unwrap();
    assert_eq!(rec.question_text, "Q2");
    assert_eq!(rec.version, 2);

    let err = store.update("r1", &patch, Some(1)).await.unwrap_err();
    assert_eq!(err, StoreError::Conflict { id: "r1".into(), expected: 1, found: 2 });
  }

  #[tokio::test]
  async fn missing_records_are_not_found() {
    let store = MemoryStore::new();
    assert!(matches!(store.get("nope").await, Err(StoreError::NotFound(_))));
    assert!(matches!(store.delete("nope").await, Err(StoreError::NotFound(_))));
  }

  #[tokio::test]
  async fn list_applies_filter() {
    let mut other = record("r2", "MA", "Q");
    other.axes.subject_code = "MA".into();
    let store = MemoryStore::with_records(vec![record("r1", "EN", "Q"), other]);
    let filter = RecordFilter { subject_code: Some("EN".into()), ..Default::default() };
    let found = store.list(&filter).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id_str(), "r1");
  }

  #[tokio::test]
  async fn slow_calls_time_out() {
    let res: Result<(), StoreError> = with_timeout(Duration::from_millis(10), async {
      tokio::time::sleep(Duration::from_millis(200)).await;
      Ok(())
    })
    .await;
    assert!(matches!(res, Err(StoreError::Timeout(_))));
  }
}
