//! Public protocol structs for the HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and editor independently.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{FlatQuestionRecord, ModalityTag, QuestionGroup};
use crate::draft::{GroupDraft, SharedFields};
use crate::logic::OpenedGroup;
use crate::reconcile::{MemberFailure, ReconcileOutcome};
use crate::store::CreatedRecord;

/// DTO for one assembled group.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupOut {
    pub modality: ModalityTag,
    pub epoch: String,
    pub size: usize,
    pub members: Vec<FlatQuestionRecord>,
}

pub fn group_out(g: QuestionGroup) -> GroupOut {
    GroupOut {
        modality: g.modality,
        size: g.members.len(),
        epoch: g.epoch,
        members: g.members,
    }
}

#[derive(Debug, Serialize)]
pub struct GroupsOut {
    pub groups: Vec<GroupOut>,
}

/// Group opened for editing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenGroupOut {
    pub group: GroupOut,
    pub draft: GroupDraft,
    pub shared: SharedFields,
}

impl From<OpenedGroup> for OpenGroupOut {
    fn from(o: OpenedGroup) -> Self {
        Self { group: group_out(o.group), draft: o.draft, shared: o.shared }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveGroupIn {
    pub draft: GroupDraft,
    pub shared: SharedFields,
    /// Any member id of the group being edited; absent when creating.
    #[serde(default)]
    pub seed_id: Option<String>,
    /// Epoch returned when the group was opened.
    #[serde(default)]
    pub epoch: Option<String>,
}

/// Result of a save or delete.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeOut {
    pub complete: bool,
    pub success_count: usize,
    pub failure_count: usize,
    pub created: Vec<CreatedRecord>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub deleted: Vec<String>,
    pub failures: Vec<MemberFailure>,
}

impl From<ReconcileOutcome> for OutcomeOut {
    fn from(o: ReconcileOutcome) -> Self {
        Self {
            complete: o.is_complete(),
            success_count: o.success_count(),
            failure_count: o.failure_count(),
            created: o.created,
            updated: o.updated,
            unchanged: o.unchanged,
            deleted: o.deleted,
            failures: o.failures,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub message: String,
    /// Field path to reason, for validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
    /// Member calls that failed, when a batch was only partly applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<Vec<MemberFailure>>,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
