//! Domain models used by the backend: flat question records, answer options,
//! modality tags and the ephemeral question group projection.
//!
//! Only `FlatQuestionRecord` is persisted. A `QuestionGroup` is recomputed from
//! records every time it is needed and has no identity of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which compound item kind a flat record belongs to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ModalityTag {
  /// Plain single-choice question (optionally with context text).
  StandardMc,
  /// Shared-context matching block; members carry the group marker.
  MatchingColumns,
  /// One record per blank of a passage.
  ClozeTest,
  /// One record per sub-question of a passage.
  ReadingComprehension,
}

impl ModalityTag {
  pub fn is_compound(self) -> bool {
    !matches!(self, ModalityTag::StandardMc)
  }
}

/// The four classification axes. Members of one group agree on all of them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Axes {
  pub subject_code: String,
  pub topic_code: String,
  pub grade: String,
  pub level_code: String,
}

impl Axes {
  pub fn new(subject: &str, topic: &str, grade: &str, level: &str) -> Self {
    Self {
      subject_code: subject.into(),
      topic_code: topic.into(),
      grade: grade.into(),
      level_code: level.into(),
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
  /// Letter, dense from 'A'.
  pub id: String,
  pub text: String,
  #[serde(default)] pub image_url: Option<String>,
  pub is_correct: bool,
}

/// One persisted single-choice question document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatQuestionRecord {
  #[serde(default)] pub id: Option<String>,
  #[serde(default)] pub code: String,
  #[serde(flatten)] pub axes: Axes,
  pub question_text: String,
  /// Overloaded: empty, a passage, or the matching-columns marker.
  #[serde(default)] pub informative_text: String,
  #[serde(default)] pub informative_images: Vec<String>,
  #[serde(default)] pub question_images: Vec<String>,
  pub options: Vec<AnswerOption>,
  pub created_at: DateTime<Utc>,

  // Explicit grouping attributes. Absent on legacy records.
  #[serde(default)] pub modality: Option<ModalityTag>,
  #[serde(default)] pub group_id: Option<String>,
  #[serde(default)] pub shared_text: Option<String>,
  #[serde(default)] pub version: u64,
}

impl FlatQuestionRecord {
  pub fn id_str(&self) -> &str {
    self.id.as_deref().unwrap_or("")
  }

  /// Written before explicit modality/group attributes existed.
  pub fn is_legacy(&self) -> bool {
    self.modality.is_none()
  }

  pub fn has_context(&self) -> bool {
    !self.informative_text.trim().is_empty()
  }

  /// Same stored record (by identity, or by id once persisted).
  pub fn is_same_record(&self, other: &FlatQuestionRecord) -> bool {
    if std::ptr::eq(self, other) {
      return true;
    }
    matches!((&self.id, &other.id), (Some(a), Some(b)) if a == b)
  }
}

/// Decoded form of the matching-columns marker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKey {
  pub group_id: String,
  #[serde(default)] pub shared_text: String,
}

/// Read/edit-time projection of N flat records forming one logical question.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionGroup {
  pub modality: ModalityTag,
  pub members: Vec<FlatQuestionRecord>,
  /// `id@version` of every member, sorted by id.
  pub epoch: String,
}

impl QuestionGroup {
  pub fn new(modality: ModalityTag, members: Vec<FlatQuestionRecord>) -> Self {
    let epoch = epoch_of(&members);
    Self { modality, members, epoch }
  }

  pub fn empty() -> Self {
    Self::new(ModalityTag::StandardMc, Vec::new())
  }

  pub fn ids(&self) -> Vec<&str> {
    self.members.iter().map(|m| m.id_str()).collect()
  }

  pub fn len(&self) -> usize {
    self.members.len()
  }
}

pub fn epoch_of(members: &[FlatQuestionRecord]) -> String {
  let mut parts: Vec<(String, u64)> = members
    .iter()
    .map(|m| (m.id_str().to_string(), m.version))
    .collect();
  parts.sort();
  parts
    .iter()
    .map(|(id, v)| format!("{id}@{v}"))
    .collect::<Vec<_>>()
    .join(",")
}

/// The shape of one record to persist, as produced by decomposition.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRecord {
  /// Id carried by the editor buffer; may be temporary.
  pub source_id: Option<String>,
  pub axes: Axes,
  pub question_text: String,
  pub informative_text: String,
  pub informative_images: Vec<String>,
  pub question_images: Vec<String>,
  pub options: Vec<AnswerOption>,
  pub modality: ModalityTag,
  pub group_id: Option<String>,
  pub shared_text: Option<String>,
  /// Creation time hint so that new members keep editor order.
  pub created_at: Option<DateTime<Utc>>,
}
