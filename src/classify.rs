//! Modality classification of a single flat record.
//!
//! Records written by this service carry an explicit `modality` and the tag is
//! read directly. Legacy records have no such column and the tag is inferred
//! from two text signals, with strict precedence:
//!   1. matching marker in `informativeText` (English only)
//!   2. blank-fill prompt in `questionText` with a passage (English only)
//!   3. a passage without either signal (non-English needs a sibling)
//!   4. standard multiple choice

use crate::codec::{is_matching_marker, BLANK_FILL_PHRASE};
use crate::domain::{FlatQuestionRecord, ModalityTag};

pub const DEFAULT_ENGLISH_SUBJECT: &str = "EN";

#[derive(Clone, Debug)]
pub struct ModalityClassifier {
  english_subject: String,
}

impl Default for ModalityClassifier {
  fn default() -> Self { Self::new(DEFAULT_ENGLISH_SUBJECT) }
}

impl ModalityClassifier {
  pub fn new(english_subject: impl Into<String>) -> Self {
    Self { english_subject: english_subject.into() }
  }

  pub fn is_english(&self, record: &FlatQuestionRecord) -> bool {
    record.axes.subject_code == self.english_subject
  }

  /// Pure: the same record and sibling set always yield the same tag.
  pub fn classify(&self, record: &FlatQuestionRecord, siblings: &[FlatQuestionRecord]) -> ModalityTag {
    match record.modality {
      Some(tag) => tag,
      None => self.infer(record, siblings),
    }
  }

  fn infer(&self, record: &FlatQuestionRecord, siblings: &[FlatQuestionRecord]) -> ModalityTag {
    let english = self.is_english(record);
    let marker = is_matching_marker(&record.informative_text);
    if english && marker {
      return ModalityTag::MatchingColumns;
    }

    let blank_fill = record.question_text.contains(BLANK_FILL_PHRASE);
    if english && record.has_context() && blank_fill {
      return ModalityTag::ClozeTest;
    }

    if record.has_context() && !marker && !blank_fill && (english || has_passage_sibling(record, siblings)) {
      return ModalityTag::ReadingComprehension;
    }

    ModalityTag::StandardMc
  }
}

/// Another legacy record, or a record explicitly tagged as reading, shares
/// this record's passage, images and topic/grade/level.
fn has_passage_sibling(record: &FlatQuestionRecord, siblings: &[FlatQuestionRecord]) -> bool {
  siblings.iter().any(|c| {
    !c.is_same_record(record)
      && (c.is_legacy() || c.modality == Some(ModalityTag::ReadingComprehension))
      && c.informative_text == record.informative_text
      && c.informative_images == record.informative_images
      && c.axes.topic_code == record.axes.topic_code
      && c.axes.grade == record.axes.grade
      && c.axes.level_code == record.axes.level_code
  })
}
