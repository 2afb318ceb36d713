//! Builders shared by unit tests.

use chrono::{DateTime, TimeZone, Utc};

use crate::domain::{AnswerOption, Axes, FlatQuestionRecord};

pub fn ts(secs: i64) -> DateTime<Utc> {
  Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn options(texts: &[&str], correct: usize) -> Vec<AnswerOption> {
  texts
    .iter()
    .enumerate()
    .map(|(i, t)| AnswerOption {
      id: ((b'A' + i as u8) as char).to_string(),
      text: (*t).to_string(),
      image_url: None,
      is_correct: i == correct,
    })
    .collect()
}

/// Legacy record on topic VOC, grade 6, level F.
pub fn record(id: &str, subject: &str, question_text: &str) -> FlatQuestionRecord {
  FlatQuestionRecord {
    id: Some(id.to_string()),
    code: format!("{subject}-VOC-6-F-{id}"),
    axes: Axes::new(subject, "VOC", "6", "F"),
    question_text: question_text.to_string(),
    informative_text: String::new(),
    informative_images: Vec::new(),
    question_images: Vec::new(),
    options: options(&["yes", "no"], 0),
    created_at: ts(0),
    modality: None,
    group_id: None,
    shared_text: None,
    version: 1,
  }
}
