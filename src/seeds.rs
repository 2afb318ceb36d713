//! Seed data: a small legacy-format question bank covering every modality.
//!
//! These records have no explicit modality or group id, like data written by
//! older clients, so the inference path is exercised from the first request.

use chrono::{DateTime, TimeZone, Utc};

use crate::codec::blank_prompt;
use crate::domain::{AnswerOption, Axes, FlatQuestionRecord};

fn at(minute: i64) -> DateTime<Utc> {
  Utc.timestamp_opt(1_704_067_200 + minute * 60, 0).single().unwrap_or_else(Utc::now)
}

fn opts(texts: &[&str], correct: usize) -> Vec<AnswerOption> {
  texts
    .iter()
    .zip(b'A'..=b'Z')
    .enumerate()
    .map(|(i, (t, letter))| AnswerOption {
      id: (letter as char).to_string(),
      text: (*t).to_string(),
      image_url: None,
      is_correct: i == correct,
    })
    .collect()
}

fn seed(id: &str, code: &str, axes: &Axes, question: &str, context: &str, options: Vec<AnswerOption>, minute: i64) -> FlatQuestionRecord {
  FlatQuestionRecord {
    id: Some(id.into()),
    code: code.into(),
    axes: axes.clone(),
    question_text: question.into(),
    informative_text: context.into(),
    informative_images: Vec::new(),
    question_images: Vec::new(),
    options,
    created_at: at(minute),
    modality: None,
    group_id: None,
    shared_text: None,
    version: 1,
  }
}

pub fn seed_records() -> Vec<FlatQuestionRecord> {
  let en = Axes::new("EN", "VOC", "6", "F");
  let ma = Axes::new("MA", "ARI", "6", "F");
  let cloze = "The cat [1] on the [2].";
  let story = "Tom found a small dog in the park. He took it home and called it Lucky.";
  let marker = "MATCHING_COLUMNS_VOC_6_F_1704067200000|Match each word with its meaning";

  vec![
    seed("seed-std-1", "EN-VOC-6-F-001", &en, "Which word is a colour?", "", opts(&["red", "run", "rain"], 0), 0),
    seed("seed-mc-1", "EN-VOC-6-F-002", &en, "dog", marker, opts(&["an animal", "a fruit"], 0), 1),
    seed("seed-mc-2", "EN-VOC-6-F-003", &en, "apple", marker, opts(&["an animal", "a fruit"], 1), 2),
    seed("seed-cz-2", "EN-VOC-6-F-004", &en, &blank_prompt(2), cloze, opts(&["mat", "roof", "floor"], 0), 3),
    seed("seed-cz-1", "EN-VOC-6-F-005", &en, &blank_prompt(1), cloze, opts(&["sat", "ran"], 0), 3),
    seed("seed-rc-1", "EN-VOC-6-F-006", &en, "Where did Tom find the dog?", story, opts(&["in the park", "at school"], 0), 4),
    seed("seed-rc-2", "EN-VOC-6-F-007", &en, "What is the dog called?", story, opts(&["Max", "Lucky"], 1), 5),
    seed("seed-ma-1", "MA-ARI-6-F-001", &ma, "How many apples are left?", "Ana has 3 apples and eats 1.", opts(&["2", "3"], 0), 6),
  ]
}
