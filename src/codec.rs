//! Text conventions shared with existing stored data.
//!
//! - Matching/Columns marker: `MATCHING_COLUMNS_<groupId>` or
//!   `MATCHING_COLUMNS_<groupId>|<sharedText>` inside `informativeText`.
//! - Cloze prompts: `... completar el hueco [<n>]` as `questionText`.
//! - Cloze passages: blanks written as `[<n>]`.
//!
//! These strings are the compatibility surface with records written by older
//! clients and must be produced byte-for-byte.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Axes, GroupKey};

pub const MATCHING_MARKER_PREFIX: &str = "MATCHING_COLUMNS_";
pub const BLANK_FILL_PHRASE: &str = "completar el hueco";
const BLANK_PROMPT_LEAD: &str = "Selecciona la palabra correcta para completar el hueco";
const SHARED_TEXT_SEPARATOR: char = '|';

fn blank_prompt_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"hueco\s*\[(\d+)\]").expect("static regex"))
}

fn passage_blank_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("static regex"))
}

pub fn is_matching_marker(text: &str) -> bool {
  text.contains(MATCHING_MARKER_PREFIX)
}

/// Decode a matching-columns marker.
///
/// Everything before the first pipe (after the prefix) is the group id, the
/// rest is the shared text, embedded pipes included.
pub fn decode(informative_text: &str) -> GroupKey {
  let body = match informative_text.find(MATCHING_MARKER_PREFIX) {
    Some(at) => &informative_text[at + MATCHING_MARKER_PREFIX.len()..],
    None => informative_text,
  };
  match body.split_once(SHARED_TEXT_SEPARATOR) {
    Some((group_id, shared)) => GroupKey { group_id: group_id.to_string(), shared_text: shared.to_string() },
    None => GroupKey { group_id: body.to_string(), shared_text: String::new() },
  }
}

/// Encode a group id and optional shared text into the marker form.
///
/// A pipe inside the shared text cannot be told apart from the separator by
/// older readers; it is written anyway and reported.
pub fn encode(group_id: &str, shared_text: &str) -> String {
  let shared = shared_text.trim();
  if shared.is_empty() {
    return format!("{MATCHING_MARKER_PREFIX}{group_id}");
  }
  if shared.contains(SHARED_TEXT_SEPARATOR) || group_id.contains(SHARED_TEXT_SEPARATOR) {
    warn!(target: "codec", %group_id, "Matching marker text contains '|'; legacy readers will split it");
  }
  format!("{MATCHING_MARKER_PREFIX}{group_id}{SHARED_TEXT_SEPARATOR}{shared}")
}

/// Synthetic question text for one cloze blank.
pub fn blank_prompt(number: u32) -> String {
  format!("{BLANK_PROMPT_LEAD} [{number}]")
}

/// Blank number captured from a cloze prompt (`hueco [<n>]`).
pub fn blank_number(question_text: &str) -> Option<u32> {
  blank_prompt_re()
    .captures(question_text)
    .and_then(|c| c.get(1))
    .and_then(|m| m.as_str().parse().ok())
}

/// Distinct blank numbers found in a cloze passage, ascending.
pub fn passage_blanks(passage: &str) -> Vec<u32> {
  passage_blank_re()
    .captures_iter(passage)
    .filter_map(|c| c.get(1).and_then(|m| m.as_str().parse::<u32>().ok()))
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect()
}

/// Fresh group id for a new compound group:
/// `topic_grade_level_<millis>_<random>`, unique even within one millisecond.
pub fn mint_group_id(axes: &Axes, now: DateTime<Utc>) -> String {
  let nonce = Uuid::new_v4().simple().to_string();
  format!(
    "{}_{}_{}_{}_{}",
    axes.topic_code,
    axes.grade,
    axes.level_code,
    now.timestamp_millis(),
    &nonce[..8]
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn encode_without_shared_text_is_bare_marker() {
    assert_eq!(encode("VOC_6_F_1000", ""), "MATCHING_COLUMNS_VOC_6_F_1000");
    assert_eq!(encode("VOC_6_F_1000", "   "), "MATCHING_COLUMNS_VOC_6_F_1000");
  }

  #[test]
  fn encode_with_shared_text_appends_after_pipe() {
    assert_eq!(
      encode("VOC_6_F_1000", "Match the words"),
      "MATCHING_COLUMNS_VOC_6_F_1000|Match the words"
    );
    assert_eq!(encode("G", "  padded  "), "MATCHING_COLUMNS_G|padded");
  }

  #[test]
  fn decode_round_trips_pipe_free_text() {
    for (gid, shared) in [("VOC_6_F_1000", ""), ("A_1_B_2", "Join the halves"), ("x", "línea con acentos")] {
      let key = decode(&encode(gid, shared));
      assert_eq!(key, GroupKey { group_id: gid.into(), shared_text: shared.into() });
    }
  }

  #[test]
  fn decode_keeps_embedded_pipes_in_shared_text() {
    let key = decode("MATCHING_COLUMNS_G1|left | right");
    assert_eq!(key.group_id, "G1");
    assert_eq!(key.shared_text, "left | right");
  }

  #[test]
  fn decode_without_prefix_uses_whole_text() {
    assert_eq!(decode("plain").group_id, "plain");
    assert_eq!(decode("<p>MATCHING_COLUMNS_G9</p>").group_id, "G9</p>");
  }

  #[test]
  fn blank_prompt_carries_phrase_and_number() {
    let p = blank_prompt(3);
    assert!(p.contains(BLANK_FILL_PHRASE));
    assert!(p.contains("hueco [3]"));
    assert_eq!(blank_number(&p), Some(3));
    assert_eq!(blank_number("no blank here"), None);
  }

  #[test]
  fn passage_blanks_are_distinct_and_sorted() {
    assert_eq!(passage_blanks("The [2] cat [1] on the [2]. [10]"), vec![1, 2, 10]);
    assert!(passage_blanks("nothing").is_empty());
  }

  #[test]
  fn minted_group_ids_use_axes_and_millis_and_never_repeat() {
    let now = Utc.timestamp_millis_opt(1_000).unwrap();
    let axes = Axes::new("EN", "VOC", "6", "F");
    let a = mint_group_id(&axes, now);
    let b = mint_group_id(&axes, now);
    assert!(a.starts_with("VOC_6_F_1000_"), "{a}");
    assert_eq!(a.len(), "VOC_6_F_1000_".len() + 8);
    assert!(!a.contains('|'));
    assert_ne!(a, b);
  }
}
