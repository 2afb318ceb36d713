//! Decomposition of an edited logical question into the ordered list of flat
//! records to persist.
//!
//! Validation runs first and collects every problem; nothing is emitted when
//! any check fails.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::codec::{blank_prompt, encode, mint_group_id, passage_blanks};
use crate::domain::{AnswerOption, ModalityTag, TargetRecord};
use crate::draft::{GroupDraft, OptionDraft, QuestionDraft, SharedFields};
use crate::error::ValidationErrors;

const MIN_OPTIONS: usize = 2;
/// One letter per option.
const MAX_OPTIONS: usize = 26;

#[instrument(level = "debug", skip_all, fields(modality = ?draft.modality()))]
pub fn decompose(
  draft: &GroupDraft,
  shared: &SharedFields,
  now: DateTime<Utc>,
) -> Result<Vec<TargetRecord>, ValidationErrors> {
  let mut errs = ValidationErrors::default();
  validate_shared(shared, &mut errs);

  let informative_images: Vec<String> = shared.informative_images.iter().map(|i| i.to_reference()).collect();
  let base = |modality: ModalityTag, group_id: Option<String>, informative_text: String| TargetRecord {
    source_id: None,
    axes: shared.axes.clone(),
    question_text: String::new(),
    informative_text,
    informative_images: informative_images.clone(),
    question_images: Vec::new(),
    options: Vec::new(),
    modality,
    group_id,
    shared_text: None,
    created_at: None,
  };

  let targets: Vec<TargetRecord> = match draft {
    GroupDraft::StandardMc { question, context_text } => {
      validate_question("question", question, &mut errs);
      let context = if context_text.trim().is_empty() { String::new() } else { context_text.clone() };
      vec![with_question(base(ModalityTag::StandardMc, None, context), question)]
    }

    GroupDraft::MatchingColumns { group_id, shared_text, items } => {
      validate_items(items, &mut errs);
      let gid = stable_group_id(group_id, shared, now);
      let marker = encode(&gid, shared_text);
      let shared_text = Some(shared_text.trim().to_string()).filter(|s| !s.is_empty());
      items
        .iter()
        .map(|q| {
          let mut t = with_question(base(ModalityTag::MatchingColumns, Some(gid.clone()), marker.clone()), q);
          t.shared_text = shared_text.clone();
          t
        })
        .collect()
    }

    GroupDraft::ClozeTest { group_id, passage, blanks, unplaced } => {
      if passage.trim().is_empty() {
        errs.add("passage", "passage must not be empty");
      }
      for (i, q) in unplaced.iter().enumerate() {
        errs.add(
          format!("unplaced[{i}]"),
          format!(
            "'{}' has no free blank in the passage; add its blank or remove it",
            q.id.as_deref().unwrap_or("new item")
          ),
        );
      }
      let numbers = passage_blanks(passage);
      if numbers.is_empty() {
        errs.add("blanks", "no blank markers like [1] found in the passage");
      }
      let gid = stable_group_id(group_id, shared, now);
      let mut out = Vec::with_capacity(numbers.len());
      for n in numbers {
        let prefix = format!("blanks[{n}]");
        let Some(blank) = blanks.get(&n) else {
          errs.add(format!("{prefix}.options"), "no options entered for this blank");
          continue;
        };
        validate_options(&prefix, &blank.options, &mut errs);
        let mut t = base(ModalityTag::ClozeTest, Some(gid.clone()), passage.clone());
        t.source_id = blank.id.clone();
        t.question_text = blank_prompt(n);
        t.question_images = blank.question_images.iter().map(|i| i.to_reference()).collect();
        t.options = build_options(&blank.options);
        out.push(t);
      }
      out
    }

    GroupDraft::ReadingComprehension { group_id, passage, items } => {
      if passage.trim().is_empty() {
        errs.add("passage", "passage must not be empty");
      }
      validate_items(items, &mut errs);
      let gid = stable_group_id(group_id, shared, now);
      items
        .iter()
        .map(|q| with_question(base(ModalityTag::ReadingComprehension, Some(gid.clone()), passage.clone()), q))
        .collect()
    }
  };

  errs.into_result()?;
  debug!(target: "decompose", targets = targets.len(), "Draft decomposed");
  Ok(targets)
}

fn stable_group_id(existing: &Option<String>, shared: &SharedFields, now: DateTime<Utc>) -> String {
  match existing.as_deref().map(str::trim) {
    Some(gid) if !gid.is_empty() => gid.to_string(),
    _ => mint_group_id(&shared.axes, now),
  }
}

fn with_question(mut t: TargetRecord, q: &QuestionDraft) -> TargetRecord {
  t.source_id = q.id.clone();
  t.question_text = q.question_text.clone();
  t.question_images = q.question_images.iter().map(|i| i.to_reference()).collect();
  t.options = build_options(&q.options);
  t
}

/// Letters are assigned densely from 'A' in author order.
fn build_options(drafts: &[OptionDraft]) -> Vec<AnswerOption> {
  drafts
    .iter()
    .zip(b'A'..=b'Z')
    .map(|(o, letter)| AnswerOption {
      id: (letter as char).to_string(),
      text: o.text.trim().to_string(),
      image_url: o.image_url.clone().filter(|u| !u.trim().is_empty()),
      is_correct: o.is_correct,
    })
    .collect()
}

fn validate_shared(shared: &SharedFields, errs: &mut ValidationErrors) {
  let axes = &shared.axes;
  for (field, value) in [
    ("subjectCode", &axes.subject_code),
    ("topicCode", &axes.topic_code),
    ("grade", &axes.grade),
    ("levelCode", &axes.level_code),
  ] {
    if value.trim().is_empty() {
      errs.add(field, "required");
    }
  }
}

fn validate_items(items: &[QuestionDraft], errs: &mut ValidationErrors) {
  if items.is_empty() {
    errs.add("items", "at least one sub-question is required");
  }
  for (i, q) in items.iter().enumerate() {
    validate_question(&format!("items[{i}]"), q, errs);
  }
}

fn validate_question(prefix: &str, q: &QuestionDraft, errs: &mut ValidationErrors) {
  if q.question_text.trim().is_empty() {
    errs.add(format!("{prefix}.questionText"), "question text must not be empty");
  }
  validate_options(prefix, &q.options, errs);
}

fn validate_options(prefix: &str, options: &[OptionDraft], errs: &mut ValidationErrors) {
  if options.len() < MIN_OPTIONS {
    errs.add(format!("{prefix}.options"), format!("at least {MIN_OPTIONS} options are required"));
  } else if options.len() > MAX_OPTIONS {
    errs.add(format!("{prefix}.options"), format!("at most {MAX_OPTIONS} options are supported"));
  }
  for (j, o) in options.iter().enumerate() {
    if o.text.trim().is_empty() {
      errs.add(format!("{prefix}.options[{j}].text"), "option text must not be empty");
    }
  }
  let correct = options.iter().filter(|o| o.is_correct).count();
  if correct != 1 {
    errs.add(
      format!("{prefix}.correctOption"),
      format!("exactly one option must be marked correct (found {correct})"),
    );
  }
}
