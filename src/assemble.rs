//! Group assembly: expand a seed record into the ordered sibling set that
//! forms one logical question, and partition a record set into groups for the
//! list view.
//!
//! Membership is an equivalence relation over records on the same axes:
//!   - matching members share a group id (explicit field, else the decoded marker)
//!   - cloze and reading members share passage text and passage images
//!
//! Explicit records and legacy records of the same shape join one group, so a
//! group whose migration was only partly applied still opens as a whole.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::{debug, instrument};

use crate::classify::ModalityClassifier;
use crate::codec::{blank_number, decode, is_matching_marker, BLANK_FILL_PHRASE};
use crate::domain::{FlatQuestionRecord, ModalityTag, QuestionGroup};

#[derive(Clone, Debug, Default)]
pub struct GroupAssembler {
  classifier: ModalityClassifier,
}

impl GroupAssembler {
  pub fn new(classifier: ModalityClassifier) -> Self {
    Self { classifier }
  }

  #[instrument(level = "debug", skip_all, fields(seed = %seed.id_str(), candidates = all.len()))]
  pub fn assemble(&self, seed: &FlatQuestionRecord, all: &[FlatQuestionRecord]) -> QuestionGroup {
    let mut tag = self.classifier.classify(seed, all);

    let mut members: Vec<FlatQuestionRecord> = if !tag.is_compound() {
      vec![seed.clone()]
    } else {
      let mut found: Vec<FlatQuestionRecord> = all
        .iter()
        .filter(|c| self.same_group(seed, tag, c))
        .cloned()
        .collect();
      if !found.iter().any(|m| m.is_same_record(seed)) {
        found.push(seed.clone());
      }
      found
    };

    // A lone passage-based record outside English is just a standard item.
    if members.len() < 2
      && matches!(tag, ModalityTag::ReadingComprehension | ModalityTag::ClozeTest)
      && !self.classifier.is_english(seed)
    {
      tag = ModalityTag::StandardMc;
      members = vec![seed.clone()];
    }

    members.sort_by(|a, b| member_order(tag, a, b));
    debug!(target: "assemble", modality = ?tag, size = members.len(), "Group assembled");
    QuestionGroup::new(tag, members)
  }

  /// Every record lands in exactly one group; groups follow the order of
  /// their earliest member.
  pub fn partition(&self, all: &[FlatQuestionRecord]) -> Vec<QuestionGroup> {
    let mut ordered: Vec<&FlatQuestionRecord> = all.iter().collect();
    ordered.sort_by(|a, b| member_order(ModalityTag::StandardMc, a, b));

    let mut seen: HashSet<String> = HashSet::new();
    let mut groups = Vec::new();
    for rec in ordered {
      if seen.contains(rec.id_str()) {
        continue;
      }
      let group = self.assemble(rec, all);
      for m in &group.members {
        seen.insert(m.id_str().to_string());
      }
      groups.push(group);
    }
    groups
  }

  fn same_group(&self, seed: &FlatQuestionRecord, tag: ModalityTag, cand: &FlatQuestionRecord) -> bool {
    if cand.is_same_record(seed) {
      return true;
    }
    if cand.axes != seed.axes {
      return false;
    }
    let same_passage =
      cand.informative_text == seed.informative_text && cand.informative_images == seed.informative_images;

    match tag {
      ModalityTag::MatchingColumns => self.could_be(cand, tag) && matching_key(cand) == matching_key(seed),
      ModalityTag::ClozeTest | ModalityTag::ReadingComprehension => same_passage && self.could_be(cand, tag),
      ModalityTag::StandardMc => false,
    }
  }

  /// Whether `cand` has the shape of a `tag` member: its explicit tag, or the
  /// legacy text signals for that modality.
  fn could_be(&self, cand: &FlatQuestionRecord, tag: ModalityTag) -> bool {
    if let Some(explicit) = cand.modality {
      return explicit == tag;
    }
    let marker = is_matching_marker(&cand.informative_text);
    let blank_fill = cand.question_text.contains(BLANK_FILL_PHRASE);
    match tag {
      ModalityTag::MatchingColumns => self.classifier.is_english(cand) && marker,
      ModalityTag::ClozeTest => self.classifier.is_english(cand) && !marker && blank_fill,
      ModalityTag::ReadingComprehension => !marker && !blank_fill,
      ModalityTag::StandardMc => false,
    }
  }
}

fn matching_key(rec: &FlatQuestionRecord) -> String {
  match &rec.group_id {
    Some(gid) => gid.clone(),
    None => decode(&rec.informative_text).group_id,
  }
}

/// Cloze members by blank number (unnumbered last); everything by creation
/// time, then code, then id.
fn member_order(tag: ModalityTag, a: &FlatQuestionRecord, b: &FlatQuestionRecord) -> Ordering {
  let by_blank = if tag == ModalityTag::ClozeTest {
    match (blank_number(&a.question_text), blank_number(&b.question_text)) {
      (Some(x), Some(y)) => x.cmp(&y),
      (Some(_), None) => Ordering::Less,
      (None, Some(_)) => Ordering::Greater,
      (None, None) => Ordering::Equal,
    }
  } else {
    Ordering::Equal
  };
  by_blank
    .then_with(|| a.created_at.cmp(&b.created_at))
    .then_with(|| a.code.cmp(&b.code))
    .then_with(|| a.id.cmp(&b.id))
}
