//! Editor buffer types for one logical question, and the inverse mapping used
//! when a persisted group is opened for editing.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::codec::{blank_number, decode, passage_blanks};
use crate::domain::{Axes, FlatQuestionRecord, ModalityTag, QuestionGroup};

/// Prefix of editor-side ids for items that were never saved.
pub const TEMP_ID_PREFIX: &str = "tmp_";

pub fn is_temporary_id(id: &str) -> bool {
  id.starts_with(TEMP_ID_PREFIX)
}

/// An image reference as sent by the editor: either already stored, or inline
/// bytes still waiting for upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ImageInput {
  Stored { url: String },
  Inline {
    mime: String,
    #[serde(rename = "dataBase64")]
    data_base64: String,
  },
}

impl ImageInput {
  /// The string persisted in the record. Inline images that never got
  /// uploaded are kept as a data URL.
  pub fn to_reference(&self) -> String {
    match self {
      ImageInput::Stored { url } => url.clone(),
      ImageInput::Inline { mime, data_base64 } => format!("data:{mime};base64,{data_base64}"),
    }
  }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionDraft {
  pub text: String,
  #[serde(default)] pub image_url: Option<String>,
  #[serde(default)] pub is_correct: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
  #[serde(default)] pub id: Option<String>,
  pub question_text: String,
  #[serde(default)] pub question_images: Vec<ImageInput>,
  pub options: Vec<OptionDraft>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlankDraft {
  #[serde(default)] pub id: Option<String>,
  #[serde(default)] pub question_images: Vec<ImageInput>,
  pub options: Vec<OptionDraft>,
}

/// Fields common to every member of the group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedFields {
  #[serde(flatten)] pub axes: Axes,
  #[serde(default)] pub informative_images: Vec<ImageInput>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GroupDraft {
  StandardMc {
    question: QuestionDraft,
    #[serde(default)] context_text: String,
  },
  MatchingColumns {
    #[serde(default)] group_id: Option<String>,
    #[serde(default)] shared_text: String,
    items: Vec<QuestionDraft>,
  },
  ClozeTest {
    #[serde(default)] group_id: Option<String>,
    passage: String,
    /// Author-entered options, keyed by blank number.
    #[serde(deserialize_with = "blank_map")]
    blanks: BTreeMap<u32, BlankDraft>,
    /// Stored members with no free blank of the passage (number missing,
    /// duplicated, or not in the text). A save is refused until each one is
    /// removed, which deletes it.
    #[serde(default)]
    unplaced: Vec<QuestionDraft>,
  },
  ReadingComprehension {
    #[serde(default)] group_id: Option<String>,
    passage: String,
    items: Vec<QuestionDraft>,
  },
}

// JSON object keys arrive as strings, and the tagged enum buffers them before
// the map sees them, so numeric keys are parsed here.
fn blank_map<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<u32, BlankDraft>, D::Error> {
  BTreeMap::<String, BlankDraft>::deserialize(d)?
    .into_iter()
    .map(|(k, v)| match k.trim().parse::<u32>() {
      Ok(n) => Ok((n, v)),
      Err(_) => Err(D::Error::custom(format!("blank key '{k}' is not a number"))),
    })
    .collect()
}

impl GroupDraft {
  pub fn modality(&self) -> ModalityTag {
    match self {
      GroupDraft::StandardMc { .. } => ModalityTag::StandardMc,
      GroupDraft::MatchingColumns { .. } => ModalityTag::MatchingColumns,
      GroupDraft::ClozeTest { .. } => ModalityTag::ClozeTest,
      GroupDraft::ReadingComprehension { .. } => ModalityTag::ReadingComprehension,
    }
  }

  /// Every per-question image list of the draft.
  pub fn question_images_mut(&mut self) -> Vec<&mut Vec<ImageInput>> {
    match self {
      GroupDraft::StandardMc { question, .. } => vec![&mut question.question_images],
      GroupDraft::MatchingColumns { items, .. } | GroupDraft::ReadingComprehension { items, .. } => {
        items.iter_mut().map(|q| &mut q.question_images).collect()
      }
      GroupDraft::ClozeTest { blanks, unplaced, .. } => blanks
        .values_mut()
        .map(|b| &mut b.question_images)
        .chain(unplaced.iter_mut().map(|q| &mut q.question_images))
        .collect(),
    }
  }
}

/// Build the editor buffer for a persisted group.
pub fn draft_from_group(group: &QuestionGroup) -> (GroupDraft, SharedFields) {
  let Some(seed) = group.members.first() else {
    return (
      GroupDraft::StandardMc { question: QuestionDraft::default(), context_text: String::new() },
      SharedFields::default(),
    );
  };

  let shared = SharedFields {
    axes: seed.axes.clone(),
    informative_images: stored_images(&seed.informative_images),
  };

  let draft = match group.modality {
    ModalityTag::StandardMc => GroupDraft::StandardMc {
      question: question_draft(seed),
      context_text: seed.informative_text.clone(),
    },
    ModalityTag::MatchingColumns => {
      let key = decode(&seed.informative_text);
      GroupDraft::MatchingColumns {
        group_id: existing_group_id(group).or(Some(key.group_id)),
        shared_text: seed.shared_text.clone().unwrap_or(key.shared_text),
        items: group.members.iter().map(question_draft).collect(),
      }
    }
    ModalityTag::ClozeTest => {
      let in_passage = passage_blanks(&seed.informative_text);
      let mut blanks = BTreeMap::new();
      let mut unplaced = Vec::new();
      for m in &group.members {
        match blank_number(&m.question_text) {
          Some(n) if in_passage.contains(&n) && !blanks.contains_key(&n) => {
            blanks.insert(
              n,
              BlankDraft { id: m.id.clone(), question_images: stored_images(&m.question_images), options: option_drafts(m) },
            );
          }
          _ => unplaced.push(question_draft(m)),
        }
      }
      GroupDraft::ClozeTest {
        group_id: existing_group_id(group),
        passage: seed.informative_text.clone(),
        blanks,
        unplaced,
      }
    }
    ModalityTag::ReadingComprehension => GroupDraft::ReadingComprehension {
      group_id: existing_group_id(group),
      passage: seed.informative_text.clone(),
      items: group.members.iter().map(question_draft).collect(),
    },
  };
  (draft, shared)
}

/// Group id already carried by any member; a half-migrated group keeps the
/// id its migrated members have.
fn existing_group_id(group: &QuestionGroup) -> Option<String> {
  group.members.iter().find_map(|m| m.group_id.clone())
}

fn stored_images(urls: &[String]) -> Vec<ImageInput> {
  urls.iter().map(|url| ImageInput::Stored { url: url.clone() }).collect()
}

fn question_draft(rec: &FlatQuestionRecord) -> QuestionDraft {
  QuestionDraft {
    id: rec.id.clone(),
    question_text: rec.question_text.clone(),
    question_images: stored_images(&rec.question_images),
    options: option_drafts(rec),
  }
}

fn option_drafts(rec: &FlatQuestionRecord) -> Vec<OptionDraft> {
  rec.options
    .iter()
    .map(|o| OptionDraft { text: o.text.clone(), image_url: o.image_url.clone(), is_correct: o.is_correct })
    .collect()
}
