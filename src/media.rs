//! Image collaborator: upload editor images and fall back to inline data URLs.
//!
//! Upload failures never fail a save. When no uploader is configured, the
//! upload errors, or it exceeds its deadline, the image is kept as a
//! self-contained `data:<mime>;base64,...` reference.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::MediaConfig;
use crate::draft::{GroupDraft, ImageInput, SharedFields};

#[derive(Error, Debug)]
pub enum MediaError {
  #[error("upload request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("upload rejected with HTTP {0}")]
  Status(u16),

  #[error("upload timed out after {0:?}")]
  Timeout(Duration),

  #[error("inline image is not valid base64: {0}")]
  Decode(#[from] base64::DecodeError),
}

#[async_trait]
pub trait ImageUploader: Send + Sync {
  /// Store the bytes and return a public URL.
  async fn upload(&self, bytes: &[u8], mime: &str, path_hint: &str) -> Result<String, MediaError>;
}

/// POSTs raw bytes to `<endpoint>?path=<hint>` and expects `{"url": "..."}`.
#[derive(Clone)]
pub struct HttpImageUploader {
  pub client: reqwest::Client,
  pub endpoint: String,
}

#[derive(Deserialize)]
struct UploadResponse {
  url: String,
}

impl HttpImageUploader {
  /// Construct the uploader if an endpoint is configured; otherwise return None.
  pub fn from_config(cfg: &MediaConfig) -> Option<Self> {
    let endpoint = cfg.upload_url.clone().filter(|u| !u.trim().is_empty())?;
    match reqwest::Client::builder().timeout(cfg.timeout()).build() {
      Ok(client) => Some(Self { client, endpoint }),
      Err(e) => {
        error!(target: "media", %endpoint, error = %e, "Failed to build upload HTTP client; images will be stored inline");
        None
      }
    }
  }
}

#[async_trait]
impl ImageUploader for HttpImageUploader {
  #[instrument(level = "info", skip(self, bytes), fields(size = bytes.len()))]
  async fn upload(&self, bytes: &[u8], mime: &str, path_hint: &str) -> Result<String, MediaError> {
    let res = self
      .client
      .post(&self.endpoint)
      .query(&[("path", path_hint)])
      .header(USER_AGENT, "quizgroup-backend/0.1")
      .header(CONTENT_TYPE, mime)
      .body(bytes.to_vec())
      .send()
      .await?;
    if !res.status().is_success() {
      return Err(MediaError::Status(res.status().as_u16()));
    }
    let body: UploadResponse = res.json().await?;
    Ok(body.url)
  }
}

pub fn inline_data_url(bytes: &[u8], mime: &str) -> String {
  format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Upload with a deadline; any failure yields the inline representation.
pub async fn upload_or_inline(
  uploader: Option<&dyn ImageUploader>,
  bytes: &[u8],
  mime: &str,
  path_hint: &str,
  limit: Duration,
) -> String {
  let Some(up) = uploader else {
    return inline_data_url(bytes, mime);
  };
  let res = match tokio::time::timeout(limit, up.upload(bytes, mime, path_hint)).await {
    Ok(r) => r,
    Err(_) => Err(MediaError::Timeout(limit)),
  };
  match res {
    Ok(url) => url,
    Err(e) => {
      warn!(target: "media", %path_hint, error = %e, "Image upload failed; storing inline");
      inline_data_url(bytes, mime)
    }
  }
}

/// Replace every inline image of the draft with a stored reference.
/// Returns how many images were processed.
#[instrument(level = "info", skip_all)]
pub async fn resolve_images(
  draft: &mut GroupDraft,
  shared: &mut SharedFields,
  uploader: Option<&dyn ImageUploader>,
  limit: Duration,
) -> usize {
  let folder = format!(
    "questions/{}/{}/{}",
    shared.axes.subject_code, shared.axes.topic_code, shared.axes.level_code
  );

  let mut slots: Vec<&mut ImageInput> = shared.informative_images.iter_mut().collect();
  for images in draft.question_images_mut() {
    slots.extend(images.iter_mut());
  }

  let mut processed = 0;
  for slot in slots {
    let ImageInput::Inline { mime, data_base64 } = &*slot else { continue };
    let bytes = match STANDARD.decode(data_base64.as_bytes()) {
      Ok(b) => b,
      Err(e) => {
        warn!(target: "media", error = %e, "Inline image is not valid base64; keeping it as sent");
        continue;
      }
    };
    let hint = format!("{folder}/{}", Uuid::new_v4().simple());
    let url = upload_or_inline(uploader, &bytes, mime, &hint, limit).await;
    *slot = ImageInput::Stored { url };
    processed += 1;
  }
  if processed > 0 {
    info!(target: "media", processed, "Draft images resolved");
  }
  processed
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Axes;
  use crate::draft::{BlankDraft, OptionDraft, QuestionDraft};

  struct FixedUploader(Result<&'static str, u16>);

  #[async_trait]
  impl ImageUploader for FixedUploader {
    async fn upload(&self, _bytes: &[u8], _mime: &str, path_hint: &str) -> Result<String, MediaError> {
      match self.0 {
        Ok(base) => Ok(format!("{base}/{path_hint}")),
        Err(code) => Err(MediaError::Status(code)),
      }
    }
  }

  struct SlowUploader;

  #[async_trait]
  impl ImageUploader for SlowUploader {
    async fn upload(&self, _bytes: &[u8], _mime: &str, _path_hint: &str) -> Result<String, MediaError> {
      tokio::time::sleep(Duration::from_millis(500)).await;
      Ok("https://late".into())
    }
  }

  #[test]
  fn uploader_needs_a_configured_url() {
    let mut cfg = MediaConfig::default();
    assert!(HttpImageUploader::from_config(&cfg).is_none());
    cfg.upload_url = Some("  ".into());
    assert!(HttpImageUploader::from_config(&cfg).is_none());
    cfg.upload_url = Some("https://media.example.org/upload".into());
    let up = HttpImageUploader::from_config(&cfg).unwrap();
    assert_eq!(up.endpoint, "https://media.example.org/upload");
  }

  #[tokio::test]
  async fn cloze_blank_images_are_uploaded() {
    let mut blanks = std::collections::BTreeMap::new();
    blanks.insert(
      1,
      BlankDraft {
        id: None,
        question_images: vec![ImageInput::Inline { mime: "image/png".into(), data_base64: "YWJj".into() }],
        options: vec![],
      },
    );
    let mut draft = GroupDraft::ClozeTest { group_id: None, passage: "A [1].".into(), blanks, unplaced: vec![] };
    let mut shared = SharedFields { axes: Axes::new("EN", "VOC", "6", "F"), informative_images: vec![] };
    let up = FixedUploader(Ok("https://cdn"));
    assert_eq!(resolve_images(&mut draft, &mut shared, Some(&up), Duration::from_secs(1)).await, 1);
    match &draft {
      GroupDraft::ClozeTest { blanks, .. } => {
        assert!(matches!(&blanks[&1].question_images[0], ImageInput::Stored { url } if url.starts_with("https://cdn/")));
      }
      other => panic!("unexpected draft {other:?}"),
    }
  }

  #[tokio::test]
  async fn no_uploader_means_inline() {
    let url = upload_or_inline(None, b"abc", "image/png", "x", Duration::from_secs(1)).await;
    assert_eq!(url, "data:image/png;base64,YWJj");
  }

  #[tokio::test]
  async fn rejected_upload_falls_back_to_inline() {
    let up = FixedUploader(Err(503));
    let url = upload_or_inline(Some(&up), b"abc", "image/jpeg", "x", Duration::from_secs(1)).await;
    assert!(url.starts_with("data:image/jpeg;base64,"));
  }

  #[tokio::test]
  async fn slow_upload_falls_back_to_inline() {
    let url = upload_or_inline(Some(&SlowUploader), b"abc", "image/png", "x", Duration::from_millis(20)).await;
    assert!(url.starts_with("data:"));
  }

  #[tokio::test]
  async fn resolve_replaces_inline_images_in_place() {
    let mut shared = SharedFields {
      axes: Axes::new("EN", "VOC", "6", "F"),
      informative_images: vec![
        ImageInput::Stored { url: "https://kept".into() },
        ImageInput::Inline { mime: "image/png".into(), data_base64: "YWJj".into() },
      ],
    };
    let mut draft = GroupDraft::StandardMc {
      question: QuestionDraft {
        id: None,
        question_text: "Q".into(),
        question_images: vec![ImageInput::Inline { mime: "image/png".into(), data_base64: "not base64!".into() }],
        options: vec![OptionDraft::default()],
      },
      context_text: String::new(),
    };

    let up = FixedUploader(Ok("https://cdn"));
    let n = resolve_images(&mut draft, &mut shared, Some(&up), Duration::from_secs(1)).await;
    assert_eq!(n, 1);
    assert_eq!(shared.informative_images[0], ImageInput::Stored { url: "https://kept".into() });
    match &shared.informative_images[1] {
      ImageInput::Stored { url } => assert!(url.starts_with("https://cdn/questions/EN/VOC/F/")),
      other => panic!("still inline: {other:?}"),
    }
    // Undecodable payloads are left untouched.
    match &draft.question_images_mut()[0][0] {
      ImageInput::Inline { .. } => {}
      other => panic!("unexpected {other:?}"),
    }
  }
}
