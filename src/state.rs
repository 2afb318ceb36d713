//! Application state: storage and image collaborators, the group assembler
//! and the resolved configuration.
//!
//! Built once at startup and shared behind an `Arc` by every handler.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::assemble::GroupAssembler;
use crate::classify::ModalityClassifier;
use crate::config::{resolve_config, ServiceConfig};
use crate::media::{HttpImageUploader, ImageUploader};
use crate::reconcile::ApplyOptions;
use crate::seeds::seed_records;
use crate::store::{MemoryStore, QuestionStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QuestionStore>,
    pub uploader: Option<Arc<dyn ImageUploader>>,
    pub assembler: GroupAssembler,
    pub config: ServiceConfig,
}

impl AppState {
    /// Build state from env: load config, seed the memory store, init the uploader.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let config = resolve_config();

        let store = if config.seed_demo_data {
            let records = seed_records();
            info!(target: "quizgroup_backend", records = records.len(), "Memory store seeded with demo records");
            MemoryStore::with_records(records)
        } else {
            MemoryStore::new()
        };

        let uploader: Option<Arc<dyn ImageUploader>> = match HttpImageUploader::from_config(&config.media) {
            Some(up) => {
                info!(target: "quizgroup_backend", endpoint = %up.endpoint, "Image upload enabled.");
                Some(Arc::new(up))
            }
            None => {
                info!(target: "quizgroup_backend", "Image upload disabled (no upload_url). Images are stored inline.");
                None
            }
        };

        Self::with_parts(config, Arc::new(store), uploader)
    }

    pub fn with_parts(
        config: ServiceConfig,
        store: Arc<dyn QuestionStore>,
        uploader: Option<Arc<dyn ImageUploader>>,
    ) -> Self {
        let assembler = GroupAssembler::new(ModalityClassifier::new(config.engine.english_subject_code.clone()));
        Self { store, uploader, assembler, config }
    }

    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            max_in_flight: self.config.engine.max_in_flight,
            op_timeout: self.config.storage.op_timeout(),
        }
    }
}
