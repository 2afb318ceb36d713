//! Core behaviors shared by the HTTP handlers.
//!
//! This includes:
//!   - Listing records as assembled groups (list view)
//!   - Opening a group for editing (group + editor draft + epoch)
//!   - Saving an edited group (validate, snapshot check, images, decompose, reconcile)
//!   - Deleting every member of a group

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::decompose::decompose;
use crate::domain::QuestionGroup;
use crate::draft::{draft_from_group, GroupDraft, SharedFields};
use crate::error::{EngineError, Result};
use crate::media::resolve_images;
use crate::reconcile::{self, ReconcileOutcome};
use crate::state::AppState;
use crate::store::{with_timeout, RecordFilter, StoreError};

#[derive(Clone, Debug)]
pub struct OpenedGroup {
  pub group: QuestionGroup,
  pub draft: GroupDraft,
  pub shared: SharedFields,
}

fn not_found(id: &str) -> impl FnOnce(StoreError) -> EngineError + '_ {
  move |e| match e {
    StoreError::NotFound(_) => EngineError::NotFound(id.to_string()),
    other => EngineError::Store(other),
  }
}

#[instrument(level = "info", skip(state))]
pub async fn list_groups(state: &AppState, filter: &RecordFilter) -> Result<Vec<QuestionGroup>> {
  let limit = state.config.storage.op_timeout();
  let records = with_timeout(limit, state.store.list(filter)).await?;
  let groups = state.assembler.partition(&records);
  info!(target: "question_group", records = records.len(), groups = groups.len(), "Groups listed");
  Ok(groups)
}

/// Seed record plus every record on its axes, assembled into a group.
#[instrument(level = "debug", skip(state))]
pub async fn load_group(state: &AppState, record_id: &str) -> Result<QuestionGroup> {
  let limit = state.config.storage.op_timeout();
  let seed = with_timeout(limit, state.store.get(record_id)).await.map_err(not_found(record_id))?;
  let siblings = with_timeout(limit, state.store.list(&RecordFilter::for_axes(&seed.axes))).await?;
  Ok(state.assembler.assemble(&seed, &siblings))
}

#[instrument(level = "info", skip(state))]
pub async fn open_group(state: &AppState, record_id: &str) -> Result<OpenedGroup> {
  let group = load_group(state, record_id).await?;
  let (draft, shared) = draft_from_group(&group);
  info!(target: "question_group", %record_id, modality = ?group.modality, size = group.len(), "Group opened for editing");
  Ok(OpenedGroup { group, draft, shared })
}

/// Save an edited group.
///
/// `seed_id` names any member of the group being edited (none when creating);
/// `epoch` is the one handed out by `open_group`. A draft that fails
/// validation is rejected before any network call.
#[instrument(level = "info", skip(state, draft, shared), fields(modality = ?draft.modality()))]
pub async fn save_group(
  state: &AppState,
  mut draft: GroupDraft,
  mut shared: SharedFields,
  seed_id: Option<&str>,
  epoch: Option<&str>,
) -> Result<ReconcileOutcome> {
  let now = Utc::now();
  decompose(&draft, &shared, now)?;

  let previous = match seed_id {
    Some(id) => load_group(state, id).await?,
    None => QuestionGroup::empty(),
  };
  if let Some(expected) = epoch {
    if expected != previous.epoch {
      warn!(target: "question_group", expected, found = %previous.epoch, "Rejecting save against a stale snapshot");
      return Err(EngineError::StaleSnapshot { expected: expected.to_string(), found: previous.epoch });
    }
  }

  resolve_images(&mut draft, &mut shared, state.uploader.as_deref(), state.config.media.timeout()).await;
  let targets = decompose(&draft, &shared, now)?;
  let plan = reconcile::plan(targets, &previous.members, now);
  info!(
    target: "question_group",
    operations = plan.operation_count(),
    creates = plan.creates.len(),
    updates = plan.updates.len(),
    unchanged = plan.unchanged.len(),
    deletes = plan.deletes.len(),
    "Reconcile plan ready"
  );
  Ok(reconcile::apply(state.store.as_ref(), plan, &state.apply_options()).await)
}

#[instrument(level = "info", skip(state))]
pub async fn delete_group(state: &AppState, record_id: &str) -> Result<ReconcileOutcome> {
  let group = load_group(state, record_id).await?;
  let plan = reconcile::plan(Vec::new(), &group.members, Utc::now());
  Ok(reconcile::apply(state.store.as_ref(), plan, &state.apply_options()).await)
}
