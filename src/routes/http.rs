//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;

use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument, warn};

use crate::error::EngineError;
use crate::logic::*;
use crate::protocol::*;
use crate::reconcile::ReconcileOutcome;
use crate::state::AppState;
use crate::store::{RecordFilter, StoreError};
use crate::util::trunc_for_log;

/// Engine errors rendered as `{message, fields?, failures?}` with a matching status.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
  fn from(e: EngineError) -> Self { Self(e) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self.0 {
      EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
      EngineError::NotFound(_) | EngineError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
      EngineError::StaleSnapshot { .. } | EngineError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
      EngineError::PartialBatchFailure { .. } => StatusCode::MULTI_STATUS,
      EngineError::Store(StoreError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
      EngineError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
    };
    let message = self.0.to_string();
    let (fields, failures) = match self.0 {
      EngineError::Validation(v) => (Some(v.fields), None),
      EngineError::PartialBatchFailure { failures, .. } => (None, Some(failures)),
      _ => (None, None),
    };
    warn!(target: "question_group", status = status.as_u16(), error = %message, "HTTP request failed");
    (status, Json(ErrorOut { message, fields, failures })).into_response()
  }
}

/// 200 when every member call applied, 207 when only some did, 502 when none did.
fn outcome_status(o: &ReconcileOutcome) -> StatusCode {
  if o.is_complete() {
    StatusCode::OK
  } else if o.success_count() > 0 {
    StatusCode::MULTI_STATUS
  } else {
    StatusCode::BAD_GATEWAY
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_list_groups(
  State(state): State<Arc<AppState>>,
  Query(filter): Query<RecordFilter>,
) -> Result<Json<GroupsOut>, ApiError> {
  let groups = list_groups(&state, &filter).await?;
  Ok(Json(GroupsOut { groups: groups.into_iter().map(group_out).collect() }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_open_group(
  State(state): State<Arc<AppState>>,
  Path(record_id): Path<String>,
) -> Result<Json<OpenGroupOut>, ApiError> {
  let opened = open_group(&state, &record_id).await?;
  info!(target: "question_group", %record_id, epoch = %trunc_for_log(&opened.group.epoch, 120), "HTTP group served");
  Ok(Json(opened.into()))
}

#[instrument(level = "info", skip(state, body), fields(modality = ?body.draft.modality(), seed_id = ?body.seed_id))]
pub async fn http_save_group(
  State(state): State<Arc<AppState>>,
  Json(body): Json<SaveGroupIn>,
) -> Result<(StatusCode, Json<OutcomeOut>), ApiError> {
  let outcome = save_group(&state, body.draft, body.shared, body.seed_id.as_deref(), body.epoch.as_deref()).await?;
  let status = outcome_status(&outcome);
  info!(target: "question_group", status = status.as_u16(), succeeded = outcome.success_count(), failed = outcome.failure_count(), "HTTP group saved");
  Ok((status, Json(outcome.into())))
}

/// Any member left behind fails the request with the per-member tally.
#[instrument(level = "info", skip(state))]
pub async fn http_delete_group(
  State(state): State<Arc<AppState>>,
  Path(record_id): Path<String>,
) -> Result<Json<OutcomeOut>, ApiError> {
  let outcome = delete_group(&state, &record_id).await?.into_result()?;
  info!(target: "question_group", %record_id, deleted = outcome.deleted.len(), "HTTP group deleted");
  Ok(Json(outcome.into()))
}
