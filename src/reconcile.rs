//! Reconciliation of decomposed targets against the previously persisted
//! members of a group.
//!
//! Planning is pure:
//!   - targets carrying a persisted (non-temporary) id match that member
//!   - the rest match by position, if that member is still unclaimed
//!   - matched pairs become field-level patches (empty patch = unchanged)
//!   - unmatched targets are creates, unclaimed members are deletes
//!
//! Execution runs creates and updates with bounded concurrency, waits for all
//! of them, then runs deletes. Each member call has its own timeout and its
//! own failure; nothing is rolled back or retried.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::domain::{Axes, FlatQuestionRecord, TargetRecord};
use crate::draft::is_temporary_id;
use crate::error::EngineError;
use crate::store::{with_timeout, CreatedRecord, QuestionStore, RecordPatch, StoreError};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUpdate {
  pub id: String,
  /// Version seen when the group was loaded.
  pub expected_version: u64,
  pub patch: RecordPatch,
  /// Axes changed relative to this member; a new code must be issued.
  pub regenerate_code: bool,
  pub axes: Axes,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcilePlan {
  pub creates: Vec<TargetRecord>,
  pub updates: Vec<RecordUpdate>,
  pub unchanged: Vec<String>,
  pub deletes: Vec<String>,
}

impl ReconcilePlan {
  pub fn operation_count(&self) -> usize {
    self.creates.len() + self.updates.len() + self.deletes.len()
  }
}

/// Diff `targets` (in group order) against `previous` (in group order).
/// `now` seeds creation-time hints so new members keep editor order.
#[instrument(level = "debug", skip_all, fields(targets = targets.len(), previous = previous.len()))]
pub fn plan(targets: Vec<TargetRecord>, previous: &[FlatQuestionRecord], now: DateTime<Utc>) -> ReconcilePlan {
  let mut matched: Vec<Option<usize>> = vec![None; targets.len()];
  let mut claimed: HashSet<usize> = HashSet::new();

  // Pass 1: persisted ids.
  for (i, t) in targets.iter().enumerate() {
    let Some(id) = t.source_id.as_deref().filter(|id| !is_temporary_id(id)) else { continue };
    if let Some(j) = previous.iter().position(|p| p.id.as_deref() == Some(id)) {
      if claimed.insert(j) {
        matched[i] = Some(j);
      }
    }
  }

  // Pass 2: position.
  for (i, slot) in matched.iter_mut().enumerate() {
    if slot.is_none() && i < previous.len() && previous[i].id.is_some() && claimed.insert(i) {
      *slot = Some(i);
    }
  }

  let mut out = ReconcilePlan::default();
  for (i, (mut target, slot)) in targets.into_iter().zip(matched).enumerate() {
    match slot {
      Some(j) => {
        let prev = &previous[j];
        let (patch, regenerate_code) = diff(&target, prev);
        if patch.is_empty() && !regenerate_code {
          out.unchanged.push(prev.id_str().to_string());
        } else {
          out.updates.push(RecordUpdate {
            id: prev.id_str().to_string(),
            expected_version: prev.version,
            patch,
            regenerate_code,
            axes: target.axes.clone(),
          });
        }
      }
      None => {
        target.created_at = Some(now + chrono::Duration::milliseconds(i as i64));
        out.creates.push(target);
      }
    }
  }

  out.deletes = previous
    .iter()
    .enumerate()
    .filter(|(j, p)| !claimed.contains(j) && p.id.is_some())
    .map(|(_, p)| p.id_str().to_string())
    .collect();
  out
}

fn diff(t: &TargetRecord, p: &FlatQuestionRecord) -> (RecordPatch, bool) {
  fn changed<T: PartialEq + Clone>(new: &T, old: &T) -> Option<T> {
    (new != old).then(|| new.clone())
  }
  let regenerate_code = t.axes != p.axes;
  let patch = RecordPatch {
    code: None,
    axes: changed(&t.axes, &p.axes),
    question_text: changed(&t.question_text, &p.question_text),
    informative_text: changed(&t.informative_text, &p.informative_text),
    informative_images: changed(&t.informative_images, &p.informative_images),
    question_images: changed(&t.question_images, &p.question_images),
    options: changed(&t.options, &p.options),
    modality: (p.modality != Some(t.modality)).then_some(t.modality),
    group_id: changed(&t.group_id, &p.group_id),
    shared_text: changed(&t.shared_text, &p.shared_text),
  };
  (patch, regenerate_code)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OpKind {
  Create,
  Update,
  Delete,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberFailure {
  pub op: OpKind,
  /// Record id, or `new[<i>]` for a failed create.
  pub member: String,
  pub error: StoreError,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
  pub created: Vec<CreatedRecord>,
  pub updated: Vec<String>,
  pub unchanged: Vec<String>,
  pub deleted: Vec<String>,
  pub failures: Vec<MemberFailure>,
}

impl ReconcileOutcome {
  pub fn success_count(&self) -> usize {
    self.created.len() + self.updated.len() + self.deleted.len()
  }

  pub fn failure_count(&self) -> usize {
    self.failures.len()
  }

  pub fn is_complete(&self) -> bool {
    self.failures.is_empty()
  }

  /// For callers that treat any member failure as a hard error.
  pub fn into_result(self) -> Result<Self, EngineError> {
    if self.is_complete() {
      return Ok(self);
    }
    Err(EngineError::PartialBatchFailure {
      success_count: self.success_count(),
      failure_count: self.failure_count(),
      failures: self.failures,
    })
  }
}

#[derive(Clone, Debug)]
pub struct ApplyOptions {
  pub max_in_flight: usize,
  pub op_timeout: Duration,
}

impl Default for ApplyOptions {
  fn default() -> Self {
    Self { max_in_flight: 4, op_timeout: Duration::from_secs(5) }
  }
}

enum Step {
  Create(usize, TargetRecord),
  Update(RecordUpdate),
}

enum StepResult {
  Created(CreatedRecord),
  Updated(String),
  Failed(MemberFailure),
}

#[instrument(level = "info", skip_all, fields(
  creates = plan.creates.len(), updates = plan.updates.len(), deletes = plan.deletes.len()
))]
pub async fn apply(store: &dyn QuestionStore, plan: ReconcilePlan, opts: &ApplyOptions) -> ReconcileOutcome {
  let limit = opts.max_in_flight.max(1);
  let mut outcome = ReconcileOutcome { unchanged: plan.unchanged, ..Default::default() };

  let steps: Vec<Step> = plan
    .creates
    .into_iter()
    .enumerate()
    .map(|(i, t)| Step::Create(i, t))
    .chain(plan.updates.into_iter().map(Step::Update))
    .collect();

  // Phase 1: creates and updates.
  let results: Vec<StepResult> = stream::iter(steps)
    .map(|step| run_step(store, step, opts.op_timeout))
    .buffered(limit)
    .collect()
    .await;
  for r in results {
    match r {
      StepResult::Created(c) => outcome.created.push(c),
      StepResult::Updated(id) => outcome.updated.push(id),
      StepResult::Failed(f) => outcome.failures.push(f),
    }
  }

  // Phase 2: deletes, only after every create/update settled.
  let deletes: Vec<(String, Result<(), StoreError>)> = stream::iter(plan.deletes)
    .map(|id| async move {
      let res = with_timeout(opts.op_timeout, store.delete(&id)).await;
      (id, res)
    })
    .buffered(limit)
    .collect()
    .await;
  for (id, res) in deletes {
    match res {
      Ok(()) => outcome.deleted.push(id),
      Err(e) => {
        error!(target: "reconcile", %id, error = %e, "Delete failed");
        outcome.failures.push(MemberFailure { op: OpKind::Delete, member: id, error: e });
      }
    }
  }

  if outcome.is_complete() {
    info!(target: "reconcile", succeeded = outcome.success_count(), unchanged = outcome.unchanged.len(), "Group reconciled");
  } else {
    warn!(
      target: "reconcile",
      succeeded = outcome.success_count(),
      failed = outcome.failure_count(),
      "Group reconciled with member failures"
    );
  }
  outcome
}

async fn run_step(store: &dyn QuestionStore, step: Step, limit: Duration) -> StepResult {
  match step {
    Step::Create(i, target) => match with_timeout(limit, store.create(&target)).await {
      Ok(created) => StepResult::Created(created),
      Err(e) => {
        error!(target: "reconcile", index = i, error = %e, "Create failed");
        StepResult::Failed(MemberFailure { op: OpKind::Create, member: format!("new[{i}]"), error: e })
      }
    },
    Step::Update(mut update) => {
      let fail = |id: String, e: StoreError| {
        error!(target: "reconcile", %id, error = %e, "Update failed");
        StepResult::Failed(MemberFailure { op: OpKind::Update, member: id, error: e })
      };
      if update.regenerate_code {
        match with_timeout(limit, store.generate_code(&update.axes)).await {
          Ok(code) => update.patch.code = Some(code),
          Err(e) => return fail(update.id, e),
        }
      }
      match with_timeout(limit, store.update(&update.id, &update.patch, Some(update.expected_version))).await {
        Ok(()) => StepResult::Updated(update.id),
        Err(e) => fail(update.id, e),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use async_trait::async_trait;

  use super::*;
  use crate::domain::ModalityTag;
  use crate::store::{MemoryStore, RecordFilter};
  use crate::test_support::{options, record, ts};

  fn explicit(id: &str, question: &str, secs: i64) -> FlatQuestionRecord {
    let mut r = record(id, "EN", question);
    r.informative_text = "Passage".into();
    r.modality = Some(ModalityTag::ReadingComprehension);
    r.group_id = Some("G".into());
    r.created_at = ts(secs);
    r
  }

  fn target_from(rec: &FlatQuestionRecord) -> TargetRecord {
    TargetRecord {
      source_id: rec.id.clone(),
      axes: rec.axes.clone(),
      question_text: rec.question_text.clone(),
      informative_text: rec.informative_text.clone(),
      informative_images: rec.informative_images.clone(),
      question_images: rec.question_images.clone(),
      options: rec.options.clone(),
      modality: rec.modality.unwrap_or(ModalityTag::StandardMc),
      group_id: rec.group_id.clone(),
      shared_text: rec.shared_text.clone(),
      created_at: None,
    }
  }

  #[test]
  fn unchanged_group_plans_no_operations() {
    let prev = vec![explicit("a", "Q1", 0), explicit("b", "Q2", 1)];
    let targets = prev.iter().map(target_from).collect();
    let p = plan(targets, &prev, ts(10));
    assert_eq!(p.operation_count(), 0);
    assert_eq!(p.unchanged, vec!["a", "b"]);
  }

  #[test]
  fn removing_first_member_deletes_it_and_updates_the_rest() {
    let prev = vec![explicit("a", "Q1", 0), explicit("b", "Q2", 1), explicit("c", "Q3", 2)];
    let mut t2 = target_from(&prev[1]);
    t2.question_text = "Q2 edited".into();
    let mut t3 = target_from(&prev[2]);
    t3.options = options(&["x", "y"], 1);

    let p = plan(vec![t2, t3], &prev, ts(10));
    assert!(p.creates.is_empty());
    assert_eq!(p.deletes, vec!["a"]);
    let ids: Vec<&str> = p.updates.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c"]);
    assert_eq!(p.updates[0].patch.question_text.as_deref(), Some("Q2 edited"));
    assert!(p.updates[1].patch.options.is_some());
    assert!(p.updates.iter().all(|u| !u.regenerate_code));
  }

  #[test]
  fn positional_fallback_without_ids() {
    let prev = vec![explicit("a", "Q1", 0), explicit("b", "Q2", 1), explicit("c", "Q3", 2)];
    let mut t1 = target_from(&prev[1]);
    t1.source_id = None;
    let mut t2 = target_from(&prev[2]);
    t2.source_id = None;

    // Without ids the two targets land on positions 0 and 1.
    let p = plan(vec![t1, t2], &prev, ts(10));
    assert_eq!(p.deletes, vec!["c"]);
    let ids: Vec<&str> = p.updates.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
  }

  #[test]
  fn temporary_ids_never_match_and_become_creates() {
    let prev = vec![explicit("a", "Q1", 0)];
    let kept = target_from(&prev[0]);
    let mut fresh = target_from(&prev[0]);
    fresh.source_id = Some("tmp_123".into());
    fresh.question_text = "New".into();

    let p = plan(vec![kept, fresh], &prev, ts(10));
    assert_eq!(p.unchanged, vec!["a"]);
    assert_eq!(p.creates.len(), 1);
    assert_eq!(p.creates[0].created_at, Some(ts(10) + chrono::Duration::milliseconds(1)));
  }

  #[test]
  fn id_claimed_member_is_not_reused_positionally() {
    let prev = vec![explicit("a", "Q1", 0), explicit("b", "Q2", 1)];
    let mut moved = target_from(&prev[0]);
    moved.source_id = Some("b".into());
    moved.question_text = "Q2".into();
    let mut first = target_from(&prev[1]);
    first.source_id = Some("tmp_1".into());
    first.question_text = "Q0".into();

    // Target 0 is new (tmp), target 1 claims "b"; position 0 ("a") is free
    // for target 0 only by position.
    let p = plan(vec![first, moved], &prev, ts(10));
    assert_eq!(p.unchanged, vec!["b"]);
    assert_eq!(p.updates.len(), 1);
    assert_eq!(p.updates[0].id, "a");
    assert!(p.creates.is_empty());
    assert!(p.deletes.is_empty());
  }

  #[test]
  fn code_regeneration_is_per_member() {
    let mut prev = vec![explicit("a", "Q1", 0), explicit("b", "Q2", 1)];
    prev[1].axes.topic_code = "GRAM".into();
    let targets: Vec<TargetRecord> = prev
      .iter()
      .map(|r| {
        let mut t = target_from(r);
        t.axes.topic_code = "VOC".into();
        t
      })
      .collect();
    let p = plan(targets, &prev, ts(10));
    assert_eq!(p.unchanged, vec!["a"]);
    assert_eq!(p.updates.len(), 1);
    assert_eq!(p.updates[0].id, "b");
    assert!(p.updates[0].regenerate_code);
  }

  #[tokio::test]
  async fn apply_writes_through_the_store() {
    let prev = vec![explicit("a", "Q1", 0), explicit("b", "Q2", 1)];
    let store = MemoryStore::with_records(prev.clone());

    let mut edited = target_from(&prev[1]);
    edited.axes.level_code = "G".into();
    let mut fresh = target_from(&prev[1]);
    fresh.source_id = None;
    fresh.question_text = "Q3".into();
    let p = plan(vec![edited, fresh], &prev[1..], ts(10));
    // "b" matched by id; the new one has no previous slot left.
    assert_eq!(p.updates.len(), 1);
    assert_eq!(p.creates.len(), 1);

    let outcome = apply(&store, p, &ApplyOptions::default()).await;
    assert!(outcome.is_complete());
    assert_eq!(outcome.success_count(), 2);
    let b = store.get("b").await.unwrap();
    assert_eq!(b.code, "EN-VOC-6-G-001");
    assert_eq!(b.version, 2);
    assert_eq!(store.len().await, 3);
  }

  /// Wraps a memory store, logs call order and fails configured ids.
  struct FlakyStore {
    inner: MemoryStore,
    fail_ids: Vec<String>,
    fail_creates: bool,
    calls: Arc<Mutex<Vec<String>>>,
  }

  #[async_trait]
  impl QuestionStore for FlakyStore {
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<FlatQuestionRecord>, StoreError> {
      self.inner.list(filter).await
    }
    async fn get(&self, id: &str) -> Result<FlatQuestionRecord, StoreError> {
      self.inner.get(id).await
    }
    async fn create(&self, shape: &TargetRecord) -> Result<CreatedRecord, StoreError> {
      self.calls.lock().unwrap().push("create".into());
      if self.fail_creates {
        return Err(StoreError::Unavailable("create disabled".into()));
      }
      self.inner.create(shape).await
    }
    async fn update(&self, id: &str, patch: &RecordPatch, v: Option<u64>) -> Result<(), StoreError> {
      self.calls.lock().unwrap().push(format!("update:{id}"));
      if self.fail_ids.iter().any(|f| f == id) {
        return Err(StoreError::Unavailable("boom".into()));
      }
      self.inner.update(id, patch, v).await
    }
    async fn delete(&self, id: &str) -> Result<(), StoreError> {
      self.calls.lock().unwrap().push(format!("delete:{id}"));
      self.inner.delete(id).await
    }
    async fn generate_code(&self, axes: &Axes) -> Result<String, StoreError> {
      self.inner.generate_code(axes).await
    }
  }

  #[tokio::test]
  async fn failures_are_isolated_and_deletes_run_last() {
    let prev = vec![explicit("a", "Q1", 0), explicit("b", "Q2", 1), explicit("c", "Q3", 2)];
    let calls = Arc::new(Mutex::new(Vec::new()));
    let store = FlakyStore {
      inner: MemoryStore::with_records(prev.clone()),
      fail_ids: vec!["b".into()],
      fail_creates: false,
      calls: calls.clone(),
    };

    let mut tb = target_from(&prev[1]);
    tb.question_text = "edit b".into();
    let mut tc = target_from(&prev[2]);
    tc.question_text = "edit c".into();
    let mut tn = target_from(&prev[2]);
    tn.source_id = Some("tmp_new".into());
    let p = plan(vec![tb, tc, tn], &prev, ts(10));
    assert_eq!(p.deletes, vec!["a"]);

    let opts = ApplyOptions { max_in_flight: 2, op_timeout: Duration::from_secs(1) };
    let outcome = apply(&store, p, &opts).await;

    assert_eq!(outcome.failure_count(), 1);
    assert_eq!(outcome.failures[0].member, "b");
    assert_eq!(outcome.failures[0].op, OpKind::Update);
    assert_eq!(outcome.updated, vec!["c"]);
    assert_eq!(outcome.created.len(), 1);
    assert_eq!(outcome.deleted, vec!["a"]);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.last().map(String::as_str), Some("delete:a"));
    assert_eq!(calls.iter().filter(|c| c.starts_with("delete")).count(), 1);

    match outcome.into_result() {
      Err(EngineError::PartialBatchFailure { success_count, failure_count, .. }) => {
        assert_eq!((success_count, failure_count), (3, 1));
      }
      other => panic!("expected partial failure, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn failed_creates_are_counted() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let store = FlakyStore { inner: MemoryStore::new(), fail_ids: vec![], fail_creates: true, calls };
    let t = target_from(&explicit("x", "Q", 0));
    let p = plan(vec![t.clone(), t], &[], ts(0));
    let outcome = apply(&store, p, &ApplyOptions::default()).await;
    assert_eq!(outcome.failure_count(), 2);
    assert_eq!(outcome.success_count(), 0);
    assert_eq!(outcome.failures[1].member, "new[1]");
  }

  #[tokio::test]
  async fn stale_versions_fail_the_member_only() {
    let prev = vec![explicit("a", "Q1", 0)];
    let store = MemoryStore::with_records(prev.clone());
    store
      .update("a", &RecordPatch { question_text: Some("someone else".into()), ..Default::default() }, None)
      .await
      .unwrap();

    let mut t = target_from(&prev[0]);
    t.question_text = "mine".into();
    let outcome = apply(&store, plan(vec![t], &prev, ts(0)), &ApplyOptions::default()).await;
    assert!(matches!(outcome.failures[0].error, StoreError::Conflict { .. }));
    assert_eq!(store.get("a").await.unwrap().question_text, "someone else");
  }
}
