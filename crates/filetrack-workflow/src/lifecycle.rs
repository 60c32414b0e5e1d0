//! Stage lifecycle state machine
//!
//! ```text
//! ∅ → PRELIMS →(auto) PRODUCTION →(auto) COMPLETED →(promote) QC →(auto) DELIVERED
//! ```
//!
//! Every mutation is read → validate → modify → compare-and-swap on the
//! tracking `revision`. A revision conflict re-reads and re-validates, so
//! the loser of a race sees the winner's stage and is rejected rather than
//! appending a second entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use filetrack_core::{
    sla, Assignment, Clock, ExternalRef, FileId, RefKind, Stage, StageHistoryEntry, StageOrder,
    StageStatus, StageTracking,
};
use filetrack_store::{DocumentStore, StoreError};

use crate::error::{LifecycleError, Rejection};
use crate::events::{publish, EventSink, LogSink, StageEvent};
use crate::MAX_CAS_ATTEMPTS;

/// Person acting on a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn assignment(&self, at: DateTime<Utc>) -> Assignment {
        Assignment {
            assignee_id: self.id.clone(),
            assignee_name: self.name.clone(),
            started_at: at,
        }
    }
}

/// What an upload for an existing file is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDecision {
    /// The current stage was opened without an upload; this upload supplies it.
    ClaimCurrent { stage: Stage },
    /// The upload moves the file into the next stage.
    Advance { from: Stage, to: Stage },
}

impl UploadDecision {
    pub fn stage(self) -> Stage {
        match self {
            Self::ClaimCurrent { stage } => stage,
            Self::Advance { to, .. } => to,
        }
    }
}

/// A task in the task system finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCompleted {
    pub file_id: FileId,
    pub stage: Stage,
    pub task_id: String,
    pub actor: Actor,
}

/// What a task completion did to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoProgress {
    Advanced { from: Stage, to: Stage },
    /// COMPLETED waits for a manager to promote it.
    AwaitingPromotion,
    /// Other tasks for the stage are still open.
    TasksOutstanding { open: usize },
    /// The task belonged to a stage the file has already left.
    Stale { current: Stage },
}

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    stages: StageOrder,
    events: Arc<dyn EventSink>,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, stages: StageOrder) -> Self {
        Self {
            store,
            clock,
            stages,
            events: Arc::new(LogSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn stages(&self) -> &StageOrder {
        &self.stages
    }

    pub fn tracking(&self, file_id: &FileId) -> Result<Option<StageTracking>, StoreError> {
        self.store.get_tracking(file_id)
    }

    pub fn completed_stages(&self, file_id: &FileId) -> Result<Vec<Stage>, LifecycleError> {
        Ok(self.load(file_id)?.completed_stages())
    }

    /// Start tracking a file at `start_stage` with one open, submitted entry.
    pub fn initialize(
        &self,
        file_id: &FileId,
        start_stage: Stage,
        actor: &Actor,
    ) -> Result<StageTracking, LifecycleError> {
        if self.store.get_identity(file_id)?.is_none() {
            return Err(Rejection::UnknownFile {
                file_id: file_id.clone(),
            }
            .into());
        }
        if let Some(existing) = self.store.get_tracking(file_id)? {
            return Err(already_initialized(file_id, existing.current_stage).into());
        }
        if start_stage.is_terminal() {
            return Err(Rejection::WorkflowComplete {
                file_id: file_id.clone(),
            }
            .into());
        }

        let now = self.clock.now();
        let tracking =
            StageTracking::start(file_id.clone(), start_stage, Some(actor.assignment(now)), now);
        match self.store.insert_tracking(&tracking) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { .. }) => {
                let current = self.load(file_id)?.current_stage;
                return Err(already_initialized(file_id, current).into());
            }
            Err(e) => return Err(e.into()),
        }

        publish(
            self.events.as_ref(),
            &[StageEvent::Transitioned {
                file_id: file_id.clone(),
                from: None,
                to: start_stage,
                actor: actor.id.clone(),
                at: now,
            }],
        );
        Ok(tracking)
    }

    /// Decide whether an upload at `requested` is acceptable. Does not write.
    pub fn request_upload(
        &self,
        file_id: &FileId,
        requested: Stage,
    ) -> Result<UploadDecision, LifecycleError> {
        let tracking = self.load(file_id)?;
        Ok(decide_upload(&tracking, requested)?)
    }

    /// Take over the open current entry on behalf of an upload.
    pub fn claim_current(
        &self,
        file_id: &FileId,
        actor: &Actor,
    ) -> Result<StageTracking, LifecycleError> {
        let (_, tracking) = self.mutate(file_id, &actor.id, |t, now| {
            ensure_active(t)?;
            let file_id = t.file_id.clone();
            let stage = t.current_stage;
            let completed_stages = t.completed_stages();
            let entry = t
                .current_entry_mut()
                .filter(|e| e.is_open())
                .ok_or_else(|| Rejection::NoOpenStage {
                    file_id: file_id.clone(),
                    stage,
                })?;
            if entry.submitted {
                return Err(Rejection::DuplicateStageConflict {
                    file_id,
                    stage,
                    completed_stages,
                });
            }
            entry.submitted = true;
            entry.assignee_id = Some(actor.id.clone());
            entry.assignee_name = Some(actor.name.clone());
            t.current_assignment = Some(actor.assignment(now));
            Ok(())
        })?;
        Ok(tracking)
    }

    /// Close the open current entry.
    pub fn mark_current_stage_complete(
        &self,
        file_id: &FileId,
        actor: &Actor,
    ) -> Result<StageTracking, LifecycleError> {
        let (_, tracking) = self.mutate(file_id, &actor.id, close_current)?;
        Ok(tracking)
    }

    /// Enter the next stage. The actor is assigned to it and the new entry
    /// counts as submitted.
    pub fn transition(
        &self,
        file_id: &FileId,
        actor: &Actor,
        target: Stage,
    ) -> Result<StageTracking, LifecycleError> {
        let (_, tracking) = self.mutate(file_id, &actor.id, |t, now| {
            enter(t, target, Some(actor.assignment(now)), true, now)
        })?;
        Ok(tracking)
    }

    /// React to a finished task: close it, then auto-advance the file once
    /// the last open task of an auto-advancing stage is done.
    pub fn on_task_completed(&self, event: &TaskCompleted) -> Result<AutoProgress, LifecycleError> {
        // nothing is written for a file that cannot take the completion
        let tracking = self.load(&event.file_id)?;
        if tracking.current_stage == event.stage {
            ensure_active(&tracking)?;
        }

        let mut reference = self
            .store
            .get_ref(&event.task_id)?
            .unwrap_or_else(|| ExternalRef::task(&event.task_id, event.file_id.clone(), event.stage));
        if reference.open {
            reference.open = false;
            self.store.put_ref(&reference)?;
        }

        let open = self.open_tasks(&event.file_id, event.stage)?;
        let stage = event.stage;
        let (progress, _) = self.mutate(&event.file_id, &event.actor.id, |t, now| {
            if t.current_stage != stage {
                return Ok(AutoProgress::Stale {
                    current: t.current_stage,
                });
            }
            ensure_active(t)?;
            if open > 0 {
                return Ok(AutoProgress::TasksOutstanding { open });
            }
            let Some(to) = stage.next().filter(|_| stage.auto_advances()) else {
                return Ok(AutoProgress::AwaitingPromotion);
            };
            if t.open_entry().is_some() {
                close_current(t, now)?;
            }
            enter(t, to, None, false, now)?;
            Ok(AutoProgress::Advanced { from: stage, to })
        })?;

        match progress {
            AutoProgress::Stale { current } => log::info!(
                "{}: task {} for {stage} ignored, file is at {current}",
                event.file_id,
                event.task_id
            ),
            AutoProgress::TasksOutstanding { open } => log::debug!(
                "{}: {open} {stage} task(s) still open",
                event.file_id
            ),
            _ => {}
        }
        Ok(progress)
    }

    /// Manager sign-off that moves a COMPLETED file into QC.
    pub fn promote_to_qc(
        &self,
        file_id: &FileId,
        actor: &Actor,
    ) -> Result<StageTracking, LifecycleError> {
        let (_, tracking) = self.mutate(file_id, &actor.id, |t, now| {
            ensure_active(t)?;
            if t.current_stage != Stage::Completed {
                return Err(Rejection::InvalidStageProgression {
                    file_id: t.file_id.clone(),
                    current: t.current_stage,
                    attempted: Stage::Qc,
                    suggested: t.current_stage.next(),
                });
            }
            if t.open_entry().is_some() {
                close_current(t, now)?;
            }
            enter(t, Stage::Qc, None, false, now)
        })?;
        Ok(tracking)
    }

    /// Refuse a new task unless it is for the current stage and no other
    /// task for that stage is open.
    pub fn guard_task_creation(&self, file_id: &FileId, stage: Stage) -> Result<(), LifecycleError> {
        let tracking = self.load(file_id)?;
        ensure_active(&tracking)?;
        if stage != tracking.current_stage {
            return Err(Rejection::InvalidStageProgression {
                file_id: file_id.clone(),
                current: tracking.current_stage,
                attempted: stage,
                suggested: Some(tracking.current_stage),
            }
            .into());
        }
        if self.open_tasks(file_id, stage)? > 0 {
            return Err(Rejection::DuplicateStageConflict {
                file_id: file_id.clone(),
                stage,
                completed_stages: tracking.completed_stages(),
            }
            .into());
        }
        Ok(())
    }

    /// Record an open task for the current stage.
    pub fn register_task(
        &self,
        file_id: &FileId,
        stage: Stage,
        task_id: &str,
    ) -> Result<ExternalRef, LifecycleError> {
        self.guard_task_creation(file_id, stage)?;
        let reference = ExternalRef::task(task_id, file_id.clone(), stage);
        self.store.put_ref(&reference)?;
        log::info!("{file_id}: task {task_id} opened for {stage}");
        Ok(reference)
    }

    /// Hand the open stage to someone.
    pub fn assign(&self, file_id: &FileId, assignee: &Actor) -> Result<StageTracking, LifecycleError> {
        let (_, tracking) = self.mutate(file_id, &assignee.id, |t, now| {
            ensure_active(t)?;
            let file_id = t.file_id.clone();
            let stage = t.current_stage;
            let entry = t
                .current_entry_mut()
                .filter(|e| e.is_open())
                .ok_or(Rejection::NoOpenStage { file_id, stage })?;
            entry.assignee_id = Some(assignee.id.clone());
            entry.assignee_name = Some(assignee.name.clone());
            t.current_assignment = Some(assignee.assignment(now));
            Ok(())
        })?;
        Ok(tracking)
    }

    fn open_tasks(&self, file_id: &FileId, stage: Stage) -> Result<usize, StoreError> {
        Ok(self
            .store
            .refs_for(file_id)?
            .iter()
            .filter(|r| r.kind == RefKind::Task && r.stage == Some(stage) && r.open)
            .count())
    }

    fn load(&self, file_id: &FileId) -> Result<StageTracking, LifecycleError> {
        if let Some(tracking) = self.store.get_tracking(file_id)? {
            return Ok(tracking);
        }
        let file_id = file_id.clone();
        if self.store.get_identity(&file_id)?.is_some() {
            Err(Rejection::NotTracked { file_id }.into())
        } else {
            Err(Rejection::UnknownFile { file_id }.into())
        }
    }

    /// Apply `change` under compare-and-swap, retrying on revision conflicts.
    /// Unchanged trackings are not written.
    fn mutate<T>(
        &self,
        file_id: &FileId,
        actor: &str,
        mut change: impl FnMut(&mut StageTracking, DateTime<Utc>) -> Result<T, Rejection>,
    ) -> Result<(T, StageTracking), LifecycleError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let before = self.load(file_id)?;
            let now = self.clock.now();
            let mut after = before.clone();
            let out = change(&mut after, now)?;
            if after == before {
                return Ok((out, after));
            }
            after.updated_at = now;

            match self.store.update_tracking(&after) {
                Ok(revision) => {
                    after.revision = revision;
                    let events = self.events_between(&before, &after, actor);
                    publish(self.events.as_ref(), &events);
                    return Ok((out, after));
                }
                Err(e) if e.is_conflict() && attempt < MAX_CAS_ATTEMPTS => {
                    log::debug!("{file_id}: tracking changed underneath (attempt {attempt}), retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Facts implied by the difference between two revisions of a tracking.
    fn events_between(
        &self,
        before: &StageTracking,
        after: &StageTracking,
        actor: &str,
    ) -> Vec<StageEvent> {
        let mut events = Vec::new();
        let mut previous = before.current_stage;
        for (i, entry) in after.stage_history.iter().enumerate() {
            let old = before.stage_history.get(i);
            if old.is_none() {
                events.push(StageEvent::Transitioned {
                    file_id: after.file_id.clone(),
                    from: Some(previous),
                    to: entry.stage,
                    actor: actor.to_string(),
                    at: entry.entered_at,
                });
                previous = entry.stage;
            }
            let was_open = old.map_or(true, StageHistoryEntry::is_open);
            if let (true, Some(completed_at)) = (was_open, entry.completed_at) {
                let duration_minutes = entry.duration_minutes;
                events.push(StageEvent::StageCompleted {
                    file_id: after.file_id.clone(),
                    stage: entry.stage,
                    assignee: entry.assignee_name.clone().or_else(|| entry.assignee_id.clone()),
                    entered_at: entry.entered_at,
                    completed_at,
                    duration_minutes,
                    sla_status: duration_minutes.map(|d| sla::classify(&self.stages, entry.stage, d)),
                    actor: actor.to_string(),
                });
            }
        }
        events
    }
}

fn already_initialized(file_id: &FileId, current: Stage) -> Rejection {
    Rejection::AlreadyInitialized {
        file_id: file_id.clone(),
        current,
    }
}

fn ensure_active(t: &StageTracking) -> Result<(), Rejection> {
    if t.is_delivered() {
        return Err(Rejection::WorkflowComplete {
            file_id: t.file_id.clone(),
        });
    }
    Ok(())
}

fn decide_upload(t: &StageTracking, requested: Stage) -> Result<UploadDecision, Rejection> {
    ensure_active(t)?;
    let current = t.current_stage;

    if requested == current {
        return match t.open_entry() {
            Some(entry) if !entry.submitted => Ok(UploadDecision::ClaimCurrent { stage: current }),
            _ => Err(Rejection::DuplicateStageConflict {
                file_id: t.file_id.clone(),
                stage: current,
                completed_stages: t.completed_stages(),
            }),
        };
    }
    if Some(requested) != current.next() {
        return Err(Rejection::InvalidStageProgression {
            file_id: t.file_id.clone(),
            current,
            attempted: requested,
            suggested: current.next(),
        });
    }
    Ok(UploadDecision::Advance {
        from: current,
        to: requested,
    })
}

fn close_current(t: &mut StageTracking, now: DateTime<Utc>) -> Result<(), Rejection> {
    ensure_active(t)?;
    let file_id = t.file_id.clone();
    let stage = t.current_stage;
    let entry = t
        .current_entry_mut()
        .filter(|e| e.is_open())
        .ok_or(Rejection::NoOpenStage { file_id, stage })?;
    entry.close(now);
    t.current_status = StageStatus::Completed;
    t.current_assignment = None;
    Ok(())
}

/// Append an entry for `target`, which must be the next stage, after the
/// current entry has been closed. DELIVERED is closed on entry.
fn enter(
    t: &mut StageTracking,
    target: Stage,
    assignment: Option<Assignment>,
    submitted: bool,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    ensure_active(t)?;
    let current = t.current_stage;
    if target == current {
        return Err(Rejection::DuplicateStageConflict {
            file_id: t.file_id.clone(),
            stage: current,
            completed_stages: t.completed_stages(),
        });
    }
    if Some(target) != current.next() {
        return Err(Rejection::OutOfOrderTransition {
            file_id: t.file_id.clone(),
            current,
            attempted: target,
            expected: current.next(),
        });
    }
    if t.open_entry().is_some() {
        return Err(Rejection::StageNotComplete {
            file_id: t.file_id.clone(),
            stage: current,
        });
    }

    let mut entry = StageHistoryEntry::open(target, assignment.as_ref(), now, submitted);
    t.current_stage = target;
    t.current_status = StageStatus::InProgress;
    t.current_assignment = assignment;
    if target.is_terminal() {
        entry.close(now);
        t.current_status = StageStatus::Completed;
        t.current_assignment = None;
    }
    t.stage_history.push(entry);
    Ok(())
}
