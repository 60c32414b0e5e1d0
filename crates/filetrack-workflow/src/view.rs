//! Read-only picture of one file's lifecycle

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use filetrack_core::sla::{self, SlaStatus, StageReport};
use filetrack_core::{
    Assignment, ExternalRef, FileId, FileIdentity, RefKind, Stage, StageOrder, StageStatus,
    VersionEntry,
};
use filetrack_store::DocumentStore;

use crate::error::{LifecycleError, Rejection};

/// One history entry with its derived duration and SLA status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryLine {
    pub stage: Stage,
    pub status: StageStatus,
    pub assignee: Option<String>,
    pub entered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub sla_status: Option<SlaStatus>,
    pub submitted: bool,
    pub merged_from: Option<FileId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleView {
    pub file_id: FileId,
    pub original_name: String,
    pub content_fingerprint: Option<String>,
    pub versions: Vec<VersionEntry>,
    /// `None` for identities that never entered a stage.
    pub current_stage: Option<Stage>,
    pub current_status: Option<StageStatus>,
    pub permit_status: Option<&'static str>,
    pub current_assignment: Option<Assignment>,
    pub history: Vec<HistoryLine>,
    pub completed_stages: Vec<Stage>,
    pub tasks_by_stage: BTreeMap<Stage, Vec<ExternalRef>>,
    pub other_refs: Vec<ExternalRef>,
    pub report: Option<StageReport>,
}

/// Gather identity, tracking and references for `file_id`.
pub fn lifecycle_view(
    store: &dyn DocumentStore,
    stages: &StageOrder,
    file_id: &FileId,
) -> Result<LifecycleView, LifecycleError> {
    let FileIdentity {
        file_id,
        content_fingerprint,
        original_name,
        version_history,
        ..
    } = store
        .get_identity(file_id)?
        .ok_or_else(|| Rejection::UnknownFile {
            file_id: file_id.clone(),
        })?;
    let tracking = store.get_tracking(&file_id)?;

    let mut tasks_by_stage: BTreeMap<Stage, Vec<ExternalRef>> = BTreeMap::new();
    let mut other_refs = Vec::new();
    for reference in store.refs_for(&file_id)? {
        match (reference.kind, reference.stage) {
            (RefKind::Task, Some(stage)) => tasks_by_stage.entry(stage).or_default().push(reference),
            _ => other_refs.push(reference),
        }
    }

    let history = tracking
        .iter()
        .flat_map(|t| t.stage_history.iter())
        .map(|entry| {
            let duration_minutes = entry.duration_minutes.or_else(|| sla::stage_duration(entry));
            HistoryLine {
                stage: entry.stage,
                status: entry.status,
                assignee: entry
                    .assignee_name
                    .clone()
                    .or_else(|| entry.assignee_id.clone()),
                entered_at: entry.entered_at,
                completed_at: entry.completed_at,
                duration_minutes,
                sla_status: duration_minutes.map(|d| sla::classify(stages, entry.stage, d)),
                submitted: entry.submitted,
                merged_from: entry.merged_from.clone(),
            }
        })
        .collect();

    Ok(LifecycleView {
        file_id,
        original_name,
        content_fingerprint,
        versions: version_history,
        current_stage: tracking.as_ref().map(|t| t.current_stage),
        current_status: tracking.as_ref().map(|t| t.current_status),
        permit_status: tracking.as_ref().map(|t| t.current_stage.permit_status()),
        current_assignment: tracking.as_ref().and_then(|t| t.current_assignment.clone()),
        history,
        completed_stages: tracking
            .as_ref()
            .map(|t| t.completed_stages())
            .unwrap_or_default(),
        tasks_by_stage,
        other_refs,
        report: tracking.as_ref().map(|t| sla::report(stages, t)),
    })
}
