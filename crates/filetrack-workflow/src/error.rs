//! Workflow outcomes that are not successes
//!
//! A [`Rejection`] is an expected answer to a request the current state does
//! not allow (re-uploading a finished stage, skipping a stage). It carries
//! enough context for the caller to correct itself. Store failures are real
//! errors and travel separately.

use std::fmt;

use filetrack_core::{FileId, Stage};
use filetrack_store::StoreError;

/// A request refused by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The requested stage is the current stage and it has already been
    /// submitted (or completed).
    DuplicateStageConflict {
        file_id: FileId,
        stage: Stage,
        completed_stages: Vec<Stage>,
    },
    /// Upload or promotion asked for a stage other than the single legal one.
    InvalidStageProgression {
        file_id: FileId,
        current: Stage,
        attempted: Stage,
        suggested: Option<Stage>,
    },
    /// A transition target that is not exactly the next stage.
    OutOfOrderTransition {
        file_id: FileId,
        current: Stage,
        attempted: Stage,
        expected: Option<Stage>,
    },
    /// Leaving a stage whose entry is still open.
    StageNotComplete { file_id: FileId, stage: Stage },
    /// Completing a stage that has no open entry.
    NoOpenStage { file_id: FileId, stage: Stage },
    AlreadyInitialized { file_id: FileId, current: Stage },
    /// The file is DELIVERED; nothing more can happen to it.
    WorkflowComplete { file_id: FileId },
    /// No identity with this id.
    UnknownFile { file_id: FileId },
    /// The identity exists but has never entered a stage.
    NotTracked { file_id: FileId },
}

impl Rejection {
    pub fn file_id(&self) -> &FileId {
        match self {
            Self::DuplicateStageConflict { file_id, .. }
            | Self::InvalidStageProgression { file_id, .. }
            | Self::OutOfOrderTransition { file_id, .. }
            | Self::StageNotComplete { file_id, .. }
            | Self::NoOpenStage { file_id, .. }
            | Self::AlreadyInitialized { file_id, .. }
            | Self::WorkflowComplete { file_id }
            | Self::UnknownFile { file_id }
            | Self::NotTracked { file_id } => file_id,
        }
    }

    /// Stage the file was in when the request was refused, when known.
    pub fn current_stage(&self) -> Option<Stage> {
        match self {
            Self::DuplicateStageConflict { stage, .. }
            | Self::StageNotComplete { stage, .. }
            | Self::NoOpenStage { stage, .. } => Some(*stage),
            Self::InvalidStageProgression { current, .. }
            | Self::OutOfOrderTransition { current, .. }
            | Self::AlreadyInitialized { current, .. } => Some(*current),
            Self::WorkflowComplete { .. } => Some(Stage::Delivered),
            Self::UnknownFile { .. } | Self::NotTracked { .. } => None,
        }
    }

    /// The one stage the caller may legally ask for next.
    pub fn suggested_next(&self) -> Option<Stage> {
        match self {
            Self::DuplicateStageConflict { stage, .. } => stage.next(),
            Self::InvalidStageProgression { suggested, .. } => *suggested,
            Self::OutOfOrderTransition { expected, .. } => *expected,
            _ => None,
        }
    }

    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateStageConflict { .. } => "duplicate_stage_conflict",
            Self::InvalidStageProgression { .. } => "invalid_stage_progression",
            Self::OutOfOrderTransition { .. } => "out_of_order_transition",
            Self::StageNotComplete { .. } => "stage_not_complete",
            Self::NoOpenStage { .. } => "no_open_stage",
            Self::AlreadyInitialized { .. } => "already_initialized",
            Self::WorkflowComplete { .. } => "workflow_complete",
            Self::UnknownFile { .. } => "unknown_file",
            Self::NotTracked { .. } => "not_tracked",
        }
    }
}

fn next_or_end(stage: Option<Stage>) -> String {
    stage.map_or_else(|| "none (workflow ends)".to_string(), |s| s.to_string())
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateStageConflict {
                file_id,
                stage,
                completed_stages,
            } => {
                write!(f, "{file_id}: already processed in {stage}")?;
                if !completed_stages.is_empty() {
                    let done: Vec<_> = completed_stages.iter().map(|s| s.as_str()).collect();
                    write!(f, " (completed: {})", done.join(", "))?;
                }
                write!(f, "; next stage: {}", next_or_end(stage.next()))
            }
            Self::InvalidStageProgression {
                file_id,
                current,
                attempted,
                suggested,
            } => write!(
                f,
                "{file_id}: cannot go from {current} to {attempted}; next stage: {}",
                next_or_end(*suggested)
            ),
            Self::OutOfOrderTransition {
                file_id,
                current,
                attempted,
                expected,
            } => write!(
                f,
                "{file_id}: out-of-order transition {current} -> {attempted}; expected {}",
                next_or_end(*expected)
            ),
            Self::StageNotComplete { file_id, stage } => {
                write!(f, "{file_id}: {stage} must be completed first")
            }
            Self::NoOpenStage { file_id, stage } => {
                write!(f, "{file_id}: {stage} has no open entry")
            }
            Self::AlreadyInitialized { file_id, current } => {
                write!(f, "{file_id}: already tracked (current stage {current})")
            }
            Self::WorkflowComplete { file_id } => write!(f, "{file_id}: workflow complete"),
            Self::UnknownFile { file_id } => write!(f, "{file_id}: unknown file"),
            Self::NotTracked { file_id } => write!(f, "{file_id}: no stage tracking"),
        }
    }
}

impl std::error::Error for Rejection {}

/// Failure of a workflow operation.
#[derive(Debug)]
pub enum LifecycleError {
    Rejected(Rejection),
    Store(StoreError),
}

impl LifecycleError {
    /// Expected refusal rather than a storage failure.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            Self::Store(_) => None,
        }
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(r) => write!(f, "rejected: {r}"),
            Self::Store(e) => write!(f, "store: {e}"),
        }
    }
}

impl std::error::Error for LifecycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rejected(r) => Some(r),
            Self::Store(e) => Some(e),
        }
    }
}

impl From<Rejection> for LifecycleError {
    fn from(r: Rejection) -> Self {
        Self::Rejected(r)
    }
}

impl From<StoreError> for LifecycleError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid() -> FileId {
        FileId::new("PF-1")
    }

    #[test]
    fn duplicate_suggests_following_stage() {
        let r = Rejection::DuplicateStageConflict {
            file_id: fid(),
            stage: Stage::Prelims,
            completed_stages: vec![],
        };
        assert_eq!(r.suggested_next(), Some(Stage::Production));
        assert_eq!(r.current_stage(), Some(Stage::Prelims));
        assert_eq!(r.code(), "duplicate_stage_conflict");
    }

    #[test]
    fn invalid_progression_display_names_next() {
        let r = Rejection::InvalidStageProgression {
            file_id: fid(),
            current: Stage::Production,
            attempted: Stage::Qc,
            suggested: Some(Stage::Completed),
        };
        let msg = r.to_string();
        assert!(msg.contains("PRODUCTION"));
        assert!(msg.contains("QC"));
        assert!(msg.ends_with("next stage: COMPLETED"));
    }

    #[test]
    fn duplicate_display_lists_completed() {
        let r = Rejection::DuplicateStageConflict {
            file_id: fid(),
            stage: Stage::Production,
            completed_stages: vec![Stage::Prelims],
        };
        assert!(r.to_string().contains("(completed: PRELIMS)"));
    }

    #[test]
    fn lifecycle_error_distinguishes_rejections() {
        let rejected: LifecycleError = Rejection::WorkflowComplete { file_id: fid() }.into();
        assert!(rejected.is_rejection());
        assert_eq!(rejected.rejection().map(Rejection::code), Some("workflow_complete"));

        let store: LifecycleError = StoreError::InvalidKey("x/y".into()).into();
        assert!(!store.is_rejection());
        assert!(store.rejection().is_none());
        assert!(store.to_string().starts_with("store:"));
    }
}
