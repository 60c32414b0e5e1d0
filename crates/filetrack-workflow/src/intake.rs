//! Upload flow: resolve the bytes to an identity, then move its stage
//!
//! New files are created and initialized at the requested stage. Known
//! files go through the upload guard and are either claimed at their
//! current stage or advanced into the next one. A heuristic (name) match
//! records the new content as a version once the stage step succeeded.

use filetrack_core::{fingerprint, FileId, Stage};

use crate::error::LifecycleError;
use crate::lifecycle::{Actor, Lifecycle, UploadDecision};
use crate::resolver::{CreateOutcome, MatchRule, Resolution, Resolver};

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub bytes: &'a [u8],
    pub original_name: &'a str,
    pub requested_stage: Stage,
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// A new identity, tracked from `stage`.
    Created { file_id: FileId, stage: Stage },
    /// The upload supplied the work of a stage opened without one.
    Continued {
        file_id: FileId,
        stage: Stage,
        matched_by: MatchRule,
        new_version: Option<u32>,
    },
    /// The file moved into the next stage.
    Progressed {
        file_id: FileId,
        from: Stage,
        to: Stage,
        matched_by: MatchRule,
        new_version: Option<u32>,
    },
}

impl UploadOutcome {
    pub fn file_id(&self) -> &FileId {
        match self {
            Self::Created { file_id, .. }
            | Self::Continued { file_id, .. }
            | Self::Progressed { file_id, .. } => file_id,
        }
    }

    /// Stage the file is in after the upload.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Created { stage, .. } | Self::Continued { stage, .. } => *stage,
            Self::Progressed { to, .. } => *to,
        }
    }

    /// Whether the upload continued an existing file's workflow.
    pub fn stage_progression(&self) -> bool {
        !matches!(self, Self::Created { .. })
    }
}

#[derive(Clone)]
pub struct Intake {
    resolver: Resolver,
    lifecycle: Lifecycle,
}

impl Intake {
    pub fn new(resolver: Resolver, lifecycle: Lifecycle) -> Self {
        Self {
            resolver,
            lifecycle,
        }
    }

    pub fn submit(&self, request: UploadRequest<'_>) -> Result<UploadOutcome, LifecycleError> {
        let UploadRequest {
            bytes,
            original_name,
            requested_stage: stage,
            actor,
        } = request;
        let fp = fingerprint(bytes);
        let size = bytes.len() as u64;

        let (file_id, matched_by) = match self.resolver.resolve_fingerprint(&fp, size, original_name)? {
            Resolution::Existing {
                file_id,
                matched_by,
            } => (file_id, matched_by),
            Resolution::New => {
                match self.resolver.create_identity(&fp, size, original_name, &actor.id)? {
                    CreateOutcome::Created(identity) => {
                        self.lifecycle.initialize(&identity.file_id, stage, &actor)?;
                        return Ok(UploadOutcome::Created {
                            file_id: identity.file_id,
                            stage,
                        });
                    }
                    CreateOutcome::AlreadyOwned(owner) => (owner, MatchRule::Fingerprint),
                }
            }
        };

        // identity without tracking: a sync-job stub or an interrupted first upload
        if self.lifecycle.tracking(&file_id)?.is_none() {
            self.record_version(&file_id, &fp, size, &actor, matched_by, stage)?;
            self.lifecycle.initialize(&file_id, stage, &actor)?;
            return Ok(UploadOutcome::Created { file_id, stage });
        }

        let decision = self.lifecycle.request_upload(&file_id, stage)?;
        match decision {
            UploadDecision::ClaimCurrent { .. } => {
                self.lifecycle.claim_current(&file_id, &actor)?;
            }
            UploadDecision::Advance {
                from: Stage::Completed,
                ..
            } => {
                self.lifecycle.promote_to_qc(&file_id, &actor)?;
                self.lifecycle.claim_current(&file_id, &actor)?;
            }
            UploadDecision::Advance { to, .. } => {
                self.lifecycle.transition(&file_id, &actor, to)?;
            }
        }

        let new_version = self.record_version(&file_id, &fp, size, &actor, matched_by, stage)?;
        Ok(match decision {
            UploadDecision::ClaimCurrent { stage } => UploadOutcome::Continued {
                file_id,
                stage,
                matched_by,
                new_version,
            },
            UploadDecision::Advance { from, to } => UploadOutcome::Progressed {
                file_id,
                from,
                to,
                matched_by,
                new_version,
            },
        })
    }

    /// Content matched by name only is a new version of the file.
    fn record_version(
        &self,
        file_id: &FileId,
        fp: &str,
        size: u64,
        actor: &Actor,
        matched_by: MatchRule,
        stage: Stage,
    ) -> Result<Option<u32>, LifecycleError> {
        if !matched_by.is_heuristic() {
            return Ok(None);
        }
        let reason = format!("{stage} upload matched by {matched_by}");
        self.resolver
            .record_new_version(file_id, fp, size, &actor.id, &reason)
            .map(Some)
    }
}
