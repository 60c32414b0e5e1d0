//! filetrack-workflow: Identity resolution and stage lifecycle
//!
//! - [`Resolver`]: upload bytes to an existing identity, or a new one
//! - [`Lifecycle`]: the stage state machine and its task hooks
//! - [`Consolidator`]: merges identities that share a fingerprint
//! - [`Intake`]: the upload flow tying resolver and lifecycle together

use std::sync::Arc;

use filetrack_core::{Clock, FileId, WorkflowConfig};
use filetrack_store::DocumentStore;

pub mod consolidate;
pub mod error;
pub mod events;
pub mod intake;
pub mod lifecycle;
pub mod resolver;
pub mod view;

pub use consolidate::{
    ConsolidationReport, Consolidator, DuplicateGroup, MergeSummary, PartialFailure,
    StoreStatistics,
};
pub use error::{LifecycleError, Rejection};
pub use events::{EventSink, LogSink, RecordingSink, StageEvent};
pub use intake::{Intake, UploadOutcome, UploadRequest};
pub use lifecycle::{Actor, AutoProgress, Lifecycle, TaskCompleted, UploadDecision};
pub use resolver::{CreateOutcome, MatchRule, Resolution, Resolver};
pub use view::{lifecycle_view, HistoryLine, LifecycleView};

/// Attempts at a compare-and-swap write before a revision conflict is
/// handed back to the caller.
pub const MAX_CAS_ATTEMPTS: usize = 8;

/// All workflow components over one store and clock.
#[derive(Clone)]
pub struct Workflow {
    store: Arc<dyn DocumentStore>,
    config: WorkflowConfig,
    resolver: Resolver,
    lifecycle: Lifecycle,
    consolidator: Consolidator,
}

impl Workflow {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: WorkflowConfig) -> Self {
        let resolver = Resolver::new(store.clone(), clock.clone(), config.identity);
        let lifecycle = Lifecycle::new(store.clone(), clock.clone(), config.stages.clone());
        let consolidator = Consolidator::new(store.clone(), clock);
        Self {
            store,
            config,
            resolver,
            lifecycle,
            consolidator,
        }
    }

    /// Route stage events to `events` instead of the log.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.lifecycle = self.lifecycle.with_events(events);
        self
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn consolidator(&self) -> &Consolidator {
        &self.consolidator
    }

    pub fn intake(&self) -> Intake {
        Intake::new(self.resolver.clone(), self.lifecycle.clone())
    }

    pub fn submit(&self, request: UploadRequest<'_>) -> Result<UploadOutcome, LifecycleError> {
        self.intake().submit(request)
    }

    pub fn view(&self, file_id: &FileId) -> Result<LifecycleView, LifecycleError> {
        lifecycle_view(self.store.as_ref(), &self.config.stages, file_id)
    }
}
