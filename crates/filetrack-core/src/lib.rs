//! filetrack-core: Domain model for permit file tracking
//!
//! Typed documents (file identities, stage tracking), the fixed stage
//! order with its SLA thresholds, content fingerprints, and the
//! duration/SLA accountant. Storage and workflow live in sibling crates.

pub mod clock;
pub mod config;
pub mod fingerprint;
pub mod logging;
pub mod model;
pub mod progress;
pub mod sla;
pub mod stage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{IdentityPolicy, InvalidThreshold, StageOrder, StageThreshold, WorkflowConfig};
pub use fingerprint::{fingerprint, names_overlap, normalize_name, short_fingerprint};
pub use logging::{IndicatifLogger, init_logging};
pub use model::{
    Assignment, ExternalRef, FileId, FileIdentity, RefKind, StageHistoryEntry, StageTracking,
    VersionEntry,
};
pub use progress::ProgressContext;
pub use sla::{SlaStatus, StageLine, StageReport};
pub use stage::{Stage, StageStatus, UnknownStage};
