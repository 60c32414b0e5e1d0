//! filetrack-store: Document storage for file identities and stage tracking
//!
//! The [`DocumentStore`] trait is the only seam the workflow talks to.
//! [`MemoryStore`] backs tests and single-process use; [`FsStore`] keeps one
//! JSON document per key on disk.

pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

#[cfg(test)]
mod conformance;

pub use error::StoreError;
pub use fs::{FsStore, VerifyIssue};
pub use memory::MemoryStore;
pub use traits::{DocumentStore, InsertOutcome};
