//! The document store seam
//!
//! Three collections: identities keyed by file id (with a logical secondary
//! index on the content fingerprint), stage tracking keyed by file id, and
//! external references keyed by ref id.

use filetrack_core::{ExternalRef, FileId, FileIdentity, StageTracking};

use crate::error::StoreError;

/// Outcome of an insert keyed on a unique fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another identity already owns the fingerprint.
    Existing(FileId),
}

/// Ordered key-value document store with the few queries the workflow needs.
///
/// Updates are compare-and-swap on the document's `revision`: the write
/// succeeds only if the stored revision equals the one passed in, and the
/// stored document then carries `revision + 1`.
pub trait DocumentStore: Send + Sync {
    fn get_identity(&self, file_id: &FileId) -> Result<Option<FileIdentity>, StoreError>;

    /// All identities, oldest first (ties broken by file id).
    fn identities(&self) -> Result<Vec<FileIdentity>, StoreError>;

    /// Identities owning `fingerprint`, oldest first.
    fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Vec<FileIdentity>, StoreError> {
        Ok(self
            .identities()?
            .into_iter()
            .filter(|i| i.content_fingerprint.as_deref() == Some(fingerprint))
            .collect())
    }

    /// Plain insert. Fails with `AlreadyExists` only on a file id clash;
    /// fingerprints are not checked.
    fn insert_identity(&self, identity: &FileIdentity) -> Result<(), StoreError>;

    /// Insert unless an identity already owns the same fingerprint.
    /// Lookup and insert happen under one lock.
    fn insert_identity_if_absent(&self, identity: &FileIdentity)
        -> Result<InsertOutcome, StoreError>;

    /// CAS update. Returns the new revision.
    fn update_identity(&self, identity: &FileIdentity) -> Result<u64, StoreError>;

    /// Returns whether a document was removed.
    fn delete_identity(&self, file_id: &FileId) -> Result<bool, StoreError>;

    fn get_tracking(&self, file_id: &FileId) -> Result<Option<StageTracking>, StoreError>;

    fn trackings(&self) -> Result<Vec<StageTracking>, StoreError>;

    /// Fails with `AlreadyExists` if the file already has tracking.
    fn insert_tracking(&self, tracking: &StageTracking) -> Result<(), StoreError>;

    /// CAS update. Returns the new revision.
    fn update_tracking(&self, tracking: &StageTracking) -> Result<u64, StoreError>;

    fn delete_tracking(&self, file_id: &FileId) -> Result<bool, StoreError>;

    /// Insert or replace.
    fn put_ref(&self, reference: &ExternalRef) -> Result<(), StoreError>;

    fn get_ref(&self, ref_id: &str) -> Result<Option<ExternalRef>, StoreError>;

    fn refs(&self) -> Result<Vec<ExternalRef>, StoreError>;

    fn refs_for(&self, file_id: &FileId) -> Result<Vec<ExternalRef>, StoreError> {
        Ok(self
            .refs()?
            .into_iter()
            .filter(|r| &r.file_id == file_id)
            .collect())
    }

    /// Point every reference at `from` to `to`. Returns how many moved.
    fn repoint_refs(&self, from: &FileId, to: &FileId) -> Result<usize, StoreError>;
}

pub(crate) fn sort_identities(identities: &mut [FileIdentity]) {
    identities.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.file_id.cmp(&b.file_id))
    });
}
