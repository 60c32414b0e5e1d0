//! In-process store backed by ordered maps

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use filetrack_core::{ExternalRef, FileId, FileIdentity, StageTracking};

use crate::error::StoreError;
use crate::traits::{DocumentStore, InsertOutcome, sort_identities};

#[derive(Debug, Default)]
struct Collections {
    identities: BTreeMap<FileId, FileIdentity>,
    tracking: BTreeMap<FileId, StageTracking>,
    refs: BTreeMap<String, ExternalRef>,
}

/// Store held entirely in memory. One mutex guards all collections, so
/// every operation is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DocumentStore for MemoryStore {
    fn get_identity(&self, file_id: &FileId) -> Result<Option<FileIdentity>, StoreError> {
        Ok(self.lock().identities.get(file_id).cloned())
    }

    fn identities(&self) -> Result<Vec<FileIdentity>, StoreError> {
        let mut all: Vec<_> = self.lock().identities.values().cloned().collect();
        sort_identities(&mut all);
        Ok(all)
    }

    fn insert_identity(&self, identity: &FileIdentity) -> Result<(), StoreError> {
        let mut c = self.lock();
        if c.identities.contains_key(&identity.file_id) {
            return Err(StoreError::AlreadyExists {
                collection: "identities",
                key: identity.file_id.to_string(),
            });
        }
        c.identities.insert(identity.file_id.clone(), identity.clone());
        Ok(())
    }

    fn insert_identity_if_absent(
        &self,
        identity: &FileIdentity,
    ) -> Result<InsertOutcome, StoreError> {
        let mut c = self.lock();
        if let Some(fp) = identity.content_fingerprint.as_deref() {
            let mut owners: Vec<_> = c
                .identities
                .values()
                .filter(|i| i.content_fingerprint.as_deref() == Some(fp))
                .cloned()
                .collect();
            sort_identities(&mut owners);
            if let Some(owner) = owners.into_iter().next() {
                return Ok(InsertOutcome::Existing(owner.file_id));
            }
        }
        if c.identities.contains_key(&identity.file_id) {
            return Err(StoreError::AlreadyExists {
                collection: "identities",
                key: identity.file_id.to_string(),
            });
        }
        c.identities.insert(identity.file_id.clone(), identity.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn update_identity(&self, identity: &FileIdentity) -> Result<u64, StoreError> {
        let mut c = self.lock();
        let stored = c
            .identities
            .get_mut(&identity.file_id)
            .ok_or_else(|| StoreError::NotFound {
                collection: "identities",
                key: identity.file_id.to_string(),
            })?;
        if stored.revision != identity.revision {
            return Err(StoreError::RevisionConflict {
                collection: "identities",
                key: identity.file_id.to_string(),
                expected: identity.revision,
                found: stored.revision,
            });
        }
        let mut next = identity.clone();
        next.revision += 1;
        *stored = next;
        Ok(stored.revision)
    }

    fn delete_identity(&self, file_id: &FileId) -> Result<bool, StoreError> {
        Ok(self.lock().identities.remove(file_id).is_some())
    }

    fn get_tracking(&self, file_id: &FileId) -> Result<Option<StageTracking>, StoreError> {
        Ok(self.lock().tracking.get(file_id).cloned())
    }

    fn trackings(&self) -> Result<Vec<StageTracking>, StoreError> {
        Ok(self.lock().tracking.values().cloned().collect())
    }

    fn insert_tracking(&self, tracking: &StageTracking) -> Result<(), StoreError> {
        let mut c = self.lock();
        if c.tracking.contains_key(&tracking.file_id) {
            return Err(StoreError::AlreadyExists {
                collection: "tracking",
                key: tracking.file_id.to_string(),
            });
        }
        c.tracking.insert(tracking.file_id.clone(), tracking.clone());
        Ok(())
    }

    fn update_tracking(&self, tracking: &StageTracking) -> Result<u64, StoreError> {
        let mut c = self.lock();
        let stored = c
            .tracking
            .get_mut(&tracking.file_id)
            .ok_or_else(|| StoreError::NotFound {
                collection: "tracking",
                key: tracking.file_id.to_string(),
            })?;
        if stored.revision != tracking.revision {
            return Err(StoreError::RevisionConflict {
                collection: "tracking",
                key: tracking.file_id.to_string(),
                expected: tracking.revision,
                found: stored.revision,
            });
        }
        let mut next = tracking.clone();
        next.revision += 1;
        *stored = next;
        Ok(stored.revision)
    }

    fn delete_tracking(&self, file_id: &FileId) -> Result<bool, StoreError> {
        Ok(self.lock().tracking.remove(file_id).is_some())
    }

    fn put_ref(&self, reference: &ExternalRef) -> Result<(), StoreError> {
        self.lock()
            .refs
            .insert(reference.ref_id.clone(), reference.clone());
        Ok(())
    }

    fn get_ref(&self, ref_id: &str) -> Result<Option<ExternalRef>, StoreError> {
        Ok(self.lock().refs.get(ref_id).cloned())
    }

    fn refs(&self) -> Result<Vec<ExternalRef>, StoreError> {
        Ok(self.lock().refs.values().cloned().collect())
    }

    fn repoint_refs(&self, from: &FileId, to: &FileId) -> Result<usize, StoreError> {
        let mut c = self.lock();
        let mut moved = 0;
        for r in c.refs.values_mut().filter(|r| &r.file_id == from) {
            r.file_id = to.clone();
            moved += 1;
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    #[test]
    fn identity_crud() {
        conformance::identity_crud(&MemoryStore::new());
    }

    #[test]
    fn identities_sorted_oldest_first() {
        conformance::identities_sorted_oldest_first(&MemoryStore::new());
    }

    #[test]
    fn insert_if_absent_keys_on_fingerprint() {
        conformance::insert_if_absent_keys_on_fingerprint(&MemoryStore::new());
    }

    #[test]
    fn tracking_cas() {
        conformance::tracking_cas(&MemoryStore::new());
    }

    #[test]
    fn identity_cas() {
        conformance::identity_cas(&MemoryStore::new());
    }

    #[test]
    fn refs_repoint() {
        conformance::refs_repoint(&MemoryStore::new());
    }

    #[test]
    fn deletes_are_idempotent() {
        conformance::deletes_are_idempotent(&MemoryStore::new());
    }

    #[test]
    fn concurrent_insert_if_absent_single_winner() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let identity = conformance::identity(&format!("F{i}"), Some("same"), 0);
                    store.insert_identity_if_absent(&identity).unwrap()
                })
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == InsertOutcome::Inserted)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(store.find_by_fingerprint("same").unwrap().len(), 1);
    }
}
