//! Filesystem-backed document store
//!
//! Directory layout:
//! ```text
//! {base}/
//! ├── identities/
//! │   └── {file_id}.json
//! ├── tracking/
//! │   └── {file_id}.json
//! └── refs/
//!     └── {ref_id}.json
//! ```
//!
//! Every write goes to `{name}.json.tmp` first and is renamed into place, so
//! readers never see a half-written document. Compare-and-swap and
//! insert-if-absent are serialized by an in-process lock; two processes
//! sharing one directory are not protected against each other.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;

use filetrack_core::{ExternalRef, FileId, FileIdentity, StageTracking};

use crate::error::StoreError;
use crate::traits::{DocumentStore, InsertOutcome, sort_identities};

const IDENTITIES: &str = "identities";
const TRACKING: &str = "tracking";
const REFS: &str = "refs";

/// Integrity problem found by [`FsStore::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyIssue {
    pub path: String,
    pub problem: String,
}

/// JSON-file document store.
#[derive(Debug)]
pub struct FsStore {
    base: PathBuf,
    write_lock: Mutex<()>,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `base`.
    pub fn open(base: &Path) -> Result<Self, StoreError> {
        for collection in [IDENTITIES, TRACKING, REFS] {
            let dir = base.join(collection);
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        Ok(Self {
            base: base.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn doc_path(&self, collection: &str, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
            || key.ends_with(".tmp")
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base.join(collection).join(format!("{key}.json")))
    }

    fn read_doc<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::serde(path, e))
    }

    /// Write via tmp file + atomic rename.
    fn write_doc<T: Serialize>(&self, path: &Path, doc: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(doc).map_err(|e| StoreError::serde(path, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))
    }

    fn remove_doc(&self, path: &Path) -> Result<bool, StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Paths of committed documents in a collection, sorted.
    fn doc_paths(&self, collection: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.base.join(collection);
        let mut paths = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Load every document of a collection. Corrupt documents are skipped
    /// with a warning so one bad file cannot hide the rest.
    fn load_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, StoreError> {
        let mut docs = Vec::new();
        for path in self.doc_paths(collection)? {
            match self.read_doc(&path) {
                Ok(Some(doc)) => docs.push(doc),
                Ok(None) => {}
                Err(StoreError::Serde { path, source }) => {
                    log::warn!("skipping {}: {source}", path.display());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(docs)
    }

    /// Check that every document parses, that its key matches its file
    /// name, and that tracking never outlives its identity.
    pub fn verify(&self) -> Result<Vec<VerifyIssue>, StoreError> {
        let mut issues = Vec::new();

        let mut identity_ids = std::collections::HashSet::new();
        for path in self.doc_paths(IDENTITIES)? {
            match self.read_doc::<FileIdentity>(&path) {
                Ok(Some(identity)) => {
                    check_key(&path, identity.file_id.as_str(), &mut issues);
                    identity_ids.insert(identity.file_id);
                }
                Ok(None) => {}
                Err(e) => issues.push(issue(&path, e.to_string())),
            }
        }

        for path in self.doc_paths(TRACKING)? {
            match self.read_doc::<StageTracking>(&path) {
                Ok(Some(tracking)) => {
                    check_key(&path, tracking.file_id.as_str(), &mut issues);
                    if !identity_ids.contains(&tracking.file_id) {
                        issues.push(issue(&path, "tracking without identity".into()));
                    }
                }
                Ok(None) => {}
                Err(e) => issues.push(issue(&path, e.to_string())),
            }
        }

        for path in self.doc_paths(REFS)? {
            if let Err(e) = self.read_doc::<ExternalRef>(&path) {
                issues.push(issue(&path, e.to_string()));
            }
        }

        Ok(issues)
    }

    /// Remove leftover `.tmp` files from interrupted writes.
    pub fn cleanup_tmp(&self) -> Result<usize, StoreError> {
        let _guard = self.lock();
        let mut count = 0;
        for collection in [IDENTITIES, TRACKING, REFS] {
            let dir = self.base.join(collection);
            for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
                let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(".tmp") {
                    log::info!("cleaning stale tmp: {collection}/{name}");
                    fs::remove_file(entry.path()).map_err(|e| StoreError::io(entry.path(), e))?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

fn issue(path: &Path, problem: String) -> VerifyIssue {
    VerifyIssue {
        path: path.display().to_string(),
        problem,
    }
}

fn check_key(path: &Path, key: &str, issues: &mut Vec<VerifyIssue>) {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
    if stem.as_deref() != Some(key) {
        issues.push(issue(path, format!("key {key:?} does not match file name")));
    }
}

impl DocumentStore for FsStore {
    fn get_identity(&self, file_id: &FileId) -> Result<Option<FileIdentity>, StoreError> {
        self.read_doc(&self.doc_path(IDENTITIES, file_id.as_str())?)
    }

    fn identities(&self) -> Result<Vec<FileIdentity>, StoreError> {
        let mut all: Vec<FileIdentity> = self.load_all(IDENTITIES)?;
        sort_identities(&mut all);
        Ok(all)
    }

    fn insert_identity(&self, identity: &FileIdentity) -> Result<(), StoreError> {
        let path = self.doc_path(IDENTITIES, identity.file_id.as_str())?;
        let _guard = self.lock();
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                collection: IDENTITIES,
                key: identity.file_id.to_string(),
            });
        }
        self.write_doc(&path, identity)
    }

    fn insert_identity_if_absent(
        &self,
        identity: &FileIdentity,
    ) -> Result<InsertOutcome, StoreError> {
        let path = self.doc_path(IDENTITIES, identity.file_id.as_str())?;
        let _guard = self.lock();
        if let Some(fp) = identity.content_fingerprint.as_deref() {
            if let Some(owner) = self.find_by_fingerprint(fp)?.into_iter().next() {
                return Ok(InsertOutcome::Existing(owner.file_id));
            }
        }
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                collection: IDENTITIES,
                key: identity.file_id.to_string(),
            });
        }
        self.write_doc(&path, identity)?;
        Ok(InsertOutcome::Inserted)
    }

    fn update_identity(&self, identity: &FileIdentity) -> Result<u64, StoreError> {
        let path = self.doc_path(IDENTITIES, identity.file_id.as_str())?;
        let _guard = self.lock();
        let stored: FileIdentity = self.read_doc(&path)?.ok_or_else(|| StoreError::NotFound {
            collection: IDENTITIES,
            key: identity.file_id.to_string(),
        })?;
        if stored.revision != identity.revision {
            return Err(StoreError::RevisionConflict {
                collection: IDENTITIES,
                key: identity.file_id.to_string(),
                expected: identity.revision,
                found: stored.revision,
            });
        }
        let mut next = identity.clone();
        next.revision += 1;
        self.write_doc(&path, &next)?;
        Ok(next.revision)
    }

    fn delete_identity(&self, file_id: &FileId) -> Result<bool, StoreError> {
        let path = self.doc_path(IDENTITIES, file_id.as_str())?;
        let _guard = self.lock();
        self.remove_doc(&path)
    }

    fn get_tracking(&self, file_id: &FileId) -> Result<Option<StageTracking>, StoreError> {
        self.read_doc(&self.doc_path(TRACKING, file_id.as_str())?)
    }

    fn trackings(&self) -> Result<Vec<StageTracking>, StoreError> {
        self.load_all(TRACKING)
    }

    fn insert_tracking(&self, tracking: &StageTracking) -> Result<(), StoreError> {
        let path = self.doc_path(TRACKING, tracking.file_id.as_str())?;
        let _guard = self.lock();
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                collection: TRACKING,
                key: tracking.file_id.to_string(),
            });
        }
        self.write_doc(&path, tracking)
    }

    fn update_tracking(&self, tracking: &StageTracking) -> Result<u64, StoreError> {
        let path = self.doc_path(TRACKING, tracking.file_id.as_str())?;
        let _guard = self.lock();
        let stored: StageTracking = self.read_doc(&path)?.ok_or_else(|| StoreError::NotFound {
            collection: TRACKING,
            key: tracking.file_id.to_string(),
        })?;
        if stored.revision != tracking.revision {
            return Err(StoreError::RevisionConflict {
                collection: TRACKING,
                key: tracking.file_id.to_string(),
                expected: tracking.revision,
                found: stored.revision,
            });
        }
        let mut next = tracking.clone();
        next.revision += 1;
        self.write_doc(&path, &next)?;
        Ok(next.revision)
    }

    fn delete_tracking(&self, file_id: &FileId) -> Result<bool, StoreError> {
        let path = self.doc_path(TRACKING, file_id.as_str())?;
        let _guard = self.lock();
        self.remove_doc(&path)
    }

    fn put_ref(&self, reference: &ExternalRef) -> Result<(), StoreError> {
        let path = self.doc_path(REFS, &reference.ref_id)?;
        let _guard = self.lock();
        self.write_doc(&path, reference)
    }

    fn get_ref(&self, ref_id: &str) -> Result<Option<ExternalRef>, StoreError> {
        self.read_doc(&self.doc_path(REFS, ref_id)?)
    }

    fn refs(&self) -> Result<Vec<ExternalRef>, StoreError> {
        self.load_all(REFS)
    }

    fn repoint_refs(&self, from: &FileId, to: &FileId) -> Result<usize, StoreError> {
        let _guard = self.lock();
        let mut moved = 0;
        for mut reference in self.load_all::<ExternalRef>(REFS)? {
            if &reference.file_id != from {
                continue;
            }
            reference.file_id = to.clone();
            self.write_doc(&self.doc_path(REFS, &reference.ref_id)?, &reference)?;
            moved += 1;
        }
        Ok(moved)
    }
}
