//! Upload to identity resolution
//!
//! The content fingerprint is the only exact signal. When it misses and the
//! identity policy trusts filenames, four name heuristics run in priority
//! order. Within a rule the oldest identity wins.

use std::fmt;
use std::sync::Arc;

use filetrack_core::fingerprint::names_overlap;
use filetrack_core::{
    fingerprint, normalize_name, short_fingerprint, Clock, FileId, FileIdentity, IdentityPolicy,
};
use filetrack_store::{DocumentStore, InsertOutcome, StoreError};

use crate::error::{LifecycleError, Rejection};
use crate::MAX_CAS_ATTEMPTS;

/// Which rule matched an upload to an existing identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchRule {
    Fingerprint,
    ExactName,
    CaseInsensitiveName,
    NormalizedName,
    SizeAndName,
}

impl MatchRule {
    /// Every rule except the fingerprint is a guess.
    pub fn is_heuristic(self) -> bool {
        self != Self::Fingerprint
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fingerprint => "fingerprint",
            Self::ExactName => "exact_name",
            Self::CaseInsensitiveName => "case_insensitive_name",
            Self::NormalizedName => "normalized_name",
            Self::SizeAndName => "size_and_name",
        }
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Existing { file_id: FileId, matched_by: MatchRule },
    New,
}

/// Result of creating an identity for an unmatched upload.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(FileIdentity),
    /// A concurrent upload already owns the fingerprint.
    AlreadyOwned(FileId),
}

const ID_CLASH_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    policy: IdentityPolicy,
}

impl Resolver {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, policy: IdentityPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Resolve raw upload bytes.
    pub fn resolve(&self, bytes: &[u8], original_name: &str) -> Result<Resolution, StoreError> {
        self.resolve_fingerprint(&fingerprint(bytes), bytes.len() as u64, original_name)
    }

    /// Resolve an upload whose fingerprint is already known.
    pub fn resolve_fingerprint(
        &self,
        fp: &str,
        byte_size: u64,
        original_name: &str,
    ) -> Result<Resolution, StoreError> {
        if let Some(owner) = self.store.find_by_fingerprint(fp)?.into_iter().next() {
            return Ok(existing(owner.file_id, MatchRule::Fingerprint));
        }
        if !self.policy.trust_filename {
            return Ok(Resolution::New);
        }

        let identities = self.store.identities()?;
        let lower = original_name.to_lowercase();
        let normalized = normalize_name(original_name);

        let rules: [(MatchRule, &dyn Fn(&FileIdentity) -> bool); 4] = [
            (MatchRule::ExactName, &|i: &FileIdentity| {
                i.original_name == original_name
            }),
            (MatchRule::CaseInsensitiveName, &|i: &FileIdentity| {
                i.original_name.to_lowercase() == lower
            }),
            (MatchRule::NormalizedName, &|i: &FileIdentity| {
                !normalized.is_empty() && normalize_name(&i.original_name).contains(&normalized)
            }),
            (MatchRule::SizeAndName, &|i: &FileIdentity| {
                i.byte_size == byte_size && names_overlap(&i.original_name, original_name)
            }),
        ];

        for (rule, hits) in rules {
            if let Some(hit) = identities.iter().find(|i| hits(i)) {
                log::debug!(
                    "{original_name} matched {} by {rule} (fingerprint {} missed)",
                    hit.file_id,
                    short_fingerprint(fp)
                );
                return Ok(existing(hit.file_id.clone(), rule));
            }
        }
        Ok(Resolution::New)
    }

    /// Create a fresh identity seeded with version 1.
    ///
    /// With `unique_fingerprint` the insert is keyed on the fingerprint and a
    /// concurrent winner's id comes back instead.
    pub fn create_identity(
        &self,
        fp: &str,
        byte_size: u64,
        original_name: &str,
        uploaded_by: &str,
    ) -> Result<CreateOutcome, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = self.clock.now();
            let identity = FileIdentity::from_upload(
                FileId::generate(now),
                fp,
                byte_size,
                original_name,
                uploaded_by,
                now,
            );

            let inserted = if self.policy.unique_fingerprint {
                self.store
                    .insert_identity_if_absent(&identity)
                    .map(|outcome| match outcome {
                        InsertOutcome::Inserted => None,
                        InsertOutcome::Existing(owner) => Some(owner),
                    })
            } else {
                self.store.insert_identity(&identity).map(|()| None)
            };

            match inserted {
                Ok(None) => {
                    log::info!(
                        "new identity {} for {original_name} ({})",
                        identity.file_id,
                        short_fingerprint(fp)
                    );
                    return Ok(CreateOutcome::Created(identity));
                }
                Ok(Some(owner)) => {
                    log::info!("{original_name}: fingerprint already owned by {owner}");
                    return Ok(CreateOutcome::AlreadyOwned(owner));
                }
                Err(StoreError::AlreadyExists { key, .. }) if attempt < ID_CLASH_ATTEMPTS => {
                    log::warn!("file id {key} already taken, generating another");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Append a version to an identity and make it current. Returns the new
    /// version number.
    pub fn record_new_version(
        &self,
        file_id: &FileId,
        fp: &str,
        byte_size: u64,
        uploaded_by: &str,
        reason: &str,
    ) -> Result<u32, LifecycleError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut identity = self
                .store
                .get_identity(file_id)?
                .ok_or_else(|| Rejection::UnknownFile {
                    file_id: file_id.clone(),
                })?;
            let version = identity.push_version(fp, byte_size, uploaded_by, reason, self.clock.now());

            match self.store.update_identity(&identity) {
                Ok(_) => {
                    log::info!("{file_id}: version {version} ({})", short_fingerprint(fp));
                    return Ok(version);
                }
                Err(e) if e.is_conflict() && attempt < MAX_CAS_ATTEMPTS => {
                    log::debug!("{file_id}: version write raced, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Look up an identity by original name: exact first, then ignoring case.
    pub fn find_by_name(&self, name: &str) -> Result<Option<FileIdentity>, StoreError> {
        let identities = self.store.identities()?;
        if let Some(hit) = identities.iter().find(|i| i.original_name == name) {
            return Ok(Some(hit.clone()));
        }
        let lower = name.to_lowercase();
        Ok(identities
            .into_iter()
            .find(|i| i.original_name.to_lowercase() == lower))
    }
}

fn existing(file_id: FileId, matched_by: MatchRule) -> Resolution {
    Resolution::Existing {
        file_id,
        matched_by,
    }
}
