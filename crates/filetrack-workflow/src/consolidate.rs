//! Duplicate identity consolidation
//!
//! Identities sharing a content fingerprint are merged into the oldest one.
//! Each step is idempotent so an interrupted run can simply be repeated:
//!
//! 1. merge the duplicate's stage history into the target (guarded by the
//!    target's `absorbed` list)
//! 2. re-point external references from the duplicate to the target
//! 3. delete the duplicate's tracking, then its identity
//!
//! The identity goes last: while it exists the group is still detected.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use filetrack_core::{short_fingerprint, Clock, FileId, Stage, StageTracking};
use filetrack_store::{DocumentStore, StoreError};

use crate::error::{LifecycleError, Rejection};
use crate::MAX_CAS_ATTEMPTS;

/// Identities sharing one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub fingerprint: String,
    /// Oldest identity; survives the merge.
    pub target: FileId,
    pub duplicates: Vec<FileId>,
}

/// What merging one group changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub entries_merged: usize,
    pub refs_moved: usize,
    pub duplicates_removed: usize,
}

/// A group that could not be consolidated. The run goes on without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialFailure {
    pub fingerprint: String,
    pub target: FileId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationReport {
    pub groups_found: usize,
    pub groups_consolidated: usize,
    pub duplicates_removed: usize,
    pub refs_moved: usize,
    pub failures: Vec<PartialFailure>,
}

/// Store-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    pub identities: usize,
    pub trackings: usize,
    pub refs: usize,
    pub fingerprinted: usize,
    pub duplicate_groups: usize,
    pub total_duplicates: usize,
}

#[derive(Clone)]
pub struct Consolidator {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

impl Consolidator {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Fingerprint groups with more than one identity, target first.
    pub fn detect_groups(&self) -> Result<Vec<DuplicateGroup>, StoreError> {
        let mut by_fingerprint: BTreeMap<String, Vec<FileId>> = BTreeMap::new();
        // identities() is oldest first, so the first id per group is the target
        for identity in self.store.identities()? {
            if let Some(fp) = identity.content_fingerprint {
                by_fingerprint.entry(fp).or_default().push(identity.file_id);
            }
        }

        Ok(by_fingerprint
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(fingerprint, mut ids)| {
                let target = ids.remove(0);
                DuplicateGroup {
                    fingerprint,
                    target,
                    duplicates: ids,
                }
            })
            .collect())
    }

    /// Merge each duplicate into `target`.
    pub fn consolidate(
        &self,
        target: &FileId,
        duplicates: &[FileId],
    ) -> Result<MergeSummary, LifecycleError> {
        if self.store.get_identity(target)?.is_none() {
            return Err(Rejection::UnknownFile {
                file_id: target.clone(),
            }
            .into());
        }

        let mut summary = MergeSummary::default();
        for duplicate in duplicates.iter().filter(|d| *d != target) {
            summary.entries_merged += self.merge_history(target, duplicate)?;

            let moved = self.store.repoint_refs(duplicate, target)?;
            summary.refs_moved += moved;

            self.store.delete_tracking(duplicate)?;
            if self.store.delete_identity(duplicate)? {
                summary.duplicates_removed += 1;
                log::info!("{duplicate} merged into {target} ({moved} refs moved)");
            }
        }
        Ok(summary)
    }

    /// Detect and consolidate every group.
    pub fn run_all(&self) -> Result<ConsolidationReport, StoreError> {
        self.run_with(|_, _| {})
    }

    /// Like [`run_all`](Self::run_all), calling `on_group` after each group.
    pub fn run_with(
        &self,
        mut on_group: impl FnMut(&DuplicateGroup, &Result<MergeSummary, LifecycleError>),
    ) -> Result<ConsolidationReport, StoreError> {
        let groups = self.detect_groups()?;
        let mut report = ConsolidationReport {
            groups_found: groups.len(),
            ..ConsolidationReport::default()
        };
        log::info!("{} duplicate group(s) found", groups.len());

        for group in &groups {
            let result = self.consolidate(&group.target, &group.duplicates);
            match &result {
                Ok(summary) => {
                    report.groups_consolidated += 1;
                    report.duplicates_removed += summary.duplicates_removed;
                    report.refs_moved += summary.refs_moved;
                }
                Err(e) => {
                    log::error!(
                        "consolidating {} ({}) failed: {e}",
                        group.target,
                        short_fingerprint(&group.fingerprint)
                    );
                    report.failures.push(PartialFailure {
                        fingerprint: group.fingerprint.clone(),
                        target: group.target.clone(),
                        error: e.to_string(),
                    });
                }
            }
            on_group(group, &result);
        }
        Ok(report)
    }

    pub fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        let identities = self.store.identities()?;
        let groups = self.detect_groups()?;
        Ok(StoreStatistics {
            identities: identities.len(),
            trackings: self.store.trackings()?.len(),
            refs: self.store.refs()?.len(),
            fingerprinted: identities
                .iter()
                .filter(|i| i.content_fingerprint.is_some())
                .count(),
            duplicate_groups: groups.len(),
            total_duplicates: groups.iter().map(|g| g.duplicates.len()).sum(),
        })
    }

    /// Fold the duplicate's history into the target's tracking. Returns the
    /// number of entries merged, 0 when already absorbed.
    fn merge_history(&self, target: &FileId, duplicate: &FileId) -> Result<usize, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(source) = self.store.get_tracking(duplicate)? else {
                return Ok(0);
            };
            let now = self.clock.now();

            let written = match self.store.get_tracking(target)? {
                None => {
                    let mut moved = source.clone();
                    moved.file_id = target.clone();
                    moved.revision = 0;
                    moved.updated_at = now;
                    tag_entries(&mut moved, duplicate);
                    moved.absorbed.push(duplicate.clone());
                    self.store.insert_tracking(&moved)
                }
                Some(tracking) if tracking.absorbed.contains(duplicate) => return Ok(0),
                Some(mut tracking) => {
                    absorb(&mut tracking, source.clone(), duplicate, now);
                    tracking.updated_at = now;
                    self.store.update_tracking(&tracking).map(|_| ())
                }
            };

            match written {
                Ok(()) => return Ok(source.stage_history.len()),
                Err(e) if retryable(&e) && attempt < MAX_CAS_ATTEMPTS => {
                    log::debug!("{target}: tracking changed during merge, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn retryable(e: &StoreError) -> bool {
    e.is_conflict() || matches!(e, StoreError::AlreadyExists { .. })
}

fn tag_entries(tracking: &mut StageTracking, from: &FileId) {
    for entry in &mut tracking.stage_history {
        entry.merged_from.get_or_insert_with(|| from.clone());
    }
}

/// Append `source`'s history to `target`, ordered by stage then entry time.
/// The current pointer comes from whichever side is further along; on the
/// same stage, the later entry wins. Open entries other than the last are
/// closed, so the merged history keeps at most one open entry.
fn absorb(target: &mut StageTracking, mut source: StageTracking, from: &FileId, now: DateTime<Utc>) {
    let source_leads = lead(&source) >= lead(target);

    tag_entries(&mut source, from);
    target.stage_history.append(&mut source.stage_history);
    target
        .stage_history
        .sort_by_key(|e| (e.stage, e.entered_at));

    if source_leads {
        target.current_stage = source.current_stage;
        target.current_status = source.current_status;
        target.current_assignment = source.current_assignment;
    }
    close_superseded(target, now);

    // precomputed totals no longer describe the merged history
    target.total_minutes = None;

    for id in std::iter::once(from.clone()).chain(source.absorbed) {
        if !target.absorbed.contains(&id) {
            target.absorbed.push(id);
        }
    }
}

fn lead(t: &StageTracking) -> (Stage, Option<DateTime<Utc>>) {
    (t.current_stage, t.current_entry().map(|e| e.entered_at))
}

/// Close every open entry but the last: at the time a later stage was
/// entered, else at `now`.
fn close_superseded(t: &mut StageTracking, now: DateTime<Utc>) {
    let last = t.stage_history.len().saturating_sub(1);
    for i in 0..last {
        let entry = &t.stage_history[i];
        if !entry.is_open() {
            continue;
        }
        let replaced_at = t.stage_history[i + 1..]
            .iter()
            .filter(|e| e.stage > entry.stage && e.entered_at >= entry.entered_at)
            .map(|e| e.entered_at)
            .min();
        let at = replaced_at.unwrap_or(now);
        t.stage_history[i].close(at);
    }
}
