//! Documents persisted by the store: identities, stage tracking, external references

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::{Stage, StageStatus};

/// Stable identifier of one physical permit file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id of the form `PF-YYYYMMDD-XXXXXXXX`.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
        Self(format!("PF-{}-{suffix}", now.format("%Y%m%d")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One upload of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version_number: u32,
    pub fingerprint: String,
    pub byte_size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: String,
    pub reason: String,
}

/// One physical permit file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub file_id: FileId,
    /// Hex SHA-256 of the current bytes. `None` for stubs created by sync jobs.
    pub content_fingerprint: Option<String>,
    pub original_name: String,
    pub byte_size: u64,
    /// Append-only.
    #[serde(default)]
    pub version_history: Vec<VersionEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every successful write.
    #[serde(default)]
    pub revision: u64,
}

impl FileIdentity {
    /// Identity for a first upload, seeded with version 1.
    pub fn from_upload(
        file_id: FileId,
        fingerprint: &str,
        byte_size: u64,
        original_name: &str,
        uploaded_by: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let mut identity = Self {
            file_id,
            content_fingerprint: Some(fingerprint.to_string()),
            original_name: original_name.to_string(),
            byte_size,
            version_history: Vec::new(),
            created_at: now,
            updated_at: now,
            revision: 0,
        };
        identity.push_version(fingerprint, byte_size, uploaded_by, "initial upload", now);
        identity
    }

    /// Identity without content, as created by the SQL sync jobs.
    pub fn stub(file_id: FileId, original_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            file_id,
            content_fingerprint: None,
            original_name: original_name.to_string(),
            byte_size: 0,
            version_history: Vec::new(),
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Append a version and make it current. Returns the new version number.
    pub fn push_version(
        &mut self,
        fingerprint: &str,
        byte_size: u64,
        uploaded_by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> u32 {
        let version_number = self.version_history.len() as u32 + 1;
        self.version_history.push(VersionEntry {
            version_number,
            fingerprint: fingerprint.to_string(),
            byte_size,
            uploaded_at: now,
            uploaded_by: uploaded_by.to_string(),
            reason: reason.to_string(),
        });
        self.content_fingerprint = Some(fingerprint.to_string());
        self.byte_size = byte_size;
        self.updated_at = now;
        version_number
    }
}

/// Who is actively working the open stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignee_id: String,
    pub assignee_name: String,
    pub started_at: DateTime<Utc>,
}

fn default_submitted() -> bool {
    true
}

/// Time spent by a file in one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub stage: Stage,
    pub status: StageStatus,
    pub assignee_id: Option<String>,
    pub assignee_name: Option<String>,
    pub entered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    /// An upload has been filed for this stage. Entries opened by
    /// auto-progression or promotion start out unsubmitted.
    #[serde(default = "default_submitted")]
    pub submitted: bool,
    /// Supplied by the task system; summed, never interpreted.
    #[serde(default)]
    pub penalty_points: Option<f64>,
    /// Set on entries absorbed from a consolidated duplicate.
    #[serde(default)]
    pub merged_from: Option<FileId>,
}

impl StageHistoryEntry {
    pub fn open(
        stage: Stage,
        assignment: Option<&Assignment>,
        entered_at: DateTime<Utc>,
        submitted: bool,
    ) -> Self {
        Self {
            stage,
            status: StageStatus::InProgress,
            assignee_id: assignment.map(|a| a.assignee_id.clone()),
            assignee_name: assignment.map(|a| a.assignee_name.clone()),
            entered_at,
            completed_at: None,
            duration_minutes: None,
            submitted,
            penalty_points: None,
            merged_from: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.completed_at.is_none()
    }

    /// Close the entry at `at` and derive its duration.
    pub fn close(&mut self, at: DateTime<Utc>) {
        self.status = StageStatus::Completed;
        self.completed_at = Some(at);
        self.duration_minutes = crate::sla::stage_duration(self);
    }
}

/// Stage state of one file. Exactly one per identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTracking {
    pub file_id: FileId,
    pub current_stage: Stage,
    pub current_status: StageStatus,
    pub current_assignment: Option<Assignment>,
    #[serde(default)]
    pub stage_history: Vec<StageHistoryEntry>,
    /// Precomputed total written by sync jobs; preferred over summation.
    #[serde(default)]
    pub total_minutes: Option<i64>,
    /// Duplicates whose history has already been merged in.
    #[serde(default)]
    pub absorbed: Vec<FileId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl StageTracking {
    /// Tracking with a single open entry at `stage`.
    pub fn start(
        file_id: FileId,
        stage: Stage,
        assignment: Option<Assignment>,
        now: DateTime<Utc>,
    ) -> Self {
        let entry = StageHistoryEntry::open(stage, assignment.as_ref(), now, true);
        Self {
            file_id,
            current_stage: stage,
            current_status: StageStatus::InProgress,
            current_assignment: assignment,
            stage_history: vec![entry],
            total_minutes: None,
            absorbed: Vec::new(),
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    fn current_position(&self) -> Option<usize> {
        self.stage_history
            .iter()
            .rposition(|e| e.stage == self.current_stage)
    }

    /// Latest history entry for the current stage.
    pub fn current_entry(&self) -> Option<&StageHistoryEntry> {
        self.current_position().map(|i| &self.stage_history[i])
    }

    pub fn current_entry_mut(&mut self) -> Option<&mut StageHistoryEntry> {
        let i = self.current_position()?;
        Some(&mut self.stage_history[i])
    }

    /// The current entry, if it is still open.
    pub fn open_entry(&self) -> Option<&StageHistoryEntry> {
        self.current_entry().filter(|e| e.is_open())
    }

    /// Stages whose entries are closed, in history order.
    pub fn completed_stages(&self) -> Vec<Stage> {
        self.stage_history
            .iter()
            .filter(|e| e.status == StageStatus::Completed)
            .map(|e| e.stage)
            .collect()
    }

    pub fn is_delivered(&self) -> bool {
        self.current_stage.is_terminal()
    }
}

/// Kind of externally-owned record that points at a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Task,
    ProfileEntry,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Task => "task",
            Self::ProfileEntry => "profile_entry",
        })
    }
}

/// A record owned by another system that references a file id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRef {
    pub ref_id: String,
    pub kind: RefKind,
    pub file_id: FileId,
    pub stage: Option<Stage>,
    /// Open tasks block a second task for the same stage.
    pub open: bool,
}

impl ExternalRef {
    pub fn task(ref_id: &str, file_id: FileId, stage: Stage) -> Self {
        Self {
            ref_id: ref_id.to_string(),
            kind: RefKind::Task,
            file_id,
            stage: Some(stage),
            open: true,
        }
    }

    pub fn profile_entry(ref_id: &str, file_id: FileId) -> Self {
        Self {
            ref_id: ref_id.to_string(),
            kind: RefKind::ProfileEntry,
            file_id,
            stage: None,
            open: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + chrono::Duration::minutes(min)
    }

    #[test]
    fn generated_id_format() {
        let id = FileId::generate(t(0));
        let s = id.as_str();
        assert!(s.starts_with("PF-20250301-"));
        assert_eq!(s.len(), "PF-20250301-".len() + 8);
        assert!(s[12..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(FileId::generate(t(0)), FileId::generate(t(0)));
    }

    #[test]
    fn from_upload_seeds_first_version() {
        let identity = FileIdentity::from_upload("F1".into(), "aa", 10, "plan.pdf", "u1", t(0));
        assert_eq!(identity.version_history.len(), 1);
        assert_eq!(identity.version_history[0].version_number, 1);
        assert_eq!(identity.content_fingerprint.as_deref(), Some("aa"));
    }

    #[test]
    fn push_version_is_monotonic() {
        let mut identity =
            FileIdentity::from_upload("F1".into(), "aa", 10, "plan.pdf", "u1", t(0));
        assert_eq!(identity.push_version("bb", 12, "u2", "revised", t(5)), 2);
        assert_eq!(identity.push_version("cc", 14, "u2", "revised", t(9)), 3);
        assert_eq!(identity.content_fingerprint.as_deref(), Some("cc"));
        assert_eq!(identity.byte_size, 14);
        assert_eq!(identity.updated_at, t(9));
    }

    #[test]
    fn close_derives_duration() {
        let mut entry = StageHistoryEntry::open(Stage::Prelims, None, t(0), true);
        assert!(entry.is_open());
        entry.close(t(25));
        assert_eq!(entry.status, StageStatus::Completed);
        assert_eq!(entry.duration_minutes, Some(25));
    }

    #[test]
    fn current_entry_is_latest_for_current_stage() {
        let mut tracking = StageTracking::start("F1".into(), Stage::Prelims, None, t(0));
        tracking.stage_history[0].close(t(10));
        tracking
            .stage_history
            .push(StageHistoryEntry::open(Stage::Production, None, t(10), false));
        tracking.current_stage = Stage::Production;
        assert_eq!(tracking.current_entry().unwrap().stage, Stage::Production);
        assert!(tracking.open_entry().is_some());
        assert_eq!(tracking.completed_stages(), vec![Stage::Prelims]);
    }

    #[test]
    fn legacy_entry_without_submitted_defaults_true() {
        let json = r#"{
            "stage": "QC", "status": "IN_PROGRESS",
            "assignee_id": null, "assignee_name": null,
            "entered_at": "2025-03-01T09:00:00Z",
            "completed_at": null, "duration_minutes": null
        }"#;
        let entry: StageHistoryEntry = serde_json::from_str(json).unwrap();
        assert!(entry.submitted);
        assert!(entry.merged_from.is_none());
    }
}
