//! Behavior every `DocumentStore` must share, run against each backend

use chrono::{DateTime, TimeZone, Utc};

use filetrack_core::{ExternalRef, FileId, FileIdentity, Stage, StageTracking};

use crate::error::StoreError;
use crate::traits::{DocumentStore, InsertOutcome};

fn t(min: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + chrono::Duration::minutes(min)
}

pub fn identity(id: &str, fp: Option<&str>, created_offset_minutes: i64) -> FileIdentity {
    let now = t(created_offset_minutes);
    match fp {
        Some(fp) => FileIdentity::from_upload(FileId::new(id), fp, 10, "plan.pdf", "tester", now),
        None => FileIdentity::stub(FileId::new(id), "plan.pdf", now),
    }
}

pub fn tracking(id: &str, created_offset_minutes: i64) -> StageTracking {
    StageTracking::start(FileId::new(id), Stage::Prelims, None, t(created_offset_minutes))
}

pub fn identity_crud(store: &dyn DocumentStore) {
    let a = identity("PF-A", Some("aa"), 0);
    assert_eq!(store.get_identity(&a.file_id).unwrap(), None);

    store.insert_identity(&a).unwrap();
    assert_eq!(store.get_identity(&a.file_id).unwrap(), Some(a.clone()));

    let err = store.insert_identity(&a).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));

    // plain insert does not police fingerprints
    let twin = identity("PF-B", Some("aa"), 1);
    store.insert_identity(&twin).unwrap();
    let owners = store.find_by_fingerprint("aa").unwrap();
    assert_eq!(owners.len(), 2);
    assert_eq!(owners[0].file_id, a.file_id);
}

pub fn identities_sorted_oldest_first(store: &dyn DocumentStore) {
    store.insert_identity(&identity("PF-C", None, 5)).unwrap();
    store.insert_identity(&identity("PF-B", None, 0)).unwrap();
    store.insert_identity(&identity("PF-A", None, 5)).unwrap();

    let ids: Vec<_> = store
        .identities()
        .unwrap()
        .into_iter()
        .map(|i| i.file_id.to_string())
        .collect();
    assert_eq!(ids, ["PF-B", "PF-A", "PF-C"]);
}

pub fn insert_if_absent_keys_on_fingerprint(store: &dyn DocumentStore) {
    let first = identity("PF-1", Some("ff"), 0);
    assert_eq!(
        store.insert_identity_if_absent(&first).unwrap(),
        InsertOutcome::Inserted
    );

    let second = identity("PF-2", Some("ff"), 1);
    assert_eq!(
        store.insert_identity_if_absent(&second).unwrap(),
        InsertOutcome::Existing(FileId::new("PF-1"))
    );
    assert_eq!(store.get_identity(&second.file_id).unwrap(), None);

    // stubs carry no fingerprint and always insert
    let stub = identity("PF-3", None, 2);
    assert_eq!(
        store.insert_identity_if_absent(&stub).unwrap(),
        InsertOutcome::Inserted
    );
}

pub fn identity_cas(store: &dyn DocumentStore) {
    let mut a = identity("PF-A", Some("aa"), 0);
    store.insert_identity(&a).unwrap();

    let stale = a.clone();
    a.push_version("bb", 20, "tester", "revision", t(10));
    assert_eq!(store.update_identity(&a).unwrap(), 1);

    let err = store.update_identity(&stale).unwrap_err();
    assert!(err.is_conflict());

    let stored = store.get_identity(&a.file_id).unwrap().unwrap();
    assert_eq!(stored.revision, 1);
    assert_eq!(stored.content_fingerprint.as_deref(), Some("bb"));
    assert_eq!(stored.version_history.len(), 2);

    let missing = identity("PF-Z", None, 0);
    assert!(matches!(
        store.update_identity(&missing).unwrap_err(),
        StoreError::NotFound { .. }
    ));
}

pub fn tracking_cas(store: &dyn DocumentStore) {
    let tr = tracking("PF-A", 0);
    store.insert_tracking(&tr).unwrap();
    assert!(matches!(
        store.insert_tracking(&tr).unwrap_err(),
        StoreError::AlreadyExists { .. }
    ));

    let mut winner = store.get_tracking(&tr.file_id).unwrap().unwrap();
    let loser = winner.clone();
    winner.current_stage = Stage::Production;
    assert_eq!(store.update_tracking(&winner).unwrap(), 1);

    let err = store.update_tracking(&loser).unwrap_err();
    assert!(matches!(
        err,
        StoreError::RevisionConflict {
            expected: 0,
            found: 1,
            ..
        }
    ));

    let stored = store.get_tracking(&tr.file_id).unwrap().unwrap();
    assert_eq!(stored.current_stage, Stage::Production);
    assert_eq!(store.trackings().unwrap().len(), 1);
}

pub fn refs_repoint(store: &dyn DocumentStore) {
    let dup = FileId::new("PF-DUP");
    let keep = FileId::new("PF-KEEP");
    store
        .put_ref(&ExternalRef::task("T-1", dup.clone(), Stage::Prelims))
        .unwrap();
    store
        .put_ref(&ExternalRef::profile_entry("P-1", dup.clone()))
        .unwrap();
    store
        .put_ref(&ExternalRef::task("T-2", keep.clone(), Stage::Qc))
        .unwrap();

    assert_eq!(store.refs_for(&dup).unwrap().len(), 2);
    assert_eq!(store.repoint_refs(&dup, &keep).unwrap(), 2);
    assert!(store.refs_for(&dup).unwrap().is_empty());
    assert_eq!(store.refs_for(&keep).unwrap().len(), 3);
    assert_eq!(store.repoint_refs(&dup, &keep).unwrap(), 0);

    // put replaces
    let mut closed = store.get_ref("T-1").unwrap().unwrap();
    closed.open = false;
    store.put_ref(&closed).unwrap();
    assert!(!store.get_ref("T-1").unwrap().unwrap().open);
    assert_eq!(store.refs().unwrap().len(), 3);
}

pub fn deletes_are_idempotent(store: &dyn DocumentStore) {
    let a = identity("PF-A", None, 0);
    store.insert_identity(&a).unwrap();
    store.insert_tracking(&tracking("PF-A", 0)).unwrap();

    assert!(store.delete_tracking(&a.file_id).unwrap());
    assert!(!store.delete_tracking(&a.file_id).unwrap());
    assert!(store.delete_identity(&a.file_id).unwrap());
    assert!(!store.delete_identity(&a.file_id).unwrap());
    assert_eq!(store.get_identity(&a.file_id).unwrap(), None);
}
