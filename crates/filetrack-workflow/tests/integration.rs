//! Whole-workflow tests over the in-memory and filesystem stores

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use filetrack_core::{
    fingerprint, Clock, FileId, FileIdentity, IdentityPolicy, ManualClock, Stage, StageStatus,
    StageTracking, WorkflowConfig,
};
use filetrack_store::{DocumentStore, FsStore, MemoryStore};
use filetrack_workflow::{
    Actor, AutoProgress, CreateOutcome, RecordingSink, Rejection, StageEvent, TaskCompleted,
    UploadOutcome, UploadRequest, Workflow,
};

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
    ))
}

fn workflow_over(store: Arc<dyn DocumentStore>, clock: Arc<ManualClock>, policy: IdentityPolicy) -> Workflow {
    let config = WorkflowConfig {
        identity: policy,
        ..WorkflowConfig::default()
    };
    Workflow::new(store, clock, config)
}

fn upload<'a>(bytes: &'a [u8], name: &'a str, stage: Stage) -> UploadRequest<'a> {
    UploadRequest {
        bytes,
        original_name: name,
        requested_stage: stage,
        actor: Actor::new("E1", "Asha"),
    }
}

fn task_done(file_id: &FileId, stage: Stage, task_id: &str) -> TaskCompleted {
    TaskCompleted {
        file_id: file_id.clone(),
        stage,
        task_id: task_id.to_string(),
        actor: Actor::new("E2", "Ben"),
    }
}

fn rejection(err: filetrack_workflow::LifecycleError) -> Rejection {
    err.rejection().cloned().expect("expected a rejection")
}

#[test]
fn prelims_to_production_scenario() {
    let clock = clock();
    let sink = Arc::new(RecordingSink::new());
    let wf = workflow_over(Arc::new(MemoryStore::new()), clock.clone(), IdentityPolicy::default())
        .with_events(sink.clone());

    let created = wf.submit(upload(b"H1", "permit.pdf", Stage::Prelims)).unwrap();
    assert!(matches!(created, UploadOutcome::Created { stage: Stage::Prelims, .. }));
    let file_id = created.file_id().clone();

    // same bytes, same stage
    let err = rejection(
        wf.submit(upload(b"H1", "permit.pdf", Stage::Prelims))
            .unwrap_err(),
    );
    assert!(matches!(err, Rejection::DuplicateStageConflict { stage: Stage::Prelims, .. }));

    wf.lifecycle()
        .register_task(&file_id, Stage::Prelims, "T-1")
        .unwrap();
    clock.advance_minutes(18);
    let progress = wf
        .lifecycle()
        .on_task_completed(&task_done(&file_id, Stage::Prelims, "T-1"))
        .unwrap();
    assert_eq!(
        progress,
        AutoProgress::Advanced {
            from: Stage::Prelims,
            to: Stage::Production
        }
    );

    let err = rejection(
        wf.lifecycle()
            .promote_to_qc(&file_id, &Actor::new("M1", "Mara"))
            .unwrap_err(),
    );
    assert!(matches!(
        err,
        Rejection::InvalidStageProgression {
            current: Stage::Production,
            attempted: Stage::Qc,
            ..
        }
    ));

    let accepted = wf
        .submit(upload(b"H1", "permit.pdf", Stage::Production))
        .unwrap();
    assert!(accepted.stage_progression());
    assert_eq!(accepted.stage(), Stage::Production);
    assert_eq!(accepted.file_id(), &file_id);

    let view = wf.view(&file_id).unwrap();
    assert_eq!(view.completed_stages, vec![Stage::Prelims]);
    assert_eq!(view.history[0].duration_minutes, Some(18));
    assert_eq!(view.permit_status, Some("IN_PRODUCTION"));

    let transitions: Vec<_> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            StageEvent::Transitioned { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (None, Stage::Prelims),
            (Some(Stage::Prelims), Stage::Production)
        ]
    );
}

#[test]
fn full_run_to_delivery() {
    let clock = clock();
    let wf = workflow_over(Arc::new(MemoryStore::new()), clock.clone(), IdentityPolicy::default());
    let manager = Actor::new("M1", "Mara");

    let file_id = wf
        .submit(upload(b"plan", "plan.pdf", Stage::Prelims))
        .unwrap()
        .file_id()
        .clone();
    for (stage, task, minutes) in [
        (Stage::Prelims, "T-1", 15),
        (Stage::Production, "T-2", 200),
    ] {
        wf.lifecycle().register_task(&file_id, stage, task).unwrap();
        clock.advance_minutes(minutes);
        wf.lifecycle()
            .on_task_completed(&task_done(&file_id, stage, task))
            .unwrap();
    }

    // COMPLETED waits for the manager
    wf.lifecycle()
        .register_task(&file_id, Stage::Completed, "T-3")
        .unwrap();
    let progress = wf
        .lifecycle()
        .on_task_completed(&task_done(&file_id, Stage::Completed, "T-3"))
        .unwrap();
    assert_eq!(progress, AutoProgress::AwaitingPromotion);

    wf.lifecycle().mark_current_stage_complete(&file_id, &manager).unwrap();
    wf.lifecycle().promote_to_qc(&file_id, &manager).unwrap();
    wf.lifecycle().register_task(&file_id, Stage::Qc, "T-4").unwrap();
    clock.advance_minutes(100);
    let progress = wf
        .lifecycle()
        .on_task_completed(&task_done(&file_id, Stage::Qc, "T-4"))
        .unwrap();
    assert_eq!(
        progress,
        AutoProgress::Advanced {
            from: Stage::Qc,
            to: Stage::Delivered
        }
    );

    let tracking = wf.lifecycle().tracking(&file_id).unwrap().unwrap();
    assert!(tracking.is_delivered());
    assert_eq!(tracking.current_status, StageStatus::Completed);
    assert_eq!(tracking.completed_stages(), Stage::ALL.to_vec());

    let err = rejection(
        wf.submit(upload(b"plan", "plan.pdf", Stage::Delivered))
            .unwrap_err(),
    );
    assert!(matches!(err, Rejection::WorkflowComplete { .. }));

    let report = wf.view(&file_id).unwrap().report.unwrap();
    assert_eq!(report.total_minutes, 315);
}

#[test]
fn transitions_only_to_the_next_stage() {
    let actor = Actor::new("E1", "Asha");
    for from in Stage::ALL.into_iter().filter(|s| !s.is_terminal()) {
        for to in Stage::ALL {
            let store = Arc::new(MemoryStore::new());
            let clock = clock();
            let wf = workflow_over(store.clone(), clock.clone(), IdentityPolicy::default());
            let id = FileId::new(format!("F-{from}-{to}"));
            store
                .insert_identity(&FileIdentity::from_upload(id.clone(), "aa", 1, "p.pdf", "E1", clock.now()))
                .unwrap();
            let mut tracking = StageTracking::start(id.clone(), from, None, clock.now());
            tracking.stage_history[0].close(clock.now());
            tracking.current_status = StageStatus::Completed;
            store.insert_tracking(&tracking).unwrap();

            let result = wf.lifecycle().transition(&id, &actor, to);
            if Some(to) == from.next() {
                let tracking = result.unwrap();
                assert_eq!(tracking.current_stage, to, "{from} -> {to}");
            } else if to == from {
                let err = rejection(result.unwrap_err());
                assert!(matches!(err, Rejection::DuplicateStageConflict { .. }), "{from} -> {to}");
            } else {
                let err = rejection(result.unwrap_err());
                assert!(matches!(err, Rejection::OutOfOrderTransition { .. }), "{from} -> {to}");
                let stored = store.get_tracking(&id).unwrap().unwrap();
                assert_eq!(stored.current_stage, from);
            }
        }
    }
}

#[test]
fn history_keeps_a_closed_prefix() {
    let clock = clock();
    let wf = workflow_over(Arc::new(MemoryStore::new()), clock.clone(), IdentityPolicy::default());
    let file_id = wf
        .submit(upload(b"x", "x.pdf", Stage::Prelims))
        .unwrap()
        .file_id()
        .clone();
    for stage in [Stage::Prelims, Stage::Production] {
        clock.advance_minutes(5);
        wf.lifecycle()
            .on_task_completed(&task_done(&file_id, stage, &format!("T-{stage}")))
            .unwrap();
    }

    let tracking = wf.lifecycle().tracking(&file_id).unwrap().unwrap();
    let (last, closed) = tracking.stage_history.split_last().unwrap();
    assert!(closed.iter().all(|e| !e.is_open()));
    assert!(last.is_open());
    assert_eq!(last.stage, tracking.current_stage);
    let stages: Vec<_> = tracking.stage_history.iter().map(|e| e.stage).collect();
    assert_eq!(stages, vec![Stage::Prelims, Stage::Production, Stage::Completed]);
}

#[test]
fn identical_bytes_resolve_to_one_identity() {
    let wf = workflow_over(Arc::new(MemoryStore::new()), clock(), IdentityPolicy::default());
    let first = wf.submit(upload(b"same", "a.pdf", Stage::Prelims)).unwrap();

    let resolution = wf.resolver().resolve(b"same", "totally-different.dwg").unwrap();
    assert_eq!(
        resolution,
        filetrack_workflow::Resolution::Existing {
            file_id: first.file_id().clone(),
            matched_by: filetrack_workflow::MatchRule::Fingerprint,
        }
    );
    assert_eq!(wf.store().identities().unwrap().len(), 1);
}

#[test]
fn racing_creates_are_consolidated_into_the_oldest() {
    let clock = clock();
    let store = Arc::new(MemoryStore::new());
    let policy = IdentityPolicy {
        unique_fingerprint: false,
        ..IdentityPolicy::default()
    };
    let wf = workflow_over(store.clone(), clock.clone(), policy);
    let actor = Actor::new("E1", "Asha");
    let fp = fingerprint(b"H1");

    // both requests resolved New before either inserted
    let CreateOutcome::Created(first) = wf.resolver().create_identity(&fp, 2, "permit.pdf", "E1").unwrap() else {
        panic!("first create should insert");
    };
    clock.advance_minutes(1);
    let CreateOutcome::Created(second) = wf.resolver().create_identity(&fp, 2, "permit.pdf", "E2").unwrap() else {
        panic!("plain insert should not dedupe");
    };
    wf.lifecycle().initialize(&first.file_id, Stage::Prelims, &actor).unwrap();
    wf.lifecycle().initialize(&second.file_id, Stage::Prelims, &actor).unwrap();
    wf.lifecycle()
        .register_task(&second.file_id, Stage::Prelims, "T-9")
        .unwrap();

    let stats = wf.consolidator().statistics().unwrap();
    assert_eq!(stats.duplicate_groups, 1);
    assert_eq!(stats.total_duplicates, 1);

    let report = wf.consolidator().run_all().unwrap();
    assert_eq!(report.groups_consolidated, 1);
    assert_eq!(report.duplicates_removed, 1);
    assert_eq!(report.refs_moved, 1);
    assert!(report.failures.is_empty());

    assert!(store.get_identity(&second.file_id).unwrap().is_none());
    assert!(store.get_tracking(&second.file_id).unwrap().is_none());
    let tracking = store.get_tracking(&first.file_id).unwrap().unwrap();
    assert_eq!(tracking.stage_history.len(), 2);
    assert_eq!(tracking.absorbed, vec![second.file_id.clone()]);
    assert_eq!(
        tracking.stage_history[1].merged_from.as_ref(),
        Some(&second.file_id)
    );
    let moved = store.get_ref("T-9").unwrap().unwrap();
    assert_eq!(moved.file_id, first.file_id);

    assert!(!tracking.stage_history[0].is_open());
    assert!(tracking.stage_history[1].is_open());

    // a second run finds nothing and changes nothing
    let again = wf.consolidator().run_all().unwrap();
    assert_eq!(again.groups_found, 0);
    assert_eq!(store.get_tracking(&first.file_id).unwrap().unwrap(), tracking);

    // the moved task finishing advances the surviving file
    clock.advance_minutes(20);
    let progress = wf
        .lifecycle()
        .on_task_completed(&task_done(&first.file_id, Stage::Prelims, "T-9"))
        .unwrap();
    assert_eq!(
        progress,
        AutoProgress::Advanced {
            from: Stage::Prelims,
            to: Stage::Production
        }
    );
    let advanced = store.get_tracking(&first.file_id).unwrap().unwrap();
    let open: Vec<_> = advanced
        .stage_history
        .iter()
        .filter(|e| e.is_open())
        .map(|e| e.stage)
        .collect();
    assert_eq!(open, vec![Stage::Production]);
    assert_eq!(advanced.stage_history.last().unwrap().stage, advanced.current_stage);
}

#[test]
fn filesystem_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let clock = clock();

    let file_id = {
        let store = Arc::new(FsStore::open(dir.path()).unwrap());
        let wf = workflow_over(store, clock.clone(), IdentityPolicy::default());
        let outcome = wf.submit(upload(b"disk", "disk.pdf", Stage::Prelims)).unwrap();
        clock.advance_minutes(12);
        wf.lifecycle()
            .on_task_completed(&task_done(outcome.file_id(), Stage::Prelims, "T-1"))
            .unwrap();
        outcome.file_id().clone()
    };

    let store = Arc::new(FsStore::open(dir.path()).unwrap());
    assert!(store.verify().unwrap().is_empty());
    let wf = workflow_over(store, clock, IdentityPolicy::default());
    let outcome = wf
        .submit(upload(b"disk v2", "disk.pdf", Stage::Production))
        .unwrap();
    assert_eq!(outcome.file_id(), &file_id);
    assert!(matches!(outcome, UploadOutcome::Continued { new_version: Some(2), .. }));

    let view = wf.view(&file_id).unwrap();
    assert_eq!(view.versions.len(), 2);
    assert_eq!(view.completed_stages, vec![Stage::Prelims]);
    assert_eq!(view.tasks_by_stage[&Stage::Prelims].len(), 1);
}
