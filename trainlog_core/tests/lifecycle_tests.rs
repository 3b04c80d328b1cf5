//! Adding, copying and deleting records through the engine.

mod common;

use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use trainlog_core::{
    EngineEvent, Error, RecordDraft, RecordId, RecordKind, SaveState, SetEntry, SetPatch,
};

fn draft(kind: RecordKind) -> RecordDraft {
    RecordDraft {
        user_id: user(),
        date: day(9),
        name: "Bench".into(),
        kind,
        notes: String::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_add_record_appends_to_day() {
    let service = FakeService::new();
    service.seed(cardio("c1", day(9), 1));
    let (engine, mut rx) = loaded_engine(&service, day(9)).await;

    let created = engine
        .add_record(draft(RecordKind::SetBased {
            sets: vec![SetEntry::unsaved(1, 40.0, 10)],
        }))
        .await
        .unwrap();

    assert_eq!(created.display_order, 2);
    assert!(created.sets()[0].id.is_some());
    assert_eq!(ids(&engine.records_on(day(9)))[1], created.id.as_str());
    assert_eq!(drain(&mut rx), vec![EngineEvent::Render]);
}

#[tokio::test(start_paused = true)]
async fn test_set_based_record_needs_a_set() {
    let service = FakeService::new();
    let (engine, _rx) = engine(&service);

    let result = engine
        .add_record(draft(RecordKind::SetBased { sets: Vec::new() }))
        .await;

    assert!(matches!(result, Err(Error::Invariant(_))));
    assert_eq!(service.count(|c| matches!(c, Call::Create(_))), 0);
    assert!(engine.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_copy_to_date_starts_fresh() {
    let service = FakeService::new();
    let mut source = strength("r1", day(9), 1, 2, 80.0);
    if let Some(sets) = source.sets_mut() {
        sets[0].completed = true;
    }
    service.seed(source);
    let (engine, _rx) = loaded_engine(&service, day(9)).await;

    let copy = engine
        .copy_to_date(&RecordId::new("r1"), day(10))
        .await
        .unwrap();

    assert_ne!(copy.id, RecordId::new("r1"));
    assert_eq!(copy.date, day(10));
    assert_eq!(copy.display_order, 1);
    assert_eq!(copy.sets().len(), 2);
    assert!(copy.sets().iter().all(|s| !s.completed && s.weight == 80.0));
    assert!(copy
        .sets()
        .iter()
        .all(|s| s.id.as_ref().is_some_and(|id| !id.as_str().starts_with("r1-"))));

    assert!(matches!(
        engine.copy_to_date(&RecordId::new("missing"), day(10)).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_delete_removes_and_drops_queued_save() {
    let service = FakeService::new();
    service.seed(cardio("c1", day(9), 1));
    service.seed(cardio("c2", day(9), 2));
    let (engine, _rx) = loaded_engine(&service, day(9)).await;
    let id = RecordId::new("c1");

    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    engine.on_calendar_dates_changed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    engine.edit_notes(&id, "never sent");
    engine.delete_record(&id).await.unwrap();
    engine.settle().await;

    assert!(engine.record(&id).is_none());
    assert!(service.stored(&id).is_none());
    assert!(service.saves().is_empty());
    assert_eq!(ids(&engine.records_on(day(9))), vec!["c2"]);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_restores_record() {
    let service = FakeService::new();
    service.seed(cardio("c1", day(9), 1));
    let (engine, mut rx) = loaded_engine(&service, day(9)).await;
    let id = RecordId::new("c1");
    service.fail_next(Method::Delete, 1);

    assert!(engine.delete_record(&id).await.is_err());

    assert!(engine.record(&id).is_some());
    let events = drain(&mut rx);
    assert!(matches!(
        events.last(),
        Some(EngineEvent::DeleteFailed { record_id, .. }) if *record_id == id
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_keeps_queued_edit() {
    let service = FakeService::new();
    service.seed(strength("r1", day(9), 1, 2, 60.0));
    let (engine, _rx) = loaded_engine(&service, day(9)).await;
    let id = RecordId::new("r1");
    service.fail_next(Method::Delete, 1);

    engine.edit_set(&id, 0, SetPatch {
        weight: Some(70.0),
        reps: None,
    });
    assert!(engine.delete_record(&id).await.is_err());
    assert_eq!(engine.save_state(&id), SaveState::Dirty);
    engine.settle().await;

    assert_eq!(engine.record(&id).unwrap().sets()[0].weight, 70.0);
    assert_eq!(service.stored(&id).unwrap().sets()[0].weight, 70.0);
    assert_eq!(service.saves().len(), 1);
    assert_eq!(engine.save_state(&id), SaveState::Clean);
}

#[tokio::test(start_paused = true)]
async fn test_failed_load_leaves_store_untouched() {
    let service = FakeService::new();
    service.seed(cardio("c1", day(9), 1));
    let (engine, _rx) = engine(&service);
    service.fail_next(Method::Fetch, 1);

    let result = engine
        .load_range(trainlog_core::DateRange::single(day(9)))
        .await;

    assert!(matches!(result, Err(Error::Service(_))));
    assert!(engine.records().is_empty());
}
