//! Debounced saves, version guarding and rollback through the engine.

mod common;

use common::*;
use std::time::Duration;
use tokio::time::sleep;
use trainlog_core::{EngineEvent, RecordId, SaveState, SetPatch};

fn fetches(service: &FakeService) -> usize {
    service.count(|c| matches!(c, Call::Fetch { .. }))
}

fn weight(patch: f64) -> SetPatch {
    SetPatch {
        weight: Some(patch),
        reps: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_rapid_edits_send_one_save_with_latest_value() {
    let service = FakeService::new();
    service.seed(strength("r1", day(2), 1, 3, 10.0));
    let (engine, mut rx) = loaded_engine(&service, day(2)).await;
    let id = RecordId::new("r1");

    assert!(engine.edit_set(&id, 0, weight(12.0)));
    sleep(Duration::from_millis(100)).await;
    assert!(engine.edit_set(&id, 0, weight(15.0)));
    sleep(Duration::from_millis(100)).await;

    // Still inside the quiet period
    assert!(service.saves().is_empty());
    assert_eq!(engine.save_state(&id), SaveState::Dirty);

    engine.settle().await;

    let saves = service.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].sets()[0].weight, 15.0);
    assert_eq!(engine.save_state(&id), SaveState::Clean);
    assert_eq!(engine.record(&id).unwrap().sets()[0].weight, 15.0);

    let events = drain(&mut rx);
    assert!(events.iter().all(|e| *e == EngineEvent::Render));
}

#[tokio::test(start_paused = true)]
async fn test_edit_is_visible_before_any_write() {
    let service = FakeService::new();
    service.seed(strength("r1", day(2), 1, 1, 10.0));
    let (engine, mut rx) = loaded_engine(&service, day(2)).await;
    let id = RecordId::new("r1");

    engine.edit_notes(&id, "felt heavy");

    assert_eq!(engine.record(&id).unwrap().notes, "felt heavy");
    assert_eq!(drain(&mut rx), vec![EngineEvent::Render]);
    assert!(service.saves().is_empty());
    engine.settle().await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_response_is_discarded() {
    let service = FakeService::new();
    service.seed(strength("r1", day(2), 1, 1, 10.0));
    let (engine, mut rx) = loaded_engine(&service, day(2)).await;
    let id = RecordId::new("r1");

    // First save is slow and fails; the second is fast and succeeds
    service.delay_next(Method::Save, Duration::from_millis(1000));
    service.fail_next(Method::Save, 1);

    engine.edit_set(&id, 0, weight(12.0));
    sleep(Duration::from_millis(350)).await;
    assert_eq!(engine.save_state(&id), SaveState::Saving);

    engine.edit_set(&id, 0, weight(15.0));
    engine.settle().await;

    assert_eq!(service.saves().len(), 2);
    assert_eq!(engine.record(&id).unwrap().sets()[0].weight, 15.0);
    assert_eq!(engine.save_state(&id), SaveState::Clean);
    assert!(drain(&mut rx).iter().all(|e| !e.is_failure()));
}

#[tokio::test(start_paused = true)]
async fn test_failed_save_restores_pre_edit_snapshot() {
    let service = FakeService::new();
    service.seed(strength("r1", day(2), 1, 2, 10.0));
    let (engine, mut rx) = loaded_engine(&service, day(2)).await;
    let id = RecordId::new("r1");
    let before = engine.record(&id).unwrap();

    service.fail_next(Method::Save, 1);
    engine.edit_set(&id, 0, weight(12.0));
    engine.edit_set(&id, 1, SetPatch {
        weight: None,
        reps: Some(3),
    });
    engine.settle().await;

    assert_eq!(engine.record(&id).unwrap(), before);
    assert_eq!(engine.save_state(&id), SaveState::Error);

    let events = drain(&mut rx);
    assert!(matches!(
        events.last(),
        Some(EngineEvent::SaveFailed { record_id, .. }) if *record_id == id
    ));
}

#[tokio::test(start_paused = true)]
async fn test_edit_after_failure_saves_again() {
    let service = FakeService::new();
    service.seed(cardio("c1", day(2), 1));
    let (engine, _rx) = loaded_engine(&service, day(2)).await;
    let id = RecordId::new("c1");

    service.fail_next(Method::Save, 1);
    engine.edit_duration(&id, 45);
    engine.settle().await;
    assert_eq!(engine.save_state(&id), SaveState::Error);

    engine.edit_duration(&id, 40);
    engine.settle().await;
    assert_eq!(engine.save_state(&id), SaveState::Clean);
    assert_eq!(service.stored(&id).unwrap().kind, engine.record(&id).unwrap().kind);
}

#[tokio::test(start_paused = true)]
async fn test_flush_skips_quiet_period() {
    let service = FakeService::new();
    service.seed(strength("r1", day(2), 1, 1, 10.0));
    let (engine, _rx) = loaded_engine(&service, day(2)).await;
    let id = RecordId::new("r1");

    engine.edit_set(&id, 0, weight(20.0));
    engine.flush(&id).await;

    assert_eq!(service.saves().len(), 1);
    assert_eq!(engine.save_state(&id), SaveState::Clean);

    // The cancelled timer does not send a second save
    engine.settle().await;
    assert_eq!(service.saves().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_add_and_remove_sets() {
    let service = FakeService::new();
    service.seed(strength("r1", day(2), 1, 1, 50.0));
    let (engine, _rx) = loaded_engine(&service, day(2)).await;
    let id = RecordId::new("r1");

    // The last set cannot be removed
    assert!(!engine.remove_set(&id, 0));

    assert!(engine.add_set(&id));
    assert!(engine.add_set(&id));
    let sets = engine.record(&id).unwrap().sets().to_vec();
    assert_eq!(sets.len(), 3);
    assert_eq!(sets[2].weight, 50.0);
    assert_eq!(sets[2].set_number, 3);

    assert!(engine.remove_set(&id, 0));
    let numbers: Vec<u32> = engine
        .record(&id)
        .unwrap()
        .sets()
        .iter()
        .map(|s| s.set_number)
        .collect();
    assert_eq!(numbers, vec![1, 2]);

    engine.settle().await;
    assert_eq!(service.saves().len(), 1);
    // The store assigned ids to the new sets
    assert!(engine.record(&id).unwrap().sets().iter().all(|s| s.id.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_edits_send_nothing() {
    let service = FakeService::new();
    service.seed(cardio("c1", day(2), 1));
    let (engine, mut rx) = loaded_engine(&service, day(2)).await;
    let id = RecordId::new("c1");

    assert!(!engine.edit_set(&id, 0, weight(10.0)));
    assert!(!engine.add_set(&id));
    assert!(!engine.edit_duration(&id, 30));
    assert!(!engine.edit_notes(&RecordId::new("missing"), "x"));

    engine.settle().await;
    assert!(service.saves().is_empty());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_move_to_date_places_record_last() {
    let service = FakeService::new();
    service.seed(cardio("c1", day(2), 1));
    service.seed(cardio("c2", day(3), 1));
    let (engine, _rx) = engine(&service);
    engine
        .load_range(trainlog_core::DateRange::new(day(2), day(3)))
        .await
        .unwrap();
    let id = RecordId::new("c1");

    assert!(engine.move_to_date(&id, day(3)));
    assert_eq!(ids(&engine.records_on(day(3))), vec!["c2", "c1"]);
    assert!(engine.records_on(day(2)).is_empty());

    engine.settle().await;
    assert_eq!(service.stored(&id).unwrap().date, day(3));
}

#[tokio::test(start_paused = true)]
async fn test_reload_keeps_unsaved_local_edits() {
    let service = FakeService::new();
    service.seed(strength("r1", day(2), 1, 1, 10.0));
    let (engine, _rx) = loaded_engine(&service, day(2)).await;
    let id = RecordId::new("r1");

    engine.edit_set(&id, 0, weight(99.0));
    engine
        .load_range(trainlog_core::DateRange::single(day(2)))
        .await
        .unwrap();
    assert_eq!(engine.record(&id).unwrap().sets()[0].weight, 99.0);

    engine.settle().await;
    assert_eq!(service.stored(&id).unwrap().sets()[0].weight, 99.0);
}

#[tokio::test(start_paused = true)]
async fn test_reload_is_served_from_cache_until_a_write() {
    let service = FakeService::new();
    service.seed(cardio("c1", day(2), 1));
    let (engine, _rx) = loaded_engine(&service, day(2)).await;

    engine
        .load_range(trainlog_core::DateRange::single(day(2)))
        .await
        .unwrap();
    assert_eq!(fetches(&service), 1);

    engine.edit_notes(&RecordId::new("c1"), "tempo");
    engine.settle().await;
    engine
        .load_range(trainlog_core::DateRange::single(day(2)))
        .await
        .unwrap();
    assert_eq!(fetches(&service), 2);
}

#[tokio::test(start_paused = true)]
async fn test_save_failure_during_completion_write_still_rolls_back() {
    let service = FakeService::new();
    service.seed(strength("r1", day(2), 1, 2, 10.0));
    let (engine, mut rx) = loaded_engine(&service, day(2)).await;
    let id = RecordId::new("r1");

    service.delay_next(Method::Save, Duration::from_millis(1000));
    service.fail_next(Method::Save, 1);

    engine.edit_set(&id, 0, weight(15.0));
    sleep(Duration::from_millis(350)).await;
    assert_eq!(engine.save_state(&id), SaveState::Saving);

    // Completion write starts and succeeds while the save is still out
    assert!(engine.toggle_set(&id, 1, true));
    engine.settle().await;

    let local = engine.record(&id).unwrap();
    let stored = service.stored(&id).unwrap();
    assert_eq!(local.sets()[0].weight, 10.0);
    assert_eq!(stored.sets()[0].weight, 10.0);
    assert!(local.sets()[1].completed);
    assert!(stored.sets()[1].completed);
    assert_eq!(engine.save_state(&id), SaveState::Error);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, EngineEvent::SaveFailed { record_id, .. } if *record_id == id)));
}

#[tokio::test(start_paused = true)]
async fn test_save_success_during_completion_write_keeps_set_ids() {
    let service = FakeService::new();
    service.seed(strength("r1", day(2), 1, 1, 10.0));
    let (engine, mut rx) = loaded_engine(&service, day(2)).await;
    let id = RecordId::new("r1");

    service.delay_next(Method::Save, Duration::from_millis(1000));

    assert!(engine.add_set(&id));
    sleep(Duration::from_millis(350)).await;
    assert!(engine.toggle_set(&id, 0, true));
    engine.settle().await;

    let local = engine.record(&id).unwrap();
    let stored = service.stored(&id).unwrap();
    let local_ids: Vec<_> = local.sets().iter().map(|s| s.id.clone()).collect();
    let stored_ids: Vec<_> = stored.sets().iter().map(|s| s.id.clone()).collect();
    assert!(local_ids.iter().all(Option::is_some));
    assert_eq!(local_ids, stored_ids);

    // The slow save carried the old flag, so the check is sent again
    assert!(local.sets()[0].completed);
    assert!(stored.sets()[0].completed);
    assert_eq!(engine.save_state(&id), SaveState::Clean);
    assert!(drain(&mut rx).iter().all(|e| !e.is_failure()));
}
