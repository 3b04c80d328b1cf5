//! The workout list sync engine.
//!
//! [`SyncEngine`] owns the record store for one user and wires UI actions to
//! the save queue, the reorder synchronizer, the completion cascade and the
//! calendar notifier:
//!
//! UI action -> optimistic store mutation -> `Render` -> cascade notification
//! -> calendar refresh -> background write (commit or roll back on response).
//!
//! Mutating calls are synchronous and never wait for the network. Loads,
//! creation and deletion are awaited because the UI has nothing to show
//! until the store answers.

use crate::calendar::CalendarNotifier;
use crate::cascade::{CascadeOutcome, ToggleKind};
use crate::events::{EngineEvent, EventSink};
use crate::reorder::{ReorderDriver, ReorderIntent, ReorderOutcome, ReorderSynchronizer};
use crate::save_queue::{SaveQueue, SaveState};
use crate::service::{ServiceResult, WorkoutService};
use crate::settings::{service_loader, SettingsProvider};
use crate::state::Shared;
use crate::{
    cascade, Config, DateRange, Error, FetchOptions, GroupKey, RecordDraft, RecordId, RecordKind,
    RestSettings, Result, SetEntry, SetId, SetPatch, UserId, WorkoutRecord,
};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Result of applying a toggle to the store, before any I/O
struct ToggleApplied {
    rollback: WorkoutRecord,
    snapshot: WorkoutRecord,
    outcome: CascadeOutcome,
}

pub struct SyncEngine {
    user_id: UserId,
    shared: Arc<Shared>,
    service: Arc<dyn WorkoutService>,
    saves: SaveQueue,
    reorder: ReorderSynchronizer,
    calendar: CalendarNotifier,
    settings: Arc<SettingsProvider>,
}

impl SyncEngine {
    /// Build an engine for `user_id`; events arrive on the returned receiver
    pub fn new(
        user_id: UserId,
        service: Arc<dyn WorkoutService>,
        config: &Config,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, rx) = EventSink::channel();
        let shared = Shared::new(events);

        let fallback = RestSettings {
            enabled: true,
            seconds: config.rest.default_seconds,
        };
        let settings = Arc::new(SettingsProvider::new(
            service_loader(Arc::clone(&service)),
            fallback,
        ));

        let engine = Self {
            saves: SaveQueue::new(
                Arc::clone(&shared),
                Arc::clone(&service),
                config.sync.save_debounce(),
            ),
            reorder: ReorderSynchronizer::new(Arc::clone(&shared), Arc::clone(&service)),
            calendar: CalendarNotifier::with_tracker(
                config.sync.calendar_debounce(),
                shared.inflight().clone(),
            ),
            user_id,
            shared,
            service,
            settings,
        };
        (engine, rx)
    }

    /// Replace the settings source, e.g. with a preloaded provider
    pub fn with_settings(mut self, settings: SettingsProvider) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn records(&self) -> Vec<WorkoutRecord> {
        self.shared.lock().store.all().to_vec()
    }

    /// Records of one date in display order
    pub fn records_on(&self, date: NaiveDate) -> Vec<WorkoutRecord> {
        self.shared
            .lock()
            .store
            .by_date(date)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn record(&self, record_id: &RecordId) -> Option<WorkoutRecord> {
        self.shared.lock().store.get(record_id).cloned()
    }

    pub fn save_state(&self, record_id: &RecordId) -> SaveState {
        self.saves.state(record_id)
    }

    pub fn group(&self, date: NaiveDate) -> GroupKey {
        GroupKey::new(self.user_id.clone(), date)
    }

    /// Load a date range into the store, served from the read cache if possible
    ///
    /// Records with unsaved local edits keep their local state.
    pub async fn load_range(&self, range: DateRange) -> Result<usize> {
        let cached = self
            .shared
            .lock()
            .cache
            .get(&self.user_id, range)
            .map(|records| records.to_vec());

        let records = match cached {
            Some(records) => {
                tracing::debug!("Serving {:?} from read cache", range);
                records
            }
            None => {
                let fetched = self
                    .service
                    .fetch_records(&self.user_id, range, FetchOptions::default())
                    .await?;
                self.shared
                    .lock()
                    .cache
                    .put(self.user_id.clone(), range, fetched.clone());
                fetched
            }
        };

        let count = records.len();
        {
            let mut state = self.shared.lock();
            let unsettled: HashSet<RecordId> = state.saves.unsettled().cloned().collect();
            let merged: Vec<WorkoutRecord> = records
                .into_iter()
                .map(|record| {
                    if unsettled.contains(&record.id) {
                        state.store.get(&record.id).cloned().unwrap_or(record)
                    } else {
                        record
                    }
                })
                .collect();
            state.store.replace_range(range, merged);
        }
        tracing::info!("Loaded {} records for {} in {:?}", count, self.user_id, range);
        self.shared.emit(EngineEvent::Render);

        // Warm the settings cache so rest prompts never wait on a read
        self.settings.rest_settings(&self.user_id).await;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a record through the store and add it to the view
    pub async fn add_record(&self, draft: RecordDraft) -> Result<WorkoutRecord> {
        if let RecordKind::SetBased { sets } = &draft.kind {
            if sets.is_empty() {
                tracing::debug!("Refusing to add a set-based record without sets");
                return Err(Error::Invariant(
                    "a set-based record needs at least one set".into(),
                ));
            }
        }

        let created = self.service.create_record(&draft).await?;
        {
            let mut state = self.shared.lock();
            state.cache.invalidate_date(&created.user_id, created.date);
            state.celebrations.forget(created.date);
            state.store.upsert(created.clone());
        }
        tracing::info!("Added record {} on {}", created.id, created.date);
        self.shared.emit(EngineEvent::Render);
        self.calendar.notify_dates_changed();
        Ok(created)
    }

    /// Clone a record onto another date, unfinished and with fresh ids
    pub async fn copy_to_date(&self, record_id: &RecordId, date: NaiveDate) -> Result<WorkoutRecord> {
        let source = self
            .record(record_id)
            .ok_or_else(|| Error::NotFound(record_id.to_string()))?;
        self.add_record(source.copy_to(date)).await
    }

    /// Remove a record right away and delete it from the store
    ///
    /// Any queued save is dropped. If the store refuses, the record is put
    /// back with its unsaved edits queued again and a `DeleteFailed` event
    /// is emitted.
    pub async fn delete_record(&self, record_id: &RecordId) -> Result<()> {
        let removed = {
            let mut state = self.shared.lock();
            let removed = state
                .store
                .remove(record_id)
                .ok_or_else(|| Error::NotFound(record_id.to_string()))?;
            state.cache.invalidate_date(&removed.user_id, removed.date);
            removed
        };
        let unsaved = self.saves.cancel(record_id);
        self.shared.emit(EngineEvent::Render);
        self.calendar.notify_dates_changed();

        if let Err(e) = self.service.delete_record(record_id).await {
            tracing::warn!("Delete of {} failed, restoring it: {}", record_id, e);
            self.shared.lock().store.upsert(removed.clone());
            if let Some(rollback) = unsaved {
                self.saves.enqueue(record_id, removed, rollback);
            }
            self.shared.emit(EngineEvent::Render);
            self.shared.emit(EngineEvent::DeleteFailed {
                record_id: record_id.clone(),
                message: e.to_string(),
            });
            return Err(e.into());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Debounced edits
    // ------------------------------------------------------------------

    /// Apply `edit` to a record and queue a save
    ///
    /// `edit` returns false to reject the change, which leaves everything
    /// untouched and sends nothing.
    fn edit<F>(&self, record_id: &RecordId, edit: F) -> bool
    where
        F: FnOnce(&mut WorkoutRecord) -> bool,
    {
        let (snapshot, rollback) = {
            let mut state = self.shared.lock();
            let current = match state.store.get(record_id) {
                Some(record) => record.clone(),
                None => {
                    tracing::debug!("Ignoring edit of unknown record {}", record_id);
                    return false;
                }
            };
            let mut edited = current.clone();
            if !edit(&mut edited) {
                return false;
            }
            state.store.upsert(edited.clone());
            (edited, current)
        };

        self.shared.emit(EngineEvent::Render);
        self.saves.enqueue(record_id, snapshot, rollback);
        true
    }

    /// Change the weight and/or reps of one set
    pub fn edit_set(&self, record_id: &RecordId, set_index: usize, patch: SetPatch) -> bool {
        self.edit(record_id, |record| {
            let Some(set) = record.sets_mut().and_then(|sets| sets.get_mut(set_index)) else {
                return false;
            };
            let mut changed = false;
            if let Some(weight) = patch.weight {
                changed |= set.weight != weight;
                set.weight = weight;
            }
            if let Some(reps) = patch.reps {
                changed |= set.reps != reps;
                set.reps = reps;
            }
            changed
        })
    }

    /// Append a set that repeats the last one's weight and reps
    pub fn add_set(&self, record_id: &RecordId) -> bool {
        let added = self.edit(record_id, |record| {
            let Some(sets) = record.sets_mut() else {
                return false;
            };
            let (weight, reps) = sets.last().map(|s| (s.weight, s.reps)).unwrap_or((0.0, 0));
            sets.push(SetEntry::unsaved(sets.len() as u32 + 1, weight, reps));
            true
        });
        if added {
            self.completion_changed(record_id);
        }
        added
    }

    /// Remove one set; refused when it is the last one
    pub fn remove_set(&self, record_id: &RecordId, set_index: usize) -> bool {
        let removed = self.edit(record_id, |record| {
            let Some(sets) = record.sets_mut() else {
                return false;
            };
            if sets.len() <= 1 || set_index >= sets.len() {
                tracing::debug!("Refusing to remove set {} of {}", set_index, sets.len());
                return false;
            }
            sets.remove(set_index);
            for (idx, set) in sets.iter_mut().enumerate() {
                set.set_number = idx as u32 + 1;
            }
            true
        });
        if removed {
            self.completion_changed(record_id);
        }
        removed
    }

    pub fn edit_notes(&self, record_id: &RecordId, notes: impl Into<String>) -> bool {
        let notes = notes.into();
        self.edit(record_id, |record| {
            if record.notes == notes {
                return false;
            }
            record.notes = notes;
            true
        })
    }

    pub fn edit_duration(&self, record_id: &RecordId, minutes: u32) -> bool {
        self.edit(record_id, |record| match &mut record.kind {
            RecordKind::Timed { duration_minutes } if *duration_minutes != minutes => {
                *duration_minutes = minutes;
                true
            }
            _ => false,
        })
    }

    /// Move a record to another date, placing it last in that day
    pub fn move_to_date(&self, record_id: &RecordId, date: NaiveDate) -> bool {
        let target = self.group(date);
        let next = self.shared.lock().store.next_display_order(&target);
        let moved = self.edit(record_id, |record| {
            if record.date == date {
                return false;
            }
            record.date = date;
            record.display_order = next;
            true
        });
        if moved {
            self.calendar.notify_dates_changed();
        }
        moved
    }

    /// Send a record's queued edits without waiting for the quiet period
    pub async fn flush(&self, record_id: &RecordId) {
        self.saves.flush_now(record_id).await;
    }

    // ------------------------------------------------------------------
    // Completion toggles
    // ------------------------------------------------------------------

    /// Apply a completion change under the store lock and run the cascade
    fn apply_toggle<F>(
        &self,
        record_id: &RecordId,
        kind: ToggleKind,
        completed: bool,
        toggle: F,
    ) -> Option<ToggleApplied>
    where
        F: FnOnce(&mut WorkoutRecord) -> bool,
    {
        let mut state = self.shared.lock();
        let rollback = state.store.get(record_id)?.clone();
        let mut toggled = rollback.clone();
        if !toggle(&mut toggled) {
            return None;
        }

        state.store.upsert(toggled.clone());
        // A queued edit carries the toggle too, or its flush would undo it
        state.saves.patch_pending(record_id, |pending| {
            pending.kind = toggled.kind.clone();
            pending.completed = toggled.completed;
        });

        let date = toggled.date;
        let day_complete = cascade::day_is_complete(state.store.by_date(date));
        let outcome = state.celebrations.decide(date, kind, completed, day_complete);

        Some(ToggleApplied {
            rollback,
            snapshot: toggled,
            outcome,
        })
    }

    /// Render, then notify, then tell the calendar; all before any write
    fn after_toggle(&self, date: NaiveDate, outcome: CascadeOutcome) {
        self.shared.emit(EngineEvent::Render);
        match outcome {
            CascadeOutcome::Celebrate => {
                tracing::info!("All done for {}", date);
                self.shared.emit(EngineEvent::Celebrate { date });
            }
            CascadeOutcome::RestPrompt => self.prompt_rest(),
            CascadeOutcome::Nothing => {}
        }
        self.calendar.notify_dates_changed();
    }

    fn prompt_rest(&self) {
        if let Some(settings) = self.settings.cached(&self.user_id) {
            if settings.enabled {
                self.shared.emit(EngineEvent::RestPrompt {
                    seconds: settings.seconds,
                });
            }
            return;
        }

        // Settings were never loaded; show the prompt once they are
        let settings = Arc::clone(&self.settings);
        let shared = Arc::clone(&self.shared);
        let user_id = self.user_id.clone();
        let guard = shared.inflight().track();
        tokio::spawn(async move {
            let _guard = guard;
            let settings = settings.rest_settings(&user_id).await;
            if settings.enabled {
                shared.emit(EngineEvent::RestPrompt {
                    seconds: settings.seconds,
                });
            }
        });
    }

    /// Check or uncheck one set
    pub fn toggle_set(&self, record_id: &RecordId, set_index: usize, completed: bool) -> bool {
        let mut set_id: Option<SetId> = None;
        let applied = self.apply_toggle(record_id, ToggleKind::Set, completed, |record| {
            match record.sets_mut().and_then(|sets| sets.get_mut(set_index)) {
                Some(set) if set.completed != completed => {
                    set.completed = completed;
                    set_id = set.id.clone();
                    true
                }
                _ => false,
            }
        });
        let Some(applied) = applied else {
            return false;
        };

        let date = applied.snapshot.date;
        self.after_toggle(date, applied.outcome);

        match set_id {
            Some(set_id) => {
                let service = Arc::clone(&self.service);
                let id = record_id.clone();
                self.saves.write_immediate(
                    record_id,
                    applied.rollback,
                    applied.snapshot,
                    async move { service.set_set_completed(&id, &set_id, completed).await },
                );
            }
            // The set is not in the store yet, so only a full save can carry it
            None => self
                .saves
                .enqueue(record_id, applied.snapshot, applied.rollback),
        }
        true
    }

    /// Set every set of a record to `completed` in one batch
    pub fn toggle_all_sets(&self, record_id: &RecordId, completed: bool) -> bool {
        let mut affected: Vec<Option<SetId>> = Vec::new();
        let applied = self.apply_toggle(record_id, ToggleKind::AllSets, completed, |record| {
            let Some(sets) = record.sets_mut() else {
                return false;
            };
            for set in sets.iter_mut().filter(|s| s.completed != completed) {
                set.completed = completed;
                affected.push(set.id.clone());
            }
            !affected.is_empty()
        });
        let Some(applied) = applied else {
            return false;
        };

        let date = applied.snapshot.date;
        self.after_toggle(date, applied.outcome);

        let set_ids: Option<Vec<SetId>> = affected.into_iter().collect();
        match set_ids {
            Some(set_ids) => {
                let service = Arc::clone(&self.service);
                let id = record_id.clone();
                self.saves.write_immediate(
                    record_id,
                    applied.rollback,
                    applied.snapshot,
                    async move { complete_sets_in_parallel(service, id, set_ids, completed).await },
                );
            }
            None => self
                .saves
                .enqueue(record_id, applied.snapshot, applied.rollback),
        }
        true
    }

    /// Check or uncheck a timed or free-text record
    ///
    /// For a set-based record this is the "all sets" toggle.
    pub fn toggle_record(&self, record_id: &RecordId, completed: bool) -> bool {
        if self.record(record_id).is_some_and(|r| r.is_set_based()) {
            return self.toggle_all_sets(record_id, completed);
        }

        let applied = self.apply_toggle(record_id, ToggleKind::Record, completed, |record| {
            if record.completed == completed {
                return false;
            }
            record.completed = completed;
            true
        });
        let Some(applied) = applied else {
            return false;
        };

        self.after_toggle(applied.snapshot.date, applied.outcome);

        let service = Arc::clone(&self.service);
        let id = record_id.clone();
        self.saves.write_immediate(
            record_id,
            applied.rollback,
            applied.snapshot,
            async move { service.set_record_completed(&id, completed).await },
        );
        true
    }

    /// Adding or removing sets changes completion without a toggle
    fn completion_changed(&self, record_id: &RecordId) {
        let date = {
            let mut state = self.shared.lock();
            let Some(date) = state.store.get(record_id).map(|r| r.date) else {
                return;
            };
            if !cascade::day_is_complete(state.store.by_date(date)) {
                state.celebrations.forget(date);
            }
            date
        };
        tracing::trace!("completion of {} may have changed", date);
        self.calendar.notify_dates_changed();
    }

    // ------------------------------------------------------------------
    // Reordering and the calendar
    // ------------------------------------------------------------------

    pub fn reorderer(&self) -> &ReorderSynchronizer {
        &self.reorder
    }

    /// Move the record at `from_index` of a date to `to_index`
    pub async fn reorder(&self, date: NaiveDate, from_index: usize, to_index: usize) -> ReorderOutcome {
        self.reorder
            .apply_intent(ReorderIntent {
                group: self.group(date),
                from_index,
                to_index,
            })
            .await
    }

    pub fn calendar(&self) -> &CalendarNotifier {
        &self.calendar
    }

    /// Register the calendar view's refresh hook
    pub fn on_calendar_dates_changed<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.calendar.register(callback);
    }

    /// Wait until no debounced save, write or calendar refresh is outstanding
    pub async fn settle(&self) {
        self.shared.inflight().idle().await;
    }
}

/// One completion write per set, issued concurrently; the first error wins
async fn complete_sets_in_parallel(
    service: Arc<dyn WorkoutService>,
    record_id: RecordId,
    set_ids: Vec<SetId>,
    completed: bool,
) -> ServiceResult<()> {
    let mut writes = JoinSet::new();
    for set_id in set_ids {
        let service = Arc::clone(&service);
        let record_id = record_id.clone();
        writes.spawn(async move { service.set_set_completed(&record_id, &set_id, completed).await });
    }

    let mut first_error = None;
    while let Some(joined) = writes.join_next().await {
        let result = joined.unwrap_or_else(|e| {
            Err(crate::ServiceError::Unavailable(format!("write task failed: {}", e)))
        });
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
