//! Debounced, versioned write-coalescing queue.
//!
//! Every queued edit bumps that record's version. Rapid edits are coalesced
//! into one pending payload that is flushed after a quiet period. A full
//! save only commits (or rolls back) if no edit was queued after it left;
//! anything older is discarded because a newer save carries its payload.
//!
//! Completion writes are tracked apart from full saves. They never make a
//! save stale, and a failed one only undoes the flags it wrote.
//!
//! Per record the queue moves through `Clean -> Dirty -> Saving -> Clean`,
//! or `-> Error` when a current write fails.

use crate::debounce::Debouncer;
use crate::events::EngineEvent;
use crate::service::{ServiceResult, WorkoutService};
use crate::state::Shared;
use crate::{RecordId, SetEntry, WorkoutRecord};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Where a record is in its save lifecycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SaveState {
    /// Local state matches the last confirmed write
    #[default]
    Clean,
    /// Edits are queued but not sent
    Dirty,
    /// A write is in flight
    Saving,
    /// The latest write failed and the record was rolled back
    Error,
}

#[derive(Debug, Default)]
struct SaveEntry {
    /// Bumped by queued edits and by cancel, never by completion writes
    version: u64,
    pending: Option<WorkoutRecord>,
    /// Snapshot from before the first edit since the last flush
    rollback: Option<WorkoutRecord>,
    /// Rollback of the latest full save still unconfirmed
    sending: Option<WorkoutRecord>,
    saves_in_flight: usize,
    writes_in_flight: usize,
    failed: bool,
}

impl SaveEntry {
    fn state(&self) -> SaveState {
        if self.pending.is_some() {
            SaveState::Dirty
        } else if self.saves_in_flight + self.writes_in_flight > 0 {
            SaveState::Saving
        } else if self.failed {
            SaveState::Error
        } else {
            SaveState::Clean
        }
    }
}

/// A write that has been taken off the queue
#[derive(Clone, Debug)]
pub struct FlushTicket {
    pub record_id: RecordId,
    pub version: u64,
    pub payload: WorkoutRecord,
    pub rollback: WorkoutRecord,
}

/// Version and payload bookkeeping, free of any timers or I/O
#[derive(Debug, Default)]
pub struct SaveLedger {
    entries: HashMap<RecordId, SaveEntry>,
}

impl SaveLedger {
    /// Queue `snapshot` for a record, superseding any queued payload
    ///
    /// `rollback` is only kept if nothing was queued since the last flush.
    pub fn enqueue(
        &mut self,
        record_id: &RecordId,
        snapshot: WorkoutRecord,
        rollback: WorkoutRecord,
    ) -> u64 {
        let entry = self.entries.entry(record_id.clone()).or_default();
        entry.version += 1;
        entry.pending = Some(snapshot);
        if entry.rollback.is_none() {
            entry.rollback = Some(rollback);
        }
        entry.failed = false;
        entry.version
    }

    /// Take the pending payload for sending, capturing the current version
    pub fn begin_flush(&mut self, record_id: &RecordId) -> Option<FlushTicket> {
        let entry = self.entries.get_mut(record_id)?;
        let payload = entry.pending.take()?;
        let rollback = entry.rollback.take().unwrap_or_else(|| payload.clone());
        entry.sending = Some(rollback.clone());
        entry.saves_in_flight += 1;
        Some(FlushTicket {
            record_id: record_id.clone(),
            version: entry.version,
            payload,
            rollback,
        })
    }

    /// Record a successful full save; returns whether it is still current
    pub fn save_succeeded(&mut self, record_id: &RecordId, version: u64) -> bool {
        self.finish_save(record_id, version, false)
    }

    /// Record a failed full save; returns whether it is still current
    pub fn save_failed(&mut self, record_id: &RecordId, version: u64) -> bool {
        self.finish_save(record_id, version, true)
    }

    fn finish_save(&mut self, record_id: &RecordId, version: u64, failed: bool) -> bool {
        let Some(entry) = self.entries.get_mut(record_id) else {
            return false;
        };
        entry.saves_in_flight = entry.saves_in_flight.saturating_sub(1);
        if entry.version != version {
            return false;
        }
        entry.sending = None;
        entry.failed = failed;
        true
    }

    /// Start a completion write
    pub fn begin_write(&mut self, record_id: &RecordId) {
        self.entries
            .entry(record_id.clone())
            .or_default()
            .writes_in_flight += 1;
    }

    /// Finish a completion write; `failed` only when it was rolled back
    pub fn write_finished(&mut self, record_id: &RecordId, failed: bool) {
        if let Some(entry) = self.entries.get_mut(record_id) {
            entry.writes_in_flight = entry.writes_in_flight.saturating_sub(1);
            if failed {
                entry.failed = true;
            }
        }
    }

    /// Apply a change to the queued payload, if any
    pub fn patch_pending(&mut self, record_id: &RecordId, patch: impl FnOnce(&mut WorkoutRecord)) {
        if let Some(pending) = self
            .entries
            .get_mut(record_id)
            .and_then(|e| e.pending.as_mut())
        {
            patch(pending);
        }
    }

    /// Drop queued and unconfirmed edits; in-flight saves become stale
    ///
    /// Returns the rollback snapshot when the record had edits the store
    /// has not confirmed, so a caller can queue them again.
    pub fn cancel(&mut self, record_id: &RecordId) -> Option<WorkoutRecord> {
        let entry = self.entries.get_mut(record_id)?;
        entry.version += 1;
        entry.pending = None;
        entry.failed = false;
        entry.rollback.take().or_else(|| entry.sending.take())
    }

    pub fn state(&self, record_id: &RecordId) -> SaveState {
        self.entries
            .get(record_id)
            .map(SaveEntry::state)
            .unwrap_or_default()
    }

    /// Records whose local state is ahead of the store
    pub fn unsettled(&self) -> impl Iterator<Item = &RecordId> {
        self.entries
            .iter()
            .filter(|(_, e)| matches!(e.state(), SaveState::Dirty | SaveState::Saving))
            .map(|(id, _)| id)
    }
}

/// Queue front-end: schedules flushes and performs the writes
#[derive(Clone)]
pub struct SaveQueue {
    shared: Arc<Shared>,
    service: Arc<dyn WorkoutService>,
    debouncer: Debouncer<RecordId>,
}

impl SaveQueue {
    pub(crate) fn new(
        shared: Arc<Shared>,
        service: Arc<dyn WorkoutService>,
        quiet_period: Duration,
    ) -> Self {
        Self {
            shared,
            service,
            debouncer: Debouncer::new(quiet_period),
        }
    }

    /// Coalesce `snapshot` into the record's pending write and restart its timer
    pub fn enqueue(&self, record_id: &RecordId, snapshot: WorkoutRecord, rollback: WorkoutRecord) {
        let version = {
            let mut state = self.shared.lock();
            state.cache.invalidate_date(&snapshot.user_id, snapshot.date);
            if rollback.date != snapshot.date {
                state.cache.invalidate_date(&rollback.user_id, rollback.date);
            }
            state.saves.enqueue(record_id, snapshot, rollback)
        };
        tracing::trace!("queued {} at version {}", record_id, version);

        let queue = self.clone();
        let key = record_id.clone();
        let guard = self.shared.inflight().track();
        self.debouncer.schedule(record_id.clone(), async move {
            let _guard = guard;
            queue.flush(&key).await;
        });
    }

    /// Send the pending payload now, skipping the quiet period
    pub async fn flush_now(&self, record_id: &RecordId) {
        self.debouncer.cancel(record_id);
        self.flush(record_id).await;
    }

    /// Send whatever is pending for the record and reconcile the response
    pub async fn flush(&self, record_id: &RecordId) {
        let ticket = match self.shared.lock().saves.begin_flush(record_id) {
            Some(ticket) => ticket,
            None => return,
        };
        tracing::debug!("flushing {} at version {}", record_id, ticket.version);

        let result = self.service.save_record(&ticket.payload).await;

        let mut state = self.shared.lock();
        match result {
            Ok(canonical) => {
                if !state.saves.save_succeeded(record_id, ticket.version) {
                    tracing::debug!(
                        "stale save response for {} (version {}), keeping only its set ids",
                        record_id,
                        ticket.version
                    );
                    let adopted = state
                        .store
                        .get_mut(record_id)
                        .is_some_and(|local| adopt_set_ids(local, &canonical));
                    state
                        .saves
                        .patch_pending(record_id, |pending| {
                            adopt_set_ids(pending, &canonical);
                        });
                    drop(state);
                    if adopted {
                        self.shared.emit(EngineEvent::Render);
                    }
                    return;
                }

                let (merged, lagging) = merge_canonical(state.store.get(record_id), canonical);
                state.cache.invalidate_date(&merged.user_id, merged.date);
                state.store.upsert(merged.clone());
                drop(state);
                self.shared.emit(EngineEvent::Render);

                if lagging {
                    // The save left before a completion write and may have undone it
                    tracing::debug!("re-saving {} to carry newer completion flags", record_id);
                    self.enqueue(record_id, merged.clone(), merged);
                }
            }
            Err(e) => {
                if !state.saves.save_failed(record_id, ticket.version) {
                    tracing::debug!(
                        "ignoring failure of superseded save for {} (version {}): {}",
                        record_id,
                        ticket.version,
                        e
                    );
                    return;
                }
                tracing::warn!("Save of {} failed, rolling back: {}", record_id, e);
                let restored = keep_completion(ticket.rollback, state.store.get(record_id));
                state.cache.invalidate_date(&restored.user_id, restored.date);
                state.store.upsert(restored);
                drop(state);
                self.shared.emit(EngineEvent::Render);
                self.shared.emit(EngineEvent::SaveFailed {
                    record_id: record_id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Run a completion write right away
    ///
    /// `before` and `written` are the record around the toggle. On failure
    /// the flags that differ between them are put back, unless a later
    /// toggle has changed them since.
    pub fn write_immediate<F>(
        &self,
        record_id: &RecordId,
        before: WorkoutRecord,
        written: WorkoutRecord,
        write: F,
    ) where
        F: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        {
            let mut state = self.shared.lock();
            state.cache.invalidate_date(&before.user_id, before.date);
            state.saves.begin_write(record_id);
        }

        let shared = Arc::clone(&self.shared);
        let record_id = record_id.clone();
        let guard = shared.inflight().track();
        tokio::spawn(async move {
            let _guard = guard;
            let result = write.await;

            let mut state = shared.lock();
            let e = match result {
                Ok(()) => {
                    state.saves.write_finished(&record_id, false);
                    return;
                }
                Err(e) => e,
            };

            let reverted = state
                .store
                .get_mut(&record_id)
                .is_some_and(|local| revert_completion(local, &before, &written));
            state.saves.write_finished(&record_id, reverted);
            if !reverted {
                tracing::debug!(
                    "ignoring failure of superseded write for {}: {}",
                    record_id,
                    e
                );
                return;
            }

            tracing::warn!("Completion write for {} failed, rolling back: {}", record_id, e);
            // A queued edit must not resurrect the rolled back toggle
            state.saves.patch_pending(&record_id, |pending| {
                revert_completion(pending, &before, &written);
            });
            state.cache.invalidate_date(&before.user_id, before.date);
            drop(state);
            shared.emit(EngineEvent::Render);
            shared.emit(EngineEvent::SaveFailed {
                record_id,
                message: e.to_string(),
            });
        });
    }

    /// Drop any queued write for the record and make in-flight saves stale
    ///
    /// Returns the rollback snapshot if edits were still unconfirmed.
    pub fn cancel(&self, record_id: &RecordId) -> Option<WorkoutRecord> {
        self.debouncer.cancel(record_id);
        self.shared.lock().saves.cancel(record_id)
    }

    pub fn state(&self, record_id: &RecordId) -> SaveState {
        self.shared.lock().saves.state(record_id)
    }
}

/// The same set in another copy of a record: by id, else by number
fn counterpart<'a>(sets: &'a [SetEntry], target: &SetEntry) -> Option<&'a SetEntry> {
    sets.iter()
        .find(|s| s.id.is_some() && s.id == target.id)
        .or_else(|| sets.iter().find(|s| s.set_number == target.set_number))
}

/// Take server-normalized fields while keeping local position and completion
///
/// Display order is owned by the reorder synchronizer and completion by the
/// completion writes; both may be ahead of what the save echoes back. The
/// flag is true when the echoed completion lags behind the local one.
fn merge_canonical(
    local: Option<&WorkoutRecord>,
    mut canonical: WorkoutRecord,
) -> (WorkoutRecord, bool) {
    let Some(local) = local else {
        return (canonical, false);
    };
    canonical.display_order = local.display_order;

    let mut lagging = false;
    if !canonical.is_set_based() && canonical.completed != local.completed {
        canonical.completed = local.completed;
        lagging = true;
    }
    if let Some(sets) = canonical.sets_mut() {
        for set in sets.iter_mut() {
            if let Some(live) = counterpart(local.sets(), set) {
                if live.completed != set.completed {
                    set.completed = live.completed;
                    lagging = true;
                }
            }
        }
    }
    (canonical, lagging)
}

/// Restore `rollback` but keep completion flags written on their own
fn keep_completion(mut rollback: WorkoutRecord, current: Option<&WorkoutRecord>) -> WorkoutRecord {
    let Some(current) = current else {
        return rollback;
    };
    if !rollback.is_set_based() {
        rollback.completed = current.completed;
    }
    if let Some(sets) = rollback.sets_mut() {
        // Sets without a store id only ever persist through a full save
        for set in sets.iter_mut().filter(|s| s.id.is_some()) {
            if let Some(live) = current.sets().iter().find(|s| s.id == set.id) {
                set.completed = live.completed;
            }
        }
    }
    rollback
}

/// Undo the completion flags a failed write changed, where still in place
fn revert_completion(
    current: &mut WorkoutRecord,
    before: &WorkoutRecord,
    written: &WorkoutRecord,
) -> bool {
    let mut reverted = false;
    if written.completed != before.completed && current.completed == written.completed {
        current.completed = before.completed;
        reverted = true;
    }
    if let Some(sets) = current.sets_mut() {
        for set in sets.iter_mut() {
            let (Some(old), Some(new)) = (
                counterpart(before.sets(), set),
                counterpart(written.sets(), set),
            ) else {
                continue;
            };
            if old.completed != new.completed && set.completed == new.completed {
                set.completed = old.completed;
                reverted = true;
            }
        }
    }
    reverted
}

/// Fill store-assigned ids into sets that have none; returns whether any changed
fn adopt_set_ids(target: &mut WorkoutRecord, canonical: &WorkoutRecord) -> bool {
    let known: Vec<_> = target.sets().iter().filter_map(|s| s.id.clone()).collect();
    let Some(sets) = target.sets_mut() else {
        return false;
    };
    let mut adopted = false;
    for set in sets.iter_mut().filter(|s| s.id.is_none()) {
        let saved = canonical
            .sets()
            .iter()
            .find(|s| s.set_number == set.set_number)
            .and_then(|s| s.id.clone());
        if let Some(id) = saved.filter(|id| !known.contains(id)) {
            set.id = Some(id);
            adopted = true;
        }
    }
    adopted
}
