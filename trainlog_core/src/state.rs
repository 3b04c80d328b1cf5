//! Engine state shared between the UI-facing calls and background writes.
//!
//! All of it sits behind a single mutex that is never held across an
//! `.await`, so mutations interleave like callbacks on one event loop.

use crate::cache::RecordCache;
use crate::cascade::CelebrationLedger;
use crate::events::{EngineEvent, EventSink, Inflight};
use crate::lock;
use crate::save_queue::SaveLedger;
use crate::store::RecordStore;
use crate::GroupKey;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct SyncState {
    pub store: RecordStore,
    pub saves: SaveLedger,
    pub cache: RecordCache,
    /// Groups with a reorder write outstanding
    pub reorders: HashSet<GroupKey>,
    pub celebrations: CelebrationLedger,
}

#[derive(Debug)]
pub struct Shared {
    state: Mutex<SyncState>,
    events: EventSink,
    inflight: Inflight,
}

impl Shared {
    pub fn new(events: EventSink) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SyncState::default()),
            events,
            inflight: Inflight::default(),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, SyncState> {
        lock(&self.state)
    }

    pub fn emit(&self, event: EngineEvent) {
        self.events.emit(event);
    }

    pub fn inflight(&self) -> &Inflight {
        &self.inflight
    }
}
