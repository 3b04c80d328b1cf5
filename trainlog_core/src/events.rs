//! Events the engine emits towards the UI, and quiescence tracking.

use crate::{GroupKey, RecordId};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Something the UI layer should react to
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// The record store changed; redraw the list
    Render,
    /// Every record of `date` is done
    Celebrate { date: NaiveDate },
    /// Advisory rest countdown after completing a set
    RestPrompt { seconds: u32 },
    /// A record write failed and the card was rolled back
    SaveFailed { record_id: RecordId, message: String },
    /// A drag reorder failed and the group order was restored
    ReorderFailed { group: GroupKey, message: String },
    /// A delete failed and the record was put back
    DeleteFailed { record_id: RecordId, message: String },
}

impl EngineEvent {
    /// Whether this event is a user-visible error notice
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EngineEvent::SaveFailed { .. }
                | EngineEvent::ReorderFailed { .. }
                | EngineEvent::DeleteFailed { .. }
        )
    }
}

/// Sending half of the engine's event stream
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

/// Counts scheduled and running background work so callers can wait for it
#[derive(Clone, Debug)]
pub struct Inflight {
    count: Arc<watch::Sender<usize>>,
}

impl Default for Inflight {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { count: Arc::new(tx) }
    }
}

impl Inflight {
    /// Register one unit of work; it ends when the guard is dropped
    pub fn track(&self) -> InflightGuard {
        self.count.send_modify(|n| *n += 1);
        InflightGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub fn current(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolve once no tracked work remains
    pub async fn idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[derive(Debug)]
pub struct InflightGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}
