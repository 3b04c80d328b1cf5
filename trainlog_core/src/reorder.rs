//! Optimistic drag reordering within one (user, date) group.
//!
//! A drag is driven in two phases. [`ReorderDriver::begin_drag`] snapshots
//! the group order and the dragged record's previous sibling (its anchor).
//! [`ReorderDriver::complete_drag`] computes the new order from that snapshot,
//! applies it locally, persists it, and verifies the stored order with an
//! uncached read. A failed write puts the dragged record back after its anchor.
//!
//! Any widget that can report "item moved from index a to b" can drive this,
//! whether it is a drag-and-drop list or a keyboard shortcut.

use crate::events::EngineEvent;
use crate::service::WorkoutService;
use crate::state::Shared;
use crate::{DateRange, FetchOptions, GroupKey, OrderEntry, RecordId};
use async_trait::async_trait;
use std::sync::Arc;

/// "Item at `from_index` was dropped at `to_index`" for one group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReorderIntent {
    pub group: GroupKey,
    pub from_index: usize,
    pub to_index: usize,
}

/// State captured when a drag starts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DragTicket {
    pub group: GroupKey,
    pub dragged: RecordId,
    pub from_index: usize,
    pub original_order: Vec<RecordId>,
    /// Record directly before the dragged one; `None` if it was first
    pub anchor: Option<RecordId>,
}

/// Result of comparing the persisted order with the intended one
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Matched,
    Mismatch {
        expected: Vec<OrderEntry>,
        actual: Vec<OrderEntry>,
    },
    /// The verification read itself failed
    Unavailable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReorderOutcome {
    /// Dropped in place, or the group cannot be reordered
    Unchanged,
    /// Another reorder of the same group is still in flight
    Busy,
    Persisted { verification: Verification },
    /// The write failed and the previous order was restored
    RolledBack,
}

#[async_trait]
pub trait ReorderDriver: Send + Sync {
    /// Snapshot the group when the user picks up an item
    ///
    /// Returns `None` when the group has fewer than two records or the
    /// index is out of range.
    fn begin_drag(&self, group: &GroupKey, from_index: usize) -> Option<DragTicket>;

    /// Apply and persist the drop
    async fn complete_drag(&self, ticket: DragTicket, to_index: usize) -> ReorderOutcome;

    /// Both phases at once, for widgets that only report the final move
    async fn apply_intent(&self, intent: ReorderIntent) -> ReorderOutcome {
        match self.begin_drag(&intent.group, intent.from_index) {
            Some(ticket) => self.complete_drag(ticket, intent.to_index).await,
            None => ReorderOutcome::Unchanged,
        }
    }
}

/// Move `original[from]` to position `to`
///
/// Returns `None` for a same-position drop, an out-of-range index, or a
/// group that has fewer than two items.
pub fn compute_new_order(original: &[RecordId], from: usize, to: usize) -> Option<Vec<RecordId>> {
    if original.len() < 2 || from >= original.len() || from == to {
        return None;
    }
    let to = to.min(original.len() - 1);
    if from == to {
        return None;
    }

    let mut order = original.to_vec();
    let dragged = order.remove(from);
    order.insert(to, dragged);
    Some(order)
}

/// Put `dragged` back directly after `anchor`
///
/// A missing anchor means the record was first. An anchor that no longer
/// exists sends the record to the end.
pub fn restore_after_anchor(
    current: &[RecordId],
    dragged: &RecordId,
    anchor: Option<&RecordId>,
) -> Vec<RecordId> {
    let mut order: Vec<RecordId> = current.iter().filter(|id| *id != dragged).cloned().collect();
    let position = match anchor {
        None => 0,
        Some(anchor) => match order.iter().position(|id| id == anchor) {
            Some(idx) => idx + 1,
            None => order.len(),
        },
    };
    order.insert(position, dragged.clone());
    order
}

fn order_entries(order: &[RecordId]) -> Vec<OrderEntry> {
    order
        .iter()
        .enumerate()
        .map(|(idx, id)| OrderEntry {
            id: id.clone(),
            order: idx as u32 + 1,
        })
        .collect()
}

/// Releases the per-group in-flight mark on every exit path
struct GroupLease {
    shared: Arc<Shared>,
    group: GroupKey,
}

impl Drop for GroupLease {
    fn drop(&mut self) {
        self.shared.lock().reorders.remove(&self.group);
    }
}

#[derive(Clone)]
pub struct ReorderSynchronizer {
    shared: Arc<Shared>,
    service: Arc<dyn WorkoutService>,
}

impl ReorderSynchronizer {
    pub(crate) fn new(shared: Arc<Shared>, service: Arc<dyn WorkoutService>) -> Self {
        Self { shared, service }
    }

    pub fn is_in_flight(&self, group: &GroupKey) -> bool {
        self.shared.lock().reorders.contains(group)
    }

    async fn verify(&self, group: &GroupKey, expected: &[OrderEntry]) -> Verification {
        let fetched = self
            .service
            .fetch_records(
                &group.user_id,
                DateRange::single(group.date),
                FetchOptions { bypass_cache: true },
            )
            .await;

        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Could not verify order of {}: {}", group, e);
                return Verification::Unavailable;
            }
        };

        let actual: Vec<OrderEntry> = expected
            .iter()
            .map(|entry| OrderEntry {
                id: entry.id.clone(),
                order: records
                    .iter()
                    .find(|r| r.id == entry.id)
                    .map(|r| r.display_order)
                    .unwrap_or(0),
            })
            .collect();

        if actual == expected {
            tracing::debug!("Verified order of {}", group);
            Verification::Matched
        } else {
            tracing::error!(
                "Persisted order of {} does not match what was written: expected {:?}, found {:?}",
                group,
                expected,
                actual
            );
            Verification::Mismatch {
                expected: expected.to_vec(),
                actual,
            }
        }
    }

    fn roll_back(&self, ticket: &DragTicket, message: String) {
        {
            let mut state = self.shared.lock();
            let current = state.store.group_order(&ticket.group);
            let restored = restore_after_anchor(&current, &ticket.dragged, ticket.anchor.as_ref());
            state.store.apply_order(&ticket.group, &restored);
        }
        tracing::warn!("Reorder of {} failed, restored order: {}", ticket.group, message);
        self.shared.emit(EngineEvent::Render);
        self.shared.emit(EngineEvent::ReorderFailed {
            group: ticket.group.clone(),
            message,
        });
    }
}

#[async_trait]
impl ReorderDriver for ReorderSynchronizer {
    fn begin_drag(&self, group: &GroupKey, from_index: usize) -> Option<DragTicket> {
        let original_order = self.shared.lock().store.group_order(group);
        if original_order.len() < 2 {
            return None;
        }
        let dragged = original_order.get(from_index)?.clone();
        let anchor = from_index
            .checked_sub(1)
            .and_then(|idx| original_order.get(idx))
            .cloned();

        Some(DragTicket {
            group: group.clone(),
            dragged,
            from_index,
            original_order,
            anchor,
        })
    }

    async fn complete_drag(&self, ticket: DragTicket, to_index: usize) -> ReorderOutcome {
        let new_order = match compute_new_order(&ticket.original_order, ticket.from_index, to_index)
        {
            Some(order) => order,
            None => return ReorderOutcome::Unchanged,
        };

        let lease = {
            let mut state = self.shared.lock();
            if !state.reorders.insert(ticket.group.clone()) {
                tracing::debug!("Reorder of {} already in flight, ignoring drop", ticket.group);
                return ReorderOutcome::Busy;
            }
            state.store.apply_order(&ticket.group, &new_order);
            GroupLease {
                shared: Arc::clone(&self.shared),
                group: ticket.group.clone(),
            }
        };
        let _guard = self.shared.inflight().track();
        self.shared.emit(EngineEvent::Render);

        let entries = order_entries(&new_order);
        let ack = self
            .service
            .reorder_records(&ticket.group.user_id, ticket.group.date, &entries)
            .await;

        let outcome = match ack {
            Ok(ack) if ack.success => {
                self.shared
                    .lock()
                    .cache
                    .invalidate_date(&ticket.group.user_id, ticket.group.date);
                let verification = self.verify(&ticket.group, &entries).await;
                ReorderOutcome::Persisted { verification }
            }
            Ok(_) => {
                self.roll_back(&ticket, "the store rejected the new order".into());
                ReorderOutcome::RolledBack
            }
            Err(e) => {
                self.roll_back(&ticket, e.to_string());
                ReorderOutcome::RolledBack
            }
        };

        drop(lease);
        outcome
    }
}
