//! Keyed trailing-edge debouncer.
//!
//! Each key holds at most one scheduled task. Scheduling again under the same
//! key aborts the previous task and restarts the quiet period, so only the
//! last scheduled action runs. Used by the save queue (one key per record)
//! and the calendar notifier (a single unit key).

use crate::lock;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

struct Scheduled {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Slots<K> {
    next_generation: u64,
    tasks: HashMap<K, Scheduled>,
}

/// Delays actions until `delay` has passed without another call for the key
pub struct Debouncer<K> {
    delay: Duration,
    slots: Arc<Mutex<Slots<K>>>,
}

impl<K> Clone for Debouncer<K> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slots: Arc::new(Mutex::new(Slots {
                next_generation: 0,
                tasks: HashMap::new(),
            })),
        }
    }

    /// Run `action` once the quiet period for `key` elapses
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<Fut>(&self, key: K, action: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slots = lock(&self.slots);
        slots.next_generation += 1;
        let generation = slots.next_generation;

        let delay = self.delay;
        let owner = Arc::clone(&self.slots);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_current = {
                let mut slots = lock(&owner);
                let current = slots
                    .tasks
                    .get(&task_key)
                    .is_some_and(|s| s.generation == generation);
                if current {
                    // Once fired the task can no longer be superseded
                    slots.tasks.remove(&task_key);
                }
                current
            };
            if still_current {
                action.await;
            }
        });

        if let Some(previous) = slots.tasks.insert(key, Scheduled { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Drop the scheduled action for `key`; returns whether one was pending
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.slots).tasks.remove(key) {
            Some(scheduled) => {
                scheduled.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.slots).tasks.contains_key(key)
    }
}
