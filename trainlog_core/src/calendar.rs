//! Debounced "dates changed" signal for a dependent calendar view.
//!
//! The engine does not know how the calendar renders or which dates it
//! shows; it only tells the registered callback that summary counts may be
//! stale. Bursts of mutations collapse into one callback invocation.

use crate::debounce::Debouncer;
use crate::events::Inflight;
use crate::lock;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Callback invoked when calendar counts may have changed
pub type CalendarCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct CalendarNotifier {
    debouncer: Debouncer<()>,
    callback: Arc<Mutex<Option<CalendarCallback>>>,
    inflight: Inflight,
}

impl CalendarNotifier {
    pub fn new(quiet_period: Duration) -> Self {
        Self::with_tracker(quiet_period, Inflight::default())
    }

    pub(crate) fn with_tracker(quiet_period: Duration, inflight: Inflight) -> Self {
        Self {
            debouncer: Debouncer::new(quiet_period),
            callback: Arc::new(Mutex::new(None)),
            inflight,
        }
    }

    /// Register the calendar's refresh hook, replacing any previous one
    pub fn register<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.callback) = Some(Arc::new(callback));
    }

    pub fn unregister(&self) {
        *lock(&self.callback) = None;
        self.debouncer.cancel(&());
    }

    pub fn is_registered(&self) -> bool {
        lock(&self.callback).is_some()
    }

    /// Schedule a refresh; no-op when no calendar is registered
    pub fn notify_dates_changed(&self) {
        if !self.is_registered() {
            return;
        }

        let callback = Arc::clone(&self.callback);
        let guard = self.inflight.track();
        self.debouncer.schedule((), async move {
            let _guard = guard;
            let current = lock(&callback).clone();
            if let Some(refresh) = current {
                tracing::debug!("Refreshing calendar counts");
                refresh();
            }
        });
    }
}
