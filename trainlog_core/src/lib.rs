#![forbid(unsafe_code)]

//! Workout-record synchronization engine for the Trainlog portal.
//!
//! This crate provides:
//! - Domain types (records, sets, groups, service payloads)
//! - The in-memory record store
//! - A debounced, versioned save queue
//! - Optimistic drag reordering with verification and rollback
//! - The set -> record -> day completion cascade
//! - A debounced calendar refresh signal
//! - A JSON file backed persistence service and day summaries

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod service;
pub mod file_store;
pub mod store;
pub mod debounce;
pub mod events;
pub mod cache;
pub mod settings;
pub mod cascade;
pub mod save_queue;
pub mod reorder;
pub mod calendar;
pub mod summary;
pub mod engine;
mod state;

// Re-export commonly used types
pub use error::{Error, Result, ServiceError};
pub use types::*;
pub use config::Config;
pub use service::{ServiceResult, WorkoutService};
pub use file_store::JsonFileService;
pub use events::EngineEvent;
pub use cascade::{CascadeOutcome, RestCountdown, ToggleKind};
pub use save_queue::SaveState;
pub use reorder::{DragTicket, ReorderDriver, ReorderIntent, ReorderOutcome, Verification};
pub use calendar::CalendarNotifier;
pub use summary::{summarize, DaySummary};
pub use engine::SyncEngine;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking thread poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
