//! Core domain types for the Trainlog sync engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Identifiers for users, records and sets
//! - Workout records and their kinds
//! - Date grouping and ranges used by reorder and fetch calls
//! - Small payloads exchanged with the persistence service

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Fresh random identifier, as assigned by a store
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Owner of a set of workout records
    UserId
);
string_id!(
    /// Store-assigned identifier of a persisted workout record
    RecordId
);
string_id!(
    /// Store-assigned identifier of a persisted set
    SetId
);

// ============================================================================
// Records
// ============================================================================

/// One (weight, reps) entry of a set-based record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SetEntry {
    /// `None` until the store has persisted this set
    pub id: Option<SetId>,
    pub set_number: u32,
    pub weight: f64,
    pub reps: u32,
    #[serde(default)]
    pub completed: bool,
}

impl SetEntry {
    /// A set that has not been persisted yet
    pub fn unsaved(set_number: u32, weight: f64, reps: u32) -> Self {
        Self {
            id: None,
            set_number,
            weight,
            reps,
            completed: false,
        }
    }
}

/// What a record tracks
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordKind {
    /// Cardio-style entry with a duration
    Timed { duration_minutes: u32 },
    /// Strength entry with an ordered list of sets
    SetBased { sets: Vec<SetEntry> },
    /// Anything else, described in the notes
    FreeText,
}

/// A persisted workout entry belonging to a user and a date
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutRecord {
    pub id: RecordId,
    pub user_id: UserId,
    pub date: NaiveDate,
    pub name: String,
    pub kind: RecordKind,
    /// Only meaningful for `Timed` and `FreeText` records
    #[serde(default)]
    pub completed: bool,
    pub display_order: u32,
    #[serde(default)]
    pub notes: String,
}

impl WorkoutRecord {
    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(self.user_id.clone(), self.date)
    }

    /// Sets of a set-based record; empty for other kinds
    pub fn sets(&self) -> &[SetEntry] {
        match &self.kind {
            RecordKind::SetBased { sets } => sets,
            _ => &[],
        }
    }

    pub fn sets_mut(&mut self) -> Option<&mut Vec<SetEntry>> {
        match &mut self.kind {
            RecordKind::SetBased { sets } => Some(sets),
            _ => None,
        }
    }

    pub fn is_set_based(&self) -> bool {
        matches!(self.kind, RecordKind::SetBased { .. })
    }

    /// Whether this record counts as done for its day
    pub fn is_complete(&self) -> bool {
        match &self.kind {
            RecordKind::SetBased { sets } => crate::cascade::all_sets_completed(sets),
            _ => self.completed,
        }
    }

    /// Clone this record onto another date as a fresh, unfinished draft
    pub fn copy_to(&self, date: NaiveDate) -> RecordDraft {
        let kind = match &self.kind {
            RecordKind::SetBased { sets } => RecordKind::SetBased {
                sets: sets
                    .iter()
                    .map(|s| SetEntry {
                        id: None,
                        completed: false,
                        ..s.clone()
                    })
                    .collect(),
            },
            other => other.clone(),
        };

        RecordDraft {
            user_id: self.user_id.clone(),
            date,
            name: self.name.clone(),
            kind,
            notes: self.notes.clone(),
        }
    }
}

/// A record that has not been assigned a store id yet
///
/// Drafts never enter the record store; they become a [`WorkoutRecord`]
/// once the service has created them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecordDraft {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub name: String,
    pub kind: RecordKind,
    #[serde(default)]
    pub notes: String,
}

/// Field changes for one set; `None` leaves the field untouched
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SetPatch {
    pub weight: Option<f64>,
    pub reps: Option<u32>,
}

// ============================================================================
// Grouping, ranges and service payloads
// ============================================================================

/// Records are ordered within one (user, date) group
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub user_id: UserId,
    pub date: NaiveDate,
}

impl GroupKey {
    pub fn new(user_id: UserId, date: NaiveDate) -> Self {
        Self { user_id, date }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.date)
    }
}

/// Inclusive range of calendar dates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Read options for `fetch_records`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub bypass_cache: bool,
}

/// One entry of a persisted group order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub id: RecordId,
    pub order: u32,
}

/// Acknowledgement of a reorder write
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderAck {
    pub success: bool,
}

/// The user's rest-interval preference
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestSettings {
    pub enabled: bool,
    pub seconds: u32,
}
