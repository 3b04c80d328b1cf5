//! Completion cascade: set -> record -> day.
//!
//! Set completion is stored; record ("all sets") completion is always derived;
//! day completion is recomputed after every completion-affecting toggle to
//! decide which notification, if any, follows the toggle.

use crate::{SetEntry, WorkoutRecord};
use chrono::NaiveDate;
use std::collections::HashSet;

/// True iff the list is non-empty and every set is completed
pub fn all_sets_completed(sets: &[SetEntry]) -> bool {
    !sets.is_empty() && sets.iter().all(|s| s.completed)
}

/// True iff the day has records and every one of them is complete
pub fn day_is_complete<'a, I>(records: I) -> bool
where
    I: IntoIterator<Item = &'a WorkoutRecord>,
{
    let mut any = false;
    for record in records {
        if !record.is_complete() {
            return false;
        }
        any = true;
    }
    any
}

/// Which control the user toggled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleKind {
    /// A single set checkbox
    Set,
    /// The "all sets" checkbox of a set-based record
    AllSets,
    /// The checkbox of a timed or free-text record
    Record,
}

/// What to show after a toggle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CascadeOutcome {
    Celebrate,
    RestPrompt,
    Nothing,
}

/// Pure decision for one toggle
///
/// Unchecking never notifies. Completing the last open item of a day
/// celebrates; completing a set otherwise suggests a rest.
pub fn evaluate(toggle: ToggleKind, completed: bool, day_complete: bool) -> CascadeOutcome {
    if !completed {
        return CascadeOutcome::Nothing;
    }
    if day_complete {
        return CascadeOutcome::Celebrate;
    }
    match toggle {
        ToggleKind::Set | ToggleKind::AllSets => CascadeOutcome::RestPrompt,
        ToggleKind::Record => CascadeOutcome::Nothing,
    }
}

/// Remembers which dates were celebrated so the celebration fires once
///
/// A date becomes eligible again once the day drops back to incomplete.
#[derive(Debug, Default)]
pub struct CelebrationLedger {
    celebrated: HashSet<NaiveDate>,
}

impl CelebrationLedger {
    pub fn decide(
        &mut self,
        date: NaiveDate,
        toggle: ToggleKind,
        completed: bool,
        day_complete: bool,
    ) -> CascadeOutcome {
        if !day_complete {
            self.celebrated.remove(&date);
        }

        match evaluate(toggle, completed, day_complete) {
            CascadeOutcome::Celebrate if !self.celebrated.insert(date) => {
                tracing::debug!("{} already celebrated", date);
                CascadeOutcome::Nothing
            }
            outcome => outcome,
        }
    }

    /// Re-arm dates whose records changed outside a toggle
    pub fn forget(&mut self, date: NaiveDate) {
        self.celebrated.remove(&date);
    }
}

/// Advisory rest countdown shown after completing a set
///
/// Purely presentational: nothing else in the engine waits on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestCountdown {
    remaining: u32,
}

impl RestCountdown {
    pub fn new(seconds: u32) -> Self {
        Self { remaining: seconds }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Manual +/- adjustment; never goes below zero
    pub fn adjust(&mut self, delta_seconds: i64) {
        let next = i64::from(self.remaining) + delta_seconds;
        self.remaining = next.clamp(0, i64::from(u32::MAX)) as u32;
    }

    /// Advance one second; returns true once the prompt should dismiss
    pub fn tick(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.is_dismissed()
    }

    pub fn is_dismissed(&self) -> bool {
        self.remaining == 0
    }

    /// `m:ss` label
    pub fn label(&self) -> String {
        format!("{}:{:02}", self.remaining / 60, self.remaining % 60)
    }
}
