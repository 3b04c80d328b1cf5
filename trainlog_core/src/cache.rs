//! Read-through cache for record fetches.

use crate::{DateRange, UserId, WorkoutRecord};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Fetched record lists keyed by (user, range)
#[derive(Debug, Default)]
pub struct RecordCache {
    entries: HashMap<(UserId, DateRange), Vec<WorkoutRecord>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &UserId, range: DateRange) -> Option<&[WorkoutRecord]> {
        self.entries
            .get(&(user_id.clone(), range))
            .map(|records| records.as_slice())
    }

    pub fn put(&mut self, user_id: UserId, range: DateRange, records: Vec<WorkoutRecord>) {
        self.entries.insert((user_id, range), records);
    }

    /// Forget every cached read that covers `date`; returns how many were dropped
    pub fn invalidate_date(&mut self, user_id: &UserId, date: NaiveDate) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|(user, range), _| !(user == user_id && range.contains(date)));
        let dropped = before - self.entries.len();
        if dropped > 0 {
            tracing::trace!("invalidated {} cached reads for {} on {}", dropped, user_id, date);
        }
        dropped
    }
}
