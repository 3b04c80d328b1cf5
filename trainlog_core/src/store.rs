//! In-memory record store.
//!
//! The store is the source of truth for rendering. It never talks to the
//! network and never notifies anyone; the engine decides when to re-render.

use crate::{DateRange, GroupKey, RecordId, WorkoutRecord};
use chrono::NaiveDate;

/// Records for the currently viewed date range, in insertion order
#[derive(Clone, Debug, Default)]
pub struct RecordStore {
    records: Vec<WorkoutRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record with the same id, or append it
    pub fn upsert(&mut self, record: WorkoutRecord) {
        match self.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn get(&self, id: &RecordId) -> Option<&WorkoutRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    pub fn get_mut(&mut self, id: &RecordId) -> Option<&mut WorkoutRecord> {
        self.records.iter_mut().find(|r| &r.id == id)
    }

    pub fn all(&self) -> &[WorkoutRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one date, in display order
    pub fn by_date(&self, date: NaiveDate) -> Vec<&WorkoutRecord> {
        let mut day: Vec<_> = self.records.iter().filter(|r| r.date == date).collect();
        day.sort_by_key(|r| r.display_order);
        day
    }

    pub fn remove(&mut self, id: &RecordId) -> Option<WorkoutRecord> {
        let idx = self.records.iter().position(|r| &r.id == id)?;
        Some(self.records.remove(idx))
    }

    /// Swap in freshly loaded records for `range`, keeping records outside it
    pub fn replace_range(&mut self, range: DateRange, records: Vec<WorkoutRecord>) {
        self.records.retain(|r| !range.contains(r.date));
        for record in records {
            self.upsert(record);
        }
    }

    fn group<'a>(&'a self, key: &'a GroupKey) -> impl Iterator<Item = &'a WorkoutRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.user_id == key.user_id && r.date == key.date)
    }

    /// Ids of one (user, date) group in display order
    pub fn group_order(&self, key: &GroupKey) -> Vec<RecordId> {
        let mut group: Vec<_> = self.group(key).collect();
        group.sort_by_key(|r| r.display_order);
        group.into_iter().map(|r| r.id.clone()).collect()
    }

    /// Next free display position at the end of a group
    pub fn next_display_order(&self, key: &GroupKey) -> u32 {
        self.group(key)
            .map(|r| r.display_order)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Assign 1-based display orders following `order`
    ///
    /// Ids that are not in the group are skipped. Group members missing from
    /// `order` keep their relative order and are placed after it.
    pub fn apply_order(&mut self, key: &GroupKey, order: &[RecordId]) {
        let mut full: Vec<RecordId> = order
            .iter()
            .filter(|id| self.group(key).any(|r| &r.id == *id))
            .cloned()
            .collect();
        for id in self.group_order(key) {
            if !full.contains(&id) {
                full.push(id);
            }
        }

        for (idx, id) in full.iter().enumerate() {
            if let Some(record) = self.get_mut(id) {
                record.display_order = idx as u32 + 1;
            }
        }
    }
}
