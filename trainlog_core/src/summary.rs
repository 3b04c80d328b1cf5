//! Per-day completion counts, as shown by the calendar month view.

use crate::{Result, WorkoutRecord};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::Path;

/// How many records a day has and how many are done
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub total: usize,
    pub completed: usize,
}

impl DaySummary {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.total == self.completed
    }
}

/// Summaries for every date that has records, oldest first
pub fn summarize(records: &[WorkoutRecord]) -> Vec<DaySummary> {
    let mut days: BTreeMap<NaiveDate, DaySummary> = BTreeMap::new();
    for record in records {
        let day = days.entry(record.date).or_insert_with(|| DaySummary {
            date: record.date,
            total: 0,
            completed: 0,
        });
        day.total += 1;
        if record.is_complete() {
            day.completed += 1;
        }
    }
    days.into_values().collect()
}

/// CSV row for a day summary
#[derive(Debug, Serialize)]
struct CsvRow {
    date: String,
    total: usize,
    completed: usize,
    complete: bool,
}

impl From<&DaySummary> for CsvRow {
    fn from(day: &DaySummary) -> Self {
        CsvRow {
            date: day.date.format("%Y-%m-%d").to_string(),
            total: day.total,
            completed: day.completed,
            complete: day.is_complete(),
        }
    }
}

/// Write summaries to a CSV file, replacing it; returns the row count
pub fn write_summary_csv(summaries: &[DaySummary], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(file);

    for day in summaries {
        writer.serialize(CsvRow::from(day))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Wrote {} day summaries to {:?}", summaries.len(), path);
    Ok(summaries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecordId, RecordKind, SetEntry, UserId};

    fn record(day: u32, kind: RecordKind, completed: bool) -> WorkoutRecord {
        WorkoutRecord {
            id: RecordId::generate(),
            user_id: UserId::new("u1"),
            date: NaiveDate::from_ymd_opt(2024, 9, day).unwrap(),
            name: "entry".into(),
            kind,
            completed,
            display_order: 1,
            notes: String::new(),
        }
    }

    fn sample() -> Vec<WorkoutRecord> {
        let mut done_set = SetEntry::unsaved(1, 40.0, 8);
        done_set.completed = true;
        vec![
            record(3, RecordKind::Timed { duration_minutes: 25 }, true),
            record(1, RecordKind::FreeText, false),
            record(3, RecordKind::SetBased { sets: vec![done_set] }, false),
            record(1, RecordKind::Timed { duration_minutes: 10 }, true),
        ]
    }

    #[test]
    fn test_summarize_groups_by_date() {
        let days = summarize(&sample());
        assert_eq!(days.len(), 2);

        assert_eq!(days[0].date.to_string(), "2024-09-01");
        assert_eq!((days[0].total, days[0].completed), (2, 1));
        assert!(!days[0].is_complete());

        assert_eq!((days[1].total, days[1].completed), (2, 2));
        assert!(days[1].is_complete());
    }

    #[test]
    fn test_write_summary_csv() {
        let temp_dir = tempfile::tempdir().unwrap();
        let csv_path = temp_dir.path().join("out").join("summary.csv");

        let count = write_summary_csv(&summarize(&sample()), &csv_path).unwrap();
        assert_eq!(count, 2);

        let content = std::fs::read_to_string(&csv_path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], "date,total,completed,complete");
        assert_eq!(lines[1], "2024-09-01,2,1,false");
        assert_eq!(lines[2], "2024-09-03,2,2,true");
    }
}
