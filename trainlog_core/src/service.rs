//! Persistence service port (outbound).
//!
//! The sync engine never talks to a database or HTTP API directly. Everything
//! it needs from the backing store goes through [`WorkoutService`], which is
//! implemented by [`JsonFileService`](crate::file_store::JsonFileService) for
//! local use and by test doubles in the test suites.

use crate::{
    DateRange, FetchOptions, OrderEntry, RecordDraft, RecordId, ReorderAck, RestSettings,
    ServiceError, SetId, UserId, WorkoutRecord,
};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Result of a call against the persistence service
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Outbound port for workout record persistence.
#[async_trait]
pub trait WorkoutService: Send + Sync + 'static {
    /// Read a user's records for a date range.
    ///
    /// `options.bypass_cache` asks the service to skip any read cache it keeps;
    /// the post-reorder verification relies on it.
    async fn fetch_records(
        &self,
        user_id: &UserId,
        range: DateRange,
        options: FetchOptions,
    ) -> ServiceResult<Vec<WorkoutRecord>>;

    /// Create a record and return it with its assigned ids.
    async fn create_record(&self, draft: &RecordDraft) -> ServiceResult<WorkoutRecord>;

    /// Persist the full state of a record.
    ///
    /// Returns the canonical record, with real ids substituted for any set
    /// that was sent without one.
    async fn save_record(&self, record: &WorkoutRecord) -> ServiceResult<WorkoutRecord>;

    async fn delete_record(&self, record_id: &RecordId) -> ServiceResult<()>;

    /// Lightweight completion write for timed and free-text records.
    async fn set_record_completed(&self, record_id: &RecordId, completed: bool)
        -> ServiceResult<()>;

    /// Lightweight completion write for a single set.
    async fn set_set_completed(
        &self,
        record_id: &RecordId,
        set_id: &SetId,
        completed: bool,
    ) -> ServiceResult<()>;

    /// Atomically persist the full order of one (user, date) group.
    async fn reorder_records(
        &self,
        user_id: &UserId,
        date: NaiveDate,
        order: &[OrderEntry],
    ) -> ServiceResult<ReorderAck>;

    /// The user's rest-interval preference.
    async fn rest_interval_settings(&self, user_id: &UserId) -> ServiceResult<RestSettings>;
}
