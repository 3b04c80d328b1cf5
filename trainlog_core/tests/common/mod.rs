//! Scripted in-memory `WorkoutService` for engine tests.
//!
//! Every call is logged, sleeps for a configurable latency (use with
//! `start_paused` so time is virtual) and can be told to fail. Whether a
//! call fails is decided when it is made, not when it answers, so tests can
//! target "the first save" even if a later save answers earlier.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use trainlog_core::{
    Config, DateRange, EngineEvent, FetchOptions, OrderEntry, RecordDraft, RecordId, RecordKind,
    ReorderAck, RestSettings, ServiceError, ServiceResult, SetEntry, SetId, SyncEngine, UserId,
    WorkoutRecord, WorkoutService,
};

pub const DEFAULT_LATENCY: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Fetch { bypass_cache: bool },
    Create(String),
    Save(WorkoutRecord),
    Delete(RecordId),
    RecordCompleted(RecordId, bool),
    SetCompleted(RecordId, SetId, bool),
    Reorder(Vec<OrderEntry>),
    RestSettings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Fetch,
    Create,
    Save,
    Delete,
    RecordCompleted,
    SetCompleted,
    Reorder,
    RestSettings,
}

struct FakeState {
    records: Vec<WorkoutRecord>,
    delays: HashMap<Method, VecDeque<Duration>>,
    failures: HashMap<Method, usize>,
    reject_reorders: bool,
    ignore_reorders: bool,
    rest: RestSettings,
    calls: Vec<Call>,
}

pub struct FakeService {
    state: Mutex<FakeState>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                records: Vec::new(),
                delays: HashMap::new(),
                failures: HashMap::new(),
                reject_reorders: false,
                ignore_reorders: false,
                rest: RestSettings {
                    enabled: true,
                    seconds: 30,
                },
                calls: Vec::new(),
            }),
        })
    }

    pub fn seed(&self, record: WorkoutRecord) {
        self.state.lock().unwrap().records.push(record);
    }

    /// Latency of the next call to `method`
    pub fn delay_next(&self, method: Method, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .entry(method)
            .or_default()
            .push_back(delay);
    }

    /// Make the next `count` calls to `method` fail
    pub fn fail_next(&self, method: Method, count: usize) {
        *self.state.lock().unwrap().failures.entry(method).or_default() += count;
    }

    /// Acknowledge reorders with `success: false`
    pub fn reject_reorders(&self) {
        self.state.lock().unwrap().reject_reorders = true;
    }

    /// Acknowledge reorders without storing them
    pub fn ignore_reorders(&self) {
        self.state.lock().unwrap().ignore_reorders = true;
    }

    pub fn set_rest(&self, rest: RestSettings) {
        self.state.lock().unwrap().rest = rest;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn saves(&self) -> Vec<WorkoutRecord> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Save(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    pub fn stored(&self, id: &RecordId) -> Option<WorkoutRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    /// Log the call and decide its fate, then wait out its latency
    async fn enter(&self, method: Method, call: Call) -> ServiceResult<()> {
        let (delay, fail) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            let delay = state
                .delays
                .get_mut(&method)
                .and_then(|q| q.pop_front())
                .unwrap_or(DEFAULT_LATENCY);
            let fail = match state.failures.get_mut(&method) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            };
            (delay, fail)
        };

        tokio::time::sleep(delay).await;
        if fail {
            return Err(ServiceError::Unavailable(format!("{:?} failed", method)));
        }
        Ok(())
    }
}

fn fill_set_ids(kind: &mut RecordKind) {
    if let RecordKind::SetBased { sets } = kind {
        for set in sets.iter_mut().filter(|s| s.id.is_none()) {
            set.id = Some(SetId::generate());
        }
    }
}

#[async_trait]
impl WorkoutService for FakeService {
    async fn fetch_records(
        &self,
        user_id: &UserId,
        range: DateRange,
        options: FetchOptions,
    ) -> ServiceResult<Vec<WorkoutRecord>> {
        self.enter(
            Method::Fetch,
            Call::Fetch {
                bypass_cache: options.bypass_cache,
            },
        )
        .await?;
        let state = self.state.lock().unwrap();
        let mut records: Vec<WorkoutRecord> = state
            .records
            .iter()
            .filter(|r| &r.user_id == user_id && range.contains(r.date))
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.date, r.display_order));
        Ok(records)
    }

    async fn create_record(&self, draft: &RecordDraft) -> ServiceResult<WorkoutRecord> {
        self.enter(Method::Create, Call::Create(draft.name.clone()))
            .await?;
        let mut state = self.state.lock().unwrap();
        let display_order = state
            .records
            .iter()
            .filter(|r| r.user_id == draft.user_id && r.date == draft.date)
            .map(|r| r.display_order)
            .max()
            .unwrap_or(0)
            + 1;
        let mut kind = draft.kind.clone();
        fill_set_ids(&mut kind);
        let record = WorkoutRecord {
            id: RecordId::generate(),
            user_id: draft.user_id.clone(),
            date: draft.date,
            name: draft.name.clone(),
            kind,
            completed: false,
            display_order,
            notes: draft.notes.clone(),
        };
        state.records.push(record.clone());
        Ok(record)
    }

    async fn save_record(&self, record: &WorkoutRecord) -> ServiceResult<WorkoutRecord> {
        self.enter(Method::Save, Call::Save(record.clone())).await?;
        let mut state = self.state.lock().unwrap();
        let stored = state
            .records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| ServiceError::NotFound(record.id.to_string()))?;
        let mut canonical = record.clone();
        fill_set_ids(&mut canonical.kind);
        *stored = canonical.clone();
        Ok(canonical)
    }

    async fn delete_record(&self, record_id: &RecordId) -> ServiceResult<()> {
        self.enter(Method::Delete, Call::Delete(record_id.clone()))
            .await?;
        self.state
            .lock()
            .unwrap()
            .records
            .retain(|r| &r.id != record_id);
        Ok(())
    }

    async fn set_record_completed(&self, record_id: &RecordId, completed: bool) -> ServiceResult<()> {
        self.enter(
            Method::RecordCompleted,
            Call::RecordCompleted(record_id.clone(), completed),
        )
        .await?;
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.records.iter_mut().find(|r| &r.id == record_id) {
            record.completed = completed;
        }
        Ok(())
    }

    async fn set_set_completed(
        &self,
        record_id: &RecordId,
        set_id: &SetId,
        completed: bool,
    ) -> ServiceResult<()> {
        self.enter(
            Method::SetCompleted,
            Call::SetCompleted(record_id.clone(), set_id.clone(), completed),
        )
        .await?;
        let mut state = self.state.lock().unwrap();
        let set = state
            .records
            .iter_mut()
            .find(|r| &r.id == record_id)
            .and_then(|r| r.sets_mut())
            .and_then(|sets| sets.iter_mut().find(|s| s.id.as_ref() == Some(set_id)));
        if let Some(set) = set {
            set.completed = completed;
        }
        Ok(())
    }

    async fn reorder_records(
        &self,
        _user_id: &UserId,
        _date: NaiveDate,
        order: &[OrderEntry],
    ) -> ServiceResult<ReorderAck> {
        self.enter(Method::Reorder, Call::Reorder(order.to_vec()))
            .await?;
        let mut state = self.state.lock().unwrap();
        if state.reject_reorders {
            return Ok(ReorderAck { success: false });
        }
        if !state.ignore_reorders {
            for entry in order {
                if let Some(record) = state.records.iter_mut().find(|r| r.id == entry.id) {
                    record.display_order = entry.order;
                }
            }
        }
        Ok(ReorderAck { success: true })
    }

    async fn rest_interval_settings(&self, _user_id: &UserId) -> ServiceResult<RestSettings> {
        self.enter(Method::RestSettings, Call::RestSettings).await?;
        Ok(self.state.lock().unwrap().rest)
    }
}

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

pub fn user() -> UserId {
    UserId::new("athlete")
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 8, d).unwrap()
}

/// Set-based record with `sets` stored sets of `weight` x 5
pub fn strength(id: &str, date: NaiveDate, order: u32, sets: u32, weight: f64) -> WorkoutRecord {
    WorkoutRecord {
        id: RecordId::new(id),
        user_id: user(),
        date,
        name: format!("{} lift", id),
        kind: RecordKind::SetBased {
            sets: (1..=sets)
                .map(|n| SetEntry {
                    id: Some(SetId::new(format!("{}-s{}", id, n))),
                    set_number: n,
                    weight,
                    reps: 5,
                    completed: false,
                })
                .collect(),
        },
        completed: false,
        display_order: order,
        notes: String::new(),
    }
}

pub fn cardio(id: &str, date: NaiveDate, order: u32) -> WorkoutRecord {
    WorkoutRecord {
        id: RecordId::new(id),
        user_id: user(),
        date,
        name: format!("{} run", id),
        kind: RecordKind::Timed {
            duration_minutes: 30,
        },
        completed: false,
        display_order: order,
        notes: String::new(),
    }
}

pub fn engine(service: &Arc<FakeService>) -> (SyncEngine, UnboundedReceiver<EngineEvent>) {
    trainlog_core::logging::init_test();
    let service: Arc<dyn WorkoutService> = Arc::clone(service) as Arc<dyn WorkoutService>;
    SyncEngine::new(user(), service, &Config::default())
}

/// Engine with `date` already loaded and the load's events drained
pub async fn loaded_engine(
    service: &Arc<FakeService>,
    date: NaiveDate,
) -> (SyncEngine, UnboundedReceiver<EngineEvent>) {
    let (engine, mut rx) = engine(service);
    engine.load_range(DateRange::single(date)).await.unwrap();
    drain(&mut rx);
    (engine, rx)
}

pub fn drain(rx: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn ids(records: &[WorkoutRecord]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}
