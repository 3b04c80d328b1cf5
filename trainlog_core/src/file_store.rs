//! JSON file backed implementation of [`WorkoutService`].
//!
//! All users' records live in one JSON document. Every call takes a lock on
//! a sibling `.lock` file (shared for reads, exclusive for updates), so
//! concurrent writers in this or another process cannot interleave a
//! load-modify-save cycle. Writes go to a temp file that is synced and then
//! renamed over the document.

use crate::service::{ServiceResult, WorkoutService};
use crate::{
    DateRange, Error, FetchOptions, GroupKey, OrderEntry, RecordDraft, RecordId, RecordKind,
    ReorderAck, RestSettings, Result, ServiceError, SetId, UserId, WorkoutRecord,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// On-disk layout of the store
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub records: Vec<WorkoutRecord>,
    #[serde(default)]
    pub rest_settings: HashMap<UserId, RestSettings>,
}

impl StoreDocument {
    /// Load the document; a missing or corrupted file yields an empty store
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No store file found at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let mut contents = String::new();
        if let Err(e) = File::open(path).and_then(|mut f| f.read_to_string(&mut contents)) {
            tracing::warn!("Failed to read store file {:?}: {}. Starting empty.", path, e);
            return Ok(Self::default());
        }

        match serde_json::from_str::<StoreDocument>(&contents) {
            Ok(doc) => {
                tracing::debug!("Loaded {} records from {:?}", doc.records.len(), path);
                Ok(doc)
            }
            Err(e) => {
                tracing::warn!("Failed to parse store file {:?}: {}. Starting empty.", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Atomically replace the document on disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Other(format!("store path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        // Temp file in the same directory so the rename stays on one filesystem
        let temp = NamedTempFile::new_in(parent)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved {} records to {:?}", self.records.len(), path);
        Ok(())
    }

    fn group_mut<'a>(
        &'a mut self,
        key: &'a GroupKey,
    ) -> impl Iterator<Item = &'a mut WorkoutRecord> + 'a {
        self.records
            .iter_mut()
            .filter(move |r| r.user_id == key.user_id && r.date == key.date)
    }

    fn next_display_order(&self, key: &GroupKey) -> u32 {
        self.records
            .iter()
            .filter(|r| r.user_id == key.user_id && r.date == key.date)
            .map(|r| r.display_order)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Close gaps in a group's display order after a removal
    fn renumber(&mut self, key: &GroupKey) {
        let mut group: Vec<&mut WorkoutRecord> = self.group_mut(key).collect();
        group.sort_by_key(|r| r.display_order);
        for (idx, record) in group.into_iter().enumerate() {
            record.display_order = idx as u32 + 1;
        }
    }

    fn find_mut(&mut self, id: &RecordId) -> ServiceResult<&mut WorkoutRecord> {
        self.records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }
}

/// Give unsaved sets an id and number all sets from 1
fn canonicalize_sets(kind: &mut RecordKind) -> ServiceResult<()> {
    if let RecordKind::SetBased { sets } = kind {
        if sets.is_empty() {
            return Err(ServiceError::Validation(
                "a set-based record needs at least one set".into(),
            ));
        }
        for (idx, set) in sets.iter_mut().enumerate() {
            set.set_number = idx as u32 + 1;
            if set.id.is_none() {
                set.id = Some(SetId::generate());
            }
        }
    }
    Ok(())
}

/// Local persistence service backed by a JSON document
#[derive(Clone, Debug)]
pub struct JsonFileService {
    path: PathBuf,
    default_rest: RestSettings,
}

impl JsonFileService {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_rest: RestSettings {
                enabled: true,
                seconds: 60,
            },
        }
    }

    /// Rest settings reported for users without a stored preference
    pub fn with_default_rest(mut self, settings: RestSettings) -> Self {
        self.default_rest = settings;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn open_lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?)
    }

    /// Run `f` against a snapshot of the document under a shared lock
    pub fn read<T>(&self, f: impl FnOnce(&StoreDocument) -> ServiceResult<T>) -> ServiceResult<T> {
        let lock = self.open_lock()?;
        lock.lock_shared()?;
        let result = StoreDocument::load(&self.path)
            .map_err(ServiceError::from)
            .and_then(|doc| f(&doc));
        let _ = lock.unlock();
        result
    }

    /// Load, modify and save the document under an exclusive lock
    ///
    /// Nothing is written if `f` fails.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut StoreDocument) -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let lock = self.open_lock()?;
        lock.lock_exclusive()?;
        let result: ServiceResult<T> = (|| {
            let mut doc = StoreDocument::load(&self.path)?;
            let value = f(&mut doc)?;
            doc.save(&self.path)?;
            Ok(value)
        })();
        let _ = lock.unlock();
        result
    }

    /// Run a blocking store operation off the async executor
    async fn blocking<T, F>(&self, f: F) -> ServiceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(JsonFileService) -> ServiceResult<T> + Send + 'static,
    {
        let service = self.clone();
        tokio::task::spawn_blocking(move || f(service))
            .await
            .map_err(|e| ServiceError::Storage(format!("store task failed: {}", e)))?
    }

    pub fn set_rest_settings(&self, user_id: &UserId, settings: RestSettings) -> ServiceResult<()> {
        self.update(|doc| {
            doc.rest_settings.insert(user_id.clone(), settings);
            Ok(())
        })
    }

    pub fn all_records(&self) -> ServiceResult<Vec<WorkoutRecord>> {
        self.read(|doc| Ok(doc.records.clone()))
    }
}

#[async_trait]
impl WorkoutService for JsonFileService {
    async fn fetch_records(
        &self,
        user_id: &UserId,
        range: DateRange,
        _options: FetchOptions,
    ) -> ServiceResult<Vec<WorkoutRecord>> {
        // Every read goes to disk, so there is no cache to bypass
        let user_id = user_id.clone();
        self.blocking(move |store| {
            store.read(|doc| {
                let mut records: Vec<WorkoutRecord> = doc
                    .records
                    .iter()
                    .filter(|r| r.user_id == user_id && range.contains(r.date))
                    .cloned()
                    .collect();
                records.sort_by_key(|r| (r.date, r.display_order));
                Ok(records)
            })
        })
        .await
    }

    async fn create_record(&self, draft: &RecordDraft) -> ServiceResult<WorkoutRecord> {
        let draft = draft.clone();
        self.blocking(move |store| {
            store.update(|doc| {
                let mut kind = draft.kind;
                canonicalize_sets(&mut kind)?;
                let key = GroupKey::new(draft.user_id.clone(), draft.date);
                let record = WorkoutRecord {
                    id: RecordId::generate(),
                    user_id: draft.user_id,
                    date: draft.date,
                    name: draft.name,
                    kind,
                    completed: false,
                    display_order: doc.next_display_order(&key),
                    notes: draft.notes,
                };
                doc.records.push(record.clone());
                tracing::info!("Created record {} for {}", record.id, key);
                Ok(record)
            })
        })
        .await
    }

    async fn save_record(&self, record: &WorkoutRecord) -> ServiceResult<WorkoutRecord> {
        let record = record.clone();
        self.blocking(move |store| {
            store.update(|doc| {
                let mut incoming = record;
                canonicalize_sets(&mut incoming.kind)?;

                let existing = doc.find_mut(&incoming.id)?;
                if existing.user_id != incoming.user_id {
                    return Err(ServiceError::Conflict(format!(
                        "record {} belongs to another user",
                        incoming.id
                    )));
                }
                let old_key = existing.group_key();
                let moved = existing.date != incoming.date;
                // Order is only changed through reorder_records
                incoming.display_order = existing.display_order;

                if moved {
                    incoming.display_order = doc.next_display_order(&incoming.group_key());
                }
                let saved = incoming.clone();
                *doc.find_mut(&saved.id)? = incoming;
                if moved {
                    doc.renumber(&old_key);
                }
                Ok(saved)
            })
        })
        .await
    }

    async fn delete_record(&self, record_id: &RecordId) -> ServiceResult<()> {
        let record_id = record_id.clone();
        self.blocking(move |store| {
            store.update(|doc| {
                let idx = doc
                    .records
                    .iter()
                    .position(|r| r.id == record_id)
                    .ok_or_else(|| ServiceError::NotFound(record_id.to_string()))?;
                let removed = doc.records.remove(idx);
                doc.renumber(&removed.group_key());
                tracing::info!("Deleted record {}", record_id);
                Ok(())
            })
        })
        .await
    }

    async fn set_record_completed(
        &self,
        record_id: &RecordId,
        completed: bool,
    ) -> ServiceResult<()> {
        let record_id = record_id.clone();
        self.blocking(move |store| {
            store.update(|doc| {
                doc.find_mut(&record_id)?.completed = completed;
                Ok(())
            })
        })
        .await
    }

    async fn set_set_completed(
        &self,
        record_id: &RecordId,
        set_id: &SetId,
        completed: bool,
    ) -> ServiceResult<()> {
        let record_id = record_id.clone();
        let set_id = set_id.clone();
        self.blocking(move |store| {
            store.update(|doc| {
                let record = doc.find_mut(&record_id)?;
                let set = record
                    .sets_mut()
                    .and_then(|sets| sets.iter_mut().find(|s| s.id.as_ref() == Some(&set_id)))
                    .ok_or_else(|| ServiceError::NotFound(format!("{}/{}", record_id, set_id)))?;
                set.completed = completed;
                Ok(())
            })
        })
        .await
    }

    async fn reorder_records(
        &self,
        user_id: &UserId,
        date: NaiveDate,
        order: &[OrderEntry],
    ) -> ServiceResult<ReorderAck> {
        let key = GroupKey::new(user_id.clone(), date);
        let order = order.to_vec();
        self.blocking(move |store| {
            store.update(|doc| {
                let group: HashSet<RecordId> = doc.group_mut(&key).map(|r| r.id.clone()).collect();
                let requested: HashSet<RecordId> = order.iter().map(|e| e.id.clone()).collect();
                let mut positions: Vec<u32> = order.iter().map(|e| e.order).collect();
                positions.sort_unstable();
                let is_permutation = positions
                    .iter()
                    .enumerate()
                    .all(|(idx, &pos)| pos == idx as u32 + 1);

                if group != requested || requested.len() != order.len() || !is_permutation {
                    tracing::warn!("Rejected reorder of {}: order does not cover the group", key);
                    return Ok(ReorderAck { success: false });
                }

                for record in doc.group_mut(&key) {
                    if let Some(entry) = order.iter().find(|e| e.id == record.id) {
                        record.display_order = entry.order;
                    }
                }
                Ok(ReorderAck { success: true })
            })
        })
        .await
    }

    async fn rest_interval_settings(&self, user_id: &UserId) -> ServiceResult<RestSettings> {
        let user_id = user_id.clone();
        let fallback = self.default_rest;
        self.blocking(move |store| {
            store.read(|doc| Ok(doc.rest_settings.get(&user_id).copied().unwrap_or(fallback)))
        })
        .await
    }
}
