//! In-memory indexed record table used by the file backend.
//!
//! Records live in a primary table keyed by record id. Three secondary
//! indices (short id, source url, owner) point back into it. All of them sit
//! behind a single [`RwLock`] so a reader never sees one index updated and
//! another not.

use crate::schema::StoredUrl;
use burrow_core::{Result, ShortId, StorageError};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::{HashMap, HashSet};
use tracing::warn;
use uuid::Uuid;

/// Outcome of applying one replayed journal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Replayed {
    Inserted,
    Tombstoned,
    Skipped,
}

/// The tables guarded by the cache lock.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    urls: HashMap<Uuid, StoredUrl>,
    by_short_id: HashMap<String, Uuid>,
    by_src_url: HashMap<String, Uuid>,
    /// Record ids per owner, in insertion order.
    by_user: HashMap<Uuid, Vec<Uuid>>,
    users: HashSet<Uuid>,
}

impl Tables {
    /// Checks that `record` can be inserted without breaking a uniqueness rule
    /// or referencing an unknown owner.
    pub(crate) fn check_insert(&self, record: &StoredUrl) -> Result<()> {
        if let Some(existing) = self.by_src_url.get(&record.url) {
            return Err(self.conflict(existing));
        }
        if self.by_short_id.contains_key(&record.short_id) {
            return Err(StorageError::ShortIdTaken(record.short_id.clone()));
        }
        if self.urls.contains_key(&record.id) {
            return Err(StorageError::InvalidData(format!(
                "record id already stored: {}",
                record.id
            )));
        }
        if !record.user_id.is_nil() && !self.users.contains(&record.user_id) {
            return Err(StorageError::UserNotFound(record.user_id));
        }
        Ok(())
    }

    /// Checks a whole batch, including duplicates between its own elements.
    pub(crate) fn check_batch(&self, records: &[StoredUrl]) -> Result<()> {
        let mut urls: HashMap<&str, &str> = HashMap::with_capacity(records.len());
        let mut short_ids = HashSet::with_capacity(records.len());
        let mut ids = HashSet::with_capacity(records.len());

        for record in records {
            self.check_insert(record)?;

            if let Some(existing) = urls.insert(&record.url, &record.short_id) {
                return Err(StorageError::Conflict {
                    existing: ShortId::new_unchecked(existing),
                });
            }
            if !short_ids.insert(record.short_id.as_str()) {
                return Err(StorageError::ShortIdTaken(record.short_id.clone()));
            }
            if !ids.insert(record.id) {
                return Err(StorageError::InvalidData(format!(
                    "record id repeated in batch: {}",
                    record.id
                )));
            }
        }

        Ok(())
    }

    /// Inserts a record that already passed [`Tables::check_insert`].
    pub(crate) fn insert(&mut self, record: StoredUrl) {
        let id = record.id;
        self.by_short_id.insert(record.short_id.clone(), id);
        self.by_src_url.insert(record.url.clone(), id);
        if !record.user_id.is_nil() {
            self.users.insert(record.user_id);
            self.by_user.entry(record.user_id).or_default().push(id);
        }
        self.urls.insert(id, record);
    }

    /// Sets the tombstone on a record. Returns `false` if it is unknown.
    pub(crate) fn mark_deleted(&mut self, id: Uuid) -> bool {
        match self.urls.get_mut(&id) {
            Some(record) => {
                record.is_deleted = true;
                true
            }
            None => false,
        }
    }

    /// Returns the live record `short_id` points to when `user_id` owns it.
    pub(crate) fn owned(&self, short_id: &str, user_id: Uuid) -> Option<&StoredUrl> {
        self.by_short_id
            .get(short_id)
            .and_then(|id| self.urls.get(id))
            .filter(|record| record.user_id == user_id && !record.is_deleted)
    }

    pub(crate) fn add_user(&mut self, user_id: Uuid) -> bool {
        self.users.insert(user_id)
    }

    /// Applies one journal line during replay.
    ///
    /// The first record seen for a short id or url wins. A line repeating a
    /// known record id with the tombstone set marks that record deleted.
    pub(crate) fn replay(&mut self, record: StoredUrl) -> Replayed {
        if let Some(existing) = self.urls.get(&record.id) {
            if record.is_deleted && existing.short_id == record.short_id {
                self.mark_deleted(record.id);
                return Replayed::Tombstoned;
            }
            warn!(id = %record.id, "skipping journal line with a duplicate record id");
            return Replayed::Skipped;
        }

        if self.by_short_id.contains_key(&record.short_id)
            || self.by_src_url.contains_key(&record.url)
        {
            warn!(
                id = %record.id,
                short_id = %record.short_id,
                "skipping journal line that collides with an earlier record"
            );
            return Replayed::Skipped;
        }

        self.insert(record);
        Replayed::Inserted
    }

    fn conflict(&self, existing: &Uuid) -> StorageError {
        let short_id = self
            .urls
            .get(existing)
            .map(|record| record.short_id.clone())
            .unwrap_or_default();
        StorageError::Conflict {
            existing: ShortId::new_unchecked(short_id),
        }
    }
}

/// Concurrent indexed view over every stored url record.
///
/// Reads take the shared lock and may run in parallel. Mutations take the
/// exclusive lock; the file backend holds it across the journal append so
/// the log and the indices change together.
#[derive(Debug, Default)]
pub struct IndexedCache {
    tables: RwLock<Tables>,
}

impl IndexedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the exclusive lock.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write()
    }

    pub fn get(&self, short_id: &str) -> Option<StoredUrl> {
        let tables = self.tables.read();
        tables
            .by_short_id
            .get(short_id)
            .and_then(|id| tables.urls.get(id))
            .cloned()
    }

    pub fn get_by_src_url(&self, url: &str) -> Option<StoredUrl> {
        let tables = self.tables.read();
        tables
            .by_src_url
            .get(url)
            .and_then(|id| tables.urls.get(id))
            .cloned()
    }

    /// Lists up to `limit` records owned by `user_id`, oldest first.
    /// Deleted records are included.
    pub fn get_by_user(&self, user_id: Uuid, limit: usize) -> Vec<StoredUrl> {
        if user_id.is_nil() {
            return Vec::new();
        }

        let tables = self.tables.read();
        tables
            .by_user
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.urls.get(id))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn exists(&self, short_id: &str) -> bool {
        self.tables.read().by_short_id.contains_key(short_id)
    }

    pub fn exists_src_url(&self, url: &str) -> bool {
        self.tables.read().by_src_url.contains_key(url)
    }

    pub fn user_exists(&self, user_id: Uuid) -> bool {
        self.tables.read().users.contains(&user_id)
    }

    /// Inserts a record after checking the uniqueness and owner rules.
    pub fn insert(&self, record: StoredUrl) -> Result<()> {
        let mut tables = self.write();
        tables.check_insert(&record)?;
        tables.insert(record);
        Ok(())
    }

    /// Sets the tombstone on the record with the given id.
    pub fn mark_deleted(&self, id: Uuid) -> bool {
        self.write().mark_deleted(id)
    }

    /// Registers a user. Returns `false` if it was already known.
    pub fn add_user(&self, user_id: Uuid) -> bool {
        self.write().add_user(user_id)
    }

    /// Number of records that are not deleted.
    pub fn url_count(&self) -> usize {
        self.tables
            .read()
            .urls
            .values()
            .filter(|record| !record.is_deleted)
            .count()
    }

    pub fn user_count(&self) -> usize {
        self.tables.read().users.len()
    }
}
