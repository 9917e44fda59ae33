//! File-backed storage: an indexed in-memory table with a JSON-lines journal.
//!
//! Every write is appended to the journal before the indices change, while
//! the cache's exclusive lock is held. On open the journal is replayed to
//! rebuild the indices. Users are kept in memory only; after a restart the
//! known users are the owners found in the journal.
//!
//! Journal appends are synchronous `std::fs` writes made while the write lock
//! is held. Each is a single small write, and the lock must cover it so the
//! file order matches the index order.

use crate::buffer::{BatchWriter, InsertBuffer};
use crate::cache::{IndexedCache, Replayed};
use crate::journal::Journal;
use crate::pipeline::{DeleteApplier, DeletePipeline, DeleteRequest, PipelineState};
use crate::schema::{encode_batch, StoredUrl, StoredUser, UserIdPolicy};
use crate::settings::FileStorageSettings;
use async_trait::async_trait;
use burrow_core::{Result, ShortId, ShortUrl, Storage, StorageError, UrlStore, User, UserStore};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

const POLICY: UserIdPolicy = UserIdPolicy::AllowNil;

#[derive(Debug)]
struct FileBackend {
    cache: IndexedCache,
    journal: Option<Journal>,
}

impl FileBackend {
    fn open(path: Option<&Path>) -> Result<Self> {
        let cache = IndexedCache::new();
        let journal = path.map(Journal::open).transpose()?;

        if let Some(journal) = &journal {
            replay(&cache, journal)?;
        }

        Ok(Self { cache, journal })
    }

    fn save(&self, record: StoredUrl) -> Result<()> {
        let mut tables = self.cache.write();
        tables.check_insert(&record)?;
        if let Some(journal) = &self.journal {
            journal.append(&record)?;
        }
        tables.insert(record);
        Ok(())
    }

    fn save_all(&self, records: Vec<StoredUrl>) -> Result<()> {
        let mut tables = self.cache.write();
        tables.check_batch(&records)?;
        if let Some(journal) = &self.journal {
            journal.append_all(&records)?;
        }
        for record in records {
            tables.insert(record);
        }
        Ok(())
    }

    /// Tombstones the records owned by their requester. Returns how many changed.
    fn delete(&self, batch: &[DeleteRequest]) -> Result<usize> {
        let mut tables = self.cache.write();
        let mut seen = HashSet::new();

        let tombstones: Vec<StoredUrl> = batch
            .iter()
            .filter_map(|request| tables.owned(request.short_id.as_str(), request.user_id))
            .filter(|record| seen.insert(record.id))
            .map(|record| StoredUrl {
                is_deleted: true,
                ..record.clone()
            })
            .collect();

        if let Some(journal) = &self.journal {
            journal.append_all(&tombstones)?;
        }
        for tombstone in &tombstones {
            tables.mark_deleted(tombstone.id);
        }

        Ok(tombstones.len())
    }
}

fn replay(cache: &IndexedCache, journal: &Journal) -> Result<()> {
    let records = journal.read_all()?;
    let total = records.len();
    let mut tables = cache.write();
    let (mut inserted, mut tombstoned) = (0usize, 0usize);

    for (index, record) in records.into_iter().enumerate() {
        record.validate(POLICY).map_err(|err| {
            StorageError::InvalidData(format!(
                "{} record {}: {err}",
                journal.path().display(),
                index + 1
            ))
        })?;

        match tables.replay(record) {
            Replayed::Inserted => inserted += 1,
            Replayed::Tombstoned => tombstoned += 1,
            Replayed::Skipped => {}
        }
    }

    info!(
        path = %journal.path().display(),
        inserted,
        tombstoned,
        skipped = total - inserted - tombstoned,
        "journal replayed"
    );
    Ok(())
}

fn to_canonical(record: StoredUrl) -> Result<ShortUrl> {
    record
        .to_canonical(POLICY)
        .map_err(|err| StorageError::InvalidData(err.to_string()))
}

#[async_trait]
impl BatchWriter for FileBackend {
    async fn write_batch(&self, records: Vec<ShortUrl>) -> Result<()> {
        let stored = encode_batch(&records, POLICY)?;
        self.save_all(stored)
    }
}

#[async_trait]
impl DeleteApplier for FileBackend {
    async fn apply_deletions(&self, batch: &[DeleteRequest]) -> Result<()> {
        let deleted = self.delete(batch)?;
        debug!(requested = batch.len(), deleted, "deletions applied to file storage");
        Ok(())
    }
}

/// Url side of [`FileStorage`].
#[derive(Debug)]
pub struct FileUrlStore {
    backend: Arc<FileBackend>,
    buffer: InsertBuffer<FileBackend>,
    pipeline: DeletePipeline,
}

#[async_trait]
impl UrlStore for FileUrlStore {
    async fn get_url(&self, short_id: &ShortId) -> Result<Option<ShortUrl>> {
        trace!(short_id = %short_id, "get url");
        self.backend
            .cache
            .get(short_id.as_str())
            .map(to_canonical)
            .transpose()
    }

    async fn get_short_url_by_src_url(&self, url: &str) -> Result<Option<ShortUrl>> {
        self.backend
            .cache
            .get_by_src_url(url)
            .map(to_canonical)
            .transpose()
    }

    async fn get_user_url_list(&self, user_id: Uuid, limit: usize) -> Result<Vec<ShortUrl>> {
        self.backend
            .cache
            .get_by_user(user_id, limit)
            .into_iter()
            .map(to_canonical)
            .collect()
    }

    async fn save_url(&self, record: ShortUrl) -> Result<ShortUrl> {
        let stored = StoredUrl::from_canonical(&record, POLICY)?;
        self.backend.save(stored)?;
        debug!(short_id = %record.short_id, user_id = %record.user_id, "url saved");
        Ok(record)
    }

    async fn exist(&self, short_id: &ShortId) -> Result<bool> {
        Ok(self.backend.cache.exists(short_id.as_str()))
    }

    async fn exist_src_url(&self, url: &str) -> Result<bool> {
        Ok(self.backend.cache.exists_src_url(url))
    }

    async fn save_url_buff(&self, record: ShortUrl) -> Result<()> {
        self.buffer.stage(record).await
    }

    async fn save_url_buff_flush(&self) -> Result<()> {
        self.buffer.flush().await
    }

    async fn delete_url_batch(&self, user_id: Uuid, short_ids: Vec<ShortId>) -> Result<()> {
        self.pipeline.request_delete(user_id, short_ids)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.backend.cache.url_count())
    }
}

/// User side of [`FileStorage`].
#[derive(Debug)]
pub struct FileUserStore {
    backend: Arc<FileBackend>,
}

#[async_trait]
impl UserStore for FileUserStore {
    async fn add_user(&self, user: User) -> Result<User> {
        let stored = StoredUser::from_canonical(&user)?;
        if self.backend.cache.add_user(stored.id) {
            debug!(user_id = %stored.id, "user added");
        }
        Ok(user)
    }

    async fn exists(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.backend.cache.user_exists(user_id))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.backend.cache.user_count())
    }
}

/// Storage backed by a JSON-lines file, or by memory alone when no path is set.
#[derive(Debug)]
pub struct FileStorage {
    urls: FileUrlStore,
    users: FileUserStore,
}

impl FileStorage {
    /// Opens the storage and replays the journal. Must be called from within a
    /// tokio runtime, the delete pipeline is spawned here.
    pub async fn open(settings: FileStorageSettings) -> Result<Self> {
        let backend = Arc::new(FileBackend::open(settings.path.as_deref())?);

        let buffer = InsertBuffer::new(Arc::clone(&backend), settings.insert_buffer_capacity);
        let pipeline = DeletePipeline::spawn(
            Arc::clone(&backend),
            settings.pipeline,
            &settings.shutdown,
        );

        match &settings.path {
            Some(path) => info!(path = %path.display(), "file storage opened"),
            None => info!("in-memory storage opened"),
        }

        Ok(Self {
            urls: FileUrlStore {
                backend: Arc::clone(&backend),
                buffer,
                pipeline,
            },
            users: FileUserStore { backend },
        })
    }

    /// Opens a storage that keeps nothing on disk.
    pub async fn in_memory() -> Result<Self> {
        Self::open(FileStorageSettings::builder().build()).await
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.urls.pipeline.state()
    }
}

#[async_trait]
impl Storage for FileStorage {
    type Urls = FileUrlStore;
    type Users = FileUserStore;

    fn urls(&self) -> &FileUrlStore {
        &self.urls
    }

    fn users(&self) -> &FileUserStore {
        &self.users
    }

    async fn ping(&self) -> Result<()> {
        Err(StorageError::NotInitialized)
    }

    async fn close(&self) -> Result<()> {
        let flushed = self.urls.buffer.flush().await;
        self.urls.pipeline.shutdown().await;
        info!("file storage closed");
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::ValidationError;
    use std::time::Duration;
    use tempfile::TempDir;

    fn code(s: &str) -> ShortId {
        ShortId::new_unchecked(s)
    }

    fn record(short_id: &str, url: &str, user_id: Uuid) -> ShortUrl {
        ShortUrl::new(Uuid::new_v4(), code(short_id), url, user_id)
    }

    async fn storage_with_user() -> (FileStorage, Uuid) {
        let storage = FileStorage::in_memory().await.unwrap();
        let user = storage.users().add_user(User::new()).await.unwrap();
        (storage, user.id)
    }

    #[tokio::test]
    async fn save_then_read_by_every_key() {
        let (storage, user) = storage_with_user().await;
        let saved = storage
            .urls()
            .save_url(record("abc", "https://example.com", user))
            .await
            .unwrap();

        let urls = storage.urls();
        assert_eq!(urls.get_url(&code("abc")).await.unwrap(), Some(saved.clone()));
        assert_eq!(
            urls.get_short_url_by_src_url("https://example.com").await.unwrap(),
            Some(saved.clone())
        );
        assert_eq!(urls.get_user_url_list(user, 10).await.unwrap(), vec![saved]);
        assert!(urls.exist(&code("abc")).await.unwrap());
        assert!(urls.exist_src_url("https://example.com").await.unwrap());
        assert_eq!(urls.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_records_are_none_and_empty() {
        let (storage, user) = storage_with_user().await;
        assert_eq!(storage.urls().get_url(&code("nope")).await.unwrap(), None);
        assert!(storage.urls().get_user_url_list(user, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_save_of_a_url_conflicts() {
        let (storage, user) = storage_with_user().await;
        storage
            .urls()
            .save_url(record("first", "https://example.com", user))
            .await
            .unwrap();

        let err = storage
            .urls()
            .save_url(record("second", "https://example.com", user))
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Conflict { existing } if existing == code("first")));
        assert_eq!(storage.urls().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn anonymous_records_are_accepted_and_unknown_owners_are_not() {
        let storage = FileStorage::in_memory().await.unwrap();

        storage
            .urls()
            .save_url(record("anon", "https://example.com", Uuid::nil()))
            .await
            .unwrap();

        let stranger = Uuid::new_v4();
        let err = storage
            .urls()
            .save_url(record("other", "https://other.example", stranger))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UserNotFound(id) if id == stranger));
    }

    #[tokio::test]
    async fn invalid_records_are_rejected_before_writing() {
        let (storage, user) = storage_with_user().await;
        let err = storage
            .urls()
            .save_url(record("abc", "", user))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
        assert_eq!(storage.urls().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn buffered_batch_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.jsonl");
        let settings = FileStorageSettings::builder().path(path.clone()).build();
        let storage = FileStorage::open(settings).await.unwrap();
        let user = storage.users().add_user(User::new()).await.unwrap().id;

        storage
            .urls()
            .save_url(record("taken", "https://taken.example", user))
            .await
            .unwrap();
        let journal_len = std::fs::metadata(&path).unwrap().len();

        let urls = storage.urls();
        urls.save_url_buff(record("a", "https://a.example", user)).await.unwrap();
        urls.save_url_buff(record("b", "https://taken.example", user)).await.unwrap();
        urls.save_url_buff(record("c", "https://c.example", user)).await.unwrap();

        let err = urls.save_url_buff_flush().await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
        assert!(!urls.exist(&code("a")).await.unwrap());
        assert!(!urls.exist(&code("c")).await.unwrap());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), journal_len);

        urls.save_url_buff(record("d", "https://d.example", user)).await.unwrap();
        urls.save_url_buff_flush().await.unwrap();
        assert!(urls.exist(&code("d")).await.unwrap());
    }

    #[tokio::test]
    async fn buffered_batch_with_an_invalid_record_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("urls.jsonl");
        let settings = FileStorageSettings::builder().path(path.clone()).build();
        let storage = FileStorage::open(settings).await.unwrap();
        let user = storage.users().add_user(User::new()).await.unwrap().id;
        let journal_len = std::fs::metadata(&path).unwrap().len();

        let mut nil_id = record("b", "https://b.example", user);
        nil_id.id = Uuid::nil();

        let urls = storage.urls();
        urls.save_url_buff(record("a", "https://a.example", user)).await.unwrap();
        urls.save_url_buff(nil_id).await.unwrap();
        urls.save_url_buff(record("c", "https://c.example/a b", user)).await.unwrap();

        let err = urls.save_url_buff_flush().await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::AtIndex { index: 1, .. })
        ));
        assert!(!urls.exist(&code("a")).await.unwrap());
        assert_eq!(urls.count().await.unwrap(), 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), journal_len);
    }

    #[tokio::test]
    async fn tombstoned_records_cannot_be_inserted() {
        let (storage, user) = storage_with_user().await;
        let urls = storage.urls();
        let mut deleted = record("gone", "https://gone.example", user);
        deleted.is_deleted = true;

        let err = urls.save_url(deleted.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::AlreadyDeleted)
        ));

        urls.save_url_buff(deleted).await.unwrap();
        let err = urls.save_url_buff_flush().await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::AtIndex { index: 0, .. })
        ));
        assert_eq!(urls.get_url(&code("gone")).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deletion_checks_ownership() {
        let (storage, owner) = storage_with_user().await;
        let intruder = storage.users().add_user(User::new()).await.unwrap().id;
        let urls = storage.urls();
        urls.save_url(record("mine", "https://mine.example", owner)).await.unwrap();
        urls.save_url(record("kept", "https://kept.example", owner)).await.unwrap();

        urls.delete_url_batch(intruder, vec![code("kept")]).await.unwrap();
        urls.delete_url_batch(owner, vec![code("mine"), code("missing")])
            .await
            .unwrap();

        awaitility::at_most(Duration::from_secs(5))
            .poll_interval(Duration::from_millis(10))
            .until_async(|| async {
                urls.get_url(&code("mine"))
                    .await
                    .unwrap()
                    .is_some_and(|r| r.is_deleted)
            })
            .await;

        storage.close().await.unwrap();
        assert!(!urls.get_url(&code("kept")).await.unwrap().unwrap().is_deleted);
        assert_eq!(urls.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn close_drains_pending_deletions_and_rejects_new_ones() {
        let (storage, user) = storage_with_user().await;
        let urls = storage.urls();
        let mut ids = Vec::new();
        for i in 0..23 {
            let short_id = format!("id{i}");
            urls.save_url(record(&short_id, &format!("https://e.com/{i}"), user))
                .await
                .unwrap();
            ids.push(code(&short_id));
        }

        urls.delete_url_batch(user, ids).await.unwrap();
        storage.close().await.unwrap();

        assert_eq!(urls.count().await.unwrap(), 0);
        assert_eq!(storage.pipeline_state(), PipelineState::Stopped);

        let err = urls
            .delete_url_batch(user, vec![code("id0")])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Closed));
    }

    #[tokio::test]
    async fn close_flushes_staged_inserts() {
        let (storage, user) = storage_with_user().await;
        storage
            .urls()
            .save_url_buff(record("late", "https://late.example", user))
            .await
            .unwrap();

        storage.close().await.unwrap();
        assert!(storage.urls().exist(&code("late")).await.unwrap());
    }

    #[tokio::test]
    async fn users_are_idempotent_and_counted() {
        let storage = FileStorage::in_memory().await.unwrap();
        let user = User::new();

        storage.users().add_user(user).await.unwrap();
        storage.users().add_user(user).await.unwrap();

        assert!(storage.users().exists(user.id).await.unwrap());
        assert_eq!(storage.users().count().await.unwrap(), 1);
        assert!(storage.users().add_user(User::from(Uuid::nil())).await.is_err());
    }

    #[tokio::test]
    async fn ping_reports_no_database() {
        let storage = FileStorage::in_memory().await.unwrap();
        assert!(matches!(
            storage.ping().await.unwrap_err(),
            StorageError::NotInitialized
        ));
    }
}
