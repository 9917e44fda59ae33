use crate::buffer::{BatchWriter, InsertBuffer};
use crate::pipeline::{DeleteApplier, DeletePipeline, DeleteRequest, PipelineState};
use crate::schema::{encode_batch, StoredUrl, StoredUser, UserIdPolicy};
use crate::settings::PgStorageSettings;
use async_trait::async_trait;
use burrow_core::{Result, ShortId, ShortUrl, Storage, StorageError, UrlStore, User, UserStore};
use sqlx::error::ErrorKind;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Connection, Postgres, Row};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const POLICY: UserIdPolicy = UserIdPolicy::Required;

const SRC_URL_CONSTRAINT: &str = "urls_srcurl_key";
const SHORT_URL_CONSTRAINT: &str = "urls_shorturl_key";

const INSERT_URL: &str = r#"
    INSERT INTO urls (id, user_id, srcurl, shorturl, isdeleted)
    VALUES ($1, $2, $3, $4, $5)
"#;

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn insert_query(record: &StoredUrl) -> Query<'_, Postgres, PgArguments> {
    sqlx::query(INSERT_URL)
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.url.as_str())
        .bind(record.short_id.as_str())
        .bind(record.is_deleted)
}

fn decode_row(row: &PgRow) -> Result<ShortUrl> {
    let stored = StoredUrl {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        short_id: row.try_get("shorturl").map_err(map_sqlx_error)?,
        url: row.try_get("srcurl").map_err(map_sqlx_error)?,
        user_id: row.try_get("user_id").map_err(map_sqlx_error)?,
        is_deleted: row.try_get("isdeleted").map_err(map_sqlx_error)?,
    };

    stored
        .to_canonical(POLICY)
        .map_err(|err| StorageError::InvalidData(err.to_string()))
}

fn to_count(value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| StorageError::InvalidData(format!("invalid count: {value}")))
}

/// Rejects batches that collide with themselves before they reach the database.
fn check_batch_duplicates(records: &[StoredUrl]) -> Result<()> {
    let mut urls = HashSet::with_capacity(records.len());
    let mut short_ids = HashSet::with_capacity(records.len());

    for record in records {
        if !urls.insert(record.url.as_str()) {
            let existing = records
                .iter()
                .find(|other| other.url == record.url)
                .map(|other| other.short_id.clone())
                .unwrap_or_default();
            return Err(StorageError::Conflict {
                existing: ShortId::new_unchecked(existing),
            });
        }
        if !short_ids.insert(record.short_id.as_str()) {
            return Err(StorageError::ShortIdTaken(record.short_id.clone()));
        }
    }

    Ok(())
}

#[derive(Debug)]
struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    async fn find_short_id_by_src_url(&self, url: &str) -> Result<Option<ShortId>> {
        let row = sqlx::query("SELECT shorturl FROM urls WHERE srcurl = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|row| {
            row.try_get::<String, _>("shorturl")
                .map(ShortId::new_unchecked)
                .map_err(map_sqlx_error)
        })
        .transpose()
    }

    /// Turns an insert failure into the matching storage error.
    async fn insert_error(&self, err: sqlx::Error, record: &StoredUrl) -> StorageError {
        let Some(db_err) = err.as_database_error() else {
            return map_sqlx_error(err);
        };
        let kind = db_err.kind();
        let constraint = db_err.constraint().map(str::to_owned);

        match (kind, constraint.as_deref()) {
            (ErrorKind::UniqueViolation, Some(SRC_URL_CONSTRAINT)) => {
                match self.find_short_id_by_src_url(&record.url).await {
                    Ok(Some(existing)) => StorageError::Conflict { existing },
                    Ok(None) => map_sqlx_error(err),
                    Err(lookup) => lookup,
                }
            }
            (ErrorKind::UniqueViolation, Some(SHORT_URL_CONSTRAINT)) => {
                StorageError::ShortIdTaken(record.short_id.clone())
            }
            (ErrorKind::ForeignKeyViolation, _) => StorageError::UserNotFound(record.user_id),
            _ => map_sqlx_error(err),
        }
    }

    async fn insert(&self, record: &StoredUrl) -> Result<()> {
        let result = insert_query(record).execute(&self.pool).await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(self.insert_error(err, record).await),
        }
    }
}

#[async_trait]
impl BatchWriter for PgBackend {
    async fn write_batch(&self, records: Vec<ShortUrl>) -> Result<()> {
        let stored = encode_batch(&records, POLICY)?;
        check_batch_duplicates(&stored)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for record in &stored {
            let result = insert_query(record).execute(&mut *tx).await;

            if let Err(err) = result {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "failed to roll back url batch");
                }
                return Err(self.insert_error(err, record).await);
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl DeleteApplier for PgBackend {
    async fn apply_deletions(&self, batch: &[DeleteRequest]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut deleted = 0;

        for request in batch {
            let result = sqlx::query(
                r#"
                UPDATE urls
                SET isdeleted = TRUE
                WHERE shorturl = $1
                  AND user_id = $2
                "#,
            )
            .bind(request.short_id.as_str())
            .bind(request.user_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            deleted += result.rows_affected();
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(requested = batch.len(), deleted, "deletions applied to postgres");
        Ok(())
    }
}

/// Url side of [`PgStorage`].
#[derive(Debug)]
pub struct PgUrlStore {
    backend: Arc<PgBackend>,
    buffer: InsertBuffer<PgBackend>,
    pipeline: DeletePipeline,
}

#[async_trait]
impl UrlStore for PgUrlStore {
    async fn get_url(&self, short_id: &ShortId) -> Result<Option<ShortUrl>> {
        trace!(short_id = %short_id, "get url");
        let row = sqlx::query(
            r#"
            SELECT id, user_id, srcurl, shorturl, isdeleted
            FROM urls
            WHERE shorturl = $1
            "#,
        )
        .bind(short_id.as_str())
        .fetch_optional(&self.backend.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn get_short_url_by_src_url(&self, url: &str) -> Result<Option<ShortUrl>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, srcurl, shorturl, isdeleted
            FROM urls
            WHERE srcurl = $1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.backend.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn get_user_url_list(&self, user_id: Uuid, limit: usize) -> Result<Vec<ShortUrl>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, srcurl, shorturl, isdeleted
            FROM urls
            WHERE user_id = $1
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.backend.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(decode_row).collect()
    }

    async fn save_url(&self, record: ShortUrl) -> Result<ShortUrl> {
        let stored = StoredUrl::from_canonical(&record, POLICY)?;
        self.backend.insert(&stored).await?;
        debug!(short_id = %record.short_id, user_id = %record.user_id, "url saved");
        Ok(record)
    }

    async fn exist(&self, short_id: &ShortId) -> Result<bool> {
        let exists = sqlx::query("SELECT 1 FROM urls WHERE shorturl = $1 LIMIT 1")
            .bind(short_id.as_str())
            .fetch_optional(&self.backend.pool)
            .await
            .map_err(map_sqlx_error)?
            .is_some();

        Ok(exists)
    }

    async fn exist_src_url(&self, url: &str) -> Result<bool> {
        let exists = sqlx::query("SELECT 1 FROM urls WHERE srcurl = $1 LIMIT 1")
            .bind(url)
            .fetch_optional(&self.backend.pool)
            .await
            .map_err(map_sqlx_error)?
            .is_some();

        Ok(exists)
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
        let row = sqlx::query("SELECT COUNT(*) AS count FROM urls WHERE isdeleted = FALSE")
            .fetch_one(&self.backend.pool)
            .await
            .map_err(map_sqlx_error)?;

        to_count(row.try_get("count").map_err(map_sqlx_error)?)
    }
}

/// User side of [`PgStorage`].
#[derive(Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn add_user(&self, user: User) -> Result<User> {
        let stored = StoredUser::from_canonical(&user)?;

        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(stored.id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        debug!(user_id = %stored.id, "user added");
        Ok(user)
    }

    async fn exists(&self, user_id: Uuid) -> Result<bool> {
        let exists = sqlx::query("SELECT 1 FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .is_some();

        Ok(exists)
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        to_count(row.try_get("count").map_err(map_sqlx_error)?)
    }
}

/// PostgreSQL implementation of the storage contract.
///
/// Uniqueness of short ids and source urls is enforced by the database
/// constraints; violations are mapped back onto [`StorageError`] variants.
/// Records are never removed, deletion sets `isdeleted`.
#[derive(Debug)]
pub struct PgStorage {
    urls: PgUrlStore,
    users: PgUserStore,
}

impl PgStorage {
    /// Connects, applies pending migrations and starts the delete pipeline.
    pub async fn connect(settings: PgStorageSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&settings.dsn)
            .await
            .map_err(map_sqlx_error)?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|err| StorageError::Query(format!("migration failed: {err}")))?;

        let backend = Arc::new(PgBackend { pool: pool.clone() });
        let buffer = InsertBuffer::new(Arc::clone(&backend), settings.insert_buffer_capacity);
        let pipeline = DeletePipeline::spawn(
            Arc::clone(&backend),
            settings.pipeline,
            &settings.shutdown,
        );

        info!(max_connections = settings.max_connections, "postgres storage connected");

        Ok(Self {
            urls: PgUrlStore {
                backend,
                buffer,
                pipeline,
            },
            users: PgUserStore { pool },
        })
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.users.pool
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.urls.pipeline.state()
    }
}

#[async_trait]
impl Storage for PgStorage {
    type Urls = PgUrlStore;
    type Users = PgUserStore;

    fn urls(&self) -> &PgUrlStore {
        &self.urls
    }

    fn users(&self) -> &PgUserStore {
        &self.users
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool().acquire().await.map_err(map_sqlx_error)?;
        conn.ping().await.map_err(map_sqlx_error)
    }

    async fn close(&self) -> Result<()> {
        let flushed = self.urls.buffer.flush().await;
        self.urls.pipeline.shutdown().await;
        self.pool().close().await;
        info!("postgres storage closed");
        flushed
    }
}
