use crate::error::Result;
use crate::model::{ShortUrl, User};
use crate::short_id::ShortId;
use async_trait::async_trait;
use uuid::Uuid;

/// Url operations every storage backend provides.
#[async_trait]
pub trait UrlStore: Send + Sync + 'static {
    /// Retrieves the record for a given short id, deleted or not.
    /// Returns `None` if the short id does not exist.
    async fn get_url(&self, short_id: &ShortId) -> Result<Option<ShortUrl>>;

    /// Retrieves the record that stores `url`, if any.
    async fn get_short_url_by_src_url(&self, url: &str) -> Result<Option<ShortUrl>>;

    /// Lists at most `limit` records owned by `user_id`.
    /// A user without records gets an empty list.
    async fn get_user_url_list(&self, user_id: Uuid, limit: usize) -> Result<Vec<ShortUrl>>;

    /// Inserts a new record and returns it.
    ///
    /// Returns `Err(Conflict)` carrying the existing short id if the url is
    /// already stored.
    async fn save_url(&self, record: ShortUrl) -> Result<ShortUrl>;

    /// Checks whether a short id has ever been stored (tombstones included).
    async fn exist(&self, short_id: &ShortId) -> Result<bool>;

    /// Checks whether a source url is already stored.
    async fn exist_src_url(&self, url: &str) -> Result<bool>;

    /// Stages a record for a batched insert. A full buffer flushes implicitly.
    async fn save_url_buff(&self, record: ShortUrl) -> Result<()>;

    /// Writes every staged record as one all-or-nothing batch.
    async fn save_url_buff_flush(&self) -> Result<()>;

    /// Queues the short ids for soft deletion and returns without waiting.
    ///
    /// Ownership is checked when the batch is applied; ids not owned by
    /// `user_id` are left untouched.
    async fn delete_url_batch(&self, user_id: Uuid, short_ids: Vec<ShortId>) -> Result<()>;

    /// Counts stored records that are not deleted.
    async fn count(&self) -> Result<usize>;
}

/// User operations every storage backend provides.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Stores the user. Adding an existing user is not an error.
    async fn add_user(&self, user: User) -> Result<User>;

    /// Checks whether the user is stored.
    async fn exists(&self, user_id: Uuid) -> Result<bool>;

    /// Counts stored users.
    async fn count(&self) -> Result<usize>;
}

/// A complete storage backend.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    type Urls: UrlStore;
    type Users: UserStore;

    /// Returns the url repository.
    fn urls(&self) -> &Self::Urls;

    /// Returns the user repository.
    fn users(&self) -> &Self::Users;

    /// Checks the connection to the backing database.
    async fn ping(&self) -> Result<()>;

    /// Stops accepting deletions, drains the ones already queued and releases
    /// the backend. Reads keep working until the value is dropped.
    async fn close(&self) -> Result<()>;
}
