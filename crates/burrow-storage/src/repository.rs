use burrow_core::validation::validate_url;
use burrow_core::{Result, ShortId, ShortUrl, Storage, UrlStore, User, UserStore};
use burrow_generator::{generate_unique, Generator, Sha256Generator};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Uniform entry point over any storage backend.
///
/// The repository owns short id generation: new records get a fresh id, and
/// their short id is derived from the url salted with that id, retrying on
/// collisions. Everything else is delegated to the backend.
#[derive(Debug)]
pub struct Repository<S, G = Sha256Generator> {
    storage: S,
    generator: G,
}

impl<S: Storage> Repository<S> {
    pub fn new(storage: S) -> Self {
        Self::with_generator(storage, Sha256Generator)
    }
}

impl<S: Storage, G: Generator> Repository<S, G> {
    pub fn with_generator(storage: S, generator: G) -> Self {
        Self { storage, generator }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Shortens `url` for `user_id` and returns the new short id.
    ///
    /// A url that is already stored yields `Err(Conflict)` carrying the short
    /// id it was stored under.
    pub async fn save_url(&self, url: &str, user_id: Uuid) -> Result<ShortId> {
        validate_url(url)?;

        let urls = self.storage.urls();
        let id = Uuid::new_v4();
        let short_id = generate_unique(&self.generator, url, &id.to_string(), None, |candidate| {
            async move { urls.exist(&candidate).await }
        })
        .await?;

        let saved = urls
            .save_url(ShortUrl::new(id, short_id, url, user_id))
            .await?;

        info!(short_id = %saved.short_id, user_id = %user_id, "url shortened");
        Ok(saved.short_id)
    }

    /// Shortens several urls through the insert buffer.
    ///
    /// Every url is validated and given a short id before anything is
    /// staged. Short ids handed out earlier in the same call count as taken,
    /// so the batch never collides with itself.
    pub async fn save_url_list(
        &self,
        src_urls: Vec<String>,
        user_id: Uuid,
    ) -> Result<Vec<ShortUrl>> {
        for (index, url) in src_urls.iter().enumerate() {
            validate_url(url).map_err(|err| err.at_index(index))?;
        }

        let urls = self.storage.urls();
        let mut in_flight = HashSet::with_capacity(src_urls.len());
        let mut records = Vec::with_capacity(src_urls.len());

        for url in src_urls {
            let id = Uuid::new_v4();
            let short_id = generate_unique(
                &self.generator,
                &url,
                &id.to_string(),
                Some(&mut in_flight),
                |candidate| async move { urls.exist(&candidate).await },
            )
            .await?;
            records.push(ShortUrl::new(id, short_id, url, user_id));
        }

        for record in &records {
            urls.save_url_buff(record.clone()).await?;
        }
        urls.save_url_buff_flush().await?;

        info!(count = records.len(), user_id = %user_id, "url batch shortened");
        Ok(records)
    }

    pub async fn get_url(&self, short_id: &ShortId) -> Result<Option<ShortUrl>> {
        self.storage.urls().get_url(short_id).await
    }

    pub async fn get_short_url_by_src_url(&self, url: &str) -> Result<Option<ShortUrl>> {
        self.storage.urls().get_short_url_by_src_url(url).await
    }

    pub async fn get_user_url_list(&self, user_id: Uuid, limit: usize) -> Result<Vec<ShortUrl>> {
        self.storage.urls().get_user_url_list(user_id, limit).await
    }

    /// Stages a prepared record. See [`UrlStore::save_url_buff`].
    pub async fn save_url_buff(&self, record: ShortUrl) -> Result<()> {
        self.storage.urls().save_url_buff(record).await
    }

    pub async fn save_url_buff_flush(&self) -> Result<()> {
        self.storage.urls().save_url_buff_flush().await
    }

    /// Queues soft deletion of `short_ids` owned by `user_id`. Returns before
    /// the deletion is applied.
    pub async fn delete_url_batch(&self, user_id: Uuid, short_ids: Vec<ShortId>) -> Result<()> {
        debug!(user_id = %user_id, count = short_ids.len(), "queueing deletions");
        self.storage.urls().delete_url_batch(user_id, short_ids).await
    }

    pub async fn exist(&self, short_id: &ShortId) -> Result<bool> {
        self.storage.urls().exist(short_id).await
    }

    pub async fn exist_src_url(&self, url: &str) -> Result<bool> {
        self.storage.urls().exist_src_url(url).await
    }

    pub async fn add_user(&self, user: User) -> Result<User> {
        self.storage.users().add_user(user).await
    }

    /// Creates and stores a user with a fresh random id.
    pub async fn new_user(&self) -> Result<User> {
        self.add_user(User::new()).await
    }

    pub async fn user_exists(&self, user_id: Uuid) -> Result<bool> {
        self.storage.users().exists(user_id).await
    }

    /// Number of urls that are not deleted.
    pub async fn url_count(&self) -> Result<usize> {
        self.storage.urls().count().await
    }

    pub async fn user_count(&self) -> Result<usize> {
        self.storage.users().count().await
    }

    pub async fn ping(&self) -> Result<()> {
        self.storage.ping().await
    }

    /// Drains pending work and closes the backend.
    pub async fn close(&self) -> Result<()> {
        self.storage.close().await
    }
}
