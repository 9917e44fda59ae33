//! Storage backends for the Burrow link-shortening engine.
//!
//! Two backends implement [`burrow_core::Storage`]:
//!
//! - [`FileStorage`]: an indexed in-memory table, optionally journaled to a
//!   JSON-lines file and replayed on open.
//! - [`PgStorage`]: PostgreSQL through sqlx.
//!
//! Both share the [`InsertBuffer`] for batched inserts and the
//! [`DeletePipeline`] for asynchronous soft deletes. [`Repository`] sits on
//! top and adds short id generation.

pub mod buffer;
pub mod cache;
pub mod file;
pub mod journal;
pub mod pipeline;
pub mod postgres;
pub mod repository;
pub mod schema;
pub mod settings;

pub use buffer::{BatchWriter, InsertBuffer};
pub use cache::IndexedCache;
pub use file::{FileStorage, FileUrlStore, FileUserStore};
pub use journal::Journal;
pub use pipeline::{
    DeleteApplier, DeletePipeline, DeleteRequest, FlushFailureHandler, PipelineState,
};
pub use postgres::{PgStorage, PgUrlStore, PgUserStore};
pub use repository::Repository;
pub use schema::{StoredUrl, StoredUser, UserIdPolicy};
pub use settings::{FileStorageSettings, PgStorageSettings, PipelineSettings};

pub use burrow_core::{
    Result, ShortId, ShortUrl, Storage, StorageError, UrlStore, User, UserStore, ValidationError,
};
