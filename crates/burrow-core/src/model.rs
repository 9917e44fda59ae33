use crate::short_id::ShortId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A shortened url in its canonical, externally visible shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortUrl {
    /// Primary key, assigned at creation.
    pub id: Uuid,
    /// Public lookup key. Never reused, even after deletion.
    pub short_id: ShortId,
    /// The original url. Unique across stored records.
    pub url: String,
    /// Owning user, or [`Uuid::nil`] for anonymous records.
    pub user_id: Uuid,
    /// Tombstone flag. Only ever moves from `false` to `true`.
    pub is_deleted: bool,
}

impl ShortUrl {
    /// Creates a live (not deleted) record.
    pub fn new(id: Uuid, short_id: ShortId, url: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            id,
            short_id,
            url: url.into(),
            user_id,
            is_deleted: false,
        }
    }

    /// Returns `true` when the record has no owner.
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_nil()
    }
}

/// A user that owns shortened urls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
}

impl User {
    /// Creates a user with a fresh random id.
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl Default for User {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for User {
    fn from(id: Uuid) -> Self {
        Self { id }
    }
}
