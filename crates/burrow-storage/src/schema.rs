//! Storage-side record shapes and their conversion to the canonical model.
//!
//! [`StoredUrl`] is what the backends persist: its serde form is exactly one
//! journal line. Conversions in both directions run the same field checks, so
//! nothing invalid reaches a backend and nothing invalid leaves one.

use burrow_core::validation::validate_url;
use burrow_core::{ShortId, ShortUrl, User, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a backend treats records without an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserIdPolicy {
    /// Every record must name a user (relational backend).
    Required,
    /// Nil user ids are stored as anonymous records (file backend).
    AllowNil,
}

/// A url record as the backends store it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUrl {
    pub id: Uuid,
    #[serde(rename = "shortid")]
    pub short_id: String,
    pub url: String,
    #[serde(rename = "userid")]
    pub user_id: Uuid,
    #[serde(rename = "isdeleted")]
    pub is_deleted: bool,
}

impl StoredUrl {
    /// Converts a record about to be inserted. Tombstoned records are refused.
    pub fn from_canonical(
        record: &ShortUrl,
        policy: UserIdPolicy,
    ) -> Result<Self, ValidationError> {
        if record.is_deleted {
            return Err(ValidationError::AlreadyDeleted);
        }
        let stored = Self {
            id: record.id,
            short_id: record.short_id.as_str().to_owned(),
            url: record.url.clone(),
            user_id: record.user_id,
            is_deleted: record.is_deleted,
        };
        stored.validate(policy)?;
        Ok(stored)
    }

    pub fn to_canonical(self, policy: UserIdPolicy) -> Result<ShortUrl, ValidationError> {
        self.validate(policy)?;
        Ok(ShortUrl {
            id: self.id,
            short_id: ShortId::new_unchecked(self.short_id),
            url: self.url,
            user_id: self.user_id,
            is_deleted: self.is_deleted,
        })
    }

    /// Checks every field against the storage rules.
    pub fn validate(&self, policy: UserIdPolicy) -> Result<(), ValidationError> {
        if self.id.is_nil() {
            return Err(ValidationError::NilId);
        }
        if policy == UserIdPolicy::Required && self.user_id.is_nil() {
            return Err(ValidationError::NilUserId);
        }
        ShortId::validate(&self.short_id)?;
        validate_url(&self.url)
    }
}

/// A user as the backends store it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUser {
    pub id: Uuid,
}

impl StoredUser {
    pub fn from_canonical(user: &User) -> Result<Self, ValidationError> {
        if user.id.is_nil() {
            return Err(ValidationError::NilUserId);
        }
        Ok(Self { id: user.id })
    }

    pub fn to_canonical(self) -> Result<User, ValidationError> {
        if self.id.is_nil() {
            return Err(ValidationError::NilUserId);
        }
        Ok(User { id: self.id })
    }
}

/// Converts a batch, failing on the first invalid element.
pub fn encode_batch(
    records: &[ShortUrl],
    policy: UserIdPolicy,
) -> Result<Vec<StoredUrl>, ValidationError> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            StoredUrl::from_canonical(record, policy).map_err(|err| err.at_index(index))
        })
        .collect()
}

/// Converts a batch back, failing on the first invalid element.
pub fn decode_batch(
    records: Vec<StoredUrl>,
    policy: UserIdPolicy,
) -> Result<Vec<ShortUrl>, ValidationError> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| record.to_canonical(policy).map_err(|err| err.at_index(index)))
        .collect()
}
