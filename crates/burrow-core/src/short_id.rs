use crate::error::ValidationError;
use crate::validation::is_rfc3986;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A short public identifier mapping to a stored url.
///
/// Short ids are 1-16 characters long and contain only RFC 3986 characters,
/// so they can be used directly as a url path segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortId(String);

/// Maximum length of a short id.
pub const MAX_LENGTH: usize = 16;

impl ShortId {
    /// Creates a new `ShortId` after validating the input.
    pub fn new(id: impl Into<String>) -> std::result::Result<Self, ValidationError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Creates a `ShortId` without validation.
    ///
    /// Use this only for ids produced by trusted internal sources
    /// (e.g. the generator, whose alphabet is a subset of RFC 3986).
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates the full shortened URL based on the provided base URL.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self)
    }

    /// Returns the short id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks the length and character-set rules without constructing a value.
    pub fn validate(id: &str) -> std::result::Result<(), ValidationError> {
        if id.is_empty() || id.len() > MAX_LENGTH {
            return Err(ValidationError::InvalidShortId(format!(
                "length must be between 1 and {}, got {}",
                MAX_LENGTH,
                id.len()
            )));
        }

        if !is_rfc3986(id) {
            return Err(ValidationError::InvalidShortId(format!(
                "must contain only RFC 3986 characters: '{}'",
                id
            )));
        }

        Ok(())
    }
}

impl Display for ShortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ShortId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ShortId> for String {
    fn from(id: ShortId) -> Self {
        id.0
    }
}
