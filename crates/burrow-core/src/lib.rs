//! Core types and contracts for the Burrow link-shortening storage engine.
//!
//! This crate holds the canonical record shapes, the error taxonomy and the
//! repository traits every storage backend implements.

pub mod error;
pub mod model;
pub mod repository;
pub mod short_id;
pub mod validation;

pub use error::{Result, StorageError, ValidationError};
pub use model::{ShortUrl, User};
pub use repository::{Storage, UrlStore, UserStore};
pub use short_id::ShortId;
