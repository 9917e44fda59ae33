pub mod sha256;

pub use sha256::Sha256Generator;

use burrow_core::{Result, ShortId, StorageError};
use std::collections::HashSet;
use std::future::Future;
use tracing::debug;
use uuid::Uuid;

/// Number of fresh salts tried after the first candidate collides.
pub const MAX_RETRIES: usize = 10;

/// Trait for deriving short ids.
///
/// Implementations are pure: they don't interact with storage and the same
/// `(url, salt)` pair always yields the same id. Uniqueness is handled by
/// [`generate_unique`].
pub trait Generator: Send + Sync + 'static {
    /// Derives a candidate short id for `url` salted with `salt`.
    fn generate(&self, url: &str, salt: &str) -> ShortId;
}

/// Generates a short id that `exists` reports as free.
///
/// The first candidate is salted with `seed` (callers pass the record id).
/// Each collision switches to a random salt, up to [`MAX_RETRIES`] times.
/// When `in_flight` is given, ids already handed out in the current batch
/// count as collisions too, and the accepted id is added to the set.
pub async fn generate_unique<G, F, Fut>(
    generator: &G,
    url: &str,
    seed: &str,
    mut in_flight: Option<&mut HashSet<ShortId>>,
    mut exists: F,
) -> Result<ShortId>
where
    G: Generator + ?Sized,
    F: FnMut(ShortId) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut salt = seed.to_owned();

    for attempt in 0..=MAX_RETRIES {
        let candidate = generator.generate(url, &salt);

        let pending = in_flight
            .as_deref()
            .is_some_and(|set| set.contains(&candidate));

        if !pending && !exists(candidate.clone()).await? {
            if let Some(set) = in_flight.as_deref_mut() {
                set.insert(candidate.clone());
            }
            return Ok(candidate);
        }

        debug!(attempt, candidate = %candidate, pending, "short id collision");
        salt = Uuid::new_v4().to_string();
    }

    Err(StorageError::GenerationExhausted {
        attempts: MAX_RETRIES + 1,
    })
}
