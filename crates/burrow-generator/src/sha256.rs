use crate::Generator;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use burrow_core::ShortId;
use sha2::{Digest, Sha256};

/// Number of encoded characters kept from the digest.
pub const SHORT_ID_LENGTH: usize = 8;

/// Derives short ids from `SHA-256(url || salt)`.
///
/// The digest is encoded with standard padded base64 and truncated to
/// [`SHORT_ID_LENGTH`] characters. `/` is replaced by `+` so the id never
/// introduces a path separator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Generator;

impl Generator for Sha256Generator {
    fn generate(&self, url: &str, salt: &str) -> ShortId {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(salt.as_bytes());
        let encoded = STANDARD.encode(hasher.finalize());
        ShortId::new_unchecked(encoded[..SHORT_ID_LENGTH].replace('/', "+"))
    }
}
