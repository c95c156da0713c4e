//! Content addressing (BLAKE3) and chunk hashing (SHA-256)

use ctfs_core::ContentHash;
use sha2::{Digest, Sha256};

/// Address of a stored block: the BLAKE3 hash of its bytes.
pub fn content_hash(data: &[u8]) -> ContentHash {
    ContentHash::new(*blake3::hash(data).as_bytes())
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
