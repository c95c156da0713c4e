//! ctfs-chunks: the path between plaintext file bytes and stored fragments
//!
//! # Overview
//! - `chunk`: 5 MiB plaintext chunks, their encryption, chunk-count and
//!   effective-length arithmetic, and stream-secret map-key derivation
//! - `fragment`: split an encrypted chunk into stored fragments (plain split
//!   or Reed-Solomon erasure shares) and recombine them
//! - `erasure`: systematic Reed-Solomon over GF(2^8)
//! - `hashtree`: three-level, fan-out-1024 tree over per-chunk SHA-256 hashes
//! - `hash`: BLAKE3 content addressing and SHA-256 helpers

pub mod chunk;
pub mod erasure;
pub mod fragment;
pub mod hash;
pub mod hashtree;

pub use chunk::{
    chunk_count, effective_chunk_length, map_key_at, next_map_key, Chunk, EncryptedChunk,
    MAX_CHUNK_SIZE,
};
pub use fragment::{Fragment, Fragmenter, MAX_FRAGMENT_SIZE};
pub use hash::{content_hash, sha256};
pub use hashtree::{ChunkHashList, HashBranch, HashTree, HashTreeBuilder};
