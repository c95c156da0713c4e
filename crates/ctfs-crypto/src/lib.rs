//! ctfs-crypto: symmetric key material for the cryptree
//!
//! Every node is encrypted with XChaCha20-Poly1305 under keys that are only
//! reachable through links from the key a capability carries:
//!
//! ```text
//! capability base key
//!   ├── parent-to-meta link ──► meta key   (decrypts FileProperties)
//!   ├── parent-to-data link ──► data key   (decrypts chunk ciphertext)
//!   └── (directories) subfolders key
//!         ├── subfolders-to-files link ──► files key  (file child links)
//!         └── subfolders-to-parent link ─► parent key
//! write base key ──► writer link ──► signing identity
//! ```
//!
//! No key is ever stored in the clear; a link is the target key's serialized
//! bytes encrypted under the source key with a fresh 24-byte nonce.

pub mod base58;
pub mod chunk;
pub mod keys;
pub mod link;
pub mod signer;

pub use chunk::{decrypt_chunk, encrypt_chunk};
pub use keys::{padded_len, random_nonce, Nonce, SymmetricKey};
pub use link::{SymmetricLink, SymmetricLocationLink};
pub use signer::SigningIdentity;

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Serialized key: algorithm byte, dirty flag, key bytes
pub const SERIALIZED_KEY_SIZE: usize = 2 + KEY_SIZE;

/// Block size sealed file and directory properties are padded to
pub const METADATA_PADDING: usize = 16;

/// Block size sealed child links are padded to
pub const LINK_PADDING: usize = 64;

/// Block size chunk plaintext is padded to before encryption
pub const CHUNK_PADDING: usize = 4096;
