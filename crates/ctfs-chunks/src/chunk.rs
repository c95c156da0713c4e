//! Fixed-size plaintext chunks
//!
//! A file of `s` bytes occupies `chunk_count(s)` chunks (never fewer than one:
//! an empty file is a single zero-length chunk). Chunk `i` holds plaintext
//! bytes `[i * MAX_CHUNK_SIZE, min(s, (i + 1) * MAX_CHUNK_SIZE))`; every
//! reader, writer and hash-tree path derives that length from
//! [`effective_chunk_length`] alone.
//!
//! Chunk map keys form a hash chain seeded by the file's first map key:
//! `key[i + 1] = sha256(stream_secret ‖ key[i])`. Without the secret the chain
//! is unguessable; with it any chunk's address is computable directly.
//!
//! Plaintext is zero-padded to a multiple of [`CHUNK_PADDING`] bytes before
//! encryption, so stored ciphertext reveals a chunk's length only to 4 KiB.
//! Decryption returns the padded plaintext; readers cut it back to the
//! effective length.

use ctfs_core::{CtfsError, CtfsResult, MapKey};
use ctfs_crypto::{
    decrypt_chunk, encrypt_chunk, padded_len, Nonce, SymmetricKey, CHUNK_PADDING, TAG_SIZE,
};

use crate::fragment::{Fragment, Fragmenter};
use crate::hash::sha256;

/// Maximum plaintext bytes in one chunk (5 MiB)
pub const MAX_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Number of chunks a file of `file_size` bytes occupies (minimum 1).
pub fn chunk_count(file_size: u64) -> u64 {
    if file_size == 0 {
        1
    } else {
        file_size.div_ceil(MAX_CHUNK_SIZE as u64)
    }
}

/// Plaintext length of chunk `index` in a file of `file_size` bytes.
///
/// Zero for the single chunk of an empty file and for indices past the end.
pub fn effective_chunk_length(file_size: u64, index: u64) -> usize {
    let start = index.saturating_mul(MAX_CHUNK_SIZE as u64);
    if start >= file_size {
        return 0;
    }
    (file_size - start).min(MAX_CHUNK_SIZE as u64) as usize
}

/// Map key of the chunk after the one at `current`.
pub fn next_map_key(stream_secret: &[u8], current: &MapKey) -> MapKey {
    let mut input = Vec::with_capacity(stream_secret.len() + 32);
    input.extend_from_slice(stream_secret);
    input.extend_from_slice(current.as_bytes());
    MapKey::new(sha256(&input))
}

/// Map key of the chunk containing byte `offset`.
pub fn map_key_at(stream_secret: &[u8], first: &MapKey, offset: u64) -> MapKey {
    let hops = offset / MAX_CHUNK_SIZE as u64;
    (0..hops).fold(*first, |key, _| next_map_key(stream_secret, &key))
}

/// One unit of plaintext plus the identity it is encrypted under.
pub struct Chunk {
    data: Vec<u8>,
    key: SymmetricKey,
    map_key: MapKey,
    nonce: Nonce,
}

impl Chunk {
    pub fn new(data: Vec<u8>, key: SymmetricKey, map_key: MapKey, nonce: Nonce) -> CtfsResult<Self> {
        if data.len() > MAX_CHUNK_SIZE {
            return Err(CtfsError::structural(format!(
                "chunk of {} bytes exceeds maximum {MAX_CHUNK_SIZE}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            key,
            map_key,
            nonce,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    pub fn map_key(&self) -> &MapKey {
        &self.map_key
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    pub fn encrypt(&self) -> CtfsResult<EncryptedChunk> {
        let len = padded_len(self.data.len(), CHUNK_PADDING);
        let mut padded = Vec::with_capacity(len);
        padded.extend_from_slice(&self.data);
        padded.resize(len, 0);
        let (cipher, auth) = encrypt_chunk(&self.key, &self.nonce, &padded)?;
        Ok(EncryptedChunk { auth, cipher })
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.data.len())
            .field("map_key", &self.map_key)
            .finish_non_exhaustive()
    }
}

/// Ciphertext of a chunk with its detached authentication tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedChunk {
    auth: [u8; TAG_SIZE],
    cipher: Vec<u8>,
}

impl EncryptedChunk {
    pub fn new(auth: [u8; TAG_SIZE], cipher: Vec<u8>) -> Self {
        Self { auth, cipher }
    }

    pub fn auth(&self) -> &[u8; TAG_SIZE] {
        &self.auth
    }

    pub fn cipher(&self) -> &[u8] {
        &self.cipher
    }

    /// The padded plaintext.
    pub fn decrypt(&self, key: &SymmetricKey, nonce: &Nonce) -> CtfsResult<Vec<u8>> {
        decrypt_chunk(key, nonce, &self.cipher, &self.auth)
    }

    pub fn generate_fragments(&self, fragmenter: &Fragmenter) -> Vec<Fragment> {
        fragmenter.split(&self.cipher)
    }

    /// Reassemble from stored fragments; `None` marks a share that was
    /// missing or failed its content-hash check.
    pub fn from_fragments(
        fragmenter: &Fragmenter,
        shares: Vec<Option<Fragment>>,
        auth: [u8; TAG_SIZE],
        cipher_len: usize,
    ) -> CtfsResult<Self> {
        let cipher = fragmenter.recombine(shares, cipher_len)?;
        Ok(Self { auth, cipher })
    }
}
