//! Per-chunk XChaCha20-Poly1305 with a detached tag
//!
//! A chunk's ciphertext is fragmented and stored as content-addressed blocks,
//! while its 16-byte Poly1305 tag and 24-byte nonce live in the cryptree node
//! that points at those blocks:
//!
//! ```text
//! blocks:  [ciphertext fragments ...]          (same length as plaintext)
//! node:    nonce (24) | auth tag (16) | fragment hashes | next map key
//! ```

use chacha20poly1305::{aead::AeadInPlace, Tag, XNonce};
use ctfs_core::{CtfsError, CtfsResult};

use crate::keys::{Nonce, SymmetricKey};
use crate::TAG_SIZE;

/// Encrypt a chunk, returning `(ciphertext, tag)`.
///
/// The ciphertext has exactly the plaintext's length.
pub fn encrypt_chunk(
    key: &SymmetricKey,
    nonce: &Nonce,
    plaintext: &[u8],
) -> CtfsResult<(Vec<u8>, [u8; TAG_SIZE])> {
    let mut buffer = plaintext.to_vec();
    let tag = key
        .cipher()
        .encrypt_in_place_detached(XNonce::from_slice(nonce), b"", &mut buffer)
        .map_err(|e| CtfsError::structural(format!("chunk encryption failed: {e}")))?;

    let mut auth = [0u8; TAG_SIZE];
    auth.copy_from_slice(&tag);
    Ok((buffer, auth))
}

/// Decrypt a chunk from its ciphertext and detached tag.
pub fn decrypt_chunk(
    key: &SymmetricKey,
    nonce: &Nonce,
    ciphertext: &[u8],
    auth: &[u8; TAG_SIZE],
) -> CtfsResult<Vec<u8>> {
    let mut buffer = ciphertext.to_vec();
    key.cipher()
        .decrypt_in_place_detached(
            XNonce::from_slice(nonce),
            b"",
            &mut buffer,
            Tag::from_slice(auth),
        )
        .map_err(|_| {
            CtfsError::decryption("chunk decryption failed: invalid key or corrupted data")
        })?;
    Ok(buffer)
}
