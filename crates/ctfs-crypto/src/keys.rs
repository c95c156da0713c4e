//! Symmetric keys: generation, the dirty flag, and attached AEAD

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use ctfs_core::{CtfsError, CtfsResult};
use rand::RngCore;
use zeroize::Zeroize;

use crate::{KEY_SIZE, NONCE_SIZE, SERIALIZED_KEY_SIZE, TAG_SIZE};

/// Algorithm tag written in front of every serialized key.
const XCHACHA20_POLY1305: u8 = 0x01;

const LENGTH_PREFIX: usize = 4;

pub type Nonce = [u8; NONCE_SIZE];

/// `len` rounded up to a whole number of `block`-byte blocks.
///
/// Zero rounds up to one block, so an empty input is indistinguishable from a
/// short one.
pub fn padded_len(len: usize, block: usize) -> usize {
    let block = block.max(1);
    len.div_ceil(block).max(1) * block
}

/// Generate a fresh random nonce.
pub fn random_nonce() -> Nonce {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// A 256-bit XChaCha20-Poly1305 key. Zeroized on drop.
///
/// A key is *dirty* when a parent it was reachable from has been re-keyed:
/// the bytes are unchanged but anything encrypted under it should be
/// re-encrypted under a fresh key on its next write.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
    dirty: bool,
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self {
            bytes,
            dirty: false,
        }
    }

    /// Generate a random clean key.
    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Same key material, flagged dirty.
    pub fn make_dirty(&self) -> Self {
        Self {
            bytes: self.bytes,
            dirty: true,
        }
    }

    pub fn create_nonce(&self) -> Nonce {
        random_nonce()
    }

    pub(crate) fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new((&self.bytes).into())
    }

    /// Encrypt `plaintext`; output is `ciphertext ‖ 16-byte tag`.
    pub fn encrypt(&self, plaintext: &[u8], nonce: &Nonce) -> CtfsResult<Vec<u8>> {
        self.cipher()
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|e| CtfsError::structural(format!("encryption failed: {e}")))
    }

    /// Decrypt `ciphertext ‖ tag`. A wrong key or tampered input is a
    /// [`CtfsError::Decryption`], never garbage plaintext.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &Nonce) -> CtfsResult<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(CtfsError::structural(format!(
                "ciphertext too short: {} bytes (minimum {TAG_SIZE})",
                ciphertext.len()
            )));
        }
        self.cipher()
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CtfsError::decryption("invalid key or corrupted ciphertext"))
    }

    /// Encrypt with a fresh nonce and return `nonce ‖ ciphertext ‖ tag`.
    pub fn seal(&self, plaintext: &[u8]) -> CtfsResult<Vec<u8>> {
        let nonce = self.create_nonce();
        let cipher = self.encrypt(plaintext, &nonce)?;
        let mut out = Vec::with_capacity(NONCE_SIZE + cipher.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&cipher);
        Ok(out)
    }

    /// Inverse of [`SymmetricKey::seal`].
    pub fn open(&self, sealed: &[u8]) -> CtfsResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CtfsError::structural(format!(
                "sealed blob too short: {} bytes (minimum {})",
                sealed.len(),
                NONCE_SIZE + TAG_SIZE
            )));
        }
        let (nonce, cipher) = sealed.split_at(NONCE_SIZE);
        let mut n = [0u8; NONCE_SIZE];
        n.copy_from_slice(nonce);
        self.decrypt(cipher, &n)
    }

    /// [`SymmetricKey::seal`] with the plaintext length hidden: the sealed
    /// body is `u32 length ‖ plaintext ‖ zeros`, a multiple of `block` bytes.
    pub fn seal_padded(&self, plaintext: &[u8], block: usize) -> CtfsResult<Vec<u8>> {
        let len = u32::try_from(plaintext.len()).map_err(|_| {
            CtfsError::structural(format!("{} bytes is too large to seal", plaintext.len()))
        })?;
        let mut body = Vec::with_capacity(padded_len(LENGTH_PREFIX + plaintext.len(), block));
        body.extend_from_slice(&len.to_be_bytes());
        body.extend_from_slice(plaintext);
        body.resize(padded_len(body.len(), block), 0);
        self.seal(&body)
    }

    /// Inverse of [`SymmetricKey::seal_padded`].
    pub fn open_padded(&self, sealed: &[u8]) -> CtfsResult<Vec<u8>> {
        let mut body = self.open(sealed)?;
        if body.len() < LENGTH_PREFIX {
            return Err(CtfsError::structural(format!(
                "padded body of {} bytes has no length prefix",
                body.len()
            )));
        }
        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&body[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;
        if len > body.len() - LENGTH_PREFIX {
            return Err(CtfsError::structural(format!(
                "padded body claims {len} bytes but holds {}",
                body.len() - LENGTH_PREFIX
            )));
        }
        body.truncate(LENGTH_PREFIX + len);
        body.drain(..LENGTH_PREFIX);
        Ok(body)
    }

    pub fn serialize(&self) -> [u8; SERIALIZED_KEY_SIZE] {
        let mut out = [0u8; SERIALIZED_KEY_SIZE];
        out[0] = XCHACHA20_POLY1305;
        out[1] = u8::from(self.dirty);
        out[2..].copy_from_slice(&self.bytes);
        out
    }

    pub fn deserialize(raw: &[u8]) -> CtfsResult<Self> {
        if raw.len() != SERIALIZED_KEY_SIZE {
            return Err(CtfsError::structural(format!(
                "serialized key has wrong size: {} bytes (expected {SERIALIZED_KEY_SIZE})",
                raw.len()
            )));
        }
        if raw[0] != XCHACHA20_POLY1305 {
            return Err(CtfsError::structural(format!(
                "unknown symmetric key type: {:#04x}",
                raw[0]
            )));
        }
        let dirty = match raw[1] {
            0 => false,
            1 => true,
            other => {
                return Err(CtfsError::structural(format!(
                    "invalid dirty flag: {other}"
                )))
            }
        };
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&raw[2..]);
        Ok(Self { bytes, dirty })
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .field("dirty", &self.dirty)
            .finish()
    }
}
