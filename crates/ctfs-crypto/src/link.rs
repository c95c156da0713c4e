//! Encrypted key-to-key and key-to-location links
//!
//! Both link types have a fixed serialized size, so they can be embedded in
//! node bodies without their own framing:
//!
//! ```text
//! SymmetricLink          = nonce(24) | E(from, target key)(34 + 16)             = 74 bytes
//! SymmetricLocationLink  = SymmetricLink | nonce(24) | E(from, location)(96 + 16) = 210 bytes
//! ```

use ctfs_core::types::LOCATION_LENGTH;
use ctfs_core::{CtfsError, CtfsResult, Location};

use crate::keys::{Nonce, SymmetricKey};
use crate::{NONCE_SIZE, SERIALIZED_KEY_SIZE, TAG_SIZE};

/// A target key encrypted under a source key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricLink {
    nonce: Nonce,
    cipher: Vec<u8>,
}

impl SymmetricLink {
    pub const SERIALIZED_SIZE: usize = NONCE_SIZE + SERIALIZED_KEY_SIZE + TAG_SIZE;

    /// Link `from` to `to`: anyone holding `from` can recover `to`.
    pub fn from_pair(from: &SymmetricKey, to: &SymmetricKey) -> CtfsResult<Self> {
        let nonce = from.create_nonce();
        let cipher = from.encrypt(&to.serialize(), &nonce)?;
        Ok(Self { nonce, cipher })
    }

    /// Recover the target key. Fails with a decryption error for the wrong `from`.
    pub fn target(&self, from: &SymmetricKey) -> CtfsResult<SymmetricKey> {
        let raw = from.decrypt(&self.cipher, &self.nonce)?;
        SymmetricKey::deserialize(&raw)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SERIALIZED_SIZE);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.cipher);
        out
    }

    pub fn from_bytes(raw: &[u8]) -> CtfsResult<Self> {
        if raw.len() != Self::SERIALIZED_SIZE {
            return Err(CtfsError::structural(format!(
                "symmetric link has wrong size: {} bytes (expected {})",
                raw.len(),
                Self::SERIALIZED_SIZE
            )));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&raw[..NONCE_SIZE]);
        Ok(Self {
            nonce,
            cipher: raw[NONCE_SIZE..].to_vec(),
        })
    }
}

impl std::fmt::Debug for SymmetricLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricLink").finish_non_exhaustive()
    }
}

/// A link to another node: its key and its location, both encrypted under
/// the source key. Used for parent back-references and directory overflow
/// continuations, so no node ever holds a plaintext pointer.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricLocationLink {
    link: SymmetricLink,
    location_nonce: Nonce,
    location_cipher: Vec<u8>,
}

impl SymmetricLocationLink {
    pub const SERIALIZED_SIZE: usize =
        SymmetricLink::SERIALIZED_SIZE + NONCE_SIZE + LOCATION_LENGTH + TAG_SIZE;

    pub fn create(
        from: &SymmetricKey,
        to: &SymmetricKey,
        location: &Location,
    ) -> CtfsResult<Self> {
        let link = SymmetricLink::from_pair(from, to)?;
        let location_nonce = from.create_nonce();
        let location_cipher = from.encrypt(&location.to_bytes(), &location_nonce)?;
        Ok(Self {
            link,
            location_nonce,
            location_cipher,
        })
    }

    pub fn target(&self, from: &SymmetricKey) -> CtfsResult<SymmetricKey> {
        self.link.target(from)
    }

    pub fn target_location(&self, from: &SymmetricKey) -> CtfsResult<Location> {
        let raw = from.decrypt(&self.location_cipher, &self.location_nonce)?;
        Location::from_bytes(&raw)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SERIALIZED_SIZE);
        out.extend_from_slice(&self.link.to_bytes());
        out.extend_from_slice(&self.location_nonce);
        out.extend_from_slice(&self.location_cipher);
        out
    }

    pub fn from_bytes(raw: &[u8]) -> CtfsResult<Self> {
        if raw.len() != Self::SERIALIZED_SIZE {
            return Err(CtfsError::structural(format!(
                "location link has wrong size: {} bytes (expected {})",
                raw.len(),
                Self::SERIALIZED_SIZE
            )));
        }
        let (link, rest) = raw.split_at(SymmetricLink::SERIALIZED_SIZE);
        let mut location_nonce = [0u8; NONCE_SIZE];
        location_nonce.copy_from_slice(&rest[..NONCE_SIZE]);
        Ok(Self {
            link: SymmetricLink::from_bytes(link)?,
            location_nonce,
            location_cipher: rest[NONCE_SIZE..].to_vec(),
        })
    }
}

impl std::fmt::Debug for SymmetricLocationLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricLocationLink").finish_non_exhaustive()
    }
}
