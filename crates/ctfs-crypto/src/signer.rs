//! Writer identities: the secret that authorizes commits under a writer hash

use ctfs_core::{CtfsError, CtfsResult, PublicKeyHash};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::keys::SymmetricKey;
use crate::KEY_SIZE;

/// Secret held by a writer. Its public identity is `sha256(secret)`, which
/// is what locations name as `writer` and what pointer stores check before
/// accepting a compare-and-swap.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningIdentity {
    secret: [u8; KEY_SIZE],
}

impl SigningIdentity {
    pub fn generate() -> Self {
        let mut secret = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut secret);
        Self { secret }
    }

    pub fn from_secret(secret: [u8; KEY_SIZE]) -> Self {
        Self { secret }
    }

    pub fn public_key_hash(&self) -> PublicKeyHash {
        PublicKeyHash::new(Sha256::digest(self.secret).into())
    }

    /// True when this identity may commit under `writer`.
    pub fn authorizes(&self, writer: &PublicKeyHash) -> bool {
        self.public_key_hash() == *writer
    }

    /// Encrypt this identity under a write base key (a node's writer link).
    pub fn seal_under(&self, write_key: &SymmetricKey) -> CtfsResult<Vec<u8>> {
        write_key.seal(&self.secret)
    }

    /// Recover an identity from a writer link.
    pub fn open_from(sealed: &[u8], write_key: &SymmetricKey) -> CtfsResult<Self> {
        let mut raw = write_key.open(sealed)?;
        let secret: Result<[u8; KEY_SIZE], _> = raw.as_slice().try_into();
        raw.zeroize();
        secret
            .map(Self::from_secret)
            .map_err(|_| CtfsError::structural("writer link does not hold a 32-byte secret"))
    }
}

impl Drop for SigningIdentity {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("public", &self.public_key_hash())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_hash_is_deterministic() {
        let id = SigningIdentity::from_secret([7u8; KEY_SIZE]);
        assert_eq!(id.public_key_hash(), id.clone().public_key_hash());
        assert!(id.authorizes(&id.public_key_hash()));
    }

    #[test]
    fn test_other_identity_not_authorized() {
        let a = SigningIdentity::generate();
        let b = SigningIdentity::generate();
        assert!(!a.authorizes(&b.public_key_hash()));
    }

    #[test]
    fn test_writer_link_roundtrip() {
        let id = SigningIdentity::generate();
        let write_key = SymmetricKey::random();
        let sealed = id.seal_under(&write_key).unwrap();
        assert_eq!(SigningIdentity::open_from(&sealed, &write_key).unwrap(), id);
    }

    #[test]
    fn test_writer_link_needs_write_key() {
        let id = SigningIdentity::generate();
        let sealed = id.seal_under(&SymmetricKey::random()).unwrap();
        let err = SigningIdentity::open_from(&sealed, &SymmetricKey::random()).unwrap_err();
        assert!(err.is_auth_failure());
    }
}
