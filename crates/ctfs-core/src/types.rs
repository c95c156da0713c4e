//! Fixed-width identifiers shared by every layer.
//!
//! All of these are 32-byte values. `MapKey` addresses a node under a writer,
//! `PublicKeyHash` names an owner or writer, and `ContentHash` addresses an
//! immutable block.

use rand::RngCore;
use std::fmt;
use uuid::Uuid;

use crate::error::{CtfsError, CtfsResult};

pub const MAP_KEY_LENGTH: usize = 32;
pub const HASH_LENGTH: usize = 32;

/// Serialized size of a [`Location`]: owner ‖ writer ‖ map key.
pub const LOCATION_LENGTH: usize = HASH_LENGTH * 2 + MAP_KEY_LENGTH;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn try_from_slice(bytes: &[u8]) -> CtfsResult<Self> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| {
                    CtfsError::structural(format!(
                        "invalid {} length: {} (expected {})",
                        stringify!($name),
                        bytes.len(),
                        $len
                    ))
                })?;
                Ok(Self(arr))
            }

            pub fn random() -> Self {
                let mut bytes = [0u8; $len];
                rand::thread_rng().fill_bytes(&mut bytes);
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> CtfsResult<Self> {
                let bytes = hex::decode(s).map_err(|e| {
                    CtfsError::structural(format!("invalid {} hex: {e}", stringify!($name)))
                })?;
                Self::try_from_slice(&bytes)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}..)", stringify!($name), &self.to_hex()[..12])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }
    };
}

fixed_bytes!(
    /// Lookup key of a node within its writer's pointer space.
    MapKey,
    MAP_KEY_LENGTH
);

fixed_bytes!(
    /// Hash identifying an owner or writer signing identity.
    PublicKeyHash,
    HASH_LENGTH
);

fixed_bytes!(
    /// BLAKE3 digest of an immutable block.
    ContentHash,
    HASH_LENGTH
);

impl MapKey {
    /// Build a map key from a slice that is known to be 32 bytes long.
    ///
    /// # Panics
    /// If `bytes.len() != 32`. A wrong-length map key is a bug in the caller,
    /// never a property of user input; decoders use [`MapKey::try_from_slice`].
    pub fn from_slice(bytes: &[u8]) -> Self {
        assert_eq!(
            bytes.len(),
            MAP_KEY_LENGTH,
            "invalid map key length: {}",
            bytes.len()
        );
        let mut arr = [0u8; MAP_KEY_LENGTH];
        arr.copy_from_slice(bytes);
        Self(arr)
    }
}

/// Absolute address of a node: which owner, under which writer, at which key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub owner: PublicKeyHash,
    pub writer: PublicKeyHash,
    pub map_key: MapKey,
}

impl Location {
    pub fn new(owner: PublicKeyHash, writer: PublicKeyHash, map_key: MapKey) -> Self {
        Self {
            owner,
            writer,
            map_key,
        }
    }

    pub fn with_map_key(&self, map_key: MapKey) -> Self {
        Self { map_key, ..*self }
    }

    pub fn to_bytes(&self) -> [u8; LOCATION_LENGTH] {
        let mut out = [0u8; LOCATION_LENGTH];
        out[..32].copy_from_slice(self.owner.as_bytes());
        out[32..64].copy_from_slice(self.writer.as_bytes());
        out[64..].copy_from_slice(self.map_key.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> CtfsResult<Self> {
        if bytes.len() != LOCATION_LENGTH {
            return Err(CtfsError::structural(format!(
                "invalid location length: {} (expected {LOCATION_LENGTH})",
                bytes.len()
            )));
        }
        Ok(Self {
            owner: PublicKeyHash::try_from_slice(&bytes[..32])?,
            writer: PublicKeyHash::try_from_slice(&bytes[32..64])?,
            map_key: MapKey::try_from_slice(&bytes[64..])?,
        })
    }
}

/// Groups the block writes of one logical upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_bytes_roundtrip() {
        let loc = Location::new(
            PublicKeyHash::random(),
            PublicKeyHash::random(),
            MapKey::random(),
        );
        let back = Location::from_bytes(&loc.to_bytes()).unwrap();
        assert_eq!(loc, back);
    }

    #[test]
    fn test_location_rejects_short_input() {
        assert!(Location::from_bytes(&[0u8; 95]).is_err());
    }

    #[test]
    fn test_map_key_try_from_slice_rejects_wrong_length() {
        let err = MapKey::try_from_slice(&[0u8; 31]).unwrap_err();
        assert!(matches!(err, CtfsError::Structural(_)));
    }

    #[test]
    #[should_panic(expected = "invalid map key length")]
    fn test_map_key_from_slice_panics_on_wrong_length() {
        let _ = MapKey::from_slice(&[0u8; 33]);
    }

    #[test]
    fn test_with_map_key_keeps_owner_and_writer() {
        let loc = Location::new(
            PublicKeyHash::random(),
            PublicKeyHash::random(),
            MapKey::random(),
        );
        let moved = loc.with_map_key(MapKey::new([9u8; 32]));
        assert_eq!(moved.owner, loc.owner);
        assert_eq!(moved.writer, loc.writer);
        assert_eq!(moved.map_key, MapKey::new([9u8; 32]));
    }

    #[test]
    fn test_hex_round_trip() {
        let mut bytes = [0u8; 32];
        bytes[1] = 0xab;
        bytes[31] = 0xff;
        let hash = ContentHash::new(bytes);
        let hex = hash.to_hex();
        assert!(hex.starts_with("00ab"));
        assert!(hex.ends_with("ff"));
        assert_eq!(hex, hash.to_string());
        assert_eq!(ContentHash::from_hex(&hex).unwrap(), hash);
        assert!(ContentHash::from_hex("00ab").is_err());
        assert!(MapKey::from_hex("zz").is_err());
    }
}
