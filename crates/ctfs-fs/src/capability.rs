//! Capabilities: the keys and location that grant access to a node
//!
//! An [`AbsoluteCapability`] names a node completely. A [`RelativeCapability`]
//! is what a directory stores for each child: owner and (usually) writer are
//! inherited from the directory, and the child's write key is reachable only
//! through a link from the directory's write key.
//!
//! Link form, every field base58:
//!
//! ```text
//! #owner/writer/mapKey/readKey[/writeKey]
//! ```

use bytes::BufMut;
use ctfs_core::codec::{put_presence, Decoder};
use ctfs_core::{CtfsError, CtfsResult, Location, MapKey, PublicKeyHash};
use ctfs_crypto::{base58, SymmetricKey, SymmetricLink, SERIALIZED_KEY_SIZE};

#[derive(Clone, PartialEq, Eq)]
pub struct AbsoluteCapability {
    pub owner: PublicKeyHash,
    pub writer: PublicKeyHash,
    pub map_key: MapKey,
    pub r_base_key: SymmetricKey,
    pub w_base_key: Option<SymmetricKey>,
}

impl AbsoluteCapability {
    pub fn new(
        owner: PublicKeyHash,
        writer: PublicKeyHash,
        map_key: MapKey,
        r_base_key: SymmetricKey,
        w_base_key: Option<SymmetricKey>,
    ) -> Self {
        Self {
            owner,
            writer,
            map_key,
            r_base_key,
            w_base_key,
        }
    }

    pub fn location(&self) -> Location {
        Location::new(self.owner, self.writer, self.map_key)
    }

    pub fn is_writable(&self) -> bool {
        self.w_base_key.is_some()
    }

    /// The write base key, or [`CtfsError::NotWritable`].
    pub fn require_writable(&self) -> CtfsResult<&SymmetricKey> {
        self.w_base_key.as_ref().ok_or_else(|| {
            CtfsError::NotWritable(format!("capability for {} is read-only", self.map_key))
        })
    }

    pub fn read_only(&self) -> Self {
        Self {
            w_base_key: None,
            ..self.clone()
        }
    }

    pub fn with_base_key(&self, r_base_key: SymmetricKey) -> Self {
        Self {
            r_base_key,
            ..self.clone()
        }
    }

    pub fn with_map_key(&self, map_key: MapKey) -> Self {
        Self {
            map_key,
            ..self.clone()
        }
    }

    /// Encode `descendant` relative to this capability.
    ///
    /// The writer is omitted when both share it. The descendant's write key
    /// is linked from ours, so a read-only ancestor can only produce
    /// read-only relative capabilities.
    pub fn relativise(&self, descendant: &AbsoluteCapability) -> CtfsResult<RelativeCapability> {
        if self.owner != descendant.owner {
            return Err(CtfsError::structural(
                "capabilities with different owners cannot be relativised",
            ));
        }
        let writer = (self.writer != descendant.writer).then_some(descendant.writer);
        let w_link = match (&self.w_base_key, &descendant.w_base_key) {
            (Some(ours), Some(theirs)) => Some(SymmetricLink::from_pair(ours, theirs)?),
            _ => None,
        };
        Ok(RelativeCapability {
            writer,
            map_key: descendant.map_key,
            r_base_key: descendant.r_base_key.clone(),
            w_link,
        })
    }

    pub fn to_link(&self) -> String {
        let mut parts = vec![
            base58::encode(self.owner.as_bytes()),
            base58::encode(self.writer.as_bytes()),
            base58::encode(self.map_key.as_bytes()),
            base58::encode(&self.r_base_key.serialize()),
        ];
        if let Some(w) = &self.w_base_key {
            parts.push(base58::encode(&w.serialize()));
        }
        format!("#{}", parts.join("/"))
    }

    /// Parse `#owner/writer/mapKey/baseKey[/writeKey]`.
    ///
    /// A map key carrying a block access token (`mapKey+bat`) is a
    /// structural error.
    pub fn from_link(link: &str) -> CtfsResult<Self> {
        let body = link.strip_prefix('#').unwrap_or(link);
        let parts: Vec<&str> = body.split('/').collect();
        if parts.len() != 4 && parts.len() != 5 {
            return Err(CtfsError::structural(format!(
                "capability link has {} fields, expected 4 or 5",
                parts.len()
            )));
        }
        let owner = PublicKeyHash::try_from_slice(&base58::decode(parts[0])?)?;
        let writer = PublicKeyHash::try_from_slice(&base58::decode(parts[1])?)?;
        if let Some((_, bat)) = parts[2].split_once('+') {
            return Err(CtfsError::structural(format!(
                "capability link carries a block access token ({} chars), which is not supported",
                bat.len()
            )));
        }
        let map_key = MapKey::try_from_slice(&base58::decode(parts[2])?)?;
        let r_base_key = SymmetricKey::deserialize(&base58::decode(parts[3])?)?;
        let w_base_key = parts
            .get(4)
            .map(|w| base58::decode(w).and_then(|raw| SymmetricKey::deserialize(&raw)))
            .transpose()?;
        Ok(Self::new(owner, writer, map_key, r_base_key, w_base_key))
    }
}

impl std::fmt::Debug for AbsoluteCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbsoluteCapability")
            .field("owner", &self.owner)
            .field("writer", &self.writer)
            .field("map_key", &self.map_key)
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// A child capability as stored inside its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeCapability {
    /// Present only when the child is written under a different writer.
    pub writer: Option<PublicKeyHash>,
    pub map_key: MapKey,
    pub r_base_key: SymmetricKey,
    /// From the directory's write key to the child's.
    pub w_link: Option<SymmetricLink>,
}

impl RelativeCapability {
    pub fn location(&self, owner: PublicKeyHash, writer: PublicKeyHash) -> Location {
        Location::new(owner, self.writer.unwrap_or(writer), self.map_key)
    }

    pub fn is_writable(&self) -> bool {
        self.w_link.is_some()
    }

    pub fn read_only(&self) -> Self {
        Self {
            w_link: None,
            ..self.clone()
        }
    }

    pub fn with_base_key(&self, r_base_key: SymmetricKey) -> Self {
        Self {
            r_base_key,
            ..self.clone()
        }
    }

    /// Resolve against the capability this was relativised from.
    pub fn to_absolute(&self, source: &AbsoluteCapability) -> CtfsResult<AbsoluteCapability> {
        let w_base_key = match (&self.w_link, &source.w_base_key) {
            (Some(link), Some(source_w)) => Some(link.target(source_w)?),
            _ => None,
        };
        Ok(AbsoluteCapability::new(
            source.owner,
            self.writer.unwrap_or(source.writer),
            self.map_key,
            self.r_base_key.clone(),
            w_base_key,
        ))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_presence(&mut buf, self.writer.is_some());
        if let Some(w) = &self.writer {
            buf.put_slice(w.as_bytes());
        }
        buf.put_slice(self.map_key.as_bytes());
        buf.put_slice(&self.r_base_key.serialize());
        put_presence(&mut buf, self.w_link.is_some());
        if let Some(link) = &self.w_link {
            buf.put_slice(&link.to_bytes());
        }
        buf
    }

    pub fn deserialize(raw: &[u8]) -> CtfsResult<Self> {
        let mut d = Decoder::new(raw);
        let writer = d.read_option("writer", |d| {
            PublicKeyHash::try_from_slice(d.read_slice(32, "writer")?)
        })?;
        let map_key = MapKey::new(d.read_array("map key")?);
        let r_base_key =
            SymmetricKey::deserialize(d.read_slice(SERIALIZED_KEY_SIZE, "read base key")?)?;
        let w_link = d.read_option("write link", |d| {
            SymmetricLink::from_bytes(d.read_slice(SymmetricLink::SERIALIZED_SIZE, "write link")?)
        })?;
        d.finish("relative capability")?;
        Ok(Self {
            writer,
            map_key,
            r_base_key,
            w_link,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writable() -> AbsoluteCapability {
        AbsoluteCapability::new(
            PublicKeyHash::random(),
            PublicKeyHash::random(),
            MapKey::random(),
            SymmetricKey::random(),
            Some(SymmetricKey::random()),
        )
    }

    fn child_of(parent: &AbsoluteCapability, writable: bool) -> AbsoluteCapability {
        AbsoluteCapability::new(
            parent.owner,
            parent.writer,
            MapKey::random(),
            SymmetricKey::random(),
            writable.then(SymmetricKey::random),
        )
    }

    #[test]
    fn test_relativise_inverse_writable() {
        let parent = writable();
        let child = child_of(&parent, true);
        let rel = parent.relativise(&child).unwrap();
        assert!(rel.writer.is_none());
        assert_eq!(rel.to_absolute(&parent).unwrap(), child);
    }

    #[test]
    fn test_relativise_inverse_read_only() {
        let parent = writable();
        let child = child_of(&parent, false);
        let rel = parent.relativise(&child).unwrap();
        assert!(!rel.is_writable());
        assert_eq!(rel.to_absolute(&parent).unwrap(), child);
    }

    #[test]
    fn test_relativise_keeps_foreign_writer() {
        let parent = writable();
        let mut child = child_of(&parent, true);
        child.writer = PublicKeyHash::random();
        let rel = parent.relativise(&child).unwrap();
        assert_eq!(rel.writer, Some(child.writer));
        assert_eq!(rel.to_absolute(&parent).unwrap(), child);
    }

    #[test]
    fn test_read_only_parent_yields_read_only_child() {
        let parent = writable();
        let child = child_of(&parent, true);
        let rel = parent.read_only().relativise(&child).unwrap();
        assert_eq!(
            rel.to_absolute(&parent).unwrap(),
            child.read_only(),
            "write access must not leak through a read-only ancestor"
        );
    }

    #[test]
    fn test_relativise_rejects_other_owner() {
        let parent = writable();
        let stranger = writable();
        assert!(matches!(
            parent.relativise(&stranger),
            Err(CtfsError::Structural(_))
        ));
    }

    #[test]
    fn test_write_link_needs_parent_write_key() {
        let parent = writable();
        let child = child_of(&parent, true);
        let rel = parent.relativise(&child).unwrap();
        // Resolving against the read-only view drops the write key.
        assert!(!rel.to_absolute(&parent.read_only()).unwrap().is_writable());
    }

    #[test]
    fn test_link_roundtrip() {
        let cap = writable();
        let link = cap.to_link();
        assert!(link.starts_with('#'));
        assert_eq!(link.split('/').count(), 5);
        assert_eq!(AbsoluteCapability::from_link(&link).unwrap(), cap);

        let ro = cap.read_only();
        assert_eq!(ro.to_link().split('/').count(), 4);
        assert_eq!(AbsoluteCapability::from_link(&ro.to_link()).unwrap(), ro);
    }

    #[test]
    fn test_link_rejects_short_map_key() {
        let cap = writable();
        let mut parts: Vec<String> = cap
            .to_link()
            .trim_start_matches('#')
            .split('/')
            .map(String::from)
            .collect();
        parts[2] = base58::encode(&[1u8; 31]);
        let err = AbsoluteCapability::from_link(&parts.join("/")).unwrap_err();
        assert!(matches!(err, CtfsError::Structural(_)));
    }

    #[test]
    fn test_link_rejects_block_access_token() {
        let cap = writable().read_only();
        let mut parts: Vec<String> = cap.to_link().split('/').map(String::from).collect();
        parts[2] = format!("{}+{}", parts[2], base58::encode(&[9u8; 32]));
        let err = AbsoluteCapability::from_link(&parts.join("/")).unwrap_err();
        assert!(matches!(&err, CtfsError::Structural(msg) if msg.contains("block access token")));

        parts[2] = format!("{}+", base58::encode(cap.map_key.as_bytes()));
        assert!(AbsoluteCapability::from_link(&parts.join("/")).is_err());
    }

    #[test]
    fn test_link_rejects_wrong_field_count() {
        assert!(AbsoluteCapability::from_link("#a/b/c").is_err());
    }

    #[test]
    fn test_relative_serialize_roundtrip() {
        let parent = writable();
        let mut child = child_of(&parent, true);
        child.writer = PublicKeyHash::random();
        let rel = parent.relativise(&child).unwrap();
        let back = RelativeCapability::deserialize(&rel.serialize()).unwrap();
        assert_eq!(back, rel);

        let ro = rel.read_only();
        assert_eq!(RelativeCapability::deserialize(&ro.serialize()).unwrap(), ro);
    }

    #[test]
    fn test_with_map_key_and_base_key() {
        let cap = writable();
        let key = MapKey::random();
        assert_eq!(cap.with_map_key(key).location().map_key, key);
        let base = SymmetricKey::random();
        assert_eq!(cap.with_base_key(base.clone()).r_base_key, base);
        assert!(cap.require_writable().is_ok());
        assert!(matches!(
            cap.read_only().require_writable(),
            Err(CtfsError::NotWritable(_))
        ));
    }
}
