use bytes::BufMut;
use ctfs_core::codec::{put_presence, put_var_bytes, Decoder};
use ctfs_core::{CtfsError, CtfsResult, Location};
use ctfs_crypto::{
    SigningIdentity, SymmetricKey, SymmetricLink, SymmetricLocationLink, METADATA_PADDING,
};

use crate::props::FileProperties;
use crate::retriever::EncryptedChunkRetriever;

use super::NODE_VERSION;

/// The part of a node every file chunk and directory shares.
///
/// All keys hang off the *parent key*: for a file that is the capability's
/// read base key, for a directory it is reached from the subfolders key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAccess {
    parent_to_meta: SymmetricLink,
    parent_to_data: SymmetricLink,
    /// `FileProperties` sealed under the meta key.
    properties: Vec<u8>,
    retriever: Option<EncryptedChunkRetriever>,
    /// Location and parent key of the containing directory.
    parent_link: Option<SymmetricLocationLink>,
    /// The writer's signing identity sealed under the write base key.
    writer_link: Option<Vec<u8>>,
}

impl FileAccess {
    pub fn create(
        parent_key: &SymmetricKey,
        meta_key: &SymmetricKey,
        data_key: &SymmetricKey,
        props: &FileProperties,
        retriever: Option<EncryptedChunkRetriever>,
        parent_link: Option<SymmetricLocationLink>,
        writer_link: Option<Vec<u8>>,
    ) -> CtfsResult<Self> {
        Ok(Self {
            parent_to_meta: SymmetricLink::from_pair(parent_key, meta_key)?,
            parent_to_data: SymmetricLink::from_pair(parent_key, data_key)?,
            properties: meta_key.seal_padded(&props.serialize(), METADATA_PADDING)?,
            retriever,
            parent_link,
            writer_link,
        })
    }

    pub fn meta_key(&self, parent_key: &SymmetricKey) -> CtfsResult<SymmetricKey> {
        self.parent_to_meta.target(parent_key)
    }

    pub fn data_key(&self, parent_key: &SymmetricKey) -> CtfsResult<SymmetricKey> {
        self.parent_to_data.target(parent_key)
    }

    /// Decrypt the properties. The wrong key is a decryption error.
    pub fn properties(&self, parent_key: &SymmetricKey) -> CtfsResult<FileProperties> {
        let meta = self.meta_key(parent_key)?;
        FileProperties::deserialize(&meta.open_padded(&self.properties)?)
    }

    pub fn retriever(&self) -> Option<&EncryptedChunkRetriever> {
        self.retriever.as_ref()
    }

    pub fn has_writer_link(&self) -> bool {
        self.writer_link.is_some()
    }

    /// Location of the containing directory and that directory's parent key.
    pub fn parent(&self, parent_key: &SymmetricKey) -> CtfsResult<Option<(Location, SymmetricKey)>> {
        self.parent_link
            .as_ref()
            .map(|link| Ok((link.target_location(parent_key)?, link.target(parent_key)?)))
            .transpose()
    }

    pub fn parent_location(&self, parent_key: &SymmetricKey) -> CtfsResult<Option<Location>> {
        Ok(self.parent(parent_key)?.map(|(location, _)| location))
    }

    /// Recover the signing identity from the writer link.
    pub fn signer(&self, w_base_key: &SymmetricKey) -> CtfsResult<Option<SigningIdentity>> {
        self.writer_link
            .as_deref()
            .map(|sealed| SigningIdentity::open_from(sealed, w_base_key))
            .transpose()
    }

    pub fn is_dirty(&self, parent_key: &SymmetricKey) -> CtfsResult<bool> {
        Ok(self.meta_key(parent_key)?.is_dirty() || self.data_key(parent_key)?.is_dirty())
    }

    /// Re-seal new properties. A dirty meta key is replaced by a fresh one.
    pub fn with_properties(
        &self,
        parent_key: &SymmetricKey,
        props: &FileProperties,
    ) -> CtfsResult<Self> {
        let meta = self.meta_key(parent_key)?;
        let (meta, parent_to_meta) = if meta.is_dirty() {
            let fresh = SymmetricKey::random();
            let link = SymmetricLink::from_pair(parent_key, &fresh)?;
            (fresh, link)
        } else {
            (meta, self.parent_to_meta.clone())
        };
        Ok(Self {
            parent_to_meta,
            properties: meta.seal_padded(&props.serialize(), METADATA_PADDING)?,
            ..self.clone()
        })
    }

    /// Move this node under a new parent key, flagging its meta and data
    /// keys dirty. The sealed properties and chunk ciphertext are left as
    /// they are until the next write re-encrypts them.
    pub fn mark_dirty(
        &self,
        old_parent_key: &SymmetricKey,
        new_parent_key: &SymmetricKey,
    ) -> CtfsResult<Self> {
        let meta = self.meta_key(old_parent_key)?.make_dirty();
        let data = self.data_key(old_parent_key)?.make_dirty();
        let parent_link = match self.parent(old_parent_key)? {
            Some((location, key)) => Some(SymmetricLocationLink::create(
                new_parent_key,
                &key,
                &location,
            )?),
            None => None,
        };
        Ok(Self {
            parent_to_meta: SymmetricLink::from_pair(new_parent_key, &meta)?,
            parent_to_data: SymmetricLink::from_pair(new_parent_key, &data)?,
            parent_link,
            ..self.clone()
        })
    }

    pub(crate) fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(NODE_VERSION);
        buf.put_slice(&self.parent_to_meta.to_bytes());
        buf.put_slice(&self.parent_to_data.to_bytes());
        put_var_bytes(buf, &self.properties);
        put_presence(buf, self.retriever.is_some());
        if let Some(retriever) = &self.retriever {
            retriever.encode(buf);
        }
        put_presence(buf, self.parent_link.is_some());
        if let Some(link) = &self.parent_link {
            buf.put_slice(&link.to_bytes());
        }
        put_presence(buf, self.writer_link.is_some());
        if let Some(sealed) = &self.writer_link {
            put_var_bytes(buf, sealed);
        }
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> CtfsResult<Self> {
        let version = d.read_u8("node version")?;
        if version != NODE_VERSION {
            return Err(CtfsError::structural(format!(
                "unsupported node version {version}"
            )));
        }
        let parent_to_meta = SymmetricLink::from_bytes(
            d.read_slice(SymmetricLink::SERIALIZED_SIZE, "parent-to-meta link")?,
        )?;
        let parent_to_data = SymmetricLink::from_bytes(
            d.read_slice(SymmetricLink::SERIALIZED_SIZE, "parent-to-data link")?,
        )?;
        let properties = d.read_var_bytes("properties")?.to_vec();
        let retriever = d.read_option("retriever", EncryptedChunkRetriever::decode)?;
        let parent_link = d.read_option("parent link", |d| {
            SymmetricLocationLink::from_bytes(
                d.read_slice(SymmetricLocationLink::SERIALIZED_SIZE, "parent link")?,
            )
        })?;
        let writer_link = d.read_option("writer link", |d| {
            d.read_var_bytes("writer link").map(<[u8]>::to_vec)
        })?;
        Ok(Self {
            parent_to_meta,
            parent_to_data,
            properties,
            retriever,
            parent_link,
            writer_link,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctfs_core::{MapKey, PublicKeyHash};
    use ctfs_crypto::{NONCE_SIZE, TAG_SIZE};

    struct Keys {
        parent: SymmetricKey,
        meta: SymmetricKey,
        data: SymmetricKey,
    }

    fn keys() -> Keys {
        Keys {
            parent: SymmetricKey::random(),
            meta: SymmetricKey::random(),
            data: SymmetricKey::random(),
        }
    }

    fn parent_location() -> Location {
        Location::new(PublicKeyHash::random(), PublicKeyHash::random(), MapKey::random())
    }

    fn file(keys: &Keys, parent: Option<(&SymmetricKey, Location)>) -> FileAccess {
        let props = FileProperties::file("report.pdf", 42, [7u8; 32]).unwrap();
        let parent_link = parent
            .map(|(key, location)| SymmetricLocationLink::create(&keys.parent, key, &location))
            .transpose()
            .unwrap();
        FileAccess::create(
            &keys.parent,
            &keys.meta,
            &keys.data,
            &props,
            None,
            parent_link,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_properties_need_parent_key() {
        let k = keys();
        let node = file(&k, None);
        assert_eq!(node.properties(&k.parent).unwrap().name, "report.pdf");
        assert_eq!(node.data_key(&k.parent).unwrap(), k.data);

        let err = node.properties(&SymmetricKey::random()).unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_sealed_properties_are_block_padded() {
        let k = keys();
        let node = file(&k, None);
        let body = node.properties.len() - NONCE_SIZE - TAG_SIZE;
        assert_eq!(body % METADATA_PADDING, 0);

        let mut props = node.properties(&k.parent).unwrap();
        props.name = "r.pdf".into();
        let renamed = node.with_properties(&k.parent, &props).unwrap();
        assert_eq!(
            (renamed.properties.len() - NONCE_SIZE - TAG_SIZE) % METADATA_PADDING,
            0
        );
        assert_eq!(renamed.properties(&k.parent).unwrap().name, "r.pdf");
    }

    #[test]
    fn test_parent_navigation() {
        let k = keys();
        let dir_key = SymmetricKey::random();
        let location = parent_location();
        let node = file(&k, Some((&dir_key, location)));
        let (found, key) = node.parent(&k.parent).unwrap().unwrap();
        assert_eq!(found, location);
        assert_eq!(key, dir_key);
        assert!(file(&k, None).parent_location(&k.parent).unwrap().is_none());
    }

    #[test]
    fn test_writer_link_recovers_signer() {
        let k = keys();
        let signer = SigningIdentity::generate();
        let w = SymmetricKey::random();
        let node = FileAccess::create(
            &k.parent,
            &k.meta,
            &k.data,
            &FileProperties::empty(),
            None,
            None,
            Some(signer.seal_under(&w).unwrap()),
        )
        .unwrap();
        assert_eq!(node.signer(&w).unwrap(), Some(signer));
        assert!(node.signer(&SymmetricKey::random()).is_err());
        assert!(file(&k, None).signer(&w).unwrap().is_none());
    }

    #[test]
    fn test_mark_dirty_preserves_meta_key() {
        let k = keys();
        let dir_key = SymmetricKey::random();
        let location = parent_location();
        let node = file(&k, Some((&dir_key, location)));
        let new_parent = SymmetricKey::random();

        let dirty = node.mark_dirty(&k.parent, &new_parent).unwrap();
        assert!(dirty.is_dirty(&new_parent).unwrap());
        assert!(!node.is_dirty(&k.parent).unwrap());
        // Same key material, still readable through the new parent key.
        assert_eq!(dirty.meta_key(&new_parent).unwrap().as_bytes(), k.meta.as_bytes());
        assert_eq!(dirty.properties(&new_parent).unwrap().name, "report.pdf");
        assert_eq!(dirty.parent(&new_parent).unwrap(), Some((location, dir_key)));
        // The old parent key no longer opens anything.
        assert!(dirty.properties(&k.parent).is_err());
    }

    #[test]
    fn test_with_properties_refreshes_dirty_meta_key() {
        let k = keys();
        let node = file(&k, None);
        let new_parent = SymmetricKey::random();
        let dirty = node.mark_dirty(&k.parent, &new_parent).unwrap();

        let props = dirty
            .properties(&new_parent)
            .unwrap()
            .with_name("renamed.pdf")
            .unwrap();
        let clean = dirty.with_properties(&new_parent, &props).unwrap();
        let meta = clean.meta_key(&new_parent).unwrap();
        assert!(!meta.is_dirty());
        assert_ne!(meta.as_bytes(), k.meta.as_bytes());
        assert_eq!(clean.properties(&new_parent).unwrap().name, "renamed.pdf");

        // A clean meta key is kept.
        let same = node.with_properties(&k.parent, &props).unwrap();
        assert_eq!(same.meta_key(&k.parent).unwrap(), k.meta);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut buf = Vec::new();
        file(&keys(), None).encode(&mut buf);
        buf[0] = NODE_VERSION + 1;
        let err = FileAccess::decode(&mut Decoder::new(&buf)).unwrap_err();
        assert!(matches!(err, CtfsError::Structural(_)));
    }
}
