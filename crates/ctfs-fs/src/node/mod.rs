//! Cryptree nodes: the encrypted record stored at every capability's location
//!
//! ```text
//! version(1) | parent-to-meta(74) | parent-to-data(74) | properties(var)
//!   | retriever? | parent link?(210) | writer link?(var) | type(1)
//!   [directory only: subfolders-to-files(74) | subfolders-to-parent(74)
//!    | subfolder links | file links | more children?(210)]
//! ```

mod dir;
mod file;

use bytes::BufMut;
use ctfs_core::codec::Decoder;
use ctfs_core::{CtfsError, CtfsResult};
use ctfs_crypto::{SigningIdentity, SymmetricKey};

use crate::props::FileProperties;

pub use dir::{ChildLink, DirAccess, MAX_CHILD_LINKS_PER_BLOB};
pub use file::FileAccess;

pub const NODE_VERSION: u8 = 1;

const TYPE_FILE: u8 = 0;
const TYPE_DIR: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptreeNode {
    File(FileAccess),
    Dir(DirAccess),
}

impl CryptreeNode {
    pub fn is_dir(&self) -> bool {
        matches!(self, CryptreeNode::Dir(_))
    }

    pub fn file_access(&self) -> &FileAccess {
        match self {
            CryptreeNode::File(file) => file,
            CryptreeNode::Dir(dir) => dir.file_access(),
        }
    }

    /// `base_key` is the read base key of the capability naming this node.
    pub fn parent_key(&self, base_key: &SymmetricKey) -> CtfsResult<SymmetricKey> {
        match self {
            CryptreeNode::File(_) => Ok(base_key.clone()),
            CryptreeNode::Dir(dir) => dir.parent_key(base_key),
        }
    }

    pub fn properties(&self, base_key: &SymmetricKey) -> CtfsResult<FileProperties> {
        self.file_access().properties(&self.parent_key(base_key)?)
    }

    pub fn with_properties(
        &self,
        base_key: &SymmetricKey,
        props: &FileProperties,
    ) -> CtfsResult<Self> {
        Ok(match self {
            CryptreeNode::File(file) => CryptreeNode::File(file.with_properties(base_key, props)?),
            CryptreeNode::Dir(dir) => CryptreeNode::Dir(dir.with_properties(base_key, props)?),
        })
    }

    pub fn signer(&self, w_base_key: &SymmetricKey) -> CtfsResult<Option<SigningIdentity>> {
        self.file_access().signer(w_base_key)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            CryptreeNode::File(file) => {
                file.encode(&mut buf);
                buf.put_u8(TYPE_FILE);
            }
            CryptreeNode::Dir(dir) => {
                dir.file_access().encode(&mut buf);
                buf.put_u8(TYPE_DIR);
                dir.encode_dir(&mut buf);
            }
        }
        buf
    }

    pub fn deserialize(raw: &[u8]) -> CtfsResult<Self> {
        let mut d = Decoder::new(raw);
        let base = FileAccess::decode(&mut d)?;
        let node = match d.read_u8("node type")? {
            TYPE_FILE => CryptreeNode::File(base),
            TYPE_DIR => CryptreeNode::Dir(DirAccess::decode_dir(base, &mut d)?),
            other => {
                return Err(CtfsError::structural(format!(
                    "unknown node type {other}"
                )))
            }
        };
        d.finish("cryptree node")?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctfs_chunks::Fragmenter;
    use ctfs_core::{ContentHash, Location, MapKey, PublicKeyHash};
    use ctfs_crypto::{SymmetricLocationLink, NONCE_SIZE, TAG_SIZE};
    use proptest::prelude::*;

    use crate::capability::AbsoluteCapability;
    use crate::retriever::EncryptedChunkRetriever;

    fn location() -> Location {
        Location::new(PublicKeyHash::random(), PublicKeyHash::random(), MapKey::random())
    }

    fn chunk_node(hashes: usize, next: bool, parent: bool) -> (CryptreeNode, SymmetricKey) {
        let base = SymmetricKey::random();
        let retriever = EncryptedChunkRetriever {
            nonce: [1u8; NONCE_SIZE],
            auth: [2u8; TAG_SIZE],
            cipher_len: 77,
            fragmenter: Fragmenter::Split,
            fragment_hashes: (0..hashes).map(|_| ContentHash::random()).collect(),
            next_map_key: next.then(MapKey::random),
        };
        let parent_link = parent.then(|| {
            SymmetricLocationLink::create(&base, &SymmetricKey::random(), &location()).unwrap()
        });
        let node = FileAccess::create(
            &base,
            &SymmetricKey::random(),
            &SymmetricKey::random(),
            &FileProperties::file("a.bin", 77, [3u8; 32]).unwrap(),
            Some(retriever),
            parent_link,
            Some(SigningIdentity::generate().seal_under(&base).unwrap()),
        )
        .unwrap();
        (CryptreeNode::File(node), base)
    }

    #[test]
    fn test_file_node_roundtrip() {
        let (node, base) = chunk_node(3, true, true);
        let back = CryptreeNode::deserialize(&node.serialize()).unwrap();
        assert_eq!(back, node);
        assert!(!back.is_dir());
        assert_eq!(back.properties(&base).unwrap().name, "a.bin");
    }

    #[test]
    fn test_dir_node_roundtrip() {
        let cap = AbsoluteCapability::new(
            PublicKeyHash::random(),
            PublicKeyHash::random(),
            MapKey::random(),
            SymmetricKey::random(),
            Some(SymmetricKey::random()),
        );
        let child = cap.with_map_key(MapKey::random());
        let dir = DirAccess::create(
            &cap.r_base_key,
            &FileProperties::directory("home").unwrap(),
            Some((&location(), &SymmetricKey::random())),
            None,
            None,
        )
        .unwrap()
        .with_child(&cap.r_base_key, &cap.relativise(&child).unwrap(), false)
        .unwrap()
        .with_more_children(&cap.r_base_key, &SymmetricKey::random(), &location())
        .unwrap();
        let node = CryptreeNode::Dir(dir);

        let back = CryptreeNode::deserialize(&node.serialize()).unwrap();
        assert_eq!(back, node);
        assert!(back.is_dir());
        assert_eq!(back.properties(&cap.r_base_key).unwrap().name, "home");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let (node, _) = chunk_node(1, false, false);
        let mut raw = node.serialize();
        let last = raw.len() - 1;
        raw[last] = 9;
        let err = CryptreeNode::deserialize(&raw).unwrap_err();
        assert!(matches!(err, CtfsError::Structural(_)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let (node, _) = chunk_node(1, false, false);
        let mut raw = node.serialize();
        raw.push(0);
        assert!(CryptreeNode::deserialize(&raw).is_err());
    }

    proptest! {
        #[test]
        fn prop_file_node_roundtrip(hashes in 0usize..40, next in any::<bool>(), parent in any::<bool>()) {
            let (node, _) = chunk_node(hashes, next, parent);
            prop_assert_eq!(CryptreeNode::deserialize(&node.serialize()).unwrap(), node);
        }

        #[test]
        fn prop_truncation_never_panics(cut in 0usize..400) {
            let (node, _) = chunk_node(2, true, true);
            let raw = node.serialize();
            let cut = cut.min(raw.len() - 1);
            prop_assert!(CryptreeNode::deserialize(&raw[..cut]).is_err());
        }
    }
}
