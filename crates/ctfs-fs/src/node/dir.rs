use bytes::BufMut;
use ctfs_core::codec::{put_presence, put_var_bytes, Decoder};
use ctfs_core::{CtfsError, CtfsResult, Location};
use ctfs_crypto::{SymmetricKey, SymmetricLink, SymmetricLocationLink, LINK_PADDING};

use crate::capability::{AbsoluteCapability, RelativeCapability};
use crate::props::FileProperties;

use super::file::FileAccess;

/// Child links held by one directory blob before overflowing into a
/// continuation blob.
pub const MAX_CHILD_LINKS_PER_BLOB: usize = 500;

/// A resolved directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildLink {
    pub capability: AbsoluteCapability,
    pub is_dir: bool,
}

/// A directory blob.
///
/// The capability's read base key is the *subfolders key*. It opens the
/// subdirectory links directly and reaches the files key (file links) and
/// the parent key (everything in the shared [`FileAccess`] part) through
/// links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirAccess {
    base: FileAccess,
    subfolders_to_files: SymmetricLink,
    subfolders_to_parent: SymmetricLink,
    /// Sealed `RelativeCapability` values.
    subfolders: Vec<Vec<u8>>,
    files: Vec<Vec<u8>>,
    more_children: Option<SymmetricLocationLink>,
}

impl DirAccess {
    /// A new, empty directory blob.
    ///
    /// `parent` is the containing directory's location and parent key.
    /// `parent_key` defaults to a fresh random key.
    pub fn create(
        subfolders_key: &SymmetricKey,
        props: &FileProperties,
        parent: Option<(&Location, &SymmetricKey)>,
        parent_key: Option<SymmetricKey>,
        writer_link: Option<Vec<u8>>,
    ) -> CtfsResult<Self> {
        let parent_key = parent_key.unwrap_or_else(SymmetricKey::random);
        let files_key = SymmetricKey::random();
        let meta_key = SymmetricKey::random();
        // Directories hold no data; the link exists to keep the layout uniform.
        let data_key = SymmetricKey::random();
        let parent_link = parent
            .map(|(location, key)| SymmetricLocationLink::create(&parent_key, key, location))
            .transpose()?;
        Ok(Self {
            base: FileAccess::create(
                &parent_key,
                &meta_key,
                &data_key,
                props,
                None,
                parent_link,
                writer_link,
            )?,
            subfolders_to_files: SymmetricLink::from_pair(subfolders_key, &files_key)?,
            subfolders_to_parent: SymmetricLink::from_pair(subfolders_key, &parent_key)?,
            subfolders: Vec::new(),
            files: Vec::new(),
            more_children: None,
        })
    }

    /// An empty continuation blob sharing this blob's parent key and parent.
    pub fn continuation(&self, own_key: &SymmetricKey, next_key: &SymmetricKey) -> CtfsResult<Self> {
        let parent_key = self.parent_key(own_key)?;
        let parent = self.base.parent(&parent_key)?;
        Self::create(
            next_key,
            &FileProperties::empty(),
            parent.as_ref().map(|(location, key)| (location, key)),
            Some(parent_key),
            None,
        )
    }

    pub fn file_access(&self) -> &FileAccess {
        &self.base
    }

    pub fn parent_key(&self, subfolders_key: &SymmetricKey) -> CtfsResult<SymmetricKey> {
        self.subfolders_to_parent.target(subfolders_key)
    }

    pub fn files_key(&self, subfolders_key: &SymmetricKey) -> CtfsResult<SymmetricKey> {
        self.subfolders_to_files.target(subfolders_key)
    }

    pub fn properties(&self, subfolders_key: &SymmetricKey) -> CtfsResult<FileProperties> {
        self.base.properties(&self.parent_key(subfolders_key)?)
    }

    pub fn with_properties(
        &self,
        subfolders_key: &SymmetricKey,
        props: &FileProperties,
    ) -> CtfsResult<Self> {
        let parent_key = self.parent_key(subfolders_key)?;
        Ok(Self {
            base: self.base.with_properties(&parent_key, props)?,
            ..self.clone()
        })
    }

    /// Links stored in this blob, not counting continuations.
    pub fn child_count(&self) -> usize {
        self.subfolders.len() + self.files.len()
    }

    pub fn is_full(&self) -> bool {
        self.child_count() >= MAX_CHILD_LINKS_PER_BLOB
    }

    /// Add a child link. The caller handles overflow.
    pub fn with_child(
        &self,
        subfolders_key: &SymmetricKey,
        child: &RelativeCapability,
        is_dir: bool,
    ) -> CtfsResult<Self> {
        if self.is_full() {
            return Err(CtfsError::structural(format!(
                "directory blob already holds {MAX_CHILD_LINKS_PER_BLOB} links"
            )));
        }
        let mut next = self.clone();
        if is_dir {
            next.subfolders.push(subfolders_key.seal_padded(&child.serialize(), LINK_PADDING)?);
        } else {
            let files_key = self.files_key(subfolders_key)?;
            next.files.push(files_key.seal_padded(&child.serialize(), LINK_PADDING)?);
        }
        Ok(next)
    }

    /// Resolve this blob's child links against `cap`, the capability this
    /// blob was read through.
    pub fn children(&self, cap: &AbsoluteCapability) -> CtfsResult<Vec<ChildLink>> {
        let files_key = self.files_key(&cap.r_base_key)?;
        let open = |key: &SymmetricKey, sealed: &[u8], is_dir: bool| -> CtfsResult<ChildLink> {
            let rel = RelativeCapability::deserialize(&key.open_padded(sealed)?)?;
            Ok(ChildLink {
                capability: rel.to_absolute(cap)?,
                is_dir,
            })
        };
        let dirs = self
            .subfolders
            .iter()
            .map(|sealed| open(&cap.r_base_key, sealed, true));
        let files = self
            .files
            .iter()
            .map(|sealed| open(&files_key, sealed, false));
        dirs.chain(files).collect()
    }

    /// Drop the link to `target`. Returns `None` if this blob has no such link.
    pub fn without_child(&self, cap: &AbsoluteCapability, target: &Location) -> CtfsResult<Option<Self>> {
        self.replace_child(cap, target, None)
    }

    /// Swap the link to `target` for `replacement`, keeping its list.
    pub fn with_child_replaced(
        &self,
        cap: &AbsoluteCapability,
        target: &Location,
        replacement: &RelativeCapability,
    ) -> CtfsResult<Option<Self>> {
        self.replace_child(cap, target, Some(replacement))
    }

    fn replace_child(
        &self,
        cap: &AbsoluteCapability,
        target: &Location,
        replacement: Option<&RelativeCapability>,
    ) -> CtfsResult<Option<Self>> {
        let files_key = self.files_key(&cap.r_base_key)?;
        let mut next = self.clone();
        let (key, list, index) =
            if let Some(i) = position_of(&self.subfolders, &cap.r_base_key, cap, target)? {
                (&cap.r_base_key, &mut next.subfolders, i)
            } else if let Some(i) = position_of(&self.files, &files_key, cap, target)? {
                (&files_key, &mut next.files, i)
            } else {
                return Ok(None);
            };
        match replacement {
            Some(new) => list[index] = key.seal_padded(&new.serialize(), LINK_PADDING)?,
            None => {
                list.remove(index);
            }
        }
        Ok(Some(next))
    }

    /// Location and subfolders key of the next blob, if any.
    pub fn more_children(
        &self,
        subfolders_key: &SymmetricKey,
    ) -> CtfsResult<Option<(Location, SymmetricKey)>> {
        self.more_children
            .as_ref()
            .map(|link| {
                Ok((
                    link.target_location(subfolders_key)?,
                    link.target(subfolders_key)?,
                ))
            })
            .transpose()
    }

    pub fn with_more_children(
        &self,
        subfolders_key: &SymmetricKey,
        next_key: &SymmetricKey,
        next_location: &Location,
    ) -> CtfsResult<Self> {
        Ok(Self {
            more_children: Some(SymmetricLocationLink::create(
                subfolders_key,
                next_key,
                next_location,
            )?),
            ..self.clone()
        })
    }

    pub(crate) fn encode_dir(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.subfolders_to_files.to_bytes());
        buf.put_slice(&self.subfolders_to_parent.to_bytes());
        for list in [&self.subfolders, &self.files] {
            buf.put_u32(list.len() as u32);
            for sealed in list {
                put_var_bytes(buf, sealed);
            }
        }
        put_presence(buf, self.more_children.is_some());
        if let Some(link) = &self.more_children {
            buf.put_slice(&link.to_bytes());
        }
    }

    pub(crate) fn decode_dir(base: FileAccess, d: &mut Decoder<'_>) -> CtfsResult<Self> {
        let subfolders_to_files = SymmetricLink::from_bytes(
            d.read_slice(SymmetricLink::SERIALIZED_SIZE, "subfolders-to-files link")?,
        )?;
        let subfolders_to_parent = SymmetricLink::from_bytes(
            d.read_slice(SymmetricLink::SERIALIZED_SIZE, "subfolders-to-parent link")?,
        )?;
        let mut read_list = |what: &str| -> CtfsResult<Vec<Vec<u8>>> {
            let count = d.read_u32(what)? as usize;
            if count > MAX_CHILD_LINKS_PER_BLOB {
                return Err(CtfsError::structural(format!(
                    "{count} {what} exceed the per-blob limit"
                )));
            }
            (0..count)
                .map(|_| d.read_var_bytes(what).map(<[u8]>::to_vec))
                .collect()
        };
        let subfolders = read_list("subfolder links")?;
        let files = read_list("file links")?;
        let more_children = d.read_option("more children", |d| {
            SymmetricLocationLink::from_bytes(
                d.read_slice(SymmetricLocationLink::SERIALIZED_SIZE, "more children")?,
            )
        })?;
        Ok(Self {
            base,
            subfolders_to_files,
            subfolders_to_parent,
            subfolders,
            files,
            more_children,
        })
    }
}

fn position_of(
    list: &[Vec<u8>],
    key: &SymmetricKey,
    cap: &AbsoluteCapability,
    target: &Location,
) -> CtfsResult<Option<usize>> {
    for (i, sealed) in list.iter().enumerate() {
        let rel = RelativeCapability::deserialize(&key.open_padded(sealed)?)?;
        if rel.location(cap.owner, cap.writer) == *target {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctfs_core::{MapKey, PublicKeyHash};
    use ctfs_crypto::{NONCE_SIZE, TAG_SIZE};

    fn dir_cap() -> AbsoluteCapability {
        AbsoluteCapability::new(
            PublicKeyHash::random(),
            PublicKeyHash::random(),
            MapKey::random(),
            SymmetricKey::random(),
            Some(SymmetricKey::random()),
        )
    }

    fn child(parent: &AbsoluteCapability) -> AbsoluteCapability {
        AbsoluteCapability::new(
            parent.owner,
            parent.writer,
            MapKey::random(),
            SymmetricKey::random(),
            Some(SymmetricKey::random()),
        )
    }

    fn empty_dir(cap: &AbsoluteCapability) -> DirAccess {
        DirAccess::create(
            &cap.r_base_key,
            &FileProperties::directory("docs").unwrap(),
            None,
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_children_resolve_writable() {
        let cap = dir_cap();
        let sub = child(&cap);
        let file = child(&cap);
        let dir = empty_dir(&cap)
            .with_child(&cap.r_base_key, &cap.relativise(&sub).unwrap(), true)
            .unwrap()
            .with_child(&cap.r_base_key, &cap.relativise(&file).unwrap(), false)
            .unwrap();

        let children = dir.children(&cap).unwrap();
        assert_eq!(
            children,
            vec![
                ChildLink {
                    capability: sub,
                    is_dir: true
                },
                ChildLink {
                    capability: file,
                    is_dir: false
                },
            ]
        );
        assert_eq!(dir.properties(&cap.r_base_key).unwrap().name, "docs");
    }

    #[test]
    fn test_child_links_are_block_padded() {
        let cap = dir_cap();
        let writable = child(&cap);
        let read_only = child(&cap).read_only();
        let dir = empty_dir(&cap)
            .with_child(&cap.r_base_key, &cap.relativise(&writable).unwrap(), false)
            .unwrap()
            .with_child(&cap.r_base_key, &cap.relativise(&read_only).unwrap(), false)
            .unwrap();
        for sealed in &dir.files {
            assert_eq!((sealed.len() - NONCE_SIZE - TAG_SIZE) % LINK_PADDING, 0);
        }
        let caps: Vec<_> = dir
            .children(&cap)
            .unwrap()
            .into_iter()
            .map(|l| l.capability)
            .collect();
        assert_eq!(caps, vec![writable, read_only]);
    }

    #[test]
    fn test_read_only_view_hides_write_keys() {
        let cap = dir_cap();
        let sub = child(&cap);
        let dir = empty_dir(&cap)
            .with_child(&cap.r_base_key, &cap.relativise(&sub).unwrap(), true)
            .unwrap();
        let children = dir.children(&cap.read_only()).unwrap();
        assert_eq!(children[0].capability, sub.read_only());
    }

    #[test]
    fn test_without_and_replace_child() {
        let cap = dir_cap();
        let a = child(&cap);
        let b = child(&cap);
        let dir = empty_dir(&cap)
            .with_child(&cap.r_base_key, &cap.relativise(&a).unwrap(), false)
            .unwrap()
            .with_child(&cap.r_base_key, &cap.relativise(&b).unwrap(), false)
            .unwrap();

        let removed = dir.without_child(&cap, &a.location()).unwrap().unwrap();
        assert_eq!(removed.child_count(), 1);
        assert_eq!(removed.children(&cap).unwrap()[0].capability, b);
        assert!(removed
            .without_child(&cap, &a.location())
            .unwrap()
            .is_none());

        let c = child(&cap);
        let replaced = dir
            .with_child_replaced(&cap, &b.location(), &cap.relativise(&c).unwrap())
            .unwrap()
            .unwrap();
        let caps: Vec<_> = replaced
            .children(&cap)
            .unwrap()
            .into_iter()
            .map(|l| l.capability)
            .collect();
        assert_eq!(caps, vec![a, c]);
    }

    #[test]
    fn test_full_blob_refuses_more() {
        let cap = dir_cap();
        let mut dir = empty_dir(&cap);
        let rel = cap.relativise(&child(&cap)).unwrap();
        for _ in 0..MAX_CHILD_LINKS_PER_BLOB {
            dir = dir.with_child(&cap.r_base_key, &rel, false).unwrap();
        }
        assert!(dir.is_full());
        assert!(dir.with_child(&cap.r_base_key, &rel, false).is_err());
    }

    #[test]
    fn test_continuation_shares_parent() {
        let cap = dir_cap();
        let parent_location = Location::new(cap.owner, cap.writer, MapKey::random());
        let grandparent_key = SymmetricKey::random();
        let dir = DirAccess::create(
            &cap.r_base_key,
            &FileProperties::directory("docs").unwrap(),
            Some((&parent_location, &grandparent_key)),
            None,
            None,
        )
        .unwrap();
        let next_key = SymmetricKey::random();
        let next = dir.continuation(&cap.r_base_key, &next_key).unwrap();

        let parent_key = dir.parent_key(&cap.r_base_key).unwrap();
        assert_eq!(next.parent_key(&next_key).unwrap(), parent_key);
        assert_eq!(
            next.file_access().parent(&parent_key).unwrap(),
            Some((parent_location, grandparent_key))
        );
        assert_eq!(next.properties(&next_key).unwrap(), FileProperties::empty());

        let next_location = Location::new(cap.owner, cap.writer, MapKey::random());
        let linked = dir
            .with_more_children(&cap.r_base_key, &next_key, &next_location)
            .unwrap();
        assert_eq!(
            linked.more_children(&cap.r_base_key).unwrap(),
            Some((next_location, next_key))
        );
    }
}
