//! Named files and directories on top of capabilities
//!
//! Every directory change goes through [`retry_on_conflict`]: a lost
//! compare-and-swap, or a name another writer took first, re-reads the
//! directory and tries again. A name collision renames the already-committed
//! child to the first free `name[n].ext` before linking it.

use std::collections::HashSet;

use ctfs_chunks::{Fragmenter, HashTree};
use ctfs_core::config::CtfsConfig;
use ctfs_core::{CtfsError, CtfsResult, Location, MapKey};
use ctfs_crypto::{SigningIdentity, SymmetricKey};
use ctfs_storage::{BlockStore, PointerStore};
use futures::future::try_join_all;

use crate::capability::AbsoluteCapability;
use crate::directory;
use crate::network::Network;
use crate::node::{ChildLink, CryptreeNode, DirAccess};
use crate::props::FileProperties;
use crate::reader::{read_exact, AsyncReader, BufferedReader, LazyChunkReader};
use crate::retriever::ChunkChain;
use crate::retry::{disambiguate, retry_on_conflict};
use crate::uploader::{FileKeys, FileUploader, ProgressFn, UploadedFile};

/// One resolved directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub capability: AbsoluteCapability,
    pub properties: FileProperties,
    pub is_dir: bool,
}

#[derive(Clone)]
pub struct FileSystem<B, P> {
    network: Network<B, P>,
    fragmenter: Fragmenter,
    cas_retries: usize,
    buffered_chunks: usize,
}

impl<B: BlockStore, P: PointerStore> FileSystem<B, P> {
    pub fn new(network: Network<B, P>, config: &CtfsConfig) -> CtfsResult<Self> {
        Ok(Self {
            network,
            fragmenter: Fragmenter::from_config(&config.upload)?,
            cas_retries: config.directory.cas_retries,
            buffered_chunks: config.reader.buffered_chunks,
        })
    }

    pub fn with_fragmenter(mut self, fragmenter: Fragmenter) -> Self {
        self.fragmenter = fragmenter;
        self
    }

    pub fn with_cas_retries(mut self, retries: usize) -> Self {
        self.cas_retries = retries;
        self
    }

    pub fn network(&self) -> &Network<B, P> {
        &self.network
    }

    /// Commit a new, parentless directory owned and written by `signer`.
    pub async fn create_root(
        &self,
        signer: &SigningIdentity,
        name: &str,
    ) -> CtfsResult<AbsoluteCapability> {
        let id = signer.public_key_hash();
        let cap = AbsoluteCapability::new(
            id,
            id,
            MapKey::random(),
            SymmetricKey::random(),
            Some(SymmetricKey::random()),
        );
        self.commit_new_dir(&cap, signer, name, None).await?;
        tracing::info!(name, owner = %id, "root directory created");
        Ok(cap)
    }

    /// Create the subdirectory `name` in `dir`. Returns its writable
    /// capability; the name it ends up under is in its properties.
    pub async fn mkdir(
        &self,
        dir: &AbsoluteCapability,
        name: &str,
    ) -> CtfsResult<AbsoluteCapability> {
        let signer = directory::recover_signer(&self.network, dir).await?;
        let parent_key = self.dir_parent_key(dir).await?;
        let child = AbsoluteCapability::new(
            dir.owner,
            dir.writer,
            MapKey::random(),
            SymmetricKey::random(),
            Some(SymmetricKey::random()),
        );
        self.commit_new_dir(&child, &signer, name, Some((&dir.location(), &parent_key)))
            .await?;
        self.link_child(dir, &signer, &child, name, true).await?;
        Ok(child)
    }

    async fn commit_new_dir(
        &self,
        cap: &AbsoluteCapability,
        signer: &SigningIdentity,
        name: &str,
        parent: Option<(&Location, &SymmetricKey)>,
    ) -> CtfsResult<()> {
        let w_key = cap.require_writable()?;
        let node = DirAccess::create(
            &cap.r_base_key,
            &FileProperties::directory(name)?,
            parent,
            None,
            Some(signer.seal_under(w_key)?),
        )?;
        self.network
            .commit(&cap.location(), &CryptreeNode::Dir(node), None, signer)
            .await?;
        Ok(())
    }

    /// Upload `length` bytes from `reader` and link them into `dir` as
    /// `name`. Returns the name the file was linked under.
    pub async fn upload_file<R: AsyncReader>(
        &self,
        dir: &AbsoluteCapability,
        name: &str,
        reader: R,
        length: u64,
        progress: Option<ProgressFn>,
    ) -> CtfsResult<(String, UploadedFile)> {
        let signer = directory::recover_signer(&self.network, dir).await?;
        let parent_key = self.dir_parent_key(dir).await?;
        let mut uploader = FileUploader::new(name, reader, length, self.fragmenter)?
            .with_parent(dir.location(), parent_key);
        if let Some(progress) = progress {
            uploader = uploader.with_progress(progress);
        }
        let uploaded = uploader
            .upload(&self.network, dir.owner, &signer, MapKey::random())
            .await?;
        let linked = self
            .link_child(dir, &signer, &uploaded.capability, name, false)
            .await?;
        Ok((linked, uploaded))
    }

    /// Link an already committed `child` into `dir` under `name`, or under a
    /// disambiguated name if `name` is taken.
    async fn link_child(
        &self,
        dir: &AbsoluteCapability,
        signer: &SigningIdentity,
        child: &AbsoluteCapability,
        name: &str,
        is_dir: bool,
    ) -> CtfsResult<String> {
        let relative = dir.relativise(child)?;
        let relative = &relative;
        let linked = retry_on_conflict(
            self.cas_retries,
            name.to_string(),
            CtfsError::is_retryable,
            |name| async move {
                let snapshot = directory::snapshot(&self.network, dir).await?;
                let taken = self.entries(snapshot.children()?).await?;
                if taken.iter().any(|entry| entry.name == name) {
                    return Err(CtfsError::CasConflict {
                        location: dir.location(),
                    });
                }
                directory::add_child(&self.network, &snapshot, signer, relative, is_dir).await?;
                Ok::<_, CtfsError>(name)
            },
            |name| self.claim_free_name(dir, signer, child, name),
        )
        .await;
        match linked {
            Err(CtfsError::CasConflict { .. }) => Err(CtfsError::ConflictRetriesExhausted {
                name: name.to_string(),
                attempts: self.cas_retries + 1,
            }),
            Ok(linked) => {
                tracing::debug!(name = %linked, is_dir, "child linked");
                Ok(linked)
            }
            Err(e) => Err(e),
        }
    }

    /// After a conflict: keep `name` if it is still free, otherwise rename
    /// the unlinked `child` to the first free variant.
    async fn claim_free_name(
        &self,
        dir: &AbsoluteCapability,
        signer: &SigningIdentity,
        child: &AbsoluteCapability,
        name: String,
    ) -> CtfsResult<String> {
        let taken = self.child_names(dir).await?;
        if !taken.contains(&name) {
            return Ok(name);
        }
        let renamed = disambiguate(&name, &taken);
        tracing::warn!(%name, %renamed, "name taken by a concurrent writer, renaming");
        self.set_name(child, signer, &renamed).await?;
        Ok(renamed)
    }

    /// Re-seal the properties of the node `cap` names with a new name.
    async fn set_name(
        &self,
        cap: &AbsoluteCapability,
        signer: &SigningIdentity,
        name: &str,
    ) -> CtfsResult<()> {
        let location = cap.location();
        let (node, hash) = self
            .network
            .get_metadata(&location)
            .await?
            .ok_or_else(|| CtfsError::NotFound(format!("no node at {}", cap.map_key)))?;
        let props = node.properties(&cap.r_base_key)?.with_name(name)?;
        let updated = node.with_properties(&cap.r_base_key, &props)?;
        self.network
            .commit(&location, &updated, Some(hash), signer)
            .await?;
        Ok(())
    }

    async fn dir_parent_key(&self, dir: &AbsoluteCapability) -> CtfsResult<SymmetricKey> {
        let (head, _) = directory::read_dir(&self.network, dir).await?;
        head.parent_key(&dir.r_base_key)
    }

    async fn child_names(&self, dir: &AbsoluteCapability) -> CtfsResult<HashSet<String>> {
        Ok(self
            .list(dir)
            .await?
            .into_iter()
            .map(|entry| entry.name)
            .collect())
    }

    /// Properties of the node `cap` names.
    pub async fn properties(&self, cap: &AbsoluteCapability) -> CtfsResult<FileProperties> {
        let (node, _) = self
            .network
            .get_metadata(&cap.location())
            .await?
            .ok_or_else(|| CtfsError::NotFound(format!("no node at {}", cap.map_key)))?;
        node.properties(&cap.r_base_key)
    }

    /// Every child of `dir` with its properties.
    pub async fn list(&self, dir: &AbsoluteCapability) -> CtfsResult<Vec<ChildEntry>> {
        self.entries(directory::get_children(&self.network, dir).await?)
            .await
    }

    async fn entries(&self, children: Vec<ChildLink>) -> CtfsResult<Vec<ChildEntry>> {
        try_join_all(children.into_iter().map(|child| async move {
            let properties = self.properties(&child.capability).await?;
            Ok::<_, CtfsError>(ChildEntry {
                name: properties.name.clone(),
                capability: child.capability,
                properties,
                is_dir: child.is_dir,
            })
        }))
        .await
    }

    pub async fn get_child(&self, dir: &AbsoluteCapability, name: &str) -> CtfsResult<ChildEntry> {
        self.list(dir)
            .await?
            .into_iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| CtfsError::NotFound(format!("no child named {name:?}")))
    }

    /// Location and properties of the directory containing `cap`, if it has
    /// a parent link.
    pub async fn parent(
        &self,
        cap: &AbsoluteCapability,
    ) -> CtfsResult<Option<(Location, FileProperties)>> {
        let (node, _) = self
            .network
            .get_metadata(&cap.location())
            .await?
            .ok_or_else(|| CtfsError::NotFound(format!("no node at {}", cap.map_key)))?;
        let parent_key = node.parent_key(&cap.r_base_key)?;
        let Some((location, key)) = node.file_access().parent(&parent_key)? else {
            return Ok(None);
        };
        let (parent, _) = self
            .network
            .get_metadata(&location)
            .await?
            .ok_or_else(|| CtfsError::NotFound(format!("parent {} is gone", location.map_key)))?;
        Ok(Some((location, parent.file_access().properties(&key)?)))
    }

    /// Unlink `name` from `dir` and delete everything under it.
    pub async fn remove_child(&self, dir: &AbsoluteCapability, name: &str) -> CtfsResult<()> {
        let signer = directory::recover_signer(&self.network, dir).await?;
        let entry = self.get_child(dir, name).await?;
        let target = entry.capability.location();
        let signer_ref = &signer;
        let removed = retry_on_conflict(
            self.cas_retries,
            (),
            CtfsError::is_retryable,
            |()| directory::remove_child(&self.network, dir, signer_ref, &target),
            |()| async { Ok::<_, CtfsError>(()) },
        )
        .await?;
        if !removed {
            return Err(CtfsError::NotFound(format!("no child named {name:?}")));
        }
        self.delete_tree(&entry.capability, entry.is_dir, &signer)
            .await?;
        tracing::info!(name, is_dir = entry.is_dir, "child removed");
        Ok(())
    }

    /// Remove the pointers of a node and everything reachable from it.
    /// Everything below is assumed to share the writer of `cap`.
    async fn delete_tree(
        &self,
        cap: &AbsoluteCapability,
        is_dir: bool,
        signer: &SigningIdentity,
    ) -> CtfsResult<()> {
        let mut pending = vec![(cap.clone(), is_dir)];
        while let Some((cap, is_dir)) = pending.pop() {
            if !is_dir {
                self.delete_chunks(cap.location(), signer).await?;
                continue;
            }
            let snapshot = directory::snapshot(&self.network, &cap).await?;
            for child in snapshot.children()? {
                if !signer.authorizes(&child.capability.writer) {
                    tracing::debug!(writer = %child.capability.writer, "leaving child of another writer");
                    continue;
                }
                pending.push((child.capability, child.is_dir));
            }
            for (blob, hash) in snapshot.blobs() {
                self.network.delete(&blob.location(), hash, signer).await?;
            }
        }
        Ok(())
    }

    /// Remove every chunk node of the file starting at `first`.
    async fn delete_chunks(&self, first: Location, signer: &SigningIdentity) -> CtfsResult<()> {
        let mut location = Some(first);
        while let Some(current) = location {
            let Some((node, hash)) = self.network.get_metadata(&current).await? else {
                break;
            };
            location = match &node {
                CryptreeNode::File(file) => file
                    .retriever()
                    .and_then(|r| r.next_map_key)
                    .map(|next| current.with_map_key(next)),
                CryptreeNode::Dir(_) => None,
            };
            self.network.delete(&current, hash, signer).await?;
        }
        Ok(())
    }

    /// Give the child `from` the name `to`.
    ///
    /// The child's node is renamed first, then every directory blob is
    /// resealed against the snapshot the name check used, so an add that
    /// raced the check loses its swap. If a concurrent writer took `to` in
    /// the meantime the child gets its old name back.
    pub async fn rename_child(
        &self,
        dir: &AbsoluteCapability,
        from: &str,
        to: &str,
    ) -> CtfsResult<()> {
        FileProperties::directory(to)?;
        let signer = directory::recover_signer(&self.network, dir).await?;
        let entry = self.get_child(dir, from).await?;
        if from == to {
            return Ok(());
        }
        let signer = &signer;
        let cap = &entry.capability;
        let target = cap.location();
        let renamed = retry_on_conflict(
            self.cas_retries,
            (),
            CtfsError::is_retryable,
            |()| async move {
                let snapshot = directory::snapshot(&self.network, dir).await?;
                let entries = self.entries(snapshot.children()?).await?;
                let current = entries
                    .iter()
                    .find(|e| e.capability.location() == target)
                    .ok_or_else(|| CtfsError::NotFound(format!("no child named {from:?}")))?;
                let clash = entries
                    .iter()
                    .any(|e| e.name == to && e.capability.location() != target);
                if clash {
                    if current.name == to {
                        self.set_name(cap, signer, from).await?;
                    }
                    return Err(name_taken(to));
                }
                if current.name != to {
                    self.set_name(cap, signer, to).await?;
                }
                directory::reseal(&self.network, &snapshot, signer).await
            },
            |()| async { Ok::<_, CtfsError>(()) },
        )
        .await;
        match renamed {
            Ok(()) => {
                tracing::info!(from, to, "child renamed");
                Ok(())
            }
            Err(CtfsError::CasConflict { .. }) => {
                self.set_name(cap, signer, from).await?;
                Err(CtfsError::ConflictRetriesExhausted {
                    name: to.to_string(),
                    attempts: self.cas_retries + 1,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the contents of file `name` in `dir`. The file keeps its
    /// capability keys; its meta and data keys are reused unless they are
    /// dirty, in which case fresh ones are generated. The new chunks go to a
    /// fresh map key and the old chain is deleted once the link is swapped.
    pub async fn overwrite_file<R: AsyncReader>(
        &self,
        dir: &AbsoluteCapability,
        name: &str,
        reader: R,
        length: u64,
        progress: Option<ProgressFn>,
    ) -> CtfsResult<UploadedFile> {
        let signer = directory::recover_signer(&self.network, dir).await?;
        let entry = self.get_child(dir, name).await?;
        if entry.is_dir {
            return Err(CtfsError::structural(format!("{name:?} is a directory")));
        }
        let old = &entry.capability;
        let write = old.require_writable()?.clone();
        let (node, _) = self
            .network
            .get_metadata(&old.location())
            .await?
            .ok_or_else(|| CtfsError::NotFound(format!("no node at {}", old.map_key)))?;
        let file = node.file_access();
        let keys = if file.is_dirty(&old.r_base_key)? {
            tracing::debug!(name, "dirty file keys replaced on write");
            FileKeys {
                base: old.r_base_key.clone(),
                write,
                ..FileKeys::random()
            }
        } else {
            FileKeys {
                base: old.r_base_key.clone(),
                meta: file.meta_key(&old.r_base_key)?,
                data: file.data_key(&old.r_base_key)?,
                write,
            }
        };

        let parent_key = self.dir_parent_key(dir).await?;
        let mut uploader = FileUploader::new(name, reader, length, self.fragmenter)?
            .with_keys(keys)
            .with_parent(dir.location(), parent_key);
        if let Some(progress) = progress {
            uploader = uploader.with_progress(progress);
        }
        let uploaded = uploader
            .upload(&self.network, dir.owner, &signer, MapKey::random())
            .await?;

        let replacement = dir.relativise(&uploaded.capability)?;
        let old_location = old.location();
        let (signer_ref, replacement_ref, target) = (&signer, &replacement, &old_location);
        let replaced = retry_on_conflict(
            self.cas_retries,
            (),
            CtfsError::is_retryable,
            |()| directory::replace_child(&self.network, dir, signer_ref, target, replacement_ref),
            |()| async { Ok::<_, CtfsError>(()) },
        )
        .await?;
        if !replaced {
            return Err(CtfsError::NotFound(format!("{name:?} was removed during the write")));
        }
        self.delete_chunks(old_location, &signer).await?;
        tracing::info!(name, size = length, "file overwritten");
        Ok(uploaded)
    }

    /// Move file `name` under a fresh read base key, revoking readers of the
    /// old capability. Its meta and data keys become dirty and are replaced
    /// by the next write; the chunks stay where they are.
    pub async fn rekey_file(
        &self,
        dir: &AbsoluteCapability,
        name: &str,
    ) -> CtfsResult<AbsoluteCapability> {
        let signer = directory::recover_signer(&self.network, dir).await?;
        let entry = self.get_child(dir, name).await?;
        if entry.is_dir {
            return Err(CtfsError::structural(format!("{name:?} is a directory")));
        }
        let old = &entry.capability;
        let location = old.location();
        let (node, hash) = self
            .network
            .get_metadata(&location)
            .await?
            .ok_or_else(|| CtfsError::NotFound(format!("no node at {}", old.map_key)))?;
        let new_base = SymmetricKey::random();
        let moved = node.file_access().mark_dirty(&old.r_base_key, &new_base)?;
        let moved = match node {
            CryptreeNode::File(_) => CryptreeNode::File(moved),
            CryptreeNode::Dir(_) => {
                return Err(CtfsError::structural(format!("{name:?} is a directory")))
            }
        };
        self.network
            .commit(&location, &moved, Some(hash), &signer)
            .await?;

        let rekeyed = old.with_base_key(new_base);
        let replacement = dir.relativise(&rekeyed)?;
        let (signer_ref, replacement_ref, target) = (&signer, &replacement, &location);
        retry_on_conflict(
            self.cas_retries,
            (),
            CtfsError::is_retryable,
            |()| directory::replace_child(&self.network, dir, signer_ref, target, replacement_ref),
            |()| async { Ok::<_, CtfsError>(()) },
        )
        .await?;
        tracing::info!(name, "file re-keyed");
        Ok(rekeyed)
    }

    /// A reader holding one chunk at a time.
    pub async fn open(&self, cap: &AbsoluteCapability) -> CtfsResult<LazyChunkReader<B, P>>
    where
        B: Clone,
        P: Clone,
    {
        let chain = ChunkChain::open(self.network.clone(), cap).await?;
        Ok(LazyChunkReader::new(chain))
    }

    /// Like [`FileSystem::open`], checking every chunk against `tree`.
    pub async fn open_verified(
        &self,
        cap: &AbsoluteCapability,
        tree: HashTree,
    ) -> CtfsResult<LazyChunkReader<B, P>>
    where
        B: Clone,
        P: Clone,
    {
        let chain = ChunkChain::open(self.network.clone(), cap).await?;
        Ok(LazyChunkReader::new(chain.verified_by(tree)))
    }

    /// The whole file in memory.
    pub async fn read_file(&self, cap: &AbsoluteCapability) -> CtfsResult<Vec<u8>>
    where
        B: Clone,
        P: Clone,
    {
        let mut reader = self.open(cap).await?;
        let size = usize::try_from(reader.size())
            .map_err(|_| CtfsError::structural("file too large to read into memory"))?;
        let data = read_exact(&mut reader, size).await?;
        reader.close();
        Ok(data)
    }
}

impl<B, P> FileSystem<B, P>
where
    B: BlockStore + Clone + 'static,
    P: PointerStore + Clone + 'static,
{
    /// A reader prefetching the configured number of chunks ahead.
    pub async fn open_buffered(
        &self,
        cap: &AbsoluteCapability,
    ) -> CtfsResult<BufferedReader<B, P>> {
        let chain = ChunkChain::open(self.network.clone(), cap).await?;
        Ok(BufferedReader::new(chain, self.buffered_chunks))
    }
}

fn name_taken(name: &str) -> CtfsError {
    CtfsError::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("a child named {name:?} already exists"),
    ))
}
