//! Chunk, encrypt, fragment and commit a byte stream as a file
//!
//! Chunk `i` is committed only after all of its fragments are stored, and
//! its node names chunk `i + 1` (except on the last chunk). The first
//! chunk's node also carries the file's properties, its parent link and its
//! writer link; later chunks carry empty properties. Every block of one
//! upload goes into a single block-store transaction.

use ctfs_chunks::{
    chunk_count, effective_chunk_length, next_map_key, Chunk, Fragmenter, HashTree,
    HashTreeBuilder,
};
use ctfs_core::{CtfsResult, Location, MapKey, PublicKeyHash, TransactionId};
use ctfs_crypto::{random_nonce, SigningIdentity, SymmetricKey, SymmetricLocationLink};
use ctfs_storage::{BlockStore, PointerStore};
use rand::RngCore;

use crate::capability::AbsoluteCapability;
use crate::network::Network;
use crate::node::{CryptreeNode, FileAccess};
use crate::props::{FileProperties, STREAM_SECRET_SIZE};
use crate::reader::AsyncReader;
use crate::retriever::EncryptedChunkRetriever;

/// Progress callback: (bytes committed, total bytes).
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Keys a file is written under. The read base key doubles as the parent
/// key of every chunk node.
#[derive(Clone)]
pub struct FileKeys {
    pub base: SymmetricKey,
    pub meta: SymmetricKey,
    pub data: SymmetricKey,
    pub write: SymmetricKey,
}

impl FileKeys {
    pub fn random() -> Self {
        Self {
            base: SymmetricKey::random(),
            meta: SymmetricKey::random(),
            data: SymmetricKey::random(),
            write: SymmetricKey::random(),
        }
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Writable capability of the first chunk.
    pub capability: AbsoluteCapability,
    pub hash_tree: HashTree,
    pub chunks: u64,
}

pub struct FileUploader<R> {
    reader: R,
    props: FileProperties,
    keys: FileKeys,
    parent: Option<(Location, SymmetricKey)>,
    fragmenter: Fragmenter,
    progress: Option<ProgressFn>,
}

impl<R: AsyncReader> FileUploader<R> {
    /// Upload `length` bytes from `reader` as `name`, under fresh keys and a
    /// fresh stream secret.
    pub fn new(
        name: &str,
        reader: R,
        length: u64,
        fragmenter: Fragmenter,
    ) -> CtfsResult<Self> {
        let mut secret = [0u8; STREAM_SECRET_SIZE];
        rand::thread_rng().fill_bytes(&mut secret);
        Ok(Self {
            reader,
            props: FileProperties::file(name, length, secret)?,
            keys: FileKeys::random(),
            parent: None,
            fragmenter,
            progress: None,
        })
    }

    pub fn with_keys(mut self, keys: FileKeys) -> Self {
        self.keys = keys;
        self
    }

    /// The containing directory's location and parent key.
    pub fn with_parent(mut self, location: Location, parent_key: SymmetricKey) -> Self {
        self.parent = Some((location, parent_key));
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn properties(&self) -> &FileProperties {
        &self.props
    }

    /// Write every chunk, starting at `first_map_key` under `signer`'s
    /// writer hash. The reader is rewound first.
    pub async fn upload<B: BlockStore, P: PointerStore>(
        mut self,
        network: &Network<B, P>,
        owner: PublicKeyHash,
        signer: &SigningIdentity,
        first_map_key: MapKey,
    ) -> CtfsResult<UploadedFile> {
        let first = Location::new(owner, signer.public_key_hash(), first_map_key);
        let tid = network.start_transaction(&owner).await?;
        let uploaded = self.upload_chunks(network, &tid, first, signer).await;
        let closed = network.close_transaction(&tid).await;
        let hash_tree = uploaded?;
        closed?;

        let chunks = chunk_count(self.props.size);
        tracing::info!(
            name = %self.props.name,
            size = self.props.size,
            chunks,
            root = %hex::encode(hash_tree.root_hash()),
            "upload complete"
        );
        Ok(UploadedFile {
            capability: AbsoluteCapability::new(
                owner,
                first.writer,
                first_map_key,
                self.keys.base.clone(),
                Some(self.keys.write.clone()),
            ),
            hash_tree,
            chunks,
        })
    }

    async fn upload_chunks<B: BlockStore, P: PointerStore>(
        &mut self,
        network: &Network<B, P>,
        tid: &TransactionId,
        first: Location,
        signer: &SigningIdentity,
    ) -> CtfsResult<HashTree> {
        let size = self.props.size;
        let count = chunk_count(size);
        let secret = self.props.stream_secret.unwrap_or_default();
        let mut hashes = HashTreeBuilder::new(size);
        let mut map_key = first.map_key;
        let mut done = 0u64;

        self.reader.reset().await?;
        for index in 0..count {
            let mut data = vec![0u8; effective_chunk_length(size, index)];
            self.reader.read_into_array(&mut data).await?;
            hashes.set_chunk(index, &data)?;
            let len = data.len() as u64;

            let chunk = Chunk::new(data, self.keys.data.clone(), map_key, random_nonce())?;
            let encrypted = chunk.encrypt()?;
            let fragments = encrypted.generate_fragments(&self.fragmenter);
            let fragment_hashes = network.upload_fragments(tid, &fragments).await?;

            let next = (index + 1 < count).then(|| next_map_key(&secret, &map_key));
            let retriever = EncryptedChunkRetriever {
                nonce: *chunk.nonce(),
                auth: *encrypted.auth(),
                cipher_len: encrypted.cipher().len() as u32,
                fragmenter: self.fragmenter,
                fragment_hashes,
                next_map_key: next,
            };
            let node = self.chunk_node(index, retriever, signer)?;
            network
                .commit_in(tid, &first.with_map_key(map_key), &node, None, signer)
                .await?;
            tracing::debug!(index, fragments = fragments.len(), %map_key, "chunk committed");

            done += len;
            if let Some(progress) = &self.progress {
                progress(done, size);
            }
            if let Some(next) = next {
                map_key = next;
            }
        }
        hashes.complete()
    }

    fn chunk_node(
        &self,
        index: u64,
        retriever: EncryptedChunkRetriever,
        signer: &SigningIdentity,
    ) -> CtfsResult<CryptreeNode> {
        let keys = &self.keys;
        let (props, parent_link, writer_link) = if index == 0 {
            let parent_link = self
                .parent
                .as_ref()
                .map(|(location, key)| SymmetricLocationLink::create(&keys.base, key, location))
                .transpose()?;
            (
                self.props.clone(),
                parent_link,
                Some(signer.seal_under(&keys.write)?),
            )
        } else {
            (FileProperties::empty(), None, None)
        };
        Ok(CryptreeNode::File(FileAccess::create(
            &keys.base,
            &keys.meta,
            &keys.data,
            &props,
            Some(retriever),
            parent_link,
            writer_link,
        )?))
    }
}
