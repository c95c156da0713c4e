//! The cryptree's view of storage: nodes behind pointers, fragments as blocks

use bytes::Bytes;
use ctfs_chunks::{content_hash, Fragment};
use ctfs_core::{ContentHash, CtfsError, CtfsResult, Location, PublicKeyHash, TransactionId};
use ctfs_crypto::SigningIdentity;
use ctfs_storage::{BlockStore, PointerStore};
use futures::future::{join_all, try_join_all};

use crate::node::CryptreeNode;

/// Block store plus pointer store. Cheap to clone when both stores are.
#[derive(Clone)]
pub struct Network<B, P> {
    blocks: B,
    pointers: P,
}

impl<B: BlockStore, P: PointerStore> Network<B, P> {
    pub fn new(blocks: B, pointers: P) -> Self {
        Self { blocks, pointers }
    }

    pub fn blocks(&self) -> &B {
        &self.blocks
    }

    pub fn pointers(&self) -> &P {
        &self.pointers
    }

    pub async fn start_transaction(&self, owner: &PublicKeyHash) -> CtfsResult<TransactionId> {
        self.blocks.start_transaction(owner).await
    }

    pub async fn close_transaction(&self, tid: &TransactionId) -> CtfsResult<()> {
        self.blocks.close_transaction(tid).await
    }

    /// The node at `location` and the hash of the block holding it, or
    /// `None` if nothing has been committed there.
    pub async fn get_metadata(
        &self,
        location: &Location,
    ) -> CtfsResult<Option<(CryptreeNode, ContentHash)>> {
        let Some(hash) = self.pointers.get(location).await? else {
            return Ok(None);
        };
        let raw = self.blocks.get(&hash).await?.ok_or_else(|| {
            CtfsError::storage(format!(
                "pointer {} names missing block {hash}",
                location.map_key
            ))
        })?;
        if content_hash(&raw) != hash {
            return Err(CtfsError::structural(format!(
                "node block {hash} does not match its address"
            )));
        }
        Ok(Some((CryptreeNode::deserialize(&raw)?, hash)))
    }

    /// Store `node` under `tid` and swing the pointer at `location` to it.
    pub async fn commit_in(
        &self,
        tid: &TransactionId,
        location: &Location,
        node: &CryptreeNode,
        expected: Option<ContentHash>,
        signer: &SigningIdentity,
    ) -> CtfsResult<ContentHash> {
        let hash = self.blocks.put(tid, Bytes::from(node.serialize())).await?;
        self.pointers.cas(location, expected, hash, signer).await?;
        tracing::debug!(map_key = %location.map_key, %hash, "node committed");
        Ok(hash)
    }

    /// [`Network::commit_in`] inside a transaction of its own.
    pub async fn commit(
        &self,
        location: &Location,
        node: &CryptreeNode,
        expected: Option<ContentHash>,
        signer: &SigningIdentity,
    ) -> CtfsResult<ContentHash> {
        let tid = self.start_transaction(&location.owner).await?;
        let committed = self
            .commit_in(&tid, location, node, expected, signer)
            .await;
        let closed = self.close_transaction(&tid).await;
        let hash = committed?;
        closed?;
        Ok(hash)
    }

    /// Remove the pointer at `location` if it still names `expected`.
    pub async fn delete(
        &self,
        location: &Location,
        expected: ContentHash,
        signer: &SigningIdentity,
    ) -> CtfsResult<()> {
        self.pointers.remove(location, expected, signer).await
    }

    pub async fn upload_fragments(
        &self,
        tid: &TransactionId,
        fragments: &[Fragment],
    ) -> CtfsResult<Vec<ContentHash>> {
        try_join_all(
            fragments
                .iter()
                .map(|fragment| self.blocks.put(tid, fragment.data().clone())),
        )
        .await
    }

    /// Fetch fragments by hash. A missing block or one whose bytes do not
    /// hash to its address comes back as `None`.
    pub async fn download_fragments(
        &self,
        hashes: &[ContentHash],
    ) -> CtfsResult<Vec<Option<Fragment>>> {
        let fetched = join_all(hashes.iter().map(|hash| self.blocks.get(hash))).await;
        fetched
            .into_iter()
            .zip(hashes)
            .map(|(result, hash)| {
                Ok(match result? {
                    Some(data) if content_hash(&data) == *hash => Some(Fragment::new(data)),
                    Some(_) => {
                        tracing::warn!(%hash, "fragment failed its content hash check");
                        None
                    }
                    None => {
                        tracing::debug!(%hash, "fragment missing");
                        None
                    }
                })
            })
            .collect()
    }
}
