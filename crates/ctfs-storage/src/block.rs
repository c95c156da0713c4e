//! Content-addressed, immutable block storage
//!
//! Blocks are written under a [`TransactionId`] opened by the writer. The
//! store only accepts puts inside an open transaction; closing it declares
//! the group complete. Blocks are never deleted by the cryptree layer.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use ctfs_chunks::content_hash;
use ctfs_core::{ContentHash, CtfsError, CtfsResult, PublicKeyHash, TransactionId};
use opendal::Operator;
use tokio::sync::Mutex;

pub trait BlockStore: Send + Sync {
    fn start_transaction(
        &self,
        owner: &PublicKeyHash,
    ) -> impl Future<Output = CtfsResult<TransactionId>> + Send;

    /// Store `data` and return its content hash. Storing the same bytes twice
    /// is a no-op.
    fn put(
        &self,
        tid: &TransactionId,
        data: Bytes,
    ) -> impl Future<Output = CtfsResult<ContentHash>> + Send;

    /// `None` when no block with that hash exists.
    fn get(&self, hash: &ContentHash) -> impl Future<Output = CtfsResult<Option<Bytes>>> + Send;

    fn close_transaction(&self, tid: &TransactionId) -> impl Future<Output = CtfsResult<()>> + Send;
}

#[derive(Default)]
struct MemoryBlocks {
    blocks: HashMap<ContentHash, Bytes>,
    /// Open transactions and the blocks written under each.
    transactions: HashMap<TransactionId, HashSet<ContentHash>>,
}

/// Process-local block store for tests.
#[derive(Clone, Default)]
pub struct MemoryBlockStore {
    inner: Arc<Mutex<MemoryBlocks>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.blocks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn open_transactions(&self) -> usize {
        self.inner.lock().await.transactions.len()
    }

    /// Drop a block, simulating loss in the backing store.
    pub async fn remove(&self, hash: &ContentHash) -> bool {
        self.inner.lock().await.blocks.remove(hash).is_some()
    }

    /// Replace a block's bytes without changing its address.
    pub async fn corrupt(&self, hash: &ContentHash, data: Bytes) -> bool {
        match self.inner.lock().await.blocks.get_mut(hash) {
            Some(slot) => {
                *slot = data;
                true
            }
            None => false,
        }
    }
}

impl BlockStore for MemoryBlockStore {
    async fn start_transaction(&self, owner: &PublicKeyHash) -> CtfsResult<TransactionId> {
        let tid = TransactionId::new();
        self.inner
            .lock()
            .await
            .transactions
            .insert(tid, HashSet::new());
        tracing::trace!(%tid, %owner, "transaction started");
        Ok(tid)
    }

    async fn put(&self, tid: &TransactionId, data: Bytes) -> CtfsResult<ContentHash> {
        let hash = content_hash(&data);
        let mut inner = self.inner.lock().await;
        let written = inner
            .transactions
            .get_mut(tid)
            .ok_or_else(|| CtfsError::storage(format!("transaction {tid} is not open")))?;
        written.insert(hash);
        inner.blocks.entry(hash).or_insert(data);
        Ok(hash)
    }

    async fn get(&self, hash: &ContentHash) -> CtfsResult<Option<Bytes>> {
        Ok(self.inner.lock().await.blocks.get(hash).cloned())
    }

    async fn close_transaction(&self, tid: &TransactionId) -> CtfsResult<()> {
        match self.inner.lock().await.transactions.remove(tid) {
            Some(written) => {
                tracing::trace!(%tid, blocks = written.len(), "transaction closed");
                Ok(())
            }
            None => Err(CtfsError::storage(format!("transaction {tid} is not open"))),
        }
    }
}

/// Block store over any OpenDAL backend.
///
/// Layout: `blocks/{hex hash}` for data and an empty `transactions/{id}`
/// marker for every open transaction.
#[derive(Clone)]
pub struct OpendalBlockStore {
    op: Operator,
}

impl OpendalBlockStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    fn block_path(hash: &ContentHash) -> String {
        format!("blocks/{}", hash.to_hex())
    }

    fn transaction_path(tid: &TransactionId) -> String {
        format!("transactions/{tid}")
    }
}

impl BlockStore for OpendalBlockStore {
    async fn start_transaction(&self, owner: &PublicKeyHash) -> CtfsResult<TransactionId> {
        let tid = TransactionId::new();
        self.op
            .write(&Self::transaction_path(&tid), owner.as_bytes().to_vec())
            .await
            .map_err(|e| CtfsError::storage(format!("opening transaction {tid}: {e}")))?;
        Ok(tid)
    }

    async fn put(&self, tid: &TransactionId, data: Bytes) -> CtfsResult<ContentHash> {
        let marker = Self::transaction_path(tid);
        if !self
            .op
            .exists(&marker)
            .await
            .map_err(CtfsError::storage)?
        {
            return Err(CtfsError::storage(format!("transaction {tid} is not open")));
        }

        let hash = content_hash(&data);
        let path = Self::block_path(&hash);
        if !self.op.exists(&path).await.map_err(CtfsError::storage)? {
            self.op
                .write(&path, data)
                .await
                .map_err(|e| CtfsError::storage(format!("writing block {hash}: {e}")))?;
            tracing::trace!(%hash, "block written");
        }
        Ok(hash)
    }

    async fn get(&self, hash: &ContentHash) -> CtfsResult<Option<Bytes>> {
        match self.op.read(&Self::block_path(hash)).await {
            Ok(buf) => Ok(Some(buf.to_bytes())),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CtfsError::storage(format!("reading block {hash}: {e}"))),
        }
    }

    async fn close_transaction(&self, tid: &TransactionId) -> CtfsResult<()> {
        self.op
            .delete(&Self::transaction_path(tid))
            .await
            .map_err(|e| CtfsError::storage(format!("closing transaction {tid}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryBlockStore::new();
        let owner = PublicKeyHash::random();
        let tid = store.start_transaction(&owner).await.unwrap();

        let hash = store.put(&tid, Bytes::from_static(b"block")).await.unwrap();
        assert_eq!(hash, content_hash(b"block"));
        assert_eq!(
            store.get(&hash).await.unwrap(),
            Some(Bytes::from_static(b"block"))
        );
        store.close_transaction(&tid).await.unwrap();
        assert_eq!(store.open_transactions().await, 0);
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryBlockStore::new();
        let tid = store
            .start_transaction(&PublicKeyHash::random())
            .await
            .unwrap();
        let a = store.put(&tid, Bytes::from_static(b"same")).await.unwrap();
        let b = store.put(&tid, Bytes::from_static(b"same")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_put_requires_open_transaction() {
        let store = MemoryBlockStore::new();
        let tid = store
            .start_transaction(&PublicKeyHash::random())
            .await
            .unwrap();
        store.close_transaction(&tid).await.unwrap();

        let err = store.put(&tid, Bytes::from_static(b"late")).await.unwrap_err();
        assert!(matches!(err, CtfsError::Storage(_)));
        assert!(store.close_transaction(&tid).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_block_is_none() {
        let store = MemoryBlockStore::new();
        assert!(store
            .get(&ContentHash::random())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_remove_and_corrupt() {
        let store = MemoryBlockStore::new();
        let tid = store
            .start_transaction(&PublicKeyHash::random())
            .await
            .unwrap();
        let hash = store.put(&tid, Bytes::from_static(b"x")).await.unwrap();
        assert!(store.corrupt(&hash, Bytes::from_static(b"y")).await);
        assert_eq!(
            store.get(&hash).await.unwrap(),
            Some(Bytes::from_static(b"y"))
        );
        assert!(store.remove(&hash).await);
        assert!(store.get(&hash).await.unwrap().is_none());
    }
}
