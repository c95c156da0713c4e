//! Mutable pointers from node locations to block hashes
//!
//! Every update is a compare-and-swap: the caller names the hash it last
//! read (`None` for "nothing there yet") and the store refuses the write with
//! [`CtfsError::CasConflict`] if someone else got there first. Only an
//! identity whose public-key hash equals the location's writer may update it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use ctfs_core::{ContentHash, CtfsError, CtfsResult, Location};
use ctfs_crypto::SigningIdentity;
use opendal::Operator;
use tokio::sync::Mutex;

pub trait PointerStore: Send + Sync {
    fn get(&self, location: &Location)
        -> impl Future<Output = CtfsResult<Option<ContentHash>>> + Send;

    fn cas(
        &self,
        location: &Location,
        expected: Option<ContentHash>,
        new: ContentHash,
        signer: &SigningIdentity,
    ) -> impl Future<Output = CtfsResult<()>> + Send;

    /// Compare-and-delete.
    fn remove(
        &self,
        location: &Location,
        expected: ContentHash,
        signer: &SigningIdentity,
    ) -> impl Future<Output = CtfsResult<()>> + Send;
}

fn authorize(location: &Location, signer: &SigningIdentity) -> CtfsResult<()> {
    if signer.authorizes(&location.writer) {
        Ok(())
    } else {
        Err(CtfsError::NotWritable(format!(
            "signer {} cannot write under {}",
            signer.public_key_hash(),
            location.writer
        )))
    }
}

fn check_expected(
    location: &Location,
    current: Option<ContentHash>,
    expected: Option<ContentHash>,
) -> CtfsResult<()> {
    if current != expected {
        tracing::debug!(
            map_key = %location.map_key,
            ?current,
            ?expected,
            "pointer compare-and-swap lost"
        );
        return Err(CtfsError::CasConflict {
            location: *location,
        });
    }
    Ok(())
}

/// Process-local pointer store for tests.
#[derive(Clone, Default)]
pub struct MemoryPointerStore {
    pointers: Arc<Mutex<HashMap<Location, ContentHash>>>,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.pointers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl PointerStore for MemoryPointerStore {
    async fn get(&self, location: &Location) -> CtfsResult<Option<ContentHash>> {
        Ok(self.pointers.lock().await.get(location).copied())
    }

    async fn cas(
        &self,
        location: &Location,
        expected: Option<ContentHash>,
        new: ContentHash,
        signer: &SigningIdentity,
    ) -> CtfsResult<()> {
        authorize(location, signer)?;
        let mut pointers = self.pointers.lock().await;
        check_expected(location, pointers.get(location).copied(), expected)?;
        pointers.insert(*location, new);
        Ok(())
    }

    async fn remove(
        &self,
        location: &Location,
        expected: ContentHash,
        signer: &SigningIdentity,
    ) -> CtfsResult<()> {
        authorize(location, signer)?;
        let mut pointers = self.pointers.lock().await;
        check_expected(location, pointers.get(location).copied(), Some(expected))?;
        pointers.remove(location);
        Ok(())
    }
}

/// Pointer store over any OpenDAL backend.
///
/// Each pointer is a 32-byte file at `pointers/{owner}/{writer}/{map key}`.
/// OpenDAL has no conditional write common to all backends, so the
/// read-compare-write runs under a lock held by this store; concurrent
/// writers must share one `OpendalPointerStore` (it is cheap to clone).
#[derive(Clone)]
pub struct OpendalPointerStore {
    op: Operator,
    lock: Arc<Mutex<()>>,
}

impl OpendalPointerStore {
    pub fn new(op: Operator) -> Self {
        Self {
            op,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn path(location: &Location) -> String {
        format!(
            "pointers/{}/{}/{}",
            location.owner.to_hex(),
            location.writer.to_hex(),
            location.map_key.to_hex()
        )
    }

    async fn read(&self, location: &Location) -> CtfsResult<Option<ContentHash>> {
        match self.op.read(&Self::path(location)).await {
            Ok(buf) => ContentHash::try_from_slice(&buf.to_bytes()).map(Some),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CtfsError::storage(format!(
                "reading pointer {}: {e}",
                location.map_key
            ))),
        }
    }
}

impl PointerStore for OpendalPointerStore {
    async fn get(&self, location: &Location) -> CtfsResult<Option<ContentHash>> {
        self.read(location).await
    }

    async fn cas(
        &self,
        location: &Location,
        expected: Option<ContentHash>,
        new: ContentHash,
        signer: &SigningIdentity,
    ) -> CtfsResult<()> {
        authorize(location, signer)?;
        let _guard = self.lock.lock().await;
        check_expected(location, self.read(location).await?, expected)?;
        self.op
            .write(&Self::path(location), new.as_bytes().to_vec())
            .await
            .map_err(|e| CtfsError::storage(format!("writing pointer {}: {e}", location.map_key)))?;
        Ok(())
    }

    async fn remove(
        &self,
        location: &Location,
        expected: ContentHash,
        signer: &SigningIdentity,
    ) -> CtfsResult<()> {
        authorize(location, signer)?;
        let _guard = self.lock.lock().await;
        check_expected(location, self.read(location).await?, Some(expected))?;
        self.op
            .delete(&Self::path(location))
            .await
            .map_err(|e| CtfsError::storage(format!("deleting pointer {}: {e}", location.map_key)))
    }
}
