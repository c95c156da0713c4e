//! Directory reads and single-attempt updates against the network
//!
//! Each update reads the blob it changes, builds the new version and commits
//! it with compare-and-swap on the hash it read. A lost swap surfaces as
//! [`CtfsError::CasConflict`]; retrying is the caller's business.

use std::collections::HashSet;

use ctfs_core::{ContentHash, CtfsError, CtfsResult, Location, MapKey};
use ctfs_crypto::{SigningIdentity, SymmetricKey};
use ctfs_storage::{BlockStore, PointerStore};

use crate::capability::{AbsoluteCapability, RelativeCapability};
use crate::network::Network;
use crate::node::{ChildLink, CryptreeNode, DirAccess};

/// Fetch the directory blob named by `cap`.
pub async fn read_dir<B: BlockStore, P: PointerStore>(
    network: &Network<B, P>,
    cap: &AbsoluteCapability,
) -> CtfsResult<(DirAccess, ContentHash)> {
    match network.get_metadata(&cap.location()).await? {
        Some((CryptreeNode::Dir(dir), hash)) => Ok((dir, hash)),
        Some((CryptreeNode::File(_), _)) => Err(CtfsError::structural(format!(
            "{} is a file, not a directory",
            cap.map_key
        ))),
        None => Err(CtfsError::NotFound(format!(
            "no directory at {}",
            cap.map_key
        ))),
    }
}

/// The signing identity for writes under `cap`, from the node's writer link.
pub async fn recover_signer<B: BlockStore, P: PointerStore>(
    network: &Network<B, P>,
    cap: &AbsoluteCapability,
) -> CtfsResult<SigningIdentity> {
    let w_key = cap.require_writable()?;
    let (node, _) = network
        .get_metadata(&cap.location())
        .await?
        .ok_or_else(|| CtfsError::NotFound(format!("no node at {}", cap.map_key)))?;
    let signer = node.signer(w_key)?.ok_or_else(|| {
        CtfsError::NotWritable(format!("node {} has no writer link", cap.map_key))
    })?;
    if !signer.authorizes(&cap.writer) {
        return Err(CtfsError::NotWritable(format!(
            "writer link of {} does not match writer {}",
            cap.map_key, cap.writer
        )));
    }
    Ok(signer)
}

/// Capability of the blob following the one `cap` names, if any.
fn next_blob(dir: &DirAccess, cap: &AbsoluteCapability) -> CtfsResult<Option<AbsoluteCapability>> {
    Ok(dir
        .more_children(&cap.r_base_key)?
        .map(|(location, key)| cap.with_map_key(location.map_key).with_base_key(key)))
}

/// Every blob of a directory as read at one point, head first, with the
/// hash each was read at.
#[derive(Debug, Clone)]
pub struct DirSnapshot {
    blobs: Vec<(AbsoluteCapability, DirAccess, ContentHash)>,
}

impl DirSnapshot {
    /// Capability and read hash of every blob in the chain.
    pub fn blobs(&self) -> impl Iterator<Item = (&AbsoluteCapability, ContentHash)> {
        self.blobs.iter().map(|(cap, _, hash)| (cap, *hash))
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Every child across the chain, without duplicates.
    pub fn children(&self) -> CtfsResult<Vec<ChildLink>> {
        let mut seen = HashSet::new();
        let mut children = Vec::new();
        for (cap, dir, _) in &self.blobs {
            for child in dir.children(cap)? {
                if seen.insert(child.capability.location()) {
                    children.push(child);
                }
            }
        }
        Ok(children)
    }
}

/// Read the head blob named by `cap` and every continuation after it.
pub async fn snapshot<B: BlockStore, P: PointerStore>(
    network: &Network<B, P>,
    cap: &AbsoluteCapability,
) -> CtfsResult<DirSnapshot> {
    let mut blobs = Vec::new();
    let mut blob = Some(cap.clone());
    while let Some(current) = blob {
        let (dir, hash) = read_dir(network, &current).await?;
        blob = next_blob(&dir, &current)?;
        blobs.push((current, dir, hash));
    }
    Ok(DirSnapshot { blobs })
}

/// Every child of the directory, following continuation blobs, without
/// duplicates.
pub async fn get_children<B: BlockStore, P: PointerStore>(
    network: &Network<B, P>,
    cap: &AbsoluteCapability,
) -> CtfsResult<Vec<ChildLink>> {
    snapshot(network, cap).await?.children()
}

/// Link `child` into the first blob of `snapshot` with room, or start a
/// continuation blob after the last one when all are full. The commit
/// expects the blob unchanged since the snapshot, so any concurrent add
/// makes this one conflict.
pub async fn add_child<B: BlockStore, P: PointerStore>(
    network: &Network<B, P>,
    snapshot: &DirSnapshot,
    signer: &SigningIdentity,
    child: &RelativeCapability,
    is_dir: bool,
) -> CtfsResult<()> {
    if let Some((cap, dir, hash)) = snapshot.blobs.iter().find(|(_, dir, _)| !dir.is_full()) {
        let updated = dir.with_child(&cap.r_base_key, child, is_dir)?;
        network
            .commit(&cap.location(), &CryptreeNode::Dir(updated), Some(*hash), signer)
            .await?;
        return Ok(());
    }
    let Some((last, dir, hash)) = snapshot.blobs.last() else {
        return Err(CtfsError::structural("directory snapshot holds no blobs"));
    };

    let next_key = SymmetricKey::random();
    let next_location = last.location().with_map_key(MapKey::random());
    let next = dir
        .continuation(&last.r_base_key, &next_key)?
        .with_child(&next_key, child, is_dir)?;
    let next_hash = network
        .commit(&next_location, &CryptreeNode::Dir(next), None, signer)
        .await?;
    let linked = dir.with_more_children(&last.r_base_key, &next_key, &next_location)?;
    if let Err(e) = network
        .commit(&last.location(), &CryptreeNode::Dir(linked), Some(*hash), signer)
        .await
    {
        if let Err(cleanup) = network.delete(&next_location, next_hash, signer).await {
            tracing::warn!(map_key = %next_location.map_key, error = %cleanup, "unlinked continuation blob left behind");
        }
        return Err(e);
    }
    tracing::debug!(map_key = %next_location.map_key, "directory continuation blob created");
    Ok(())
}

/// Re-commit every blob of `snapshot` with fresh encryption and the same
/// contents, each expecting the hash it was read at. Afterwards any update
/// prepared against the same snapshot conflicts.
pub async fn reseal<B: BlockStore, P: PointerStore>(
    network: &Network<B, P>,
    snapshot: &DirSnapshot,
    signer: &SigningIdentity,
) -> CtfsResult<()> {
    for (cap, dir, hash) in &snapshot.blobs {
        let props = dir.properties(&cap.r_base_key)?;
        let resealed = dir.with_properties(&cap.r_base_key, &props)?;
        network
            .commit(&cap.location(), &CryptreeNode::Dir(resealed), Some(*hash), signer)
            .await?;
    }
    Ok(())
}

/// Unlink the child at `target`. Returns false if no blob links it.
pub async fn remove_child<B: BlockStore, P: PointerStore>(
    network: &Network<B, P>,
    cap: &AbsoluteCapability,
    signer: &SigningIdentity,
    target: &Location,
) -> CtfsResult<bool> {
    let mut blob = Some(cap.clone());
    while let Some(current) = blob {
        let (dir, hash) = read_dir(network, &current).await?;
        if let Some(updated) = dir.without_child(&current, target)? {
            network
                .commit(&current.location(), &CryptreeNode::Dir(updated), Some(hash), signer)
                .await?;
            return Ok(true);
        }
        blob = next_blob(&dir, &current)?;
    }
    Ok(false)
}

/// Point the link at `target` to `replacement` in a single commit.
pub async fn replace_child<B: BlockStore, P: PointerStore>(
    network: &Network<B, P>,
    cap: &AbsoluteCapability,
    signer: &SigningIdentity,
    target: &Location,
    replacement: &RelativeCapability,
) -> CtfsResult<bool> {
    let mut blob = Some(cap.clone());
    while let Some(current) = blob {
        let (dir, hash) = read_dir(network, &current).await?;
        if let Some(updated) = dir.with_child_replaced(&current, target, replacement)? {
            network
                .commit(&current.location(), &CryptreeNode::Dir(updated), Some(hash), signer)
                .await?;
            return Ok(true);
        }
        blob = next_blob(&dir, &current)?;
    }
    Ok(false)
}
