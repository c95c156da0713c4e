//! OpenDAL Operator factory for ctfs storage backends

use anyhow::{Context, Result};
use ctfs_core::config::{expand_tilde, StorageConfig};
use opendal::Operator;

/// Build an operator for the configured backend.
///
/// `fs` stores everything under `storage.root`; `memory` is process-local and
/// mostly useful for trying things out.
pub fn build_operator(storage: &StorageConfig) -> Result<Operator> {
    let op = match storage.backend.as_str() {
        "fs" => {
            let root = expand_tilde(&storage.root);
            let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
            Operator::new(builder)
                .with_context(|| format!("creating OpenDAL fs operator at {}", root.display()))?
                .finish()
        }
        "memory" => Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish(),
        other => anyhow::bail!("unknown storage backend {other:?} (expected \"fs\" or \"memory\")"),
    };

    Ok(op
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(storage.retry_max_times)
                .with_jitter(),
        ))
}

const MARKER_PATH: &str = ".ctfs-health";

/// Round-trip a small object through the backend: the store is usable only
/// if it can write, read back and delete.
pub async fn check_health(op: &Operator) -> Result<()> {
    let marker = ctfs_core::TransactionId::new().to_string();
    op.write(MARKER_PATH, marker.clone().into_bytes())
        .await
        .context("storage health check: write failed")?;
    let read = op
        .read(MARKER_PATH)
        .await
        .context("storage health check: read failed")?
        .to_vec();
    if read != marker.as_bytes() {
        anyhow::bail!("storage health check: marker read back different bytes");
    }
    op.delete(MARKER_PATH)
        .await
        .context("storage health check: delete failed")?;
    Ok(())
}
