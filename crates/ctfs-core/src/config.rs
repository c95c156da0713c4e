use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CtfsError, CtfsResult};

/// Erasure parameters accepted for both `n_original` and `n_allowed_failures`.
pub const ALLOWED_ERASURE_PARAMS: [u8; 5] = [5, 10, 20, 40, 80];

/// Top-level configuration (loaded from ctfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CtfsConfig {
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub reader: ReaderConfig,
    pub directory: DirectoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend: "fs" (local directory) or "memory"
    pub backend: String,
    /// Root directory for the "fs" backend
    pub root: PathBuf,
    /// Retry budget for transient backend failures
    pub retry_max_times: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Data shares per chunk when erasure coding
    pub n_original: u8,
    /// Tolerated missing shares; 0 selects plain splitting
    pub n_allowed_failures: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Chunks prefetched ahead of the read position
    pub buffered_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Retries after a lost compare-and-swap before giving up
    pub cas_retries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: PathBuf::from("~/.local/share/ctfs/store"),
            retry_max_times: 5,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            n_original: 40,
            n_allowed_failures: 0,
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self { buffered_chunks: 2 }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self { cas_retries: 2 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl UploadConfig {
    /// `None` means plain splitting; otherwise validated erasure parameters.
    pub fn erasure_params(&self) -> CtfsResult<Option<(u8, u8)>> {
        if self.n_allowed_failures == 0 {
            return Ok(None);
        }
        validate_erasure_params(self.n_original, self.n_allowed_failures)?;
        Ok(Some((self.n_original, self.n_allowed_failures)))
    }
}

pub fn validate_erasure_params(n_original: u8, n_allowed_failures: u8) -> CtfsResult<()> {
    if !ALLOWED_ERASURE_PARAMS.contains(&n_original) {
        return Err(CtfsError::Config(format!(
            "n_original must be one of {ALLOWED_ERASURE_PARAMS:?}, got {n_original}"
        )));
    }
    if !ALLOWED_ERASURE_PARAMS.contains(&n_allowed_failures) {
        return Err(CtfsError::Config(format!(
            "n_allowed_failures must be one of {ALLOWED_ERASURE_PARAMS:?}, got {n_allowed_failures}"
        )));
    }
    Ok(())
}

impl CtfsConfig {
    /// Load a config file, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> CtfsResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CtfsError::Config(format!("parsing {}: {e}", path.display())))
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
