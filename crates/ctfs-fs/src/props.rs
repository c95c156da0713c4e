//! File and directory properties, stored encrypted under a node's meta key

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BufMut;
use ctfs_core::codec::{put_presence, put_var_bytes, Decoder};
use ctfs_core::{CtfsError, CtfsResult};

/// Longest permitted name, in characters.
pub const MAX_NAME_CHARS: usize = 255;

/// Length of a per-file stream secret.
pub const STREAM_SECRET_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProperties {
    pub name: String,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub modified: i64,
    pub hidden: bool,
    pub thumbnail: Option<Vec<u8>>,
    /// Seeds the chunk map-key chain. Directories have none.
    pub stream_secret: Option<[u8; STREAM_SECRET_SIZE]>,
}

pub fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn check_name(name: &str) -> CtfsResult<()> {
    if name.is_empty() {
        return Err(CtfsError::structural("name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(CtfsError::structural(format!(
            "name longer than {MAX_NAME_CHARS} characters"
        )));
    }
    if name.contains('/') {
        return Err(CtfsError::structural(format!("name {name:?} contains '/'")));
    }
    Ok(())
}

impl FileProperties {
    /// Properties for a file, modified now.
    pub fn file(
        name: impl Into<String>,
        size: u64,
        stream_secret: [u8; STREAM_SECRET_SIZE],
    ) -> CtfsResult<Self> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self {
            name,
            size,
            modified: now_epoch_secs(),
            hidden: false,
            thumbnail: None,
            stream_secret: Some(stream_secret),
        })
    }

    pub fn directory(name: impl Into<String>) -> CtfsResult<Self> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self {
            name,
            size: 0,
            modified: now_epoch_secs(),
            hidden: false,
            thumbnail: None,
            stream_secret: None,
        })
    }

    /// Payload of continuation nodes: later chunks of a file and overflow
    /// blobs of a directory.
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            size: 0,
            modified: 0,
            hidden: false,
            thumbnail: None,
            stream_secret: None,
        }
    }

    pub fn with_name(&self, name: impl Into<String>) -> CtfsResult<Self> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self {
            name,
            modified: now_epoch_secs(),
            ..self.clone()
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let name = self.name.as_bytes();
        buf.put_u16(name.len() as u16);
        buf.put_slice(name);
        buf.put_u64(self.size);
        buf.put_i64(self.modified);
        buf.put_u8(u8::from(self.hidden));
        put_presence(&mut buf, self.thumbnail.is_some());
        if let Some(thumb) = &self.thumbnail {
            put_var_bytes(&mut buf, thumb);
        }
        put_presence(&mut buf, self.stream_secret.is_some());
        if let Some(secret) = &self.stream_secret {
            buf.put_slice(secret);
        }
        buf
    }

    pub fn deserialize(raw: &[u8]) -> CtfsResult<Self> {
        let mut d = Decoder::new(raw);
        let name_len = d.read_u16("name length")? as usize;
        let name = std::str::from_utf8(d.read_slice(name_len, "name")?)
            .map_err(|e| CtfsError::structural(format!("name is not UTF-8: {e}")))?
            .to_string();
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(CtfsError::structural("stored name is too long"));
        }
        let size = d.read_u64("size")?;
        let modified = d.read_i64("modified")?;
        let hidden = d.read_bool("hidden")?;
        let thumbnail = d.read_option("thumbnail", |d| {
            d.read_var_bytes("thumbnail").map(<[u8]>::to_vec)
        })?;
        let stream_secret = d.read_option("stream secret", |d| d.read_array("stream secret"))?;
        d.finish("file properties")?;
        Ok(Self {
            name,
            size,
            modified,
            hidden,
            thumbnail,
            stream_secret,
        })
    }
}
