//! Local files as upload input

use std::io::SeekFrom;
use std::path::Path;

use ctfs_core::{CtfsError, CtfsResult};
use ctfs_fs::AsyncReader;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Seekable reader over a file on disk.
pub struct LocalFileReader {
    file: File,
    len: u64,
    closed: bool,
}

impl LocalFileReader {
    pub async fn open(path: &Path) -> CtfsResult<Self> {
        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            file,
            len,
            closed: false,
        })
    }

    pub fn size(&self) -> u64 {
        self.len
    }

    fn check_open(&self) -> CtfsResult<()> {
        if self.closed {
            return Err(CtfsError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "reader is closed",
            )));
        }
        Ok(())
    }
}

impl AsyncReader for LocalFileReader {
    async fn read_into_array(&mut self, buf: &mut [u8]) -> CtfsResult<usize> {
        self.check_open()?;
        self.file.read_exact(buf).await?;
        Ok(buf.len())
    }

    async fn seek(&mut self, offset: u64) -> CtfsResult<()> {
        self.check_open()?;
        if offset > self.len {
            return Err(CtfsError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("seek to {offset} passes end of file at {}", self.len),
            )));
        }
        self.file.seek(SeekFrom::Start(offset)).await?;
        Ok(())
    }

    async fn reset(&mut self) -> CtfsResult<()> {
        self.seek(0).await
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_seeks_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.bin");
        tokio::fs::write(&path, b"hello, cryptree").await.unwrap();

        let mut reader = LocalFileReader::open(&path).await.unwrap();
        assert_eq!(reader.size(), 15);
        let mut buf = [0u8; 5];
        reader.read_into_array(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        reader.seek(7).await.unwrap();
        let mut rest = [0u8; 8];
        reader.read_into_array(&mut rest).await.unwrap();
        assert_eq!(&rest, b"cryptree");

        let err = reader.read_into_array(&mut buf).await.unwrap_err();
        assert!(matches!(err, CtfsError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
        assert!(reader.seek(16).await.is_err());

        reader.reset().await.unwrap();
        reader.close();
        reader.close();
        assert!(reader.read_into_array(&mut buf).await.is_err());
    }
}
