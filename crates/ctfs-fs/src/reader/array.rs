use bytes::Bytes;
use ctfs_core::CtfsResult;

use super::{check_range, check_seek, closed_error, AsyncReader};

/// Reader over an in-memory buffer.
#[derive(Debug, Clone)]
pub struct ArrayReader {
    data: Bytes,
    position: usize,
    closed: bool,
}

impl ArrayReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            closed: false,
        }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> u64 {
        self.position as u64
    }
}

impl AsyncReader for ArrayReader {
    async fn read_into_array(&mut self, buf: &mut [u8]) -> CtfsResult<usize> {
        if self.closed {
            return Err(closed_error());
        }
        check_range(self.position as u64, buf.len(), self.len())?;
        let end = self.position + buf.len();
        buf.copy_from_slice(&self.data[self.position..end]);
        self.position = end;
        Ok(buf.len())
    }

    async fn seek(&mut self, offset: u64) -> CtfsResult<()> {
        if self.closed {
            return Err(closed_error());
        }
        check_seek(offset, self.len())?;
        self.position = offset as usize;
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
    use crate::reader::read_exact;
    use ctfs_core::CtfsError;

    #[tokio::test]
    async fn test_read_seek_reset() {
        let mut reader = ArrayReader::new((0u8..100).collect::<Vec<_>>());
        assert_eq!(read_exact(&mut reader, 10).await.unwrap(), (0u8..10).collect::<Vec<_>>());
        reader.seek(95).await.unwrap();
        assert_eq!(read_exact(&mut reader, 5).await.unwrap(), vec![95, 96, 97, 98, 99]);
        reader.reset().await.unwrap();
        assert_eq!(reader.position(), 0);
    }

    #[tokio::test]
    async fn test_past_end_is_eof_error() {
        let mut reader = ArrayReader::new(vec![1u8; 4]);
        let mut buf = [0u8; 5];
        match reader.read_into_array(&mut buf).await {
            Err(CtfsError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF, got {other:?}"),
        }
        assert!(reader.seek(5).await.is_err());
        // Zero-length read at the end is fine.
        reader.seek(4).await.unwrap();
        assert_eq!(reader.read_into_array(&mut []).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut reader = ArrayReader::new(vec![1u8; 4]);
        reader.close();
        reader.close();
        assert!(reader.read_into_array(&mut [0u8; 1]).await.is_err());
    }
}
