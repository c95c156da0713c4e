use ctfs_chunks::MAX_CHUNK_SIZE;
use ctfs_core::{CtfsResult, MapKey};
use ctfs_storage::{BlockStore, PointerStore};

use crate::retriever::ChunkChain;

use super::{check_range, check_seek, closed_error, AsyncReader};

const CHUNK: u64 = MAX_CHUNK_SIZE as u64;

/// Holds the current chunk and the map key of the one after it.
pub struct LazyChunkReader<B, P> {
    chain: ChunkChain<B, P>,
    position: u64,
    current: Option<(u64, Vec<u8>)>,
    next: Option<MapKey>,
    closed: bool,
}

impl<B: BlockStore, P: PointerStore> LazyChunkReader<B, P> {
    pub fn new(chain: ChunkChain<B, P>) -> Self {
        Self {
            chain,
            position: 0,
            current: None,
            next: None,
            closed: false,
        }
    }

    pub fn size(&self) -> u64 {
        self.chain.file_size()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    async fn load(&mut self, index: u64) -> CtfsResult<()> {
        let fetched = match (&self.current, self.next) {
            (Some((current, _)), _) if *current == index => return Ok(()),
            (Some((current, _)), Some(next)) if *current + 1 == index => {
                self.chain.fetch(index, next).await?
            }
            _ => self.chain.chunk(index).await?,
        };
        self.next = fetched.next;
        self.current = Some((index, fetched.data));
        Ok(())
    }
}

impl<B: BlockStore, P: PointerStore> AsyncReader for LazyChunkReader<B, P> {
    async fn read_into_array(&mut self, buf: &mut [u8]) -> CtfsResult<usize> {
        if self.closed {
            return Err(closed_error());
        }
        check_range(self.position, buf.len(), self.size())?;
        let mut filled = 0;
        while filled < buf.len() {
            let index = self.position / CHUNK;
            self.load(index).await?;
            let Some((_, data)) = &self.current else {
                return Err(closed_error());
            };
            let within = (self.position % CHUNK) as usize;
            let n = (data.len() - within).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&data[within..within + n]);
            filled += n;
            self.position += n as u64;
        }
        Ok(filled)
    }

    async fn seek(&mut self, offset: u64) -> CtfsResult<()> {
        if self.closed {
            return Err(closed_error());
        }
        check_seek(offset, self.size())?;
        self.position = offset;
        Ok(())
    }

    async fn reset(&mut self) -> CtfsResult<()> {
        self.seek(0).await
    }

    fn close(&mut self) {
        self.closed = true;
        self.current = None;
        self.next = None;
    }
}
