use std::collections::VecDeque;

use ctfs_chunks::MAX_CHUNK_SIZE;
use ctfs_core::{CtfsError, CtfsResult};
use ctfs_storage::{BlockStore, PointerStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::retriever::ChunkChain;

use super::{check_range, check_seek, closed_error, AsyncReader};

const CHUNK: u64 = MAX_CHUNK_SIZE as u64;

struct Prefetch {
    index: u64,
    handle: JoinHandle<CtfsResult<Vec<u8>>>,
}

/// Reads through a window of chunks fetched ahead by spawned tasks.
///
/// The window starts at the chunk holding the read position and reaches
/// `depth` chunks past it, so `buffer_start <= position < buffer_end` holds
/// between reads. Chunks behind the position are evicted as soon as the read
/// moves past them. Seeking outside the window drops it and restarts the
/// prefetch at the new chunk.
pub struct BufferedReader<B, P> {
    chain: ChunkChain<B, P>,
    depth: usize,
    position: u64,
    current: Option<(u64, Vec<u8>)>,
    pending: VecDeque<Prefetch>,
    /// Cancels the tasks of the current window.
    window: CancellationToken,
    closed: bool,
}

impl<B, P> BufferedReader<B, P>
where
    B: BlockStore + Clone + 'static,
    P: PointerStore + Clone + 'static,
{
    /// `depth` is the number of chunks kept in flight ahead of the reader.
    pub fn new(chain: ChunkChain<B, P>, depth: usize) -> Self {
        Self {
            chain,
            depth: depth.max(1),
            position: 0,
            current: None,
            pending: VecDeque::new(),
            window: CancellationToken::new(),
            closed: false,
        }
    }

    pub fn size(&self) -> u64 {
        self.chain.file_size()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Chunks fetched or in flight.
    pub fn buffered_chunks(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    fn spawn_fetch(&self, index: u64) -> Prefetch {
        let chain = self.chain.clone();
        let token = self.window.clone();
        let handle = tokio::spawn(async move {
            if token.is_cancelled() {
                return Err(closed_error());
            }
            let fetched = tokio::select! {
                _ = token.cancelled() => return Err(closed_error()),
                fetched = chain.chunk(index) => fetched?,
            };
            if token.is_cancelled() {
                return Err(closed_error());
            }
            Ok(fetched.data)
        });
        Prefetch { index, handle }
    }

    fn drop_window(&mut self) {
        self.window.cancel();
        for prefetch in self.pending.drain(..) {
            prefetch.handle.abort();
        }
        self.current = None;
        self.window = CancellationToken::new();
    }

    /// Keep `depth` chunks after `index` in flight.
    fn top_up(&mut self, index: u64) {
        let last = (index + self.depth as u64).min(self.chain.chunk_count().saturating_sub(1));
        let mut next = self
            .pending
            .back()
            .map_or(index + 1, |prefetch| prefetch.index + 1)
            .max(index + 1);
        while next <= last {
            let prefetch = self.spawn_fetch(next);
            self.pending.push_back(prefetch);
            next += 1;
        }
    }

    async fn advance_to(&mut self, index: u64) -> CtfsResult<()> {
        if matches!(&self.current, Some((current, _)) if *current == index) {
            return Ok(());
        }
        self.current = None;
        while let Some(front) = self.pending.front() {
            if front.index >= index {
                break;
            }
            if let Some(stale) = self.pending.pop_front() {
                stale.handle.abort();
            }
        }
        let prefetch = match self.pending.pop_front() {
            Some(prefetch) if prefetch.index == index => prefetch,
            other => {
                if let Some(prefetch) = other {
                    self.pending.push_front(prefetch);
                }
                self.drop_window();
                self.spawn_fetch(index)
            }
        };
        self.top_up(index);

        let data = prefetch
            .handle
            .await
            .map_err(|e| CtfsError::Io(std::io::Error::other(format!("prefetch task failed: {e}"))))??;
        if self.closed {
            return Err(closed_error());
        }
        tracing::trace!(index, in_flight = self.pending.len(), "chunk buffered");
        self.current = Some((index, data));
        Ok(())
    }
}

impl<B, P> AsyncReader for BufferedReader<B, P>
where
    B: BlockStore + Clone + 'static,
    P: PointerStore + Clone + 'static,
{
    async fn read_into_array(&mut self, buf: &mut [u8]) -> CtfsResult<usize> {
        if self.closed {
            return Err(closed_error());
        }
        check_range(self.position, buf.len(), self.size())?;
        let mut filled = 0;
        while filled < buf.len() {
            let index = self.position / CHUNK;
            self.advance_to(index).await?;
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
        let index = offset / CHUNK;
        let in_window = matches!(&self.current, Some((current, _)) if *current == index)
            || self.pending.iter().any(|prefetch| prefetch.index == index);
        if !in_window {
            self.drop_window();
        }
        self.position = offset;
        Ok(())
    }

    async fn reset(&mut self) -> CtfsResult<()> {
        self.seek(0).await
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.drop_window();
        self.window.cancel();
    }
}

impl<B, P> Drop for BufferedReader<B, P> {
    fn drop(&mut self) {
        self.window.cancel();
        for prefetch in self.pending.drain(..) {
            prefetch.handle.abort();
        }
    }
}
