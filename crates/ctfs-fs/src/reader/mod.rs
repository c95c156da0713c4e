//! Seekable async byte readers
//!
//! - [`ArrayReader`]: over bytes already in memory, used as upload input.
//! - [`LazyChunkReader`]: holds one decrypted chunk and fetches the next on
//!   demand.
//! - [`BufferedReader`]: keeps a window of chunks prefetched by background
//!   tasks ahead of the read position.
//!
//! A read either fills the whole buffer or fails; asking for bytes past the
//! end is an [`std::io::ErrorKind::UnexpectedEof`] error.

mod array;
mod buffered;
mod lazy;

use std::future::Future;

use ctfs_core::{CtfsError, CtfsResult};

pub use array::ArrayReader;
pub use buffered::BufferedReader;
pub use lazy::LazyChunkReader;

pub trait AsyncReader: Send {
    /// Fill `buf` from the current position and advance past it.
    fn read_into_array(&mut self, buf: &mut [u8]) -> impl Future<Output = CtfsResult<usize>> + Send;

    fn seek(&mut self, offset: u64) -> impl Future<Output = CtfsResult<()>> + Send;

    /// Back to offset 0.
    fn reset(&mut self) -> impl Future<Output = CtfsResult<()>> + Send;

    /// Release buffers and stop background work. Idempotent; any later read
    /// fails.
    fn close(&mut self);
}

/// Read `len` bytes into a new buffer.
pub async fn read_exact<R: AsyncReader>(reader: &mut R, len: usize) -> CtfsResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_into_array(&mut buf).await?;
    Ok(buf)
}

pub(crate) fn end_of_stream(position: u64, wanted: usize, size: u64) -> CtfsError {
    CtfsError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("read of {wanted} bytes at offset {position} passes end of stream at {size}"),
    ))
}

pub(crate) fn closed_error() -> CtfsError {
    CtfsError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "reader is closed",
    ))
}

pub(crate) fn check_range(position: u64, wanted: usize, size: u64) -> CtfsResult<()> {
    match position.checked_add(wanted as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(end_of_stream(position, wanted, size)),
    }
}

pub(crate) fn check_seek(offset: u64, size: u64) -> CtfsResult<()> {
    if offset > size {
        return Err(end_of_stream(offset, 0, size));
    }
    Ok(())
}
