//! ctfs-storage: where encrypted blocks and node pointers live
//!
//! Two collaborators sit under the cryptree:
//!   - [`BlockStore`]: immutable blocks addressed by their BLAKE3 hash, written
//!     under a transaction so a half-finished upload can be told apart.
//!   - [`PointerStore`]: the mutable map from a node [`Location`] to the hash
//!     of the block currently holding that node, updated by compare-and-swap
//!     and only by the location's writer.
//!
//! Each has an in-memory implementation for tests and an OpenDAL-backed one
//! for real use.
//!
//! [`Location`]: ctfs_core::Location

pub mod block;
pub mod operator;
pub mod pointer;

pub use block::{BlockStore, MemoryBlockStore, OpendalBlockStore};
pub use operator::{build_operator, check_health};
pub use pointer::{MemoryPointerStore, OpendalPointerStore, PointerStore};
