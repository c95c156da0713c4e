//! ctfs-fs: the cryptree filesystem
//!
//! A file or directory is reached only through a capability: its location
//! (owner, writer, map key) plus the base key that opens its node. Nodes are
//! sealed values committed to a [`Network`] of block and pointer stores;
//! every change writes a new node and swings the pointer with
//! compare-and-swap.
//!
//! # Overview
//! - `capability`: absolute and relative capabilities, the `#...` link format
//! - `props`: file properties sealed into every node
//! - `node`: the `FileAccess` / `DirAccess` node codec
//! - `network`: node and fragment I/O over the stores
//! - `retriever`: per-chunk fetch descriptors and the chunk chain of a file
//! - `reader`: seekable async readers over memory or a chunk chain
//! - `uploader`: chunk, encrypt, fragment and commit a byte stream
//! - `directory`: single-attempt directory reads and updates
//! - `retry`: bounded retry with rename-on-collision
//! - `filesystem`: named operations tying the above together

pub mod capability;
pub mod directory;
pub mod filesystem;
pub mod network;
pub mod node;
pub mod props;
pub mod reader;
pub mod retriever;
pub mod retry;
pub mod uploader;

pub use capability::{AbsoluteCapability, RelativeCapability};
pub use filesystem::{ChildEntry, FileSystem};
pub use network::Network;
pub use node::{ChildLink, CryptreeNode, DirAccess, FileAccess, MAX_CHILD_LINKS_PER_BLOB};
pub use props::FileProperties;
pub use reader::{read_exact, ArrayReader, AsyncReader, BufferedReader, LazyChunkReader};
pub use retriever::{ChunkChain, EncryptedChunkRetriever};
pub use uploader::{FileKeys, FileUploader, ProgressFn, UploadedFile};
