pub mod codec;
pub mod config;
pub mod error;
pub mod types;

pub use error::{CtfsError, CtfsResult};
pub use types::{ContentHash, Location, MapKey, PublicKeyHash, TransactionId};
