//! Range reads of caller-side files over a data connection.

mod error;
mod file;
mod range;

pub use error::{ProxyError, ProxyResult};
pub use file::{ChunkSource, VirtualFile, BUFFER_SIZE};
pub use range::{ByteRange, RangeSpec};
