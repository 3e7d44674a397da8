pub mod bio;
pub mod buf;
pub mod lru;

pub use bio::{nbuf_for_memory, BioError, BufferCache, CacheStats};
pub use buf::{Buf, BufId, BufferHead};
