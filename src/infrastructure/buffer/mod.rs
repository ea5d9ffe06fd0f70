//! Buffer Layer - 合成块的有界缓冲

mod chunk_buffer;

pub use chunk_buffer::{BufferError, ChunkBuffer, Delivery, DEFAULT_CAPACITY};
