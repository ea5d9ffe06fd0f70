//! Worker Layer - 分块派发与并发合成

mod dispatcher;
mod synthesis_pool;

pub use dispatcher::ChunkDispatcher;
pub use synthesis_pool::{SynthesisPool, SynthesisPoolConfig};
