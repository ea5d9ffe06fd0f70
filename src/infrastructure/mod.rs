//! Infrastructure Layer - 基础设施层
//!
//! 提供所有端口的具体实现，以及流水线的并发组件

pub mod adapters;
pub mod buffer;
pub mod events;
pub mod input;
pub mod persistence;
pub mod pipeline;
pub mod playback;
pub mod session;
pub mod worker;

pub use buffer::ChunkBuffer;
pub use events::EventPublisher;
pub use pipeline::{PipelineConfig, ReadAloudPipeline, RunningPipeline};
pub use playback::{PlaybackController, PlaybackHandle, PlaybackReport};
pub use worker::{ChunkDispatcher, SynthesisPool, SynthesisPoolConfig};
