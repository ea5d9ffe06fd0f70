//! Domain Layer
//!
//! 文本分块、音频块与播放状态机的领域类型

pub mod chunk;
pub mod chunker;
pub mod playback;

pub use chunk::{Chunk, Seq, SynthesizedChunk, TextSpan};
pub use chunker::{chunk_text, Chunker, ChunkerConfig, Chunks};
pub use playback::{Command, Debouncer, PlaybackState, PlaybackStatus, StopReason};
