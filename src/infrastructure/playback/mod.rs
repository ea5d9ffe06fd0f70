//! Playback - 播放控制器与外部句柄

mod controller;
mod handle;

pub use controller::{
    PlaybackConfig, PlaybackController, PlaybackReport, DEFAULT_FRAME, DEFAULT_HISTORY_CHUNKS,
    DEFAULT_SEEK,
};
pub use handle::{PlaybackHandle, StatusWatcher};
