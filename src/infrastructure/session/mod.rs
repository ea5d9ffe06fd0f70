//! Session - 阅读进度记录

mod recorder;

pub use recorder::{SessionRecorder, DEFAULT_SAVE_INTERVAL};
