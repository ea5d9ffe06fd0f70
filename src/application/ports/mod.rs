//! Application Ports - 出站端口定义
//!
//! 定义应用层与基础设施层的抽象接口

mod audio_output;
mod session_store;
mod tts_engine;

pub use audio_output::{AudioOutputPort, DeviceError};
pub use session_store::{SessionRecord, SessionStoreError, SessionStorePort};
pub use tts_engine::{InferRequest, InferResponse, TtsEnginePort, TtsError};
