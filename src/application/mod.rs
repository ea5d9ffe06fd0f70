//! Application Layer
//!
//! - Ports: 合成引擎、音频输出、会话存储的抽象接口
//! - Error: 流水线级错误

pub mod error;
pub mod ports;

pub use error::PipelineError;
