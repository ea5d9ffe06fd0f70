//! 应用层错误定义
//!
//! 流水线运行的致命错误；单个块的合成失败不在此列（重试后跳过）

use thiserror::Error;

use crate::application::ports::DeviceError;

/// 流水线错误
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 音频设备获取失败（不尝试部分播放）
    #[error("Audio device acquisition failed: {0}")]
    DeviceAcquisition(#[from] DeviceError),

    /// 缓冲区协议违反（内部不变式被破坏）
    #[error("Buffer protocol violation: {0}")]
    BufferProtocol(String),

    /// 连续合成失败，判定合成服务不可用
    #[error("Synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    /// 创建缓冲区协议错误
    pub fn buffer_protocol(message: impl Into<String>) -> Self {
        Self::BufferProtocol(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }
}
