//! TTS Engine Port - 语音合成引擎抽象
//!
//! 定义合成后端的抽象接口，具体实现在 infrastructure/adapters 层

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Seq;

/// TTS 错误（单个块的合成失败，可恢复）
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Audio decode error: {0}")]
    DecodeError(String),
}

/// 合成请求
#[derive(Debug, Clone)]
pub struct InferRequest {
    /// 块序列号（用于日志和追踪）
    pub sequence: Seq,
    /// 要合成的文本
    pub text: String,
    /// 音色（由后端解释）
    pub voice: Option<String>,
}

/// 合成结果
#[derive(Debug, Clone)]
pub struct InferResponse {
    /// 单声道 PCM 采样
    pub samples: Vec<f32>,
    /// 采样率
    pub sample_rate: u32,
}

/// TTS Engine Port
///
/// 必须能被多个 worker 并发调用
#[async_trait]
pub trait TtsEnginePort: Send + Sync {
    /// 合成一段文本
    async fn infer(&self, request: InferRequest) -> Result<InferResponse, TtsError>;

    /// 检查合成服务是否可用
    async fn health_check(&self) -> bool {
        true // 默认实现
    }
}
