//! Fake TTS Client - 用于测试和离线演示的合成后端
//!
//! 生成与词数成正比的正弦音，可按序列号模拟失败

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::application::ports::{InferRequest, InferResponse, TtsEnginePort, TtsError};
use crate::domain::Seq;

/// Fake TTS Client 配置
#[derive(Debug, Clone)]
pub struct FakeTtsClientConfig {
    /// 采样率
    pub sample_rate: u32,
    /// 语速（词/秒），决定生成音频的时长
    pub words_per_second: f32,
    /// 模拟推理延迟（毫秒）
    pub latency_ms: u64,
    /// 个别块的延迟覆盖
    pub slow_sequences: HashMap<Seq, u64>,
    /// 序列号 -> 前 N 次调用失败
    pub fail_sequences: HashMap<Seq, u32>,
    /// 音高
    pub tone_hz: f32,
}

impl Default for FakeTtsClientConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            words_per_second: 2.5,
            latency_ms: 200,
            slow_sequences: HashMap::new(),
            fail_sequences: HashMap::new(),
            tone_hz: 220.0,
        }
    }
}

#[derive(Debug, Default)]
struct CallLog {
    attempts: HashMap<Seq, u32>,
    started: Vec<Seq>,
    completed: Vec<Seq>,
}

/// Fake TTS Client
pub struct FakeTtsClient {
    config: FakeTtsClientConfig,
    log: Mutex<CallLog>,
}

impl FakeTtsClient {
    pub fn new(config: FakeTtsClientConfig) -> Self {
        tracing::info!(
            sample_rate = config.sample_rate,
            words_per_second = config.words_per_second,
            latency_ms = config.latency_ms,
            "FakeTtsClient initialized"
        );
        Self {
            config,
            log: Mutex::new(CallLog::default()),
        }
    }

    /// 使用默认配置创建
    pub fn with_defaults() -> Self {
        Self::new(FakeTtsClientConfig::default())
    }

    fn log(&self) -> MutexGuard<'_, CallLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 按调用顺序记录的已开始合成的序列号
    pub fn started(&self) -> Vec<Seq> {
        self.log().started.clone()
    }

    /// 成功完成合成的序列号
    pub fn completed(&self) -> Vec<Seq> {
        self.log().completed.clone()
    }

    /// 某个块被调用的次数
    pub fn attempts(&self, seq: Seq) -> u32 {
        self.log().attempts.get(&seq).copied().unwrap_or(0)
    }

    fn render(&self, text: &str) -> Vec<f32> {
        let words = text.split_whitespace().count().max(1);
        let seconds = words as f32 / self.config.words_per_second.max(0.1);
        let total = (seconds * self.config.sample_rate as f32) as usize;
        let step = 2.0 * std::f32::consts::PI * self.config.tone_hz / self.config.sample_rate as f32;
        (0..total).map(|i| (i as f32 * step).sin() * 0.2).collect()
    }
}

#[async_trait]
impl TtsEnginePort for FakeTtsClient {
    async fn infer(&self, request: InferRequest) -> Result<InferResponse, TtsError> {
        let attempt = {
            let mut log = self.log();
            log.started.push(request.sequence);
            let attempt = log.attempts.entry(request.sequence).or_insert(0);
            *attempt += 1;
            *attempt
        };

        let latency = self
            .config
            .slow_sequences
            .get(&request.sequence)
            .copied()
            .unwrap_or(self.config.latency_ms);
        tokio::time::sleep(std::time::Duration::from_millis(latency)).await;

        let failures = self
            .config
            .fail_sequences
            .get(&request.sequence)
            .copied()
            .unwrap_or(0);
        if attempt <= failures {
            tracing::debug!(seq = request.sequence, attempt = attempt, "FakeTtsClient: simulated failure");
            return Err(TtsError::ServiceError(format!(
                "simulated failure for chunk {}",
                request.sequence
            )));
        }

        let samples = self.render(&request.text);
        self.log().completed.push(request.sequence);
        tracing::debug!(
            seq = request.sequence,
            samples = samples.len(),
            "FakeTtsClient: returning generated tone"
        );

        Ok(InferResponse {
            samples,
            sample_rate: self.config.sample_rate,
        })
    }
}
