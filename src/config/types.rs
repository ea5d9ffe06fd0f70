//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// 分块配置
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// 合成 worker 池配置
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// 块缓冲区配置
    #[serde(default)]
    pub buffer: BufferConfig,

    /// 播放配置
    #[serde(default)]
    pub playback: PlaybackSettings,

    /// TTS 引擎配置
    #[serde(default)]
    pub tts: TtsConfig,

    /// 阅读进度配置
    #[serde(default)]
    pub session: SessionConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 分块配置
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    /// 每块目标词数
    #[serde(default = "default_target_words")]
    pub target_words: usize,

    /// 超过该词数才分块
    #[serde(default = "default_threshold_words")]
    pub threshold_words: usize,

    /// 块数上限，最后一块吸收剩余文本
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

fn default_target_words() -> usize {
    150
}

fn default_threshold_words() -> usize {
    200
}

fn default_max_chunks() -> usize {
    10_000
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_words: default_target_words(),
            threshold_words: default_threshold_words(),
            max_chunks: default_max_chunks(),
        }
    }
}

/// 合成配置
#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisConfig {
    /// 并发 worker 数
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// 每块最大尝试次数（首次 + 重试）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// 连续失败多少块后判定合成不可用，0 表示不限制
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,

    /// 待合成队列深度
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_workers() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    2
}

fn default_max_consecutive_failures() -> usize {
    3
}

fn default_queue_depth() -> usize {
    4
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            max_consecutive_failures: default_max_consecutive_failures(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// 缓冲区配置
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// 最大驻留块数
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    10
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// 音频输出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// 不出声，只推进播放位置
    #[default]
    Null,
    /// 默认音频设备（需要 `device` feature）
    Device,
}

/// 播放配置
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackSettings {
    /// 跳转步长（秒）
    #[serde(default = "default_seek_secs")]
    pub seek_secs: u64,

    /// 命令去抖窗口（毫秒）
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// 音频帧长（毫秒）
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,

    /// 供向后跳转保留的已播放块数
    #[serde(default = "default_history_chunks")]
    pub history_chunks: usize,

    /// 设备队列中保持的额外预写帧数
    #[serde(default = "default_lead_frames")]
    pub lead_frames: u32,

    /// 停止后等待后台任务的上限（毫秒）
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// 输出方式
    #[serde(default)]
    pub output: OutputMode,
}

fn default_seek_secs() -> u64 {
    5
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_frame_ms() -> u64 {
    20
}

fn default_history_chunks() -> usize {
    2
}

fn default_lead_frames() -> u32 {
    3
}

fn default_join_timeout_ms() -> u64 {
    2000
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            seek_secs: default_seek_secs(),
            debounce_ms: default_debounce_ms(),
            frame_ms: default_frame_ms(),
            history_chunks: default_history_chunks(),
            lead_frames: default_lead_frames(),
            join_timeout_ms: default_join_timeout_ms(),
            output: OutputMode::default(),
        }
    }
}

/// 合成后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsEngineKind {
    /// 外部 HTTP TTS 服务
    #[default]
    Http,
    /// 本地正弦音（离线演示）
    Fake,
}

/// TTS 引擎配置
#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    #[serde(default)]
    pub engine: TtsEngineKind,

    /// TTS 服务基础 URL
    #[serde(default = "default_tts_url")]
    pub url: String,

    /// 请求超时时间（秒）
    #[serde(default = "default_tts_timeout")]
    pub timeout_secs: u64,

    /// 音色
    #[serde(default)]
    pub voice: Option<String>,
}

fn default_tts_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_tts_timeout() -> u64 {
    120
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: TtsEngineKind::default(),
            url: default_tts_url(),
            timeout_secs: default_tts_timeout(),
            voice: None,
        }
    }
}

/// 阅读进度配置
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// 是否记录并恢复进度
    #[serde(default = "default_session_enabled")]
    pub enabled: bool,

    /// 进度文件路径
    #[serde(default = "default_session_path")]
    pub path: PathBuf,

    /// 保存间隔（秒）
    #[serde(default = "default_session_interval")]
    pub interval_secs: u64,
}

fn default_session_enabled() -> bool {
    true
}

fn default_session_path() -> PathBuf {
    PathBuf::from("data/sessions.json")
}

fn default_session_interval() -> u64 {
    5
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: default_session_enabled(),
            path: default_session_path(),
            interval_secs: default_session_interval(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
