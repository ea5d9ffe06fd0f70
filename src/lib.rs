//! Narrate - 流式 TTS 朗读系统
//!
//! 架构设计: Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - Chunker: 按句子边界把长文本切成有序的块
//! - Playback: 播放状态、命令、去抖
//!
//! 应用层 (application/):
//! - Ports: 端口定义（TtsEngine, AudioOutput, SessionStore）
//! - Error: 流水线致命错误
//!
//! 基础设施层 (infrastructure/):
//! - Worker: 分块派发 + 并发合成池
//! - Buffer: 有界有序的块缓冲区
//! - Playback: 播放控制器（独占音频设备）
//! - Adapters: TTS Client, WAV 解码, 音频输出
//! - Input / Session / Persistence: 键盘命令、进度记录与存储
//! - Events: 流水线事件广播

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config, AppConfig};
