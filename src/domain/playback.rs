//! 播放状态机的领域类型
//!
//! PlaybackState 只由 PlaybackController 修改，其他组件只能读取 PlaybackStatus 快照

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::chunk::Seq;

/// 默认去抖窗口
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// 等待第一个块
    #[default]
    Idle,
    Playing,
    Paused,
    /// 过渡状态：正在调整位置
    Seeking,
    /// 终止状态
    Stopped,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Seeking => "seeking",
            PlaybackState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Stopped)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用户命令（由 InputListener 发出）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Pause,
    Resume,
    SeekForward,
    SeekBackward,
    Quit,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::SeekForward => "seek_forward",
            Command::SeekBackward => "seek_backward",
            Command::Quit => "quit",
        }
    }
}

/// 停止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 用户退出
    Quit,
    /// 文本播放完毕
    EndOfText,
    /// 命令通道断开（视为隐式退出）
    CommandChannelClosed,
    /// 致命错误
    Failed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Quit => "quit",
            StopReason::EndOfText => "end_of_text",
            StopReason::CommandChannelClosed => "command_channel_closed",
            StopReason::Failed => "failed",
        }
    }
}

/// 播放状态快照
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    /// 原文字符偏移
    pub char_offset: usize,
    /// 当前加载的块
    pub current_seq: Option<Seq>,
    /// 是否正在等待下一个块
    pub buffering: bool,
    /// 缓冲区中驻留的块数
    pub buffered: usize,
}

/// 命令去抖
///
/// 同类命令在上一次被接受后的窗口内再次到达时丢弃
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_accepted: HashMap<Command, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    /// 返回 true 表示命令被接受
    pub fn accept(&mut self, command: Command, now: Instant) -> bool {
        if let Some(last) = self.last_accepted.get(&command) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_accepted.insert(command, now);
        true
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
