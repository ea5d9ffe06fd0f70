//! Playback Handle - 播放控制器的外部接口
//!
//! 命令经有序通道送入控制器；状态通过 watch 通道只读观察

use tokio::sync::{mpsc, watch};

use crate::application::PipelineError;
use crate::domain::{Command, PlaybackState, PlaybackStatus};

/// 播放状态观察者（不持有命令发送端，不会阻止命令通道关闭）
#[derive(Debug, Clone)]
pub struct StatusWatcher {
    status: watch::Receiver<PlaybackStatus>,
}

impl StatusWatcher {
    pub(crate) fn new(status: watch::Receiver<PlaybackStatus>) -> Self {
        Self { status }
    }

    /// 当前原文字符偏移
    pub fn position(&self) -> usize {
        self.status.borrow().char_offset
    }

    /// 最新状态快照
    pub fn status(&self) -> PlaybackStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.status.borrow().state
    }

    /// 等待下一次状态变化，控制器退出后返回 false
    pub async fn changed(&mut self) -> bool {
        self.status.changed().await.is_ok()
    }

    /// 等待进入 Stopped（或控制器被丢弃）
    pub async fn stopped(&mut self) {
        while !self.status.borrow().state.is_terminal() {
            if self.status.changed().await.is_err() {
                return;
            }
        }
    }
}

/// 播放句柄
///
/// 所有句柄都被丢弃后命令通道关闭，控制器视为隐式退出
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    commands: mpsc::Sender<Command>,
    watcher: StatusWatcher,
}

impl PlaybackHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        status: watch::Receiver<PlaybackStatus>,
    ) -> Self {
        Self {
            commands,
            watcher: StatusWatcher::new(status),
        }
    }

    /// 发送命令（按接收顺序应用）
    pub async fn send(&self, command: Command) -> Result<(), PipelineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PipelineError::internal("playback controller has stopped"))
    }

    pub async fn pause(&self) -> Result<(), PipelineError> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<(), PipelineError> {
        self.send(Command::Resume).await
    }

    pub async fn seek_forward(&self) -> Result<(), PipelineError> {
        self.send(Command::SeekForward).await
    }

    pub async fn seek_backward(&self) -> Result<(), PipelineError> {
        self.send(Command::SeekBackward).await
    }

    /// 退出（幂等：控制器已停止时静默忽略）
    pub async fn quit(&self) {
        if self.commands.send(Command::Quit).await.is_err() {
            tracing::debug!("Quit ignored, playback already stopped");
        }
    }

    /// 当前原文字符偏移
    pub fn position(&self) -> usize {
        self.watcher.position()
    }

    /// 最新状态快照
    pub fn status(&self) -> PlaybackStatus {
        self.watcher.status()
    }

    /// 只读观察者
    pub fn watcher(&self) -> StatusWatcher {
        self.watcher.clone()
    }
}
