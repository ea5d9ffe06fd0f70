//! Keyboard Listener - 终端按键转播放命令
//!
//! crossterm 的阻塞读取放在 blocking 线程；按键经通道交给异步任务，
//! 映射为命令后按顺序送入播放控制器

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{Command, PlaybackState};
use crate::infrastructure::playback::PlaybackHandle;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 输入错误
#[derive(Debug, Error)]
pub enum InputError {
    #[error("Terminal error: {0}")]
    Terminal(String),
}

/// 按键映射
///
/// 空格根据当前状态在暂停和继续之间切换
pub fn map_key(key: &KeyEvent, state: PlaybackState) -> Option<Command> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') | KeyCode::Char('d') => Some(Command::Quit),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Char(' ') => match state {
            PlaybackState::Paused => Some(Command::Resume),
            _ => Some(Command::Pause),
        },
        KeyCode::Char('p') => Some(Command::Pause),
        KeyCode::Char('r') => Some(Command::Resume),
        KeyCode::Right | KeyCode::Char('l') => Some(Command::SeekForward),
        KeyCode::Left | KeyCode::Char('h') => Some(Command::SeekBackward),
        KeyCode::Char('q') | KeyCode::Esc => Some(Command::Quit),
        _ => None,
    }
}

/// 退出时恢复终端模式
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self, InputError> {
        terminal::enable_raw_mode().map_err(|e| InputError::Terminal(e.to_string()))?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "Failed to restore terminal mode");
        }
    }
}

/// 键盘监听器
pub struct KeyboardListener {
    handle: PlaybackHandle,
}

impl KeyboardListener {
    pub fn new(handle: PlaybackHandle) -> Self {
        Self { handle }
    }

    /// 运行到播放停止或终端不可用
    ///
    /// 返回时丢弃自身的句柄；若没有其他句柄，控制器视为隐式退出
    pub async fn run(self) -> Result<(), InputError> {
        let guard = RawModeGuard::enable()?;
        let stop = Arc::new(AtomicBool::new(false));
        let (key_tx, mut key_rx) = mpsc::channel::<KeyEvent>(16);

        let reader_stop = stop.clone();
        let reader = tokio::task::spawn_blocking(move || read_keys(key_tx, reader_stop));

        let mut watcher = self.handle.watcher();
        tracing::debug!("Keyboard listener started");

        loop {
            tokio::select! {
                key = key_rx.recv() => {
                    let Some(key) = key else { break };
                    let Some(command) = map_key(&key, watcher.state()) else {
                        continue;
                    };
                    tracing::trace!(command = command.as_str(), "Key mapped");
                    if self.handle.send(command).await.is_err() {
                        break;
                    }
                }
                _ = watcher.stopped() => break,
            }
        }

        stop.store(true, Ordering::Relaxed);
        let result = match reader.await {
            Ok(result) => result,
            Err(e) => Err(InputError::Terminal(format!("key reader failed: {}", e))),
        };
        drop(guard);
        tracing::debug!("Keyboard listener stopped");
        result
    }
}

fn read_keys(keys: mpsc::Sender<KeyEvent>, stop: Arc<AtomicBool>) -> Result<(), InputError> {
    while !stop.load(Ordering::Relaxed) {
        let ready = event::poll(POLL_INTERVAL).map_err(|e| InputError::Terminal(e.to_string()))?;
        if !ready {
            continue;
        }
        if let Event::Key(key) = event::read().map_err(|e| InputError::Terminal(e.to_string()))? {
            if keys.blocking_send(key).is_err() {
                break;
            }
        }
    }
    Ok(())
}
