//! Session Recorder - 周期性保存阅读进度
//!
//! 只读观察播放状态，不持有命令发送端

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::application::ports::{SessionRecord, SessionStorePort};
use crate::infrastructure::playback::StatusWatcher;

/// 默认保存间隔
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(5);

/// 阅读进度记录器
pub struct SessionRecorder {
    store: Arc<dyn SessionStorePort>,
    key: String,
    total_chars: usize,
    watcher: StatusWatcher,
    interval: Duration,
    last_saved: Option<usize>,
}

impl SessionRecorder {
    pub fn new(
        store: Arc<dyn SessionStorePort>,
        key: impl Into<String>,
        total_chars: usize,
        watcher: StatusWatcher,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            total_chars,
            watcher,
            interval: DEFAULT_SAVE_INTERVAL,
            last_saved: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 运行到播放停止，最后再保存一次；返回最后保存的偏移
    pub async fn run(mut self) -> Option<usize> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即完成，跳过
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.save_if_moved().await,
                _ = self.watcher.stopped() => break,
            }
        }

        self.save_if_moved().await;
        tracing::debug!(key = %self.key, offset = ?self.last_saved, "SessionRecorder stopped");
        self.last_saved
    }

    async fn save_if_moved(&mut self) {
        let char_offset = self.watcher.position();
        if self.last_saved == Some(char_offset) {
            return;
        }

        let record = SessionRecord::new(self.key.clone(), char_offset, self.total_chars);
        match self.store.save(&record).await {
            Ok(()) => self.last_saved = Some(char_offset),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to save session");
            }
        }
    }
}
