//! Event Publisher Implementation
//!
//! 流水线事件广播（缓冲指示、间隙日志、状态变化）

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::domain::{PlaybackState, Seq, StopReason};

/// 流水线事件类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PipelineEvent {
    /// 块合成完成
    ChunkSynthesized {
        seq: Seq,
        duration_ms: u64,
        synthesis_ms: u64,
        attempts: u32,
    },
    /// 块重试后仍合成失败
    ChunkFailed { seq: Seq, error: String },
    /// 开始播放某个块
    ChunkStarted { seq: Seq, char_offset: usize },
    /// 播放端跳过缺失的块
    GapSkipped { seq: Seq },
    /// 播放状态变化
    StateChanged { state: PlaybackState },
    /// 等待某个块就绪
    Buffering { seq: Seq },
    /// 播放结束
    Stopped { reason: StopReason, char_offset: usize },
}

/// 事件发布器
pub struct EventPublisher {
    channel: broadcast::Sender<PipelineEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { channel: tx }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.channel.subscribe()
    }

    /// 发布事件（没有订阅者时静默丢弃）
    pub fn publish(&self, event: PipelineEvent) {
        if self.channel.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    /// 发布块合成完成事件
    pub fn publish_chunk_synthesized(
        &self,
        seq: Seq,
        duration: Duration,
        synthesis_time: Duration,
        attempts: u32,
    ) {
        self.publish(PipelineEvent::ChunkSynthesized {
            seq,
            duration_ms: duration.as_millis() as u64,
            synthesis_ms: synthesis_time.as_millis() as u64,
            attempts,
        });
    }

    /// 发布块合成失败事件
    pub fn publish_chunk_failed(&self, seq: Seq, error: &str) {
        self.publish(PipelineEvent::ChunkFailed {
            seq,
            error: error.to_string(),
        });
    }

    /// 发布状态变化事件
    pub fn publish_state(&self, state: PlaybackState) {
        self.publish(PipelineEvent::StateChanged { state });
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let publisher = EventPublisher::new();
        let mut rx = publisher.subscribe();

        publisher.publish_chunk_failed(2, "boom");
        publisher.publish_state(PlaybackState::Playing);

        assert_eq!(
            rx.recv().await.unwrap(),
            PipelineEvent::ChunkFailed {
                seq: 2,
                error: "boom".to_string()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            PipelineEvent::StateChanged {
                state: PlaybackState::Playing
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let publisher = EventPublisher::new();
        publisher.publish(PipelineEvent::GapSkipped { seq: 1 });
    }

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::Stopped {
            reason: StopReason::EndOfText,
            char_offset: 42,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"event":"Stopped","data":{"reason":"end_of_text","char_offset":42}}"#
        );
    }
}
