//! Read-Aloud Pipeline - 组装分块派发、合成池和播放控制器
//!
//! 一次运行对应一段文本：
//! dispatcher → (待合成队列) → SynthesisPool → ChunkBuffer → PlaybackController

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AudioOutputPort, TtsEnginePort};
use crate::application::PipelineError;
use crate::config::AppConfig;
use crate::domain::ChunkerConfig;
use crate::infrastructure::buffer::{ChunkBuffer, DEFAULT_CAPACITY};
use crate::infrastructure::events::EventPublisher;
use crate::infrastructure::playback::{
    PlaybackConfig, PlaybackController, PlaybackHandle, PlaybackReport, StatusWatcher,
};
use crate::infrastructure::worker::{ChunkDispatcher, SynthesisPool, SynthesisPoolConfig};

/// 流水线配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub chunker: ChunkerConfig,
    pub synthesis: SynthesisPoolConfig,
    /// 待合成队列深度
    pub queue_depth: usize,
    pub buffer_capacity: usize,
    pub playback: PlaybackConfig,
    /// 停止后等待后台任务退出的上限
    pub join_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            synthesis: SynthesisPoolConfig::default(),
            queue_depth: 4,
            buffer_capacity: DEFAULT_CAPACITY,
            playback: PlaybackConfig::default(),
            join_timeout: Duration::from_millis(2000),
        }
    }
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            chunker: ChunkerConfig {
                target_words: config.chunking.target_words,
                threshold_words: config.chunking.threshold_words,
                max_chunks: config.chunking.max_chunks,
            },
            synthesis: SynthesisPoolConfig {
                workers: config.synthesis.workers,
                max_attempts: config.synthesis.max_attempts,
                max_consecutive_failures: config.synthesis.max_consecutive_failures,
                voice: config.tts.voice.clone(),
            },
            queue_depth: config.synthesis.queue_depth,
            buffer_capacity: config.buffer.capacity,
            playback: PlaybackConfig {
                seek: Duration::from_secs(config.playback.seek_secs),
                debounce: Duration::from_millis(config.playback.debounce_ms),
                frame: Duration::from_millis(config.playback.frame_ms),
                history_chunks: config.playback.history_chunks,
                lead_frames: config.playback.lead_frames,
            },
            join_timeout: Duration::from_millis(config.playback.join_timeout_ms),
        }
    }
}

/// 朗读流水线
pub struct ReadAloudPipeline {
    config: PipelineConfig,
    tts_engine: Arc<dyn TtsEnginePort>,
    event_publisher: Arc<EventPublisher>,
}

impl ReadAloudPipeline {
    pub fn new(
        config: PipelineConfig,
        tts_engine: Arc<dyn TtsEnginePort>,
        event_publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            config,
            tts_engine,
            event_publisher,
        }
    }

    /// 从 `start_offset`（字符偏移）开始朗读
    pub fn start(
        &self,
        text: Arc<str>,
        start_offset: usize,
        output: Box<dyn AudioOutputPort>,
    ) -> RunningPipeline {
        let shutdown = CancellationToken::new();
        let buffer = Arc::new(ChunkBuffer::new(self.config.buffer_capacity));
        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_depth.max(1));

        tracing::info!(
            chars = text.chars().count(),
            start_offset = start_offset,
            workers = self.config.synthesis.workers,
            buffer_capacity = self.config.buffer_capacity,
            "Starting read-aloud pipeline"
        );

        let dispatcher = ChunkDispatcher::new(
            text,
            self.config.chunker.clone(),
            start_offset,
            queue_tx,
            buffer.clone(),
            shutdown.clone(),
        );
        let pool = SynthesisPool::new(
            self.config.synthesis.clone(),
            queue_rx,
            self.tts_engine.clone(),
            buffer.clone(),
            self.event_publisher.clone(),
            shutdown.clone(),
        );
        let (controller, handle) = PlaybackController::new(
            self.config.playback.clone(),
            buffer,
            output,
            self.event_publisher.clone(),
            shutdown.clone(),
        );
        let controller = controller.with_start_offset(start_offset);

        let task = tokio::spawn(supervise(
            dispatcher,
            pool,
            controller,
            shutdown,
            self.config.join_timeout,
        ));

        RunningPipeline { handle, task }
    }
}

async fn supervise(
    dispatcher: ChunkDispatcher,
    pool: SynthesisPool,
    controller: PlaybackController,
    shutdown: CancellationToken,
    join_timeout: Duration,
) -> Result<PlaybackReport, PipelineError> {
    let dispatcher_task = tokio::spawn(dispatcher.run());
    let pool_task = tokio::spawn(pool.run());

    // 控制器停止时已发出停止信号并关闭缓冲区
    let outcome = controller.run().await;
    shutdown.cancel();

    join_bounded("dispatcher", dispatcher_task, join_timeout).await;
    join_bounded("synthesis pool", pool_task, join_timeout).await;

    outcome
}

/// 有界等待后台任务退出，超时则强制中止
async fn join_bounded<T>(name: &str, mut task: JoinHandle<T>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(_)) => tracing::debug!(task = name, "Task stopped"),
        Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Task ended abnormally"),
        Err(_) => {
            tracing::warn!(
                task = name,
                timeout_ms = timeout.as_millis() as u64,
                "Task did not stop in time, aborting"
            );
            task.abort();
        }
    }
}

/// 正在运行的流水线
pub struct RunningPipeline {
    handle: PlaybackHandle,
    task: JoinHandle<Result<PlaybackReport, PipelineError>>,
}

impl RunningPipeline {
    /// 播放控制句柄（可 clone 给输入监听器）
    pub fn handle(&self) -> PlaybackHandle {
        self.handle.clone()
    }

    pub fn watcher(&self) -> StatusWatcher {
        self.handle.watcher()
    }

    /// 等待运行结束
    ///
    /// 自身持有的句柄在此丢弃；所有句柄都丢弃后播放视为隐式退出
    pub async fn wait(self) -> Result<PlaybackReport, PipelineError> {
        let RunningPipeline { handle, task } = self;
        drop(handle);

        task.await
            .map_err(|e| PipelineError::internal(format!("pipeline task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Chunker, StopReason};
    use crate::infrastructure::adapters::{FakeTtsClient, FakeTtsClientConfig, MemoryOutput};
    use crate::infrastructure::events::PipelineEvent;
    use std::collections::HashMap;

    fn five_hundred_words() -> Arc<str> {
        let sentence = "one two three four five six seven eight nine ten. ";
        Arc::from(sentence.repeat(50).as_str())
    }

    fn fake(config: FakeTtsClientConfig) -> Arc<FakeTtsClient> {
        Arc::new(FakeTtsClient::new(FakeTtsClientConfig {
            sample_rate: 1000,
            ..config
        }))
    }

    struct Run {
        running: RunningPipeline,
        engine: Arc<FakeTtsClient>,
        output: MemoryOutput,
        events: Arc<EventPublisher>,
    }

    fn run(text: Arc<str>, start_offset: usize, engine: Arc<FakeTtsClient>, output: MemoryOutput) -> Run {
        let events = EventPublisher::new().arc();
        let pipeline = ReadAloudPipeline::new(PipelineConfig::default(), engine.clone(), events.clone());
        let running = pipeline.start(text, start_offset, Box::new(output.clone()));
        Run {
            running,
            engine,
            output,
            events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chunk_plays_as_gap() {
        let engine = fake(FakeTtsClientConfig {
            fail_sequences: HashMap::from([(2, 2)]),
            ..FakeTtsClientConfig::default()
        });
        let r = run(five_hundred_words(), 0, engine, MemoryOutput::new());
        let mut events = r.events.subscribe();
        let _keepalive = r.running.handle();

        let report = r.running.wait().await.unwrap();
        assert_eq!(report.reason, StopReason::EndOfText);
        assert_eq!(report.gaps, vec![2]);
        assert_eq!(report.played, 3);
        assert_eq!(r.engine.attempts(2), 2);

        let mut started = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::ChunkStarted { seq, .. } = event {
                started.push(seq);
            }
        }
        assert_eq!(started, vec![0, 1, 3]);
        assert!(!r.output.log().is_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_during_synthesis_stops_workers() {
        let engine = fake(FakeTtsClientConfig {
            latency_ms: 10_000,
            ..FakeTtsClientConfig::default()
        });
        let r = run(five_hundred_words(), 0, engine, MemoryOutput::new());
        let handle = r.running.handle();

        // 块 0、1 已合成，块 2、3 仍在合成
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(handle.status().current_seq, Some(0));
        assert_eq!(r.engine.completed().len(), 2);

        handle.quit().await;
        let report = tokio::time::timeout(Duration::from_secs(5), r.running.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.reason, StopReason::Quit);
        assert!(!r.output.log().is_open);

        // 停止后不再有块完成合成
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(r.engine.completed().len(), 2);
        handle.quit().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_offset() {
        let text = five_hundred_words();
        let expected_start = Chunker::new(&text, ChunkerConfig::default())
            .chunks_from(1234)
            .next()
            .unwrap()
            .span
            .start;

        let engine = fake(FakeTtsClientConfig::default());
        let r = run(text, 1234, engine, MemoryOutput::new());
        let mut events = r.events.subscribe();
        let handle = r.running.handle();
        assert_eq!(handle.position(), 1234);

        let first_offset = loop {
            match events.recv().await.unwrap() {
                PipelineEvent::ChunkStarted { char_offset, .. } => break char_offset,
                _ => continue,
            }
        };
        // 从所在句子合成，但播放从保存的位置开始，位置不回退
        assert!(expected_start < 1234);
        assert_eq!(first_offset, 1234);
        assert!(handle.position() >= 1234);

        handle.quit().await;
        let report = r.running.wait().await.unwrap();
        assert_eq!(report.reason, StopReason::Quit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_failure_surfaces_and_stops_workers() {
        let engine = fake(FakeTtsClientConfig::default());
        let r = run(five_hundred_words(), 0, engine, MemoryOutput::failing());
        let _keepalive = r.running.handle();

        let result = r.running.wait().await;
        assert!(matches!(result, Err(PipelineError::DeviceAcquisition(_))));

        let completed = r.engine.completed().len();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(r.engine.completed().len(), completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_text_ends_immediately() {
        let engine = fake(FakeTtsClientConfig::default());
        let r = run(Arc::from("  \n "), 0, engine, MemoryOutput::new());
        let _keepalive = r.running.handle();

        let report = r.running.wait().await.unwrap();
        assert_eq!(report.reason, StopReason::EndOfText);
        assert_eq!(report.played, 0);
        assert!(r.engine.started().is_empty());
        assert!(r.output.log().opens.is_empty());
    }
}
