//! Synthesis Pool - 并发合成 worker 池
//!
//! 从待合成队列消费块，调用合成后端，把结果写入 ChunkBuffer

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{InferRequest, TtsEnginePort, TtsError};
use crate::domain::{Chunk, Seq, SynthesizedChunk};
use crate::infrastructure::buffer::{BufferError, ChunkBuffer};
use crate::infrastructure::events::EventPublisher;

/// Worker 池配置
#[derive(Debug, Clone)]
pub struct SynthesisPoolConfig {
    /// 并发 worker 数
    pub workers: usize,
    /// 每个块的最大尝试次数（首次 + 重试）
    pub max_attempts: u32,
    /// 连续多少个块永久失败后判定合成不可用，0 表示不限制
    pub max_consecutive_failures: usize,
    /// 音色
    pub voice: Option<String>,
}

impl Default for SynthesisPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 2,
            max_consecutive_failures: 3,
            voice: None,
        }
    }
}

/// 单个块处理所需的共享上下文
#[derive(Clone)]
struct WorkerContext {
    config: Arc<SynthesisPoolConfig>,
    tts_engine: Arc<dyn TtsEnginePort>,
    buffer: Arc<ChunkBuffer>,
    event_publisher: Arc<EventPublisher>,
    shutdown: CancellationToken,
    consecutive_failures: Arc<AtomicUsize>,
}

/// 合成 Worker 池
///
/// 用 semaphore 限制并发；permit 一直持有到结果写入缓冲区为止，
/// 所以缓冲区满时新块不会被派发。
pub struct SynthesisPool {
    config: SynthesisPoolConfig,
    queue_receiver: mpsc::Receiver<Chunk>,
    tts_engine: Arc<dyn TtsEnginePort>,
    buffer: Arc<ChunkBuffer>,
    event_publisher: Arc<EventPublisher>,
    shutdown: CancellationToken,
}

impl SynthesisPool {
    pub fn new(
        config: SynthesisPoolConfig,
        queue_receiver: mpsc::Receiver<Chunk>,
        tts_engine: Arc<dyn TtsEnginePort>,
        buffer: Arc<ChunkBuffer>,
        event_publisher: Arc<EventPublisher>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            queue_receiver,
            tts_engine,
            buffer,
            event_publisher,
            shutdown,
        }
    }

    /// 启动 worker 池，直到队列耗尽或收到停止信号
    pub async fn run(mut self) {
        let workers = self.config.workers.max(1);
        tracing::info!(
            workers = workers,
            max_attempts = self.config.max_attempts,
            "SynthesisPool started"
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let context = WorkerContext {
            config: Arc::new(self.config.clone()),
            tts_engine: self.tts_engine.clone(),
            buffer: self.buffer.clone(),
            event_publisher: self.event_publisher.clone(),
            shutdown: self.shutdown.clone(),
            consecutive_failures: Arc::new(AtomicUsize::new(0)),
        };
        let mut tasks = JoinSet::new();

        loop {
            // 按序接收：块 0 总是最先拿到 permit
            let chunk = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    Self::reap(joined, &self.buffer);
                    continue;
                }
                next = self.queue_receiver.recv() => match next {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::error!("Failed to acquire semaphore permit");
                        break;
                    }
                },
            };

            tracing::debug!(seq = chunk.seq, words = chunk.word_count, "Chunk dispatched");
            tasks.spawn(Self::process_chunk(context.clone(), chunk, permit));
        }

        // 等待在途任务观察到停止信号或完成写入
        while let Some(joined) = tasks.join_next().await {
            Self::reap(joined, &self.buffer);
        }

        tracing::info!(cancelled = self.shutdown.is_cancelled(), "SynthesisPool stopped");
    }

    fn reap(joined: Result<(), JoinError>, buffer: &ChunkBuffer) {
        if let Err(e) = joined {
            if e.is_panic() {
                tracing::error!(error = %e, "Synthesis worker panicked");
                buffer.abort(BufferError::Aborted("synthesis worker panicked".to_string()));
            }
        }
    }

    /// 处理单个块
    async fn process_chunk(context: WorkerContext, chunk: Chunk, permit: OwnedSemaphorePermit) {
        let _permit = permit; // 持有 permit 直到写入缓冲区

        if context.shutdown.is_cancelled() {
            tracing::debug!(seq = chunk.seq, "Shutdown requested, skipping chunk");
            return;
        }

        let seq = chunk.seq;
        let started = Instant::now();
        let mut attempts = 0;

        let outcome: Result<_, TtsError> = loop {
            attempts += 1;
            let request = InferRequest {
                sequence: seq,
                text: chunk.text.clone(),
                voice: context.config.voice.clone(),
            };

            let result = tokio::select! {
                biased;
                _ = context.shutdown.cancelled() => {
                    tracing::debug!(seq = seq, "Shutdown during synthesis, abandoning chunk");
                    return;
                }
                result = context.tts_engine.infer(request) => result,
            };

            match result {
                Ok(response) => break Ok(response),
                Err(e) if attempts < context.config.max_attempts => {
                    tracing::warn!(seq = seq, attempt = attempts, error = %e, "Synthesis failed, retrying");
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(response) => {
                context.consecutive_failures.store(0, Ordering::SeqCst);
                let synthesized = SynthesizedChunk::new(
                    seq,
                    chunk.span,
                    response.samples,
                    response.sample_rate,
                    started.elapsed(),
                );
                tracing::info!(
                    seq = seq,
                    attempts = attempts,
                    duration_ms = synthesized.duration.as_millis() as u64,
                    synthesis_ms = synthesized.synthesis_time.as_millis() as u64,
                    "Chunk synthesized"
                );
                context.event_publisher.publish_chunk_synthesized(
                    seq,
                    synthesized.duration,
                    synthesized.synthesis_time,
                    attempts,
                );

                // 背压：缓冲区满时在此等待空位，不丢弃已完成的结果
                if let Err(e) = context.buffer.put(synthesized).await {
                    Self::handle_buffer_error(&context, seq, e);
                }
            }
            Err(e) => {
                tracing::warn!(
                    seq = seq,
                    attempts = attempts,
                    error = %e,
                    "Chunk synthesis failed permanently, marking missing"
                );
                context.event_publisher.publish_chunk_failed(seq, &e.to_string());
                if let Err(buffer_err) = context.buffer.mark_missing(seq) {
                    Self::handle_buffer_error(&context, seq, buffer_err);
                    return;
                }

                let consecutive = context.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let limit = context.config.max_consecutive_failures;
                if limit > 0 && consecutive >= limit {
                    tracing::error!(
                        consecutive = consecutive,
                        error = %e,
                        "Too many consecutive synthesis failures"
                    );
                    context.buffer.abort(BufferError::Aborted(format!(
                        "{} consecutive chunks failed, last error: {}",
                        consecutive, e
                    )));
                }
            }
        }
    }

    fn handle_buffer_error(context: &WorkerContext, seq: Seq, error: BufferError) {
        if error.is_protocol_violation() {
            tracing::error!(seq = seq, error = %error, "Buffer protocol violation");
            context.buffer.abort(error);
        } else {
            tracing::debug!(seq = seq, error = %error, "Buffer unavailable, dropping result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TextSpan;
    use crate::infrastructure::adapters::{FakeTtsClient, FakeTtsClientConfig};
    use crate::infrastructure::buffer::Delivery;
    use crate::infrastructure::events::PipelineEvent;
    use std::collections::HashMap;
    use std::time::Duration;

    fn pending(seq: u64) -> Chunk {
        Chunk {
            seq,
            span: TextSpan::new(seq as usize * 10, seq as usize * 10 + 10),
            text: "one two three four five".to_string(),
            word_count: 5,
        }
    }

    struct Harness {
        buffer: Arc<ChunkBuffer>,
        engine: Arc<FakeTtsClient>,
        events: Arc<EventPublisher>,
        shutdown: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(chunks: u64, capacity: usize, fake: FakeTtsClientConfig, config: SynthesisPoolConfig) -> Harness {
        let buffer = Arc::new(ChunkBuffer::new(capacity));
        let engine = Arc::new(FakeTtsClient::new(fake));
        let events = EventPublisher::new().arc();
        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::channel(chunks.max(1) as usize);
        for seq in 0..chunks {
            tx.try_send(pending(seq)).unwrap();
        }
        drop(tx);
        buffer.finish(chunks);

        let pool = SynthesisPool::new(
            config,
            rx,
            engine.clone(),
            buffer.clone(),
            events.clone(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(pool.run());
        Harness {
            buffer,
            engine,
            events,
            shutdown,
            handle,
        }
    }

    async fn drain(buffer: &ChunkBuffer) -> Vec<Result<u64, u64>> {
        let mut delivered = Vec::new();
        loop {
            match buffer.take_next().await.unwrap() {
                Delivery::Chunk(c) => delivered.push(Ok(c.seq)),
                Delivery::Missing(seq) => {
                    delivered.push(Err(seq));
                    buffer.skip_next();
                }
                Delivery::Exhausted => return delivered,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_chunks_synthesized_in_order() {
        let h = start(6, 10, FakeTtsClientConfig::default(), SynthesisPoolConfig::default());
        let delivered = drain(&h.buffer).await;
        assert_eq!(delivered, (0..6).map(Ok).collect::<Vec<_>>());
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_chunk_dispatched_first() {
        let h = start(4, 10, FakeTtsClientConfig::default(), SynthesisPoolConfig::default());
        drain(&h.buffer).await;
        assert_eq!(h.engine.started().first(), Some(&0));
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chunk_retried_once_then_missing() {
        let fake = FakeTtsClientConfig {
            fail_sequences: HashMap::from([(2, 2)]),
            ..FakeTtsClientConfig::default()
        };
        let h = start(5, 10, fake, SynthesisPoolConfig::default());

        let delivered = drain(&h.buffer).await;
        assert_eq!(delivered, vec![Ok(0), Ok(1), Err(2), Ok(3), Ok(4)]);
        assert_eq!(h.engine.attempts(2), 2);
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failure_recovered_by_retry() {
        let fake = FakeTtsClientConfig {
            fail_sequences: HashMap::from([(1, 1)]),
            ..FakeTtsClientConfig::default()
        };
        let h = start(3, 10, fake, SynthesisPoolConfig::default());
        let mut rx = h.events.subscribe();

        let delivered = drain(&h.buffer).await;
        assert_eq!(delivered, vec![Ok(0), Ok(1), Ok(2)]);
        assert_eq!(h.engine.attempts(1), 2);
        h.handle.await.unwrap();

        let mut retried = false;
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::ChunkSynthesized { seq: 1, attempts, .. } = event {
                retried = attempts == 2;
            }
        }
        assert!(retried);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_failures_abort_buffer() {
        let fake = FakeTtsClientConfig {
            fail_sequences: (0..10).map(|seq| (seq, u32::MAX)).collect(),
            ..FakeTtsClientConfig::default()
        };
        let h = start(10, 10, fake, SynthesisPoolConfig::default());

        let result = loop {
            match h.buffer.take_next().await {
                Ok(Delivery::Missing(_)) => {
                    h.buffer.skip_next();
                }
                Ok(other) => panic!("unexpected delivery {:?}", other),
                Err(e) => break e,
            }
        };
        assert!(matches!(result, BufferError::Aborted(_)));
        h.shutdown.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_blocks_dispatch() {
        let h = start(20, 3, FakeTtsClientConfig::default(), SynthesisPoolConfig::default());

        tokio::time::sleep(Duration::from_secs(30)).await;
        // 3 个在缓冲区，2 个 worker 阻塞在 put 上
        assert_eq!(h.buffer.size(), 3);
        assert_eq!(h.engine.completed().len(), 5);

        h.shutdown.cancel();
        h.buffer.close();
        tokio::time::timeout(Duration::from_secs(1), h.handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_in_flight_synthesis() {
        let fake = FakeTtsClientConfig {
            latency_ms: 10_000,
            ..FakeTtsClientConfig::default()
        };
        let h = start(8, 10, fake, SynthesisPoolConfig::default());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.engine.started().len(), 2);

        h.shutdown.cancel();
        tokio::time::timeout(Duration::from_millis(100), h.handle)
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.engine.completed().is_empty());
        assert_eq!(h.engine.started().len(), 2);
    }
}
