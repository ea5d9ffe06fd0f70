//! Chunk Buffer - 合成与播放之间的有界有序缓冲区
//!
//! worker 写入、PlaybackController 按序读取并推进游标；
//! 这是唯一被多个并发单元修改的结构。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Notify;

use crate::application::PipelineError;
use crate::domain::{Seq, SynthesizedChunk};

/// 默认最大驻留块数
pub const DEFAULT_CAPACITY: usize = 10;

/// 缓冲区错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("Duplicate sequence: {0}")]
    DuplicateSequence(Seq),

    #[error("Stale sequence {seq} (cursor at {cursor})")]
    StaleSequence { seq: Seq, cursor: Seq },

    #[error("Buffer closed")]
    Closed,

    #[error("Buffer aborted: {0}")]
    Aborted(String),
}

impl BufferError {
    /// 是否为协议违反（编程错误）
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            BufferError::DuplicateSequence(_) | BufferError::StaleSequence { .. }
        )
    }
}

impl From<BufferError> for PipelineError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Aborted(reason) => PipelineError::SynthesisUnavailable(reason),
            BufferError::Closed => PipelineError::internal("chunk buffer closed during playback"),
            violation => PipelineError::buffer_protocol(violation.to_string()),
        }
    }
}

/// `take_next` 的结果
#[derive(Debug)]
pub enum Delivery {
    /// 游标处的块（游标已前进）
    Chunk(SynthesizedChunk),
    /// 游标处的块永久缺失，调用方应记录间隙并 `skip_next`
    Missing(Seq),
    /// 所有块都已交付
    Exhausted,
}

#[derive(Debug, Default)]
struct BufferInner {
    chunks: BTreeMap<Seq, SynthesizedChunk>,
    missing: BTreeSet<Seq>,
    /// 下一个需要交付的序列号
    cursor: Seq,
    /// 块总数（分块器耗尽后才知道）
    total: Option<Seq>,
    /// 已合成的最大序列号
    frontier: Option<Seq>,
    closed: bool,
    /// 致命错误，之后所有读写都返回它
    aborted: Option<BufferError>,
}

impl BufferInner {
    fn check_open(&self) -> Result<(), BufferError> {
        if let Some(err) = &self.aborted {
            return Err(err.clone());
        }
        if self.closed {
            return Err(BufferError::Closed);
        }
        Ok(())
    }

    fn check_sequence(&self, seq: Seq) -> Result<(), BufferError> {
        if seq < self.cursor {
            return Err(BufferError::StaleSequence {
                seq,
                cursor: self.cursor,
            });
        }
        if self.chunks.contains_key(&seq) || self.missing.contains(&seq) {
            return Err(BufferError::DuplicateSequence(seq));
        }
        Ok(())
    }
}

/// 有界、按序列号排序的块缓冲区
///
/// 准入按窗口计算：序列号 `s` 只有在 `s < cursor + capacity` 时才能写入，
/// 所以驻留块数不超过容量，且播放端正在等待的块永远可以写入。
#[derive(Debug)]
pub struct ChunkBuffer {
    inner: Mutex<BufferInner>,
    capacity: usize,
    /// 游标前进时通知（有空位）
    space: Notify,
    /// 新块到达 / 缺失 / 结束 / 关闭时通知
    arrivals: Notify,
}

impl ChunkBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BufferInner::default()),
            capacity: capacity.max(1),
            space: Notify::new(),
            arrivals: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 写入一个合成块，缓冲区满时等待空位
    ///
    /// 关闭或中止时立即返回错误；重复或过期的序列号视为协议违反
    pub async fn put(&self, chunk: SynthesizedChunk) -> Result<(), BufferError> {
        let seq = chunk.seq;
        let mut waited = false;

        loop {
            let space = self.space.notified();
            {
                let mut inner = self.lock();
                inner.check_open()?;
                inner.check_sequence(seq)?;

                let window_end = inner.cursor + self.capacity as Seq;
                if seq < window_end && inner.chunks.len() < self.capacity {
                    let frontier = inner.frontier.map_or(seq, |f| f.max(seq));
                    inner.chunks.insert(seq, chunk);
                    inner.frontier = Some(frontier);
                    let resident = inner.chunks.len();
                    drop(inner);

                    tracing::debug!(seq = seq, resident = resident, waited = waited, "Chunk buffered");
                    self.arrivals.notify_waiters();
                    return Ok(());
                }
            }

            if !waited {
                tracing::debug!(seq = seq, "Buffer full, waiting for space");
                waited = true;
            }
            space.await;
        }
    }

    /// 等待并取出游标处的块
    pub async fn take_next(&self) -> Result<Delivery, BufferError> {
        loop {
            let arrival = self.arrivals.notified();
            if let Some(delivery) = self.poll_next()? {
                return Ok(delivery);
            }
            arrival.await;
        }
    }

    /// 非阻塞地取出游标处的块，尚未就绪时返回 `None`
    pub fn try_take_next(&self) -> Result<Option<Delivery>, BufferError> {
        self.poll_next()
    }

    fn poll_next(&self) -> Result<Option<Delivery>, BufferError> {
        let mut inner = self.lock();
        inner.check_open()?;

        let cursor = inner.cursor;
        if let Some(chunk) = inner.chunks.remove(&cursor) {
            inner.cursor += 1;
            drop(inner);
            self.space.notify_waiters();
            return Ok(Some(Delivery::Chunk(chunk)));
        }
        if inner.missing.contains(&cursor) {
            return Ok(Some(Delivery::Missing(cursor)));
        }
        if inner.total.is_some_and(|total| cursor >= total) {
            return Ok(Some(Delivery::Exhausted));
        }
        Ok(None)
    }

    /// 跳过游标处永远不会到达的块，返回被跳过的序列号
    pub fn skip_next(&self) -> Seq {
        let mut inner = self.lock();
        let skipped = inner.cursor;
        inner.missing.remove(&skipped);
        inner.chunks.remove(&skipped);
        inner.cursor += 1;
        drop(inner);

        self.space.notify_waiters();
        skipped
    }

    /// 标记某个块永久缺失（合成重试后仍失败）
    pub fn mark_missing(&self, seq: Seq) -> Result<(), BufferError> {
        let mut inner = self.lock();
        inner.check_open()?;
        inner.check_sequence(seq)?;
        inner.missing.insert(seq);
        drop(inner);

        self.arrivals.notify_waiters();
        Ok(())
    }

    /// 设置块总数（分块器耗尽）
    pub fn finish(&self, total: Seq) {
        self.lock().total = Some(total);
        self.arrivals.notify_waiters();
    }

    /// 关闭缓冲区，唤醒所有等待者（幂等）
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.chunks.clear();
        drop(inner);

        self.space.notify_waiters();
        self.arrivals.notify_waiters();
    }

    /// 因致命错误中止，之后所有读写都返回该错误（只记录第一次）
    pub fn abort(&self, error: BufferError) {
        let mut inner = self.lock();
        if inner.aborted.is_none() {
            inner.aborted = Some(error);
        }
        drop(inner);

        self.space.notify_waiters();
        self.arrivals.notify_waiters();
    }

    /// 当前驻留块数
    pub fn size(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 下一个需要交付的序列号
    pub fn cursor(&self) -> Seq {
        self.lock().cursor
    }

    /// 合成前沿：已合成的最大序列号
    pub fn frontier(&self) -> Option<Seq> {
        self.lock().frontier
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TextSpan;
    use std::sync::Arc;
    use std::time::Duration;

    fn chunk(seq: Seq) -> SynthesizedChunk {
        SynthesizedChunk::new(
            seq,
            TextSpan::new(seq as usize * 10, seq as usize * 10 + 10),
            vec![0.0; 160],
            16000,
            Duration::ZERO,
        )
    }

    fn expect_chunk(delivery: Delivery) -> Seq {
        match delivery {
            Delivery::Chunk(c) => c.seq,
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_puts_delivered_in_order() {
        let buffer = ChunkBuffer::new(10);
        buffer.put(chunk(2)).await.unwrap();
        buffer.put(chunk(1)).await.unwrap();

        // 0 未到达前 1、2 都不能交付
        assert!(buffer.try_take_next().unwrap().is_none());

        buffer.put(chunk(0)).await.unwrap();
        assert_eq!(expect_chunk(buffer.take_next().await.unwrap()), 0);
        assert_eq!(expect_chunk(buffer.take_next().await.unwrap()), 1);
        assert_eq!(expect_chunk(buffer.take_next().await.unwrap()), 2);
        assert_eq!(buffer.cursor(), 3);
        assert_eq!(buffer.frontier(), Some(2));
    }

    #[tokio::test]
    async fn test_take_next_waits_for_cursor_chunk() {
        let buffer = Arc::new(ChunkBuffer::new(10));
        let consumer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.take_next().await })
        };

        tokio::task::yield_now().await;
        buffer.put(chunk(1)).await.unwrap();
        tokio::task::yield_now().await;
        assert!(!consumer.is_finished());

        buffer.put(chunk(0)).await.unwrap();
        let delivered = consumer.await.unwrap().unwrap();
        assert_eq!(expect_chunk(delivered), 0);
    }

    #[tokio::test]
    async fn test_missing_chunk_requires_skip() {
        let buffer = ChunkBuffer::new(10);
        buffer.put(chunk(0)).await.unwrap();
        buffer.put(chunk(2)).await.unwrap();
        buffer.mark_missing(1).unwrap();

        assert_eq!(expect_chunk(buffer.take_next().await.unwrap()), 0);
        assert!(matches!(buffer.take_next().await.unwrap(), Delivery::Missing(1)));
        // 未跳过之前不前进
        assert!(matches!(buffer.take_next().await.unwrap(), Delivery::Missing(1)));

        assert_eq!(buffer.skip_next(), 1);
        assert_eq!(expect_chunk(buffer.take_next().await.unwrap()), 2);
    }

    #[tokio::test]
    async fn test_put_blocks_when_full() {
        let buffer = Arc::new(ChunkBuffer::new(3));
        for seq in 0..3 {
            buffer.put(chunk(seq)).await.unwrap();
        }
        assert_eq!(buffer.size(), 3);

        let blocked = tokio::time::timeout(Duration::from_millis(50), buffer.put(chunk(3))).await;
        assert!(blocked.is_err());
        assert_eq!(buffer.size(), 3);

        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.put(chunk(3)).await })
        };
        assert_eq!(expect_chunk(buffer.take_next().await.unwrap()), 0);
        producer.await.unwrap().unwrap();
        assert_eq!(buffer.size(), 3);
    }

    #[tokio::test]
    async fn test_window_keeps_cursor_chunk_admissible() {
        let buffer = ChunkBuffer::new(2);
        buffer.put(chunk(1)).await.unwrap();

        // 2 超出窗口 [0, 2)，即使只驻留了一个块也要等待
        let blocked = tokio::time::timeout(Duration::from_millis(20), buffer.put(chunk(2))).await;
        assert!(blocked.is_err());

        // 游标处的块总能写入
        buffer.put(chunk(0)).await.unwrap();
        assert_eq!(buffer.size(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_and_stale_rejected() {
        let buffer = ChunkBuffer::new(10);
        buffer.put(chunk(0)).await.unwrap();
        assert_eq!(
            buffer.put(chunk(0)).await.unwrap_err(),
            BufferError::DuplicateSequence(0)
        );

        buffer.take_next().await.unwrap();
        let err = buffer.put(chunk(0)).await.unwrap_err();
        assert_eq!(err, BufferError::StaleSequence { seq: 0, cursor: 1 });
        assert!(err.is_protocol_violation());

        buffer.mark_missing(3).unwrap();
        assert_eq!(
            buffer.put(chunk(3)).await.unwrap_err(),
            BufferError::DuplicateSequence(3)
        );
    }

    #[tokio::test]
    async fn test_close_releases_blocked_producer() {
        let buffer = Arc::new(ChunkBuffer::new(1));
        buffer.put(chunk(0)).await.unwrap();

        let producer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.put(chunk(1)).await })
        };
        tokio::task::yield_now().await;

        buffer.close();
        buffer.close();
        assert_eq!(producer.await.unwrap().unwrap_err(), BufferError::Closed);
        assert!(matches!(buffer.take_next().await, Err(BufferError::Closed)));
    }

    #[tokio::test]
    async fn test_finish_reports_exhausted() {
        let buffer = ChunkBuffer::new(10);
        buffer.put(chunk(0)).await.unwrap();
        buffer.finish(1);
        assert_eq!(expect_chunk(buffer.take_next().await.unwrap()), 0);
        assert!(matches!(buffer.take_next().await.unwrap(), Delivery::Exhausted));
    }

    #[tokio::test]
    async fn test_abort_wakes_consumer() {
        let buffer = Arc::new(ChunkBuffer::new(10));
        let consumer = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.take_next().await })
        };
        tokio::task::yield_now().await;

        buffer.abort(BufferError::Aborted("backend down".to_string()));
        let err = consumer.await.unwrap().unwrap_err();
        assert_eq!(err, BufferError::Aborted("backend down".to_string()));
        assert!(matches!(
            PipelineError::from(err),
            PipelineError::SynthesisUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_abort_with_protocol_violation() {
        let buffer = ChunkBuffer::new(10);
        buffer.abort(BufferError::DuplicateSequence(4));
        buffer.abort(BufferError::Aborted("later".to_string()));

        let err = buffer.take_next().await.unwrap_err();
        assert_eq!(err, BufferError::DuplicateSequence(4));
        assert!(matches!(
            PipelineError::from(err),
            PipelineError::BufferProtocol(_)
        ));
        assert!(buffer.put(chunk(0)).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capacity_never_exceeded_under_concurrent_puts() {
        const TOTAL: Seq = 200;
        const PRODUCERS: Seq = 4;
        let buffer = Arc::new(ChunkBuffer::new(DEFAULT_CAPACITY));

        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let buffer = buffer.clone();
            producers.push(tokio::spawn(async move {
                let mut seq = p;
                while seq < TOTAL {
                    buffer.put(chunk(seq)).await.unwrap();
                    assert!(buffer.size() <= DEFAULT_CAPACITY);
                    if seq % 3 == 0 {
                        tokio::task::yield_now().await;
                    }
                    seq += PRODUCERS;
                }
            }));
        }
        buffer.finish(TOTAL);

        let mut expected = 0;
        loop {
            match buffer.take_next().await.unwrap() {
                Delivery::Chunk(c) => {
                    assert_eq!(c.seq, expected);
                    assert!(buffer.size() <= DEFAULT_CAPACITY);
                    expected += 1;
                }
                Delivery::Exhausted => break,
                Delivery::Missing(seq) => panic!("unexpected missing {}", seq),
            }
        }
        assert_eq!(expected, TOTAL);

        for producer in producers {
            producer.await.unwrap();
        }
    }
}
