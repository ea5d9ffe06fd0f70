//! Chunk Dispatcher - 惰性分块并送入待合成队列

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{Chunk, Chunker, ChunkerConfig, Seq};
use crate::infrastructure::buffer::ChunkBuffer;

/// 分块派发器
///
/// 队列有界，worker 池阻塞时派发也随之暂停
pub struct ChunkDispatcher {
    text: Arc<str>,
    config: ChunkerConfig,
    start_offset: usize,
    queue_sender: mpsc::Sender<Chunk>,
    buffer: Arc<ChunkBuffer>,
    shutdown: CancellationToken,
}

impl ChunkDispatcher {
    pub fn new(
        text: Arc<str>,
        config: ChunkerConfig,
        start_offset: usize,
        queue_sender: mpsc::Sender<Chunk>,
        buffer: Arc<ChunkBuffer>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            text,
            config,
            start_offset,
            queue_sender,
            buffer,
            shutdown,
        }
    }

    /// 派发所有块，返回派发数量
    ///
    /// 分块器耗尽后把总数告知缓冲区；中途停止则不设置总数
    pub async fn run(self) -> Seq {
        let chunker = Chunker::new(&self.text, self.config.clone());
        tracing::debug!(
            chunked = chunker.is_chunked(),
            start_offset = self.start_offset,
            "Dispatching chunks"
        );

        let mut dispatched: Seq = 0;
        for chunk in chunker.chunks_from(self.start_offset) {
            let seq = chunk.seq;
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::debug!(dispatched = dispatched, "Dispatcher stopped");
                    return dispatched;
                }
                sent = self.queue_sender.send(chunk) => {
                    if sent.is_err() {
                        tracing::debug!(seq = seq, "Chunk queue closed");
                        return dispatched;
                    }
                }
            }
            dispatched += 1;
        }

        self.buffer.finish(dispatched);
        tracing::info!(total = dispatched, "All chunks dispatched");
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::buffer::Delivery;

    fn long_text() -> Arc<str> {
        let sentence = "one two three four five six seven eight nine ten. ";
        Arc::from(sentence.repeat(50).as_str())
    }

    #[tokio::test]
    async fn test_dispatch_all_and_finish() {
        let buffer = Arc::new(ChunkBuffer::new(10));
        let (tx, mut rx) = mpsc::channel(2);
        let dispatcher = ChunkDispatcher::new(
            long_text(),
            ChunkerConfig::default(),
            0,
            tx,
            buffer.clone(),
            CancellationToken::new(),
        );
        let handle = tokio::spawn(dispatcher.run());

        let mut seqs = Vec::new();
        while let Some(chunk) = rx.recv().await {
            seqs.push(chunk.seq);
        }
        let total = handle.await.unwrap();
        assert_eq!(total, 4);
        assert_eq!(seqs, vec![0, 1, 2, 3]);

        // 总数已知：跳过全部后耗尽
        for _ in 0..total {
            buffer.skip_next();
        }
        assert!(matches!(
            buffer.try_take_next().unwrap(),
            Some(Delivery::Exhausted)
        ));
    }

    #[tokio::test]
    async fn test_dispatch_stops_on_cancel() {
        let buffer = Arc::new(ChunkBuffer::new(10));
        let (tx, mut rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let dispatcher = ChunkDispatcher::new(
            long_text(),
            ChunkerConfig::default(),
            0,
            tx,
            buffer.clone(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(dispatcher.run());

        assert_eq!(rx.recv().await.map(|c| c.seq), Some(0));
        shutdown.cancel();
        let dispatched = handle.await.unwrap();
        assert!(dispatched < 4);
        assert!(buffer.try_take_next().unwrap().is_none());
    }
}
