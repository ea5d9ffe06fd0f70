//! Playback Controller - 播放状态机
//!
//! 控制器是一个独占状态的 actor：
//! - 独占音频设备，按帧写入并推进播放位置
//! - 从 ChunkBuffer 按序取块，缺失的块记录间隙后跳过
//! - 命令优先于等待（biased select），状态经 watch 通道发布

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::handle::PlaybackHandle;
use crate::application::ports::{AudioOutputPort, DeviceError};
use crate::application::PipelineError;
use crate::domain::playback::DEFAULT_DEBOUNCE;
use crate::domain::{
    Command, Debouncer, PlaybackState, PlaybackStatus, Seq, StopReason, SynthesizedChunk,
};
use crate::infrastructure::buffer::{ChunkBuffer, Delivery};
use crate::infrastructure::events::{EventPublisher, PipelineEvent};

/// 默认跳转步长（音频时间）
pub const DEFAULT_SEEK: Duration = Duration::from_secs(5);
/// 默认帧长
pub const DEFAULT_FRAME: Duration = Duration::from_millis(20);
/// 默认保留的已播放块数
pub const DEFAULT_HISTORY_CHUNKS: usize = 2;
/// 默认预写帧数
pub const DEFAULT_LEAD_FRAMES: u32 = 3;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// 播放配置
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub seek: Duration,
    pub debounce: Duration,
    pub frame: Duration,
    /// 供向后跳转使用的已播放块数
    pub history_chunks: usize,
    /// 设备队列中保持的额外预写帧数
    pub lead_frames: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            seek: DEFAULT_SEEK,
            debounce: DEFAULT_DEBOUNCE,
            frame: DEFAULT_FRAME,
            history_chunks: DEFAULT_HISTORY_CHUNKS,
            lead_frames: DEFAULT_LEAD_FRAMES,
        }
    }
}

/// 播放结束报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackReport {
    pub reason: StopReason,
    /// 从缓冲区取出并开始播放的块数
    pub played: usize,
    /// 被跳过的缺失块
    pub gaps: Vec<Seq>,
    /// 停止时的原文字符偏移
    pub final_offset: usize,
}

/// 设备槽：记录设备是否打开及采样率，drop 时保证释放
struct DeviceSlot {
    output: Box<dyn AudioOutputPort>,
    sample_rate: Option<u32>,
}

impl DeviceSlot {
    /// 按采样率打开设备；采样率变化时重新打开，返回是否（重新）打开
    fn ensure_open(&mut self, sample_rate: u32) -> Result<bool, DeviceError> {
        if self.sample_rate == Some(sample_rate) {
            return Ok(false);
        }
        if let Some(previous) = self.sample_rate.take() {
            tracing::info!(from = previous, to = sample_rate, "Sample rate changed, reopening device");
        }
        self.output.open(sample_rate)?;
        self.sample_rate = Some(sample_rate);
        tracing::info!(device = %self.output.name(), sample_rate = sample_rate, "Audio device acquired");
        Ok(true)
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), DeviceError> {
        self.output.write(samples)
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        match self.sample_rate {
            Some(_) => self.output.pause(),
            None => Ok(()),
        }
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        match self.sample_rate {
            Some(_) => self.output.resume(),
            None => Ok(()),
        }
    }

    fn flush(&mut self) {
        if self.sample_rate.is_some() {
            self.output.flush();
        }
    }

    fn release(&mut self) {
        if self.sample_rate.take().is_some() {
            self.output.close();
            tracing::info!(device = %self.output.name(), "Audio device released");
        }
    }
}

impl Drop for DeviceSlot {
    fn drop(&mut self) {
        self.release();
    }
}

/// 当前加载的块及已写入的采样数
struct Loaded {
    chunk: SynthesizedChunk,
    position: usize,
}

impl Loaded {
    fn char_offset(&self) -> usize {
        self.chunk.char_offset_at(self.position)
    }

    fn duration_of(&self, samples: usize) -> Duration {
        let nanos = samples as u128 * 1_000_000_000 / self.chunk.sample_rate.max(1) as u128;
        Duration::from_nanos(nanos as u64)
    }
}

/// 写入时钟：以锚点起经过的时间对比已写入的音频时长
#[derive(Debug, Default)]
struct WriteClock {
    anchor: Option<Instant>,
    written: Duration,
    paused_at: Option<Instant>,
}

impl WriteClock {
    /// 当前应播放到的音频时间；设备欠载或尚未开始时重新锚定
    fn elapsed(&mut self, now: Instant) -> Duration {
        if let Some(anchor) = self.anchor {
            let elapsed = now.saturating_duration_since(anchor);
            if elapsed <= self.written {
                return elapsed;
            }
        }
        self.anchor = Some(now);
        self.written = Duration::ZERO;
        Duration::ZERO
    }

    /// 设备队列中尚未播放的音频
    fn queued(&self, now: Instant) -> Duration {
        match self.anchor {
            Some(anchor) => self.written.saturating_sub(now.saturating_duration_since(anchor)),
            None => Duration::ZERO,
        }
    }

    fn pause(&mut self, now: Instant) {
        self.paused_at = Some(now);
    }

    fn resume(&mut self, now: Instant) {
        if let (Some(anchor), Some(paused_at)) = (self.anchor, self.paused_at.take()) {
            self.anchor = Some(anchor + now.saturating_duration_since(paused_at));
        }
    }

    /// 设备队列已清空
    fn restart(&mut self) {
        self.anchor = None;
        self.written = Duration::ZERO;
    }
}

enum Step {
    Continue,
    Stop(StopReason),
}

/// 播放控制器
pub struct PlaybackController {
    config: PlaybackConfig,
    buffer: Arc<ChunkBuffer>,
    device: DeviceSlot,
    events: Arc<EventPublisher>,
    shutdown: CancellationToken,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<PlaybackStatus>,
    debouncer: Debouncer,
    clock: WriteClock,
    /// 断点续读的字符偏移，只作用于第一个新取出的块
    resume_offset: Option<usize>,

    state: PlaybackState,
    current: Option<Loaded>,
    /// 已播放完的块（最旧的在前）
    history: VecDeque<SynthesizedChunk>,
    /// 向后跳转后需要重新播放的块（按序）
    replay: VecDeque<SynthesizedChunk>,
    buffering: bool,
    last_offset: usize,
    played: usize,
    gaps: Vec<Seq>,
}

impl PlaybackController {
    pub fn new(
        config: PlaybackConfig,
        buffer: Arc<ChunkBuffer>,
        output: Box<dyn AudioOutputPort>,
        events: Arc<EventPublisher>,
        shutdown: CancellationToken,
    ) -> (Self, PlaybackHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(PlaybackStatus::default());
        let debouncer = Debouncer::new(config.debounce);

        let controller = Self {
            config,
            buffer,
            device: DeviceSlot {
                output,
                sample_rate: None,
            },
            events,
            shutdown,
            commands: command_rx,
            status: status_tx,
            debouncer,
            clock: WriteClock::default(),
            resume_offset: None,
            state: PlaybackState::Idle,
            current: None,
            history: VecDeque::new(),
            replay: VecDeque::new(),
            buffering: false,
            last_offset: 0,
            played: 0,
            gaps: Vec::new(),
        };

        (controller, PlaybackHandle::new(command_tx, status_rx))
    }

    /// 设置起始字符偏移（断点续读）
    pub fn with_start_offset(mut self, char_offset: usize) -> Self {
        self.last_offset = char_offset;
        self.resume_offset = Some(char_offset);
        self.publish_status();
        self
    }

    /// 运行到停止；返回前设备已释放且停止信号已发出
    pub async fn run(mut self) -> Result<PlaybackReport, PipelineError> {
        tracing::info!(
            device = %self.device.output.name(),
            frame_ms = self.config.frame.as_millis() as u64,
            history_chunks = self.config.history_chunks,
            "PlaybackController started"
        );

        let mut outcome = self.drive().await;
        if matches!(outcome, Ok(StopReason::EndOfText)) {
            outcome = self.drain_queued().await;
        }
        let reason = match &outcome {
            Ok(reason) => *reason,
            Err(e) => {
                tracing::error!(error = %e, "Playback failed");
                StopReason::Failed
            }
        };
        self.enter_stopped(reason);

        outcome.map(|_| self.report(reason))
    }

    /// 文本播完后等待设备队列中的预写音频播放完毕
    async fn drain_queued(&mut self) -> Result<StopReason, PipelineError> {
        let queued = self.clock.queued(Instant::now());
        if queued.is_zero() {
            return Ok(StopReason::EndOfText);
        }
        tracing::debug!(queued_ms = queued.as_millis() as u64, "Draining queued audio");
        tokio::select! {
            _ = tokio::time::sleep(queued) => Ok(StopReason::EndOfText),
            _ = self.shutdown.cancelled() => Ok(StopReason::Quit),
        }
    }

    async fn drive(&mut self) -> Result<StopReason, PipelineError> {
        let mut ticker = tokio::time::interval(self.config.frame);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.publish_status();

        loop {
            if let Some(reason) = self.fill_current()? {
                return Ok(reason);
            }

            let playing = self.state == PlaybackState::Playing && self.current.is_some();
            let waiting = self.needs_chunk();

            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Step::Stop(reason) = self.on_command(command, &mut ticker)? {
                            return Ok(reason);
                        }
                    }
                    None => {
                        tracing::info!("Command channel closed");
                        return Ok(StopReason::CommandChannelClosed);
                    }
                },
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutdown requested");
                    return Ok(StopReason::Quit);
                }
                _ = ticker.tick(), if playing => self.write_ahead(Instant::now())?,
                delivery = self.buffer.take_next(), if waiting => {
                    if let Some(reason) = self.on_delivery(delivery?)? {
                        return Ok(reason);
                    }
                }
            }
        }
    }

    fn needs_chunk(&self) -> bool {
        self.current.is_none()
            && matches!(self.state, PlaybackState::Idle | PlaybackState::Playing)
    }

    /// 非阻塞地装载下一个块；返回 Some 表示文本已播完
    fn fill_current(&mut self) -> Result<Option<StopReason>, PipelineError> {
        while self.needs_chunk() {
            if let Some(chunk) = self.replay.pop_front() {
                self.make_current(chunk, 0, false)?;
                continue;
            }
            match self.buffer.try_take_next()? {
                Some(delivery) => {
                    if let Some(reason) = self.on_delivery(delivery)? {
                        return Ok(Some(reason));
                    }
                }
                None => {
                    self.enter_buffering();
                    break;
                }
            }
        }
        Ok(None)
    }

    fn on_delivery(&mut self, delivery: Delivery) -> Result<Option<StopReason>, PipelineError> {
        match delivery {
            Delivery::Chunk(chunk) => {
                let position = match self.resume_offset.take() {
                    Some(offset) if chunk.span.contains(offset) => chunk.sample_offset_for(offset),
                    _ => 0,
                };
                self.make_current(chunk, position, true)?;
                Ok(None)
            }
            Delivery::Missing(seq) => {
                self.skip_gap(seq);
                Ok(None)
            }
            Delivery::Exhausted => {
                tracing::info!(played = self.played, "End of text reached");
                Ok(Some(StopReason::EndOfText))
            }
        }
    }

    fn make_current(
        &mut self,
        chunk: SynthesizedChunk,
        position: usize,
        fresh: bool,
    ) -> Result<(), PipelineError> {
        let reopened = self.device.ensure_open(chunk.sample_rate)?;
        if reopened && self.state == PlaybackState::Paused {
            self.device.pause()?;
        }
        if fresh {
            self.played += 1;
        }

        let loaded = Loaded { chunk, position };
        let seq = loaded.chunk.seq;
        let char_offset = loaded.char_offset();
        tracing::debug!(
            seq = seq,
            char_offset = char_offset,
            duration_ms = loaded.chunk.duration.as_millis() as u64,
            replay = !fresh,
            "Chunk started"
        );
        self.events
            .publish(PipelineEvent::ChunkStarted { seq, char_offset });

        self.current = Some(loaded);
        self.buffering = false;
        self.last_offset = char_offset;
        if self.state == PlaybackState::Idle {
            self.set_state(PlaybackState::Playing);
        }
        self.publish_status();
        Ok(())
    }

    fn skip_gap(&mut self, seq: Seq) {
        let skipped = self.buffer.skip_next();
        debug_assert_eq!(skipped, seq);
        tracing::warn!(seq = seq, char_offset = self.last_offset, "Chunk missing, skipping gap");
        self.gaps.push(seq);
        self.events.publish(PipelineEvent::GapSkipped { seq });
    }

    fn enter_buffering(&mut self) {
        if self.buffering {
            return;
        }
        self.buffering = true;
        let seq = self.buffer.cursor();
        tracing::debug!(seq = seq, "Waiting for chunk");
        self.events.publish(PipelineEvent::Buffering { seq });
        self.publish_status();
    }

    /// 把设备队列补到“已过时间 + 一帧 + 预写帧”，块播完时移入历史
    fn write_ahead(&mut self, now: Instant) -> Result<(), PipelineError> {
        let elapsed = self.clock.elapsed(now);
        let target = elapsed + self.config.frame * (self.config.lead_frames + 1);

        while self.clock.written < target {
            let Some(loaded) = self.current.as_mut() else {
                break;
            };
            let total = loaded.chunk.len_samples();
            if loaded.position >= total {
                self.finish_current();
                break;
            }

            let wanted = loaded.chunk.samples_for(target - self.clock.written);
            if wanted == 0 {
                break;
            }
            let end = (loaded.position + wanted).min(total);
            self.device.write(&loaded.chunk.samples[loaded.position..end])?;
            self.clock.written += loaded.duration_of(end - loaded.position);
            loaded.position = end;
            self.last_offset = loaded.char_offset();
            if end >= total {
                self.finish_current();
                break;
            }
        }

        self.publish_status();
        Ok(())
    }

    /// 当前块移入历史
    fn finish_current(&mut self) {
        let Some(loaded) = self.current.take() else {
            return;
        };
        tracing::trace!(seq = loaded.chunk.seq, "Chunk finished");
        self.last_offset = loaded.chunk.span.end;

        if self.config.history_chunks == 0 {
            return;
        }
        self.history.push_back(loaded.chunk);
        while self.history.len() > self.config.history_chunks {
            self.history.pop_front();
        }
    }

    fn on_command(&mut self, command: Command, ticker: &mut Interval) -> Result<Step, PipelineError> {
        if !self.debouncer.accept(command, Instant::now()) {
            tracing::debug!(command = command.as_str(), "Command debounced");
            return Ok(Step::Continue);
        }
        tracing::debug!(command = command.as_str(), state = %self.state, "Command received");

        match (command, self.state) {
            (Command::Quit, _) => return Ok(Step::Stop(StopReason::Quit)),
            (Command::Pause, PlaybackState::Playing) => {
                self.device.pause()?;
                self.clock.pause(Instant::now());
                self.set_state(PlaybackState::Paused);
            }
            (Command::Resume, PlaybackState::Paused) => {
                self.device.resume()?;
                self.clock.resume(Instant::now());
                ticker.reset();
                self.set_state(PlaybackState::Playing);
            }
            (Command::SeekForward | Command::SeekBackward, PlaybackState::Playing | PlaybackState::Paused) => {
                self.seek(command == Command::SeekForward)?;
            }
            (command, state) => {
                tracing::debug!(command = command.as_str(), state = %state, "Command ignored");
            }
        }
        Ok(Step::Continue)
    }

    fn seek(&mut self, forward: bool) -> Result<(), PipelineError> {
        let resume_state = self.state;
        let from = self.last_offset;
        self.set_state(PlaybackState::Seeking);

        let outcome = if forward {
            self.seek_forward()
        } else {
            self.seek_backward()
        };
        self.device.flush();
        self.clock.restart();
        self.set_state(resume_state);
        outcome?;

        tracing::info!(
            forward = forward,
            from = from,
            to = self.last_offset,
            seq = ?self.current.as_ref().map(|l| l.chunk.seq),
            "Seek applied"
        );
        self.publish_status();
        Ok(())
    }

    /// 向前跳转；超出已合成的音频时停在可用音频末尾
    fn seek_forward(&mut self) -> Result<(), PipelineError> {
        let mut remaining = self.config.seek;

        loop {
            let Some(loaded) = self.current.as_mut() else {
                // 已在等待下一个块
                return Ok(());
            };

            let left = loaded.chunk.len_samples() - loaded.position;
            let wanted = loaded.chunk.samples_for(remaining);
            if wanted < left {
                loaded.position += wanted;
                self.last_offset = loaded.char_offset();
                return Ok(());
            }
            remaining = remaining.saturating_sub(loaded.duration_of(left));

            match self.next_for_seek()? {
                Some((chunk, fresh)) => {
                    self.finish_current();
                    self.make_current(chunk, 0, fresh)?;
                }
                None => {
                    tracing::debug!(frontier = ?self.buffer.frontier(), "Seek clamped to available audio");
                    self.finish_current();
                    return Ok(());
                }
            }
        }
    }

    /// 跳转时可立即使用的下一个块（不等待）
    fn next_for_seek(&mut self) -> Result<Option<(SynthesizedChunk, bool)>, PipelineError> {
        if let Some(chunk) = self.replay.pop_front() {
            return Ok(Some((chunk, false)));
        }
        loop {
            match self.buffer.try_take_next()? {
                Some(Delivery::Chunk(chunk)) => return Ok(Some((chunk, true))),
                Some(Delivery::Missing(seq)) => self.skip_gap(seq),
                Some(Delivery::Exhausted) | None => return Ok(None),
            }
        }
    }

    /// 向后跳转；只使用历史中保留的块，超出时停在最早块的开头
    fn seek_backward(&mut self) -> Result<(), PipelineError> {
        let mut remaining = self.config.seek;

        if self.current.is_none() {
            // 缓冲等待中：从最后播放完的块末尾开始回退
            match self.history.pop_back() {
                Some(chunk) => {
                    let end = chunk.len_samples();
                    self.make_current(chunk, end, false)?;
                }
                None => return Ok(()),
            }
        }

        loop {
            let Some(loaded) = self.current.as_mut() else {
                return Ok(());
            };

            let back = loaded.chunk.samples_for(remaining);
            if back <= loaded.position {
                loaded.position -= back;
                self.last_offset = loaded.char_offset();
                return Ok(());
            }
            remaining = remaining.saturating_sub(loaded.duration_of(loaded.position));

            match self.history.pop_back() {
                Some(previous) => {
                    if let Some(current) = self.current.take() {
                        self.replay.push_front(current.chunk);
                    }
                    let end = previous.len_samples();
                    self.make_current(previous, end, false)?;
                }
                None => {
                    loaded.position = 0;
                    self.last_offset = loaded.char_offset();
                    return Ok(());
                }
            }
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "Playback state changed");
        self.state = state;
        self.events.publish_state(state);
        self.publish_status();
    }

    fn publish_status(&self) {
        let status = PlaybackStatus {
            state: self.state,
            char_offset: self.last_offset,
            current_seq: self.current.as_ref().map(|loaded| loaded.chunk.seq),
            buffering: self.buffering,
            buffered: self.buffer.size(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn enter_stopped(&mut self, reason: StopReason) {
        self.shutdown.cancel();
        self.buffer.close();
        self.device.release();

        self.current = None;
        self.replay.clear();
        self.buffering = false;
        self.set_state(PlaybackState::Stopped);
        self.events.publish(PipelineEvent::Stopped {
            reason,
            char_offset: self.last_offset,
        });

        tracing::info!(
            reason = reason.as_str(),
            char_offset = self.last_offset,
            played = self.played,
            gaps = self.gaps.len(),
            "Playback stopped"
        );
    }

    fn report(&self, reason: StopReason) -> PlaybackReport {
        PlaybackReport {
            reason,
            played: self.played,
            gaps: self.gaps.clone(),
            final_offset: self.last_offset,
        }
    }
}
