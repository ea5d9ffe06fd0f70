//! Cpal Output - 真实音频设备输出
//!
//! cpal 的 Stream 不能跨线程移动，所以由专用线程持有；
//! 控制器写入的采样进入共享队列，由输出回调消费。

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::application::ports::{AudioOutputPort, DeviceError};
use crate::infrastructure::adapters::decoder::resample_mono;

type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

/// 设备线程的句柄
struct DeviceThread {
    stop: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
    /// 设备原生采样率
    device_rate: u32,
}

/// cpal 默认输出设备
pub struct CpalOutput {
    queue: SampleQueue,
    paused: Arc<AtomicBool>,
    /// 输入采样率（open 时给定）
    source_rate: u32,
    thread: Option<DeviceThread>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            paused: Arc::new(AtomicBool::new(false)),
            source_rate: 0,
            thread: None,
        }
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

fn build_stream(
    queue: SampleQueue,
    paused: Arc<AtomicBool>,
) -> Result<(Stream, u32), DeviceError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;
    let supported = device
        .default_output_config()
        .map_err(|e| DeviceError::UnsupportedConfig(e.to_string()))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = config.channels.max(1) as usize;
    let device_rate = config.sample_rate.0;

    tracing::info!(
        device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
        sample_rate = device_rate,
        channels = channels,
        "Opening output device"
    );

    let on_error = |err: cpal::StreamError| tracing::error!("Audio stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                fill_frames(data, channels, &queue, &paused, |s| s);
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                fill_frames(data, channels, &queue, &paused, |s| {
                    (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
                });
            },
            on_error,
            None,
        ),
        format => {
            return Err(DeviceError::UnsupportedConfig(format!("{format:?}")));
        }
    }
    .map_err(|e| DeviceError::Backend(e.to_string()))?;

    stream
        .play()
        .map_err(|e| DeviceError::Backend(e.to_string()))?;

    Ok((stream, device_rate))
}

/// 输出回调：单声道采样复制到所有声道，队列空或暂停时输出静音
fn fill_frames<T: Copy + Default>(
    data: &mut [T],
    channels: usize,
    queue: &SampleQueue,
    paused: &AtomicBool,
    convert: impl Fn(f32) -> T,
) {
    if paused.load(Ordering::Relaxed) {
        data.fill(T::default());
        return;
    }
    let Ok(mut queue) = queue.lock() else {
        data.fill(T::default());
        return;
    };
    for frame in data.chunks_mut(channels) {
        let value = queue.pop_front().map(&convert).unwrap_or_default();
        frame.fill(value);
    }
}

/// 重开设备后把尚未播放的采样换算到新设备的采样率
fn carry_over(queue: &mut VecDeque<f32>, from_rate: u32, to_rate: u32) {
    if from_rate == to_rate || queue.is_empty() {
        return;
    }
    let pending: Vec<f32> = queue.drain(..).collect();
    queue.extend(resample_mono(&pending, from_rate, to_rate));
}

impl CpalOutput {
    /// 停止设备线程，保留队列中的采样；返回原设备采样率
    fn stop_thread(&mut self) -> Option<u32> {
        let thread = self.thread.take()?;
        let _ = thread.stop.send(());
        if thread.handle.join().is_err() {
            tracing::warn!("Audio thread panicked");
        }
        tracing::info!("Output device released");
        Some(thread.device_rate)
    }
}

impl AudioOutputPort for CpalOutput {
    fn name(&self) -> String {
        "cpal".to_string()
    }

    fn open(&mut self, sample_rate: u32) -> Result<(), DeviceError> {
        // 重开时上一块已排队的尾部继续播放
        let previous_rate = self.stop_thread();

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, DeviceError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let queue = self.queue.clone();
        let paused = self.paused.clone();

        let handle = std::thread::Builder::new()
            .name("narrate-audio".to_string())
            .spawn(move || match build_stream(queue, paused) {
                Ok((stream, device_rate)) => {
                    let _ = ready_tx.send(Ok(device_rate));
                    // 阻塞到 close 或句柄被丢弃
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::debug!("Output stream dropped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| DeviceError::Backend("audio thread exited".to_string()))??;

        if let Some(previous_rate) = previous_rate {
            let mut queue = self
                .queue
                .lock()
                .map_err(|_| DeviceError::Backend("sample queue poisoned".to_string()))?;
            carry_over(&mut queue, previous_rate, device_rate);
        }

        self.source_rate = sample_rate;
        self.paused.store(false, Ordering::Relaxed);
        self.thread = Some(DeviceThread {
            stop: stop_tx,
            handle,
            device_rate,
        });
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), DeviceError> {
        let thread = self.thread.as_ref().ok_or(DeviceError::NotOpen)?;
        let converted = resample_mono(samples, self.source_rate, thread.device_rate);
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| DeviceError::Backend("sample queue poisoned".to_string()))?;
        queue.extend(converted);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        if self.thread.is_none() {
            return Err(DeviceError::NotOpen);
        }
        self.paused.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        if self.thread.is_none() {
            return Err(DeviceError::NotOpen);
        }
        self.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn flush(&mut self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    fn close(&mut self) {
        self.flush();
        self.stop_thread();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_frames_duplicates_channels() {
        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::from(vec![0.5, -0.5])));
        let paused = AtomicBool::new(false);
        let mut data = [0.0f32; 6];
        fill_frames(&mut data, 2, &queue, &paused, |s| s);
        assert_eq!(data, [0.5, 0.5, -0.5, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_fill_frames_paused_keeps_queue() {
        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::from(vec![0.5])));
        let paused = AtomicBool::new(true);
        let mut data = [1.0f32; 2];
        fill_frames(&mut data, 1, &queue, &paused, |s| s);
        assert_eq!(data, [0.0, 0.0]);
        assert_eq!(queue.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_carry_over_keeps_pending_samples() {
        let mut queue = VecDeque::from(vec![0.25; 480]);
        carry_over(&mut queue, 48000, 48000);
        assert_eq!(queue.len(), 480);

        carry_over(&mut queue, 48000, 44100);
        assert!((queue.len() as i64 - 441).abs() <= 1, "{}", queue.len());
        assert!(queue.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_open_default_device() {
        let mut output = CpalOutput::new();
        output.open(16000).unwrap();
        output.write(&vec![0.0; 32000]).unwrap();
        // 重开不清空队列
        output.open(22050).unwrap();
        assert!(!output.queue.lock().unwrap().is_empty());
        output.close();
        assert!(output.queue.lock().unwrap().is_empty());
    }
}
