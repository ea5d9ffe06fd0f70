//! Memory Output - 内存音频输出
//!
//! 不接触真实设备，只记录写入的采样和设备生命周期；
//! 用于测试和 `playback.output = "null"` 模式

use std::sync::{Arc, Mutex, MutexGuard};

use crate::application::ports::{AudioOutputPort, DeviceError};

/// 输出记录
#[derive(Debug, Default, Clone)]
pub struct OutputLog {
    /// 每次 open 使用的采样率
    pub opens: Vec<u32>,
    /// close 调用次数（包括重复调用）
    pub closes: usize,
    /// 当前是否持有设备
    pub is_open: bool,
    pub paused: bool,
    /// 写入的采样总数
    pub samples_written: usize,
    /// 写入次数（帧数）
    pub frames_written: usize,
    pub flushes: usize,
}

/// 内存音频输出
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput {
    log: Arc<Mutex<OutputLog>>,
    /// 模拟设备获取失败
    fail_open: bool,
    /// 保留写入的采样（默认不保留）
    keep_samples: Option<Arc<Mutex<Vec<f32>>>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建一个 open 总是失败的输出
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// 保留所有写入的采样
    pub fn recording(mut self) -> Self {
        self.keep_samples = Some(Arc::new(Mutex::new(Vec::new())));
        self
    }

    /// 当前记录的快照（clone 出去的句柄共享同一份记录）
    pub fn log(&self) -> OutputLog {
        self.lock().clone()
    }

    /// 已保留的采样
    pub fn samples(&self) -> Vec<f32> {
        self.keep_samples
            .as_ref()
            .map(|kept| kept.lock().map(|s| s.clone()).unwrap_or_default())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, OutputLog> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AudioOutputPort for MemoryOutput {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn open(&mut self, sample_rate: u32) -> Result<(), DeviceError> {
        if self.fail_open {
            return Err(DeviceError::NoDevice);
        }
        if sample_rate == 0 {
            return Err(DeviceError::UnsupportedConfig(
                "sample rate must be positive".to_string(),
            ));
        }
        let mut log = self.lock();
        log.opens.push(sample_rate);
        log.is_open = true;
        log.paused = false;
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), DeviceError> {
        {
            let mut log = self.lock();
            if !log.is_open {
                return Err(DeviceError::NotOpen);
            }
            log.samples_written += samples.len();
            log.frames_written += 1;
        }
        if let Some(kept) = &self.keep_samples {
            if let Ok(mut kept) = kept.lock() {
                kept.extend_from_slice(samples);
            }
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        let mut log = self.lock();
        if !log.is_open {
            return Err(DeviceError::NotOpen);
        }
        log.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), DeviceError> {
        let mut log = self.lock();
        if !log.is_open {
            return Err(DeviceError::NotOpen);
        }
        log.paused = false;
        Ok(())
    }

    fn flush(&mut self) {
        self.lock().flushes += 1;
    }

    fn close(&mut self) {
        let mut log = self.lock();
        log.closes += 1;
        log.is_open = false;
    }
}
