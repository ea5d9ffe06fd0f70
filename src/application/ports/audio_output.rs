//! Audio Output Port - 音频输出设备抽象
//!
//! 设备只由 PlaybackController 持有和写入

use thiserror::Error;

/// 设备错误
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No default output device")]
    NoDevice,

    #[error("Unsupported output config: {0}")]
    UnsupportedConfig(String),

    #[error("Device not open")]
    NotOpen,

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Audio Output Port
///
/// 生命周期：`open` 获取设备，`close` 释放设备；`close` 必须幂等
pub trait AudioOutputPort: Send {
    /// 设备名称（用于日志）
    fn name(&self) -> String;

    /// 以指定采样率打开设备
    ///
    /// 已打开时按新采样率重新打开，已排队的采样继续播放
    fn open(&mut self, sample_rate: u32) -> Result<(), DeviceError>;

    /// 写入一帧单声道采样
    fn write(&mut self, samples: &[f32]) -> Result<(), DeviceError>;

    /// 立即停止出声，保留已排队的采样
    fn pause(&mut self) -> Result<(), DeviceError>;

    /// 从暂停处继续
    fn resume(&mut self) -> Result<(), DeviceError>;

    /// 丢弃已排队但未播放的采样（跳转时使用）
    fn flush(&mut self);

    /// 释放设备
    fn close(&mut self);
}
