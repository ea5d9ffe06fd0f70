//! 文本块与合成音频块
//!
//! Chunk 由分块器创建，SynthesizedChunk 由合成 worker 创建

use std::time::Duration;

/// 序列号（从 0 开始，单调递增，无间隙）
pub type Seq = u64;

/// 原文中的字符区间 `[start, end)`（按字符计，不是字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// 待合成的文本块（创建后不可变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub seq: Seq,
    pub span: TextSpan,
    pub text: String,
    pub word_count: usize,
}

/// 合成完成的音频块
///
/// 所有权依次转移：worker → ChunkBuffer → PlaybackController
#[derive(Debug, Clone)]
pub struct SynthesizedChunk {
    pub seq: Seq,
    /// 继承自待合成块，用于位置换算
    pub span: TextSpan,
    /// 单声道 PCM 采样
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration: Duration,
    /// 合成耗时（墙钟时间）
    pub synthesis_time: Duration,
}

impl SynthesizedChunk {
    pub fn new(
        seq: Seq,
        span: TextSpan,
        samples: Vec<f32>,
        sample_rate: u32,
        synthesis_time: Duration,
    ) -> Self {
        let duration = if sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64)
        };
        Self {
            seq,
            span,
            samples,
            sample_rate,
            duration,
            synthesis_time,
        }
    }

    /// 采样总数
    pub fn len_samples(&self) -> usize {
        self.samples.len()
    }

    /// 给定音频时长对应的采样数
    pub fn samples_for(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as usize
    }

    /// 将块内采样偏移换算为原文字符偏移
    ///
    /// 按采样进度在 span 内线性映射，结果落在 `[span.start, span.end]`
    pub fn char_offset_at(&self, sample_offset: usize) -> usize {
        let total = self.samples.len();
        if total == 0 || self.span.is_empty() {
            return if sample_offset == 0 {
                self.span.start
            } else {
                self.span.end
            };
        }
        let elapsed = sample_offset.min(total) as u128;
        let advanced = elapsed * self.span.len() as u128 / total as u128;
        self.span.start + advanced as usize
    }

    /// 将原文字符偏移换算回块内采样偏移（`char_offset_at` 的逆映射）
    ///
    /// 向上取整：`char_offset_at(sample_offset_for(x)) >= x`
    pub fn sample_offset_for(&self, char_offset: usize) -> usize {
        if self.span.is_empty() || char_offset <= self.span.start {
            return 0;
        }
        if char_offset >= self.span.end {
            return self.samples.len();
        }
        let distance = (char_offset - self.span.start) as u128;
        let total = self.samples.len() as u128;
        let len = self.span.len() as u128;
        ((distance * total + len - 1) / len) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with(span: TextSpan, seconds: usize, sample_rate: u32) -> SynthesizedChunk {
        let samples = vec![0.0; seconds * sample_rate as usize];
        SynthesizedChunk::new(0, span, samples, sample_rate, Duration::ZERO)
    }

    #[test]
    fn test_duration_from_samples() {
        let chunk = chunk_with(TextSpan::new(0, 100), 4, 8000);
        assert_eq!(chunk.duration, Duration::from_secs(4));
        assert_eq!(chunk.samples_for(Duration::from_secs(1)), 8000);
    }

    #[test]
    fn test_char_offset_maps_linearly() {
        // 100 字符 / 4 秒 = 25 字符/秒
        let chunk = chunk_with(TextSpan::new(200, 300), 4, 8000);
        assert_eq!(chunk.char_offset_at(0), 200);
        assert_eq!(chunk.char_offset_at(8000), 225);
        assert_eq!(chunk.char_offset_at(16000), 250);
        assert_eq!(chunk.char_offset_at(32000), 300);
        // 超出末尾时截断
        assert_eq!(chunk.char_offset_at(64000), 300);
    }

    #[test]
    fn test_sample_offset_inverse() {
        let chunk = chunk_with(TextSpan::new(200, 300), 4, 8000);
        assert_eq!(chunk.sample_offset_for(150), 0);
        assert_eq!(chunk.sample_offset_for(250), 16000);
        assert_eq!(chunk.sample_offset_for(999), 32000);
    }

    #[test]
    fn test_sample_offset_never_maps_before_target() {
        // 7 个采样对应 3 个字符，除不尽
        let chunk = SynthesizedChunk::new(0, TextSpan::new(100, 103), vec![0.0; 7], 7, Duration::ZERO);
        for offset in 100..103 {
            let sample = chunk.sample_offset_for(offset);
            assert!(sample <= chunk.len_samples());
            assert_eq!(chunk.char_offset_at(sample), offset);
        }

        let chunk = chunk_with(TextSpan::new(100, 200), 4, 1000);
        assert!(chunk.span.contains(150));
        assert!(!chunk.span.contains(200));
        assert_eq!(chunk.char_offset_at(chunk.sample_offset_for(150)), 150);
    }

    #[test]
    fn test_empty_audio_offsets() {
        let chunk = chunk_with(TextSpan::new(10, 20), 0, 8000);
        assert_eq!(chunk.char_offset_at(0), 10);
        assert_eq!(chunk.char_offset_at(1), 20);
    }
}
