//! WAV Decoder - 基于 symphonia 的音频解码
//!
//! 把合成服务返回的 WAV 字节解码为单声道 f32 PCM

use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// 解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("No audio track found")]
    NoTrack,

    #[error("Unknown {0}")]
    MissingParameter(&'static str),

    #[error("Decoding error: {0}")]
    Decode(String),
}

/// 解码后的单声道音频
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// 源文件的声道数（samples 已混为单声道）
    pub channels: u8,
}

/// 解码 WAV 字节为单声道 PCM
pub fn decode_wav(data: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("wav");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Probe(e.to_string()))?;

    let mut format = probed.format;
    let track = format.default_track().ok_or(DecodeError::NoTrack)?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::MissingParameter("sample rate"))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u8)
        .ok_or(DecodeError::MissingParameter("channel count"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Decode(format!("Decoder creation failed: {}", e)))?;

    let track_id = track.id;
    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(DecodeError::Decode(format!("Packet read error: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Decode error (skipping packet): {}", e);
                continue;
            }
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();
        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let actual_samples = num_frames * spec.channels.count();
        interleaved.extend(&sample_buf.samples()[..actual_samples]);
    }

    Ok(DecodedAudio {
        samples: downmix_to_mono(&interleaved, channels),
        sample_rate,
        channels,
    })
}

/// 交错多声道混为单声道
pub fn downmix_to_mono(samples: &[f32], channels: u8) -> Vec<f32> {
    let channel_count = channels.max(1) as usize;
    if channel_count == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channel_count)
        .map(|frame| frame.iter().sum::<f32>() / channel_count as f32)
        .collect()
}

/// 单声道线性重采样
pub fn resample_mono(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let last = samples.len() - 1;

    (0..new_len)
        .map(|i| {
            let src_pos = i as f64 / ratio;
            let src_idx = (src_pos as usize).min(last);
            let frac = (src_pos - src_idx as f64) as f32;
            let s0 = samples[src_idx];
            let s1 = samples[(src_idx + 1).min(last)];
            // 线性插值
            s0 + (s1 - s0) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_wav(sample_rate: u32, channels: u16, frames: &[Vec<i16>]) -> Vec<u8> {
        let bits_per_sample: u16 = 16;
        let byte_rate = sample_rate * channels as u32 * 2;
        let block_align = channels * 2;
        let data_size = frames.len() * channels as usize * 2;

        let mut wav = Vec::with_capacity(44 + data_size);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_size as u32).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&channels.to_le_bytes());
        wav.extend_from_slice(&sample_rate.to_le_bytes());
        wav.extend_from_slice(&byte_rate.to_le_bytes());
        wav.extend_from_slice(&block_align.to_le_bytes());
        wav.extend_from_slice(&bits_per_sample.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&(data_size as u32).to_le_bytes());
        for frame in frames {
            for sample in frame {
                wav.extend_from_slice(&sample.to_le_bytes());
            }
        }
        wav
    }

    #[test]
    fn test_decode_mono_wav() {
        let frames: Vec<Vec<i16>> = (0..1600).map(|i| vec![(i % 100) as i16 * 100]).collect();
        let wav = create_test_wav(16000, 1, &frames);

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples.len(), 1600);
    }

    #[test]
    fn test_decode_stereo_downmixed() {
        let frames: Vec<Vec<i16>> = (0..800).map(|_| vec![16384, -16384]).collect();
        let wav = create_test_wav(22050, 2, &frames);

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.samples.len(), 800);
        assert!(decoded.samples.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_wav(b"definitely not audio").is_err());
    }

    #[test]
    fn test_downmix() {
        let mono = downmix_to_mono(&[1.0, 0.0, 0.5, 0.5], 2);
        assert_eq!(mono, vec![0.5, 0.5]);
    }

    #[test]
    fn test_resample_length() {
        let samples = vec![0.0; 16000];
        assert_eq!(resample_mono(&samples, 16000, 48000).len(), 48000);
        assert_eq!(resample_mono(&samples, 16000, 8000).len(), 8000);
        assert_eq!(resample_mono(&samples, 16000, 16000).len(), 16000);
    }
}
