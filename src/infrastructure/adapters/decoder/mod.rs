//! Decoder Adapter - 合成音频解码

mod wav_decoder;

pub use wav_decoder::{decode_wav, downmix_to_mono, resample_mono, DecodeError, DecodedAudio};
