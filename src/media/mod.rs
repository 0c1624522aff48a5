//! Media encoding: raw samples and frames to wire-ready payloads

use chrono::{DateTime, Utc};
use image::ImageEncoder;
use image::codecs::jpeg::JpegEncoder;

use crate::{Error, Result};

/// Sample rate for captured audio (16kHz mono, what the perception service expects)
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of synthesized audio returned by the perception service
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Kind of media carried by a [`MediaChunk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// One encoded payload produced by a capture pump, consumed once by the channel
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub kind: MediaKind,
    pub payload: Vec<u8>,
    pub mime_type: &'static str,
    pub captured_at: DateTime<Utc>,
}

impl MediaChunk {
    /// Wrap an encoded PCM block
    #[must_use]
    pub fn audio(payload: Vec<u8>) -> Self {
        Self {
            kind: MediaKind::Audio,
            payload,
            mime_type: "audio/pcm;rate=16000",
            captured_at: Utc::now(),
        }
    }

    /// Wrap an encoded JPEG frame
    #[must_use]
    pub fn video(payload: Vec<u8>) -> Self {
        Self {
            kind: MediaKind::Video,
            payload,
            mime_type: "image/jpeg",
            captured_at: Utc::now(),
        }
    }
}

/// A raw video frame as delivered by a camera
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB8 pixel data, `width * height * 3` bytes
    pub rgb: Vec<u8>,
}

/// Encode f32 samples [-1.0, 1.0] as 16-bit little-endian PCM
#[must_use]
pub fn encode_pcm(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&sample_i16.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM bytes to f32 samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn decode_pcm(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Encode an RGB frame as JPEG at the given quality (1-100)
///
/// # Errors
///
/// Returns error if the frame dimensions do not match the pixel data
/// or JPEG encoding fails
pub fn encode_jpeg(frame: &RawFrame, quality: u8) -> Result<Vec<u8>> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.rgb.len() != expected {
        return Err(Error::Video(format!(
            "frame buffer is {} bytes, expected {expected}",
            frame.rgb.len()
        )));
    }

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .write_image(
            &frame.rgb,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| Error::Video(e.to_string()))?;

    Ok(out)
}

/// Convert f32 samples to WAV bytes (used by the `test-mic` diagnostic)
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
