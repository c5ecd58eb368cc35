//! Audio sample conversion
//!
//! Network tracks carry interleaved i16. Devices hand out either i16 or
//! f32, and the speaker path wants f32 again.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FormatError;
use crate::media::frame::{AudioFrame, PcmBuffer, RawAudioFrame, SampleFormat};

/// Convert an OS audio buffer into a network audio frame
pub fn to_network_audio(raw: &RawAudioFrame) -> Result<AudioFrame, FormatError> {
    if raw.data.is_empty() {
        return Err(FormatError::ZeroSize);
    }
    if raw.channels == 0 || raw.sample_rate == 0 {
        return Err(FormatError::Unsupported(format!(
            "{} Hz, {} channels",
            raw.sample_rate, raw.channels
        )));
    }
    let frame_bytes = raw.format.bytes_per_sample() * raw.channels as usize;
    if raw.data.len() % frame_bytes != 0 {
        return Err(FormatError::Misaligned {
            len: raw.data.len(),
            frame_bytes,
        });
    }

    let samples = match raw.format {
        SampleFormat::I16 => raw
            .data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect(),
        SampleFormat::F32 => raw
            .data
            .chunks_exact(4)
            .map(|b| f32_to_i16(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .collect(),
    };
    Ok(AudioFrame::new(samples, raw.sample_rate, raw.channels))
}

/// Convert a received audio frame into PCM for an audio output
pub fn to_pcm_buffer(frame: &AudioFrame) -> Result<PcmBuffer, FormatError> {
    if frame.samples.is_empty() {
        return Err(FormatError::ZeroSize);
    }
    if frame.channels == 0 || frame.sample_rate == 0 {
        return Err(FormatError::Unsupported(format!(
            "{} Hz, {} channels",
            frame.sample_rate, frame.channels
        )));
    }
    if frame.samples.len() % frame.channels as usize != 0 {
        return Err(FormatError::Misaligned {
            len: frame.samples.len() * 2,
            frame_bytes: frame.channels as usize * 2,
        });
    }

    let mut data = BytesMut::with_capacity(frame.samples.len() * 2);
    for sample in &frame.samples {
        data.put_i16_le(*sample);
    }
    Ok(PcmBuffer {
        data: data.freeze(),
        sample_rate: frame.sample_rate,
        channels: frame.channels,
    })
}

/// Expand PCM into f32 samples in [-1, 1)
pub fn pcm_to_f32(pcm: &PcmBuffer) -> Vec<f32> {
    pcm.data
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}

/// Pack f32 samples as i16 PCM
pub fn f32_to_pcm(samples: &[f32], sample_rate: u32, channels: u16) -> PcmBuffer {
    let mut data = BytesMut::with_capacity(samples.len() * 2);
    for sample in samples {
        data.put_i16_le(f32_to_i16(*sample));
    }
    PcmBuffer {
        data: Bytes::from(data),
        sample_rate,
        channels,
    }
}

#[inline]
fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(format: SampleFormat, channels: u16, data: Vec<u8>) -> RawAudioFrame {
        RawAudioFrame {
            format,
            sample_rate: 48_000,
            channels,
            data: data.into(),
            timestamp_us: 0,
        }
    }

    #[test]
    fn test_i16_passthrough() {
        let bytes: Vec<u8> = [100i16, -200, 300, -400]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let frame = to_network_audio(&raw(SampleFormat::I16, 2, bytes.clone())).unwrap();
        assert_eq!(frame.samples, vec![100, -200, 300, -400]);
        assert_eq!(frame.samples_per_channel, 2);

        let pcm = to_pcm_buffer(&frame).unwrap();
        assert_eq!(&pcm.data[..], &bytes[..]);
    }

    #[test]
    fn test_f32_is_clamped_and_scaled() {
        let bytes: Vec<u8> = [0.0f32, 1.0, -1.0, 2.5, 0.5]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let frame = to_network_audio(&raw(SampleFormat::F32, 1, bytes)).unwrap();
        assert_eq!(frame.samples, vec![0, 32767, -32767, 32767, 16384]);
    }

    #[test]
    fn test_rejects_bad_audio() {
        assert_eq!(
            to_network_audio(&raw(SampleFormat::I16, 1, Vec::new())),
            Err(FormatError::ZeroSize)
        );
        assert!(matches!(
            to_network_audio(&raw(SampleFormat::I16, 0, vec![0, 0])),
            Err(FormatError::Unsupported(_))
        ));
        assert_eq!(
            to_network_audio(&raw(SampleFormat::I16, 2, vec![0; 6])),
            Err(FormatError::Misaligned {
                len: 6,
                frame_bytes: 4
            })
        );
    }

    #[test]
    fn test_pcm_to_f32() {
        let pcm = f32_to_pcm(&[0.0, -1.0], 16_000, 1);
        let samples = pcm_to_f32(&pcm);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] + 1.0).abs() < 1e-3);
    }
}
