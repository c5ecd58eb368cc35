//! Frame types flowing through the relay
//!
//! Three families: raw frames as delivered by OS devices, network frames
//! as accepted/produced by conferencing tracks, and display values handed
//! to render targets and audio outputs on the UI thread.

use bytes::Bytes;

/// Pixel layout of a raw OS video buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Memory order B, G, R, A (little-endian ARGB32)
    Bgra32,
    /// Memory order B, G, R, X
    Bgrx32,
    /// Memory order R, G, B, A
    Rgba32,
    /// Memory order A, R, G, B
    Argb32,
    Rgb24,
    Bgr24,
    I420,
    Nv12,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for planar/compressed ones
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Bgra32 | PixelFormat::Bgrx32 | PixelFormat::Rgba32 | PixelFormat::Argb32 => {
                Some(4)
            }
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::I420 | PixelFormat::Nv12 | PixelFormat::Mjpeg => None,
        }
    }
}

/// Video frame as delivered by a capture device
#[derive(Debug, Clone)]
pub struct RawVideoFrame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per row in `data`, may include padding
    pub stride: usize,
    pub data: Bytes,
    /// Capture timestamp in microseconds
    pub timestamp_us: i64,
}

impl RawVideoFrame {
    /// Tightly packed frame (stride = width * bytes per pixel)
    pub fn packed(format: PixelFormat, width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        let stride = width as usize * format.bytes_per_pixel().unwrap_or(1);
        Self {
            format,
            width,
            height,
            stride,
            data: data.into(),
            timestamp_us: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp_us: i64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }
}

/// Sample layout of a raw OS audio buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian
    I16,
    /// 32-bit float little-endian, nominal range [-1, 1]
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Audio buffer as delivered by a capture device (interleaved)
#[derive(Debug, Clone)]
pub struct RawAudioFrame {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub data: Bytes,
    pub timestamp_us: i64,
}

/// Anything a capture device can deliver
#[derive(Debug, Clone)]
pub enum CapturedFrame {
    Video(RawVideoFrame),
    Audio(RawAudioFrame),
}

/// Network-track video frame: packed BGRA, 4 bytes per pixel, no row padding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub timestamp_us: i64,
}

impl VideoFrame {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Allocate a zeroed frame. Dimensions whose size overflows `usize`
    /// get an empty buffer, which every conversion rejects.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; Self::packed_len(width, height).unwrap_or(0)],
            timestamp_us: 0,
        }
    }

    /// Byte length of a packed frame, `None` on overflow
    pub fn packed_len(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(Self::BYTES_PER_PIXEL)
    }

    pub fn row_bytes(&self) -> usize {
        (self.width as usize).saturating_mul(Self::BYTES_PER_PIXEL)
    }
}

/// Network-track audio frame: interleaved signed 16-bit PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples_per_channel: usize,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        let samples_per_channel = if channels == 0 {
            0
        } else {
            samples.len() / channels as usize
        };
        Self {
            samples,
            sample_rate,
            channels,
            samples_per_channel,
        }
    }

    /// Frame duration in microseconds
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples_per_channel as u64 * 1_000_000) / self.sample_rate as u64
    }
}

/// Frame ready for a render target (BGRA8888)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFrame {
    pub width: u32,
    pub height: u32,
    pub bytes_per_line: usize,
    pub data: Bytes,
    pub timestamp_us: i64,
}

impl DisplayFrame {
    /// Pixel at (x, y) as `[b, g, r, a]`
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.bytes_per_line + x as usize * 4;
        self.data
            .get(offset..offset + 4)
            .map(|p| [p[0], p[1], p[2], p[3]])
    }
}

/// PCM chunk ready for an audio output (i16 little-endian, interleaved)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    pub data: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmBuffer {
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame::new(vec![0; 960], 48_000, 2);
        assert_eq!(frame.samples_per_channel, 480);
        assert_eq!(frame.duration_us(), 10_000);
    }

    #[test]
    fn test_display_pixel_bounds() {
        let frame = DisplayFrame {
            width: 2,
            height: 1,
            bytes_per_line: 8,
            data: Bytes::from(vec![1, 2, 3, 4, 5, 6, 7, 8]),
            timestamp_us: 0,
        };
        assert_eq!(frame.pixel(1, 0), Some([5, 6, 7, 8]));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn test_oversized_video_frame_does_not_allocate() {
        assert_eq!(VideoFrame::packed_len(2, 3), Some(24));
        assert_eq!(VideoFrame::packed_len(u32::MAX, u32::MAX), None);

        let frame = VideoFrame::new(u32::MAX, u32::MAX);
        assert!(frame.data.is_empty());
    }
}
