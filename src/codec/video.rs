//! Video frame conversion
//!
//! OS buffers arrive in whatever packed layout the device produced, with
//! optional row padding. Network tracks take tightly packed BGRA, and
//! render targets take BGRA8888 too, so the display side is a plain
//! row copy.

use bytes::Bytes;

use crate::error::FormatError;
use crate::media::frame::{DisplayFrame, PixelFormat, RawVideoFrame, VideoFrame};

/// Convert an OS video buffer into a network frame.
///
/// Alpha is copied as-is where the source carries it and set to 0xFF where
/// it does not. Row padding is stripped.
pub fn to_network_frame(raw: &RawVideoFrame) -> Result<VideoFrame, FormatError> {
    if raw.width == 0 || raw.height == 0 {
        return Err(FormatError::ZeroSize);
    }
    let bpp = raw
        .format
        .bytes_per_pixel()
        .ok_or_else(|| FormatError::Unsupported(format!("{:?}", raw.format)))?;

    let width = raw.width as usize;
    let height = raw.height as usize;
    let row_bytes = width.checked_mul(bpp).ok_or(FormatError::Oversized)?;
    if raw.stride < row_bytes {
        return Err(FormatError::InvalidStride {
            stride: raw.stride,
            row_bytes,
        });
    }
    // Last row only needs its pixels, not the trailing padding
    let required = raw
        .stride
        .checked_mul(height - 1)
        .and_then(|n| n.checked_add(row_bytes))
        .ok_or(FormatError::InvalidStride {
            stride: raw.stride,
            row_bytes,
        })?;
    if raw.data.len() < required {
        return Err(FormatError::Truncated {
            expected: required,
            actual: raw.data.len(),
        });
    }
    if VideoFrame::packed_len(raw.width, raw.height).is_none() {
        return Err(FormatError::Oversized);
    }

    let mut frame = VideoFrame::new(raw.width, raw.height);
    frame.timestamp_us = raw.timestamp_us;
    let out_row = frame.row_bytes();

    for y in 0..height {
        let src = &raw.data[y * raw.stride..y * raw.stride + row_bytes];
        let dst = &mut frame.data[y * out_row..(y + 1) * out_row];
        convert_row(raw.format, src, dst);
    }
    Ok(frame)
}

fn convert_row(format: PixelFormat, src: &[u8], dst: &mut [u8]) {
    match format {
        PixelFormat::Bgra32 => dst.copy_from_slice(src),
        PixelFormat::Bgrx32 => {
            for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
                d.copy_from_slice(&[s[0], s[1], s[2], 0xff]);
            }
        }
        PixelFormat::Rgba32 => {
            for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
                d.copy_from_slice(&[s[2], s[1], s[0], s[3]]);
            }
        }
        PixelFormat::Argb32 => {
            for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
                d.copy_from_slice(&[s[3], s[2], s[1], s[0]]);
            }
        }
        PixelFormat::Rgb24 => {
            for (s, d) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
                d.copy_from_slice(&[s[2], s[1], s[0], 0xff]);
            }
        }
        PixelFormat::Bgr24 => {
            for (s, d) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
                d.copy_from_slice(&[s[0], s[1], s[2], 0xff]);
            }
        }
        // Rejected before any row is converted
        PixelFormat::I420 | PixelFormat::Nv12 | PixelFormat::Mjpeg => {}
    }
}

/// Convert a received network frame into a display frame
pub fn to_display_frame(frame: &VideoFrame) -> Result<DisplayFrame, FormatError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(FormatError::ZeroSize);
    }
    let expected = VideoFrame::packed_len(frame.width, frame.height).ok_or(FormatError::Oversized)?;
    if frame.data.len() < expected {
        return Err(FormatError::Truncated {
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(DisplayFrame {
        width: frame.width,
        height: frame.height,
        bytes_per_line: frame.row_bytes(),
        data: Bytes::copy_from_slice(&frame.data[..expected]),
        timestamp_us: frame.timestamp_us,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SUPPORTED: [PixelFormat; 6] = [
        PixelFormat::Bgra32,
        PixelFormat::Bgrx32,
        PixelFormat::Rgba32,
        PixelFormat::Argb32,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
    ];

    /// One pixel of colour `[b, g, r, a]` laid out in `format`
    fn encode_pixel(format: PixelFormat, [b, g, r, a]: [u8; 4]) -> Vec<u8> {
        match format {
            PixelFormat::Bgra32 => vec![b, g, r, a],
            PixelFormat::Bgrx32 => vec![b, g, r, 0],
            PixelFormat::Rgba32 => vec![r, g, b, a],
            PixelFormat::Argb32 => vec![a, r, g, b],
            PixelFormat::Rgb24 => vec![r, g, b],
            PixelFormat::Bgr24 => vec![b, g, r],
            _ => unreachable!(),
        }
    }

    fn has_alpha(format: PixelFormat) -> bool {
        matches!(
            format,
            PixelFormat::Bgra32 | PixelFormat::Rgba32 | PixelFormat::Argb32
        )
    }

    fn solid_frame(
        format: PixelFormat,
        width: u32,
        height: u32,
        padding: usize,
        colour: [u8; 4],
    ) -> RawVideoFrame {
        let pixel = encode_pixel(format, colour);
        let stride = width as usize * pixel.len() + padding;
        let mut data = Vec::with_capacity(stride * height as usize);
        for _ in 0..height {
            for _ in 0..width {
                data.extend_from_slice(&pixel);
            }
            data.extend(std::iter::repeat(0xAA).take(padding));
        }
        RawVideoFrame {
            format,
            width,
            height,
            stride,
            data: data.into(),
            timestamp_us: 7,
        }
    }

    #[test]
    fn test_rgba_swaps_channels() {
        let raw = RawVideoFrame::packed(PixelFormat::Rgba32, 1, 1, vec![10, 20, 30, 40]);
        let frame = to_network_frame(&raw).unwrap();
        assert_eq!(frame.data, vec![30, 20, 10, 40]);
    }

    #[test]
    fn test_stride_padding_is_stripped() {
        let raw = solid_frame(PixelFormat::Bgra32, 2, 3, 8, [1, 2, 3, 4]);
        let frame = to_network_frame(&raw).unwrap();
        assert_eq!(frame.data.len(), 2 * 3 * 4);
        assert!(frame.data.chunks(4).all(|p| p == [1, 2, 3, 4]));
        assert_eq!(frame.timestamp_us, 7);
    }

    #[test]
    fn test_rejects_unmappable_input() {
        let zero = RawVideoFrame::packed(PixelFormat::Bgra32, 0, 4, Vec::new());
        assert_eq!(to_network_frame(&zero), Err(FormatError::ZeroSize));

        let planar = RawVideoFrame::packed(PixelFormat::I420, 2, 2, vec![0; 6]);
        assert!(matches!(
            to_network_frame(&planar),
            Err(FormatError::Unsupported(_))
        ));

        let short = RawVideoFrame::packed(PixelFormat::Bgra32, 2, 2, vec![0; 15]);
        assert_eq!(
            to_network_frame(&short),
            Err(FormatError::Truncated {
                expected: 16,
                actual: 15
            })
        );

        let mut narrow = RawVideoFrame::packed(PixelFormat::Rgb24, 4, 1, vec![0; 12]);
        narrow.stride = 8;
        assert_eq!(
            to_network_frame(&narrow),
            Err(FormatError::InvalidStride {
                stride: 8,
                row_bytes: 12
            })
        );
    }

    #[test]
    fn test_huge_stride_is_rejected() {
        let mut raw = RawVideoFrame::packed(PixelFormat::Bgra32, 1, 3, vec![0u8; 16]);
        raw.stride = usize::MAX / 2 + 1;
        assert_eq!(
            to_network_frame(&raw),
            Err(FormatError::InvalidStride {
                stride: usize::MAX / 2 + 1,
                row_bytes: 4
            })
        );

        // Fits the multiply, overflows the final add
        raw.stride = usize::MAX / 2;
        assert!(matches!(
            to_network_frame(&raw),
            Err(FormatError::InvalidStride { .. })
        ));
    }

    #[test]
    fn test_display_frame_rejects_oversized_dimensions() {
        let frame = VideoFrame {
            width: u32::MAX,
            height: u32::MAX,
            data: vec![0u8; 16],
            timestamp_us: 0,
        };
        assert_eq!(to_display_frame(&frame), Err(FormatError::Oversized));
    }

    #[test]
    fn test_display_frame_rejects_truncated() {
        let mut frame = VideoFrame::new(2, 2);
        frame.data.truncate(10);
        assert_eq!(
            to_display_frame(&frame),
            Err(FormatError::Truncated {
                expected: 16,
                actual: 10
            })
        );
    }

    proptest! {
        #[test]
        fn solid_colour_survives_network_and_display(
            format_index in 0usize..SUPPORTED.len(),
            width in 1u32..24,
            height in 1u32..24,
            padding in 0usize..16,
            colour in any::<[u8; 4]>(),
        ) {
            let format = SUPPORTED[format_index];
            let raw = solid_frame(format, width, height, padding, colour);

            let network = to_network_frame(&raw).unwrap();
            let display = to_display_frame(&network).unwrap();

            let alpha = if has_alpha(format) { colour[3] } else { 0xff };
            let canonical = [colour[0], colour[1], colour[2], alpha];

            prop_assert_eq!(display.width, width);
            prop_assert_eq!(display.height, height);
            prop_assert_eq!(display.bytes_per_line, width as usize * 4);
            prop_assert_eq!(display.data.len(), (width * height * 4) as usize);
            prop_assert!(display.data.chunks(4).all(|p| p == canonical));
        }

        #[test]
        fn bgra_is_copied_byte_for_byte(
            width in 1u32..16,
            height in 1u32..16,
            seed in any::<u8>(),
        ) {
            let data: Vec<u8> = (0..width * height * 4)
                .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
                .collect();
            let raw = RawVideoFrame::packed(PixelFormat::Bgra32, width, height, data.clone());
            let display = to_display_frame(&to_network_frame(&raw).unwrap()).unwrap();
            prop_assert_eq!(&display.data[..], &data[..]);
        }
    }
}
