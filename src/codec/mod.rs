//! Frame codec adapter
//!
//! Stateless conversions between OS-side buffers, network-track frames and
//! display values. Every conversion either produces a well-formed frame or
//! a [`FormatError`](crate::error::FormatError); callers drop the frame and
//! carry on.

pub mod audio;
pub mod video;

pub use audio::{f32_to_pcm, pcm_to_f32, to_network_audio, to_pcm_buffer};
pub use video::{to_display_frame, to_network_frame};

use crate::error::FormatError;
use crate::media::frame::CapturedFrame;

/// Output of converting a captured frame for its network track
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkFrame {
    Video(crate::media::frame::VideoFrame),
    Audio(crate::media::frame::AudioFrame),
}

/// Convert whatever a capture device delivered
pub fn adapt_captured(frame: &CapturedFrame) -> Result<NetworkFrame, FormatError> {
    match frame {
        CapturedFrame::Video(raw) => to_network_frame(raw).map(NetworkFrame::Video),
        CapturedFrame::Audio(raw) => to_network_audio(raw).map(NetworkFrame::Audio),
    }
}
