//! Inbound relay: remote tracks to render targets and audio outputs

pub mod audio;
pub mod target;
pub mod video;

pub use audio::AudioPlayback;
pub use target::{PendingTargets, TargetSlot};
pub use video::VideoPlayback;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::TrackKind;

/// Snapshot of a playback channel's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    pub frames_read: u64,
    /// Frames handed to a render target or audio output
    pub frames_presented: u64,
    pub frames_without_target: u64,
    pub frames_muted: u64,
    pub conversion_errors: u64,
}

#[derive(Default)]
pub(crate) struct PlaybackCounters {
    frames_read: AtomicU64,
    frames_presented: AtomicU64,
    frames_without_target: AtomicU64,
    frames_muted: AtomicU64,
    conversion_errors: AtomicU64,
}

impl PlaybackCounters {
    /// Count a read frame, returning the running total
    fn read(&self) -> u64 {
        self.frames_read.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn presented(&self) {
        self.frames_presented.fetch_add(1, Ordering::Relaxed);
    }

    fn without_target(&self) {
        self.frames_without_target.fetch_add(1, Ordering::Relaxed);
    }

    fn muted(&self) {
        self.frames_muted.fetch_add(1, Ordering::Relaxed);
    }

    fn conversion_error(&self) {
        self.conversion_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PlaybackStats {
        PlaybackStats {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_presented: self.frames_presented.load(Ordering::Relaxed),
            frames_without_target: self.frames_without_target.load(Ordering::Relaxed),
            frames_muted: self.frames_muted.load(Ordering::Relaxed),
            conversion_errors: self.conversion_errors.load(Ordering::Relaxed),
        }
    }
}

/// A playback channel of either kind, keyed by (participant, track kind)
pub enum PlaybackChannel {
    Video(VideoPlayback),
    Audio(AudioPlayback),
}

impl PlaybackChannel {
    pub fn kind(&self) -> TrackKind {
        match self {
            PlaybackChannel::Video(_) => TrackKind::Video,
            PlaybackChannel::Audio(_) => TrackKind::Audio,
        }
    }

    pub fn identity(&self) -> &str {
        match self {
            PlaybackChannel::Video(p) => p.identity(),
            PlaybackChannel::Audio(p) => p.identity(),
        }
    }

    pub fn sid(&self) -> &str {
        match self {
            PlaybackChannel::Video(p) => p.sid(),
            PlaybackChannel::Audio(p) => p.sid(),
        }
    }

    pub fn stop(&mut self) {
        match self {
            PlaybackChannel::Video(p) => p.stop(),
            PlaybackChannel::Audio(p) => p.stop(),
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            PlaybackChannel::Video(p) => p.is_running(),
            PlaybackChannel::Audio(p) => p.is_running(),
        }
    }

    pub fn stats(&self) -> PlaybackStats {
        match self {
            PlaybackChannel::Video(p) => p.stats(),
            PlaybackChannel::Audio(p) => p.stats(),
        }
    }
}
