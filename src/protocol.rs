//! Shared value types exchanged between the relay and the application

use serde::{Deserialize, Serialize};
use std::fmt;

/// Local media path. Also used as the publish source of a local track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Camera,
    Microphone,
    Screen,
}

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::Camera, MediaKind::Microphone, MediaKind::Screen];

    /// Track kind a channel of this media kind produces
    pub fn track_kind(self) -> TrackKind {
        match self {
            MediaKind::Camera | MediaKind::Screen => TrackKind::Video,
            MediaKind::Microphone => TrackKind::Audio,
        }
    }

    /// Name used for the local track
    pub fn track_name(self) -> &'static str {
        match self {
            MediaKind::Camera => "camera",
            MediaKind::Microphone => "microphone",
            MediaKind::Screen => "screen",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.track_name())
    }
}

/// Kind of a network track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => f.write_str("video"),
            TrackKind::Audio => f.write_str("audio"),
        }
    }
}

/// Capture device description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub kind: MediaKind,
    pub is_default: bool,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            is_default: false,
        }
    }
}

/// Connection state of the room session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Notifications emitted by the relay core
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    CaptureStarted { kind: MediaKind, device: String },
    CaptureStopped { kind: MediaKind },
    CaptureError { kind: MediaKind, message: String },
    CaptureDegraded { kind: MediaKind, consecutive_rejections: u64 },
    PublishChanged { kind: MediaKind, published: bool, muted: bool },
    PlaybackStarted { identity: String, kind: TrackKind },
    PlaybackEnded { identity: String, kind: TrackKind },
    PlaybackError { identity: String, kind: TrackKind, message: String },
    ConnectionStateChanged { state: ConnectionState },
    ConnectionFailed { reason: String },
    ParticipantJoined { identity: String, name: String },
    ParticipantLeft { identity: String },
    TrackMuted { identity: String, sid: String, muted: bool },
    RenderTargetRemoved { identity: String },
    DataReceived { identity: String, len: usize },
}
