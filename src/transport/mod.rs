//! Conferencing SDK seams
//!
//! The relay never talks to a concrete WebRTC stack. It drives these
//! traits, and the application supplies an implementation: the real SDK
//! wrapper in production, [`loopback`] in the demo and tests.
//!
//! All `connect`/`publish` calls may block and are issued off the UI
//! thread or from short UI tasks. Frame entry points are called from
//! device threads.

pub mod loopback;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use std::sync::{Arc, Once};
use std::time::Duration;
use uuid::Uuid;

use crate::error::TransportError;
use crate::media::frame::{AudioFrame, VideoFrame};
use crate::protocol::{MediaKind, TrackKind};

static SDK_INIT: Once = Once::new();

/// Initialize the transport library for this process.
///
/// Owned by the application bootstrap. Only the first call does anything;
/// it returns `true`, later calls return `false`.
pub fn initialize() -> bool {
    let mut first = false;
    SDK_INIT.call_once(|| {
        tracing::info!("Transport library initialized");
        first = true;
    });
    first
}

pub fn is_initialized() -> bool {
    SDK_INIT.is_completed()
}

/// Capture entry point of a local video track
pub trait VideoTrackSink: Send + Sync {
    /// Hand one frame to the track. Must not block.
    fn capture_frame(&self, frame: &VideoFrame) -> Result<(), TransportError>;
}

/// Capture entry point of a local audio track
pub trait AudioTrackSink: Send + Sync {
    /// Hand one frame to the track, waiting at most `timeout` for room
    fn capture_frame(&self, frame: &AudioFrame, timeout: Duration) -> Result<(), TransportError>;
}

/// Capture entry point of either kind
#[derive(Clone)]
pub enum TrackSink {
    Video(Arc<dyn VideoTrackSink>),
    Audio(Arc<dyn AudioTrackSink>),
}

impl TrackSink {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackSink::Video(_) => TrackKind::Video,
            TrackSink::Audio(_) => TrackKind::Audio,
        }
    }
}

/// A local track prepared for one room session
#[derive(Clone)]
pub struct LocalTrack {
    /// Identity of the track object, stable for its lifetime
    pub id: Uuid,
    pub name: String,
    pub source: MediaKind,
    pub sink: TrackSink,
    /// Session generation this track was created for
    pub generation: u64,
}

/// Creates fresh local tracks
pub trait TrackFactory: Send + Sync {
    fn create_track(&self, source: MediaKind, generation: u64) -> Result<LocalTrack, TransportError>;
}

/// Connection options passed through to the SDK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomOptions {
    pub auto_subscribe: bool,
    pub dynacast: bool,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            auto_subscribe: true,
            dynacast: true,
        }
    }
}

/// Room-signaling client
pub trait RoomClient: Send + Sync {
    /// Connect to `url` with a session credential. Blocks.
    fn connect(
        &self,
        url: &str,
        token: &str,
        options: RoomOptions,
    ) -> Result<Arc<dyn RoomSession>, TransportError>;
}

/// Remote participant as seen at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipant {
    pub identity: String,
    pub name: String,
}

/// A connected room
pub trait RoomSession: Send + Sync {
    fn local_participant(&self) -> Arc<dyn LocalParticipant>;

    fn remote_participants(&self) -> Vec<RemoteParticipant>;

    /// Room event stream. Disconnects when the session ends.
    fn events(&self) -> Receiver<RoomEvent>;

    /// Leave the room. Blocks until the SDK has torn the session down.
    fn disconnect(&self);
}

pub trait LocalParticipant: Send + Sync {
    fn identity(&self) -> String;

    /// Publish a local track. Blocks.
    fn publish_track(&self, track: &LocalTrack) -> Result<Arc<dyn TrackPublication>, TransportError>;
}

/// A published local track
pub trait TrackPublication: Send + Sync {
    fn sid(&self) -> String;

    fn set_muted(&self, muted: bool);

    fn is_muted(&self) -> bool;
}

/// A subscribed remote track
pub trait RemoteTrack: Send + Sync {
    fn sid(&self) -> String;

    fn kind(&self) -> TrackKind;

    /// Open a BGRA frame stream holding at most `capacity` frames
    fn open_video_stream(
        &self,
        capacity: usize,
    ) -> Result<Arc<dyn FrameStream<VideoFrame>>, TransportError>;

    fn open_audio_stream(
        &self,
        capacity: usize,
    ) -> Result<Arc<dyn FrameStream<AudioFrame>>, TransportError>;
}

/// Blocking frame stream of a remote track
pub trait FrameStream<F>: Send + Sync {
    /// Next frame. Blocks until one arrives; `None` once the stream is
    /// closed or the track ended.
    fn read(&self) -> Option<F>;

    /// Close the stream, waking any pending `read`
    fn close(&self);
}

/// Exchanges room and user names for a session credential
pub trait CredentialProvider: Send + Sync {
    fn request(&self, room: &str, user: &str) -> Result<String, TransportError>;
}

/// Events raised by a room session
#[derive(Clone)]
pub enum RoomEvent {
    ParticipantConnected { identity: String, name: String },
    ParticipantDisconnected { identity: String },
    TrackSubscribed { identity: String, track: Arc<dyn RemoteTrack> },
    TrackUnsubscribed { identity: String, sid: String, kind: TrackKind },
    TrackMuted { identity: String, sid: String },
    TrackUnmuted { identity: String, sid: String },
    Reconnecting,
    Reconnected,
    Disconnected { reason: String },
    DataReceived { identity: String, payload: Bytes },
}

impl RoomEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RoomEvent::ParticipantConnected { .. } => "participant_connected",
            RoomEvent::ParticipantDisconnected { .. } => "participant_disconnected",
            RoomEvent::TrackSubscribed { .. } => "track_subscribed",
            RoomEvent::TrackUnsubscribed { .. } => "track_unsubscribed",
            RoomEvent::TrackMuted { .. } => "track_muted",
            RoomEvent::TrackUnmuted { .. } => "track_unmuted",
            RoomEvent::Reconnecting => "reconnecting",
            RoomEvent::Reconnected => "reconnected",
            RoomEvent::Disconnected { .. } => "disconnected",
            RoomEvent::DataReceived { .. } => "data_received",
        }
    }
}

impl std::fmt::Debug for RoomEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_runs_once() {
        initialize();
        assert!(is_initialized());
        assert!(!initialize());
    }
}
