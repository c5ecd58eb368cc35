//! # Media Relay
//!
//! Cross-thread media frame relay for a meeting client.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               OUTBOUND                                      │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐                        │
//! │  │   Camera    │   │ Microphone  │   │   Screen    │   device threads       │
//! │  └──────┬──────┘   └──────┬──────┘   └──────┬──────┘                        │
//! │         ▼                 ▼                 ▼                               │
//! │  ┌─────────────────────────────────────────────────────────────────────┐    │
//! │  │               Capture Relays (capture::relay)                       │    │
//! │  │   gates -> codec conversion -> bound track (catch_unwind)           │    │
//! │  │                      └─> local preview (UI thread)                  │    │
//! │  └─────────────────────────────────┬───────────────────────────────────┘    │
//! │                                    ▼                                        │
//! │  ┌─────────────────────────────────────────────────────────────────────┐    │
//! │  │     Local Tracks (transport), one set per session generation        │    │
//! │  └─────────────────────────────────┬───────────────────────────────────┘    │
//! └────────────────────────────────────┼────────────────────────────────────────┘
//!                                      │ room session
//!                                      ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               INBOUND                                       │
//! │  ┌─────────────────────────────────────────────────────────────────────┐    │
//! │  │   Room events ──> EventRouter thread ──> UI loop (dispatch)         │    │
//! │  │                                           │                         │    │
//! │  │                              MeetingSession (session::manager)      │    │
//! │  └───────────────────────────────────────────┬─────────────────────────┘    │
//! │                     ┌────────────────────────┴────────────┐                 │
//! │                     ▼                                     ▼                 │
//! │  ┌─────────────────────────────────┐   ┌─────────────────────────────────┐  │
//! │  │ VideoPlayback (reader thread)   │   │ AudioPlayback (reader thread)   │  │
//! │  │   frame -> UI -> RenderTarget   │   │   frame -> UI -> AudioOutput    │  │
//! │  └─────────────────────────────────┘   └─────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Device callbacks and stream readers never touch UI objects directly;
//! everything visible is posted to the UI loop.

pub mod capture;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio capture
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;
}
