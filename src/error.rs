//! Error types for the media relay

use std::time::Duration;
use thiserror::Error;

use crate::protocol::MediaKind;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture and output device errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("No {0} device available")]
    Unavailable(MediaKind),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device busy: {0}")]
    Busy(String),

    #[error("Device index {index} out of range ({available} available)")]
    InvalidIndex { index: usize, available: usize },

    #[error("Failed to open stream: {0}")]
    Stream(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Frame conversion errors. The frame is dropped and the relay continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unsupported format: {0}")]
    Unsupported(String),

    #[error("Zero-size frame")]
    ZeroSize,

    #[error("Truncated buffer: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Stride {stride} does not fit rows of {row_bytes} bytes")]
    InvalidStride { stride: usize, row_bytes: usize },

    #[error("Frame dimensions exceed addressable memory")]
    Oversized,

    #[error("Buffer of {len} bytes is not a multiple of {frame_bytes}-byte sample frames")]
    Misaligned { len: usize, frame_bytes: usize },
}

/// Errors reported by the network-track side
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Frame rejected: {0}")]
    Rejected(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Track closed")]
    Closed,

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Failed to open stream: {0}")]
    StreamOpen(String),

    #[error("Credential request failed: {0}")]
    Credential(String),
}

/// Misuse of the session lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Already connecting")]
    AlreadyConnecting,

    #[error("Room and user names must not be empty")]
    InvalidRoom,

    #[error("No track available for {0}")]
    NoTrack(MediaKind),
}

/// Result type alias for the relay
pub type Result<T> = std::result::Result<T, Error>;
