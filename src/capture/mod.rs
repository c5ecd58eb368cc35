//! Outbound relay: OS capture devices to local tracks

pub mod relay;

pub use relay::CaptureRelay;

use serde::Serialize;

/// Lifecycle of a capture relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Stopped,
    /// Device being acquired and armed
    Starting,
    Running,
}

/// Snapshot of a capture relay's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Frames the device delivered, whatever happened to them
    pub delivered: u64,
    pub forwarded: u64,
    /// Dropped because the relay was stopping or disabled
    pub dropped_disabled: u64,
    /// Dropped because no track was bound
    pub dropped_unbound: u64,
    pub format_errors: u64,
    /// Rejected by the track, including track panics
    pub transport_errors: u64,
    pub degraded: bool,
}
