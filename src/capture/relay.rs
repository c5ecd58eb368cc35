//! Capture relay for one media kind
//!
//! Frames arrive on the device's own thread. The delivery callback checks
//! the gates, converts the frame and hands it to whatever track is bound at
//! that moment. Nothing in the callback may panic past it or block longer
//! than the audio wait.

use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{CaptureState, CaptureStats};
use crate::codec::{self, NetworkFrame};
use crate::config::CaptureConfig;
use crate::dispatch::{EventBus, UiHandle};
use crate::error::{DeviceError, TransportError};
use crate::media::device::{CaptureDevice, CaptureDeviceProvider, FrameCallback, LossCallback};
use crate::media::frame::CapturedFrame;
use crate::media::output::RenderTarget;
use crate::playback::TargetSlot;
use crate::protocol::{DeviceInfo, MediaKind, RelayEvent};
use crate::transport::TrackSink;

// Track panics are caught in the delivery callback
#[cfg(panic = "abort")]
compile_error!("media-relay must be built with panic = \"unwind\"");

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    forwarded: AtomicU64,
    dropped_disabled: AtomicU64,
    dropped_unbound: AtomicU64,
    format_errors: AtomicU64,
    transport_errors: AtomicU64,
    consecutive_rejections: AtomicU64,
}

/// State shared with the delivery callback
struct Shared {
    kind: MediaKind,
    /// Cleared first on stop so in-flight frames are dropped
    active: AtomicBool,
    /// User-facing mute
    enabled: AtomicBool,
    /// Set from the device thread when the hardware went away
    lost: AtomicBool,
    binding: RwLock<Option<TrackSink>>,
    preview: TargetSlot,
    ui: UiHandle,
    events: EventBus,
    counters: Counters,
    degraded: AtomicBool,
    audio_timeout: Duration,
    degraded_after: u64,
}

impl Shared {
    fn deliver(&self, frame: CapturedFrame) {
        let delivered = self.counters.delivered.fetch_add(1, Ordering::Relaxed) + 1;

        if !self.active.load(Ordering::Acquire) || !self.enabled.load(Ordering::Acquire) {
            self.counters.dropped_disabled.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let converted = match codec::adapt_captured(&frame) {
            Ok(converted) => converted,
            Err(e) => {
                let errors = self.counters.format_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if errors == 1 || errors % 100 == 0 {
                    tracing::warn!(kind = %self.kind, errors, "Dropping captured frame: {}", e);
                }
                return;
            }
        };

        if let NetworkFrame::Video(video) = &converted {
            self.show_preview(video);
        }

        let Some(sink) = self.binding.read().clone() else {
            self.counters.dropped_unbound.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match (&sink, &converted) {
            (TrackSink::Video(track), NetworkFrame::Video(frame)) => track.capture_frame(frame),
            (TrackSink::Audio(track), NetworkFrame::Audio(frame)) => {
                track.capture_frame(frame, self.audio_timeout)
            }
            _ => Err(TransportError::Rejected(format!(
                "{} frame offered to a {} track",
                self.kind,
                sink.kind()
            ))),
        }));

        match outcome {
            Ok(Ok(())) => {
                self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
                self.counters.consecutive_rejections.store(0, Ordering::Relaxed);
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!(kind = %self.kind, "Capture channel recovered");
                }
            }
            Ok(Err(e)) => self.rejected(&e.to_string()),
            Err(_) => {
                tracing::error!(kind = %self.kind, "Track panicked while accepting a frame");
                self.rejected("track panicked");
            }
        }

        if delivered % 100 == 0 {
            tracing::debug!(
                kind = %self.kind,
                frames = delivered,
                forwarded = self.counters.forwarded.load(Ordering::Relaxed),
                "Capture relay"
            );
        }
    }

    fn rejected(&self, reason: &str) {
        self.counters.transport_errors.fetch_add(1, Ordering::Relaxed);
        let consecutive = self
            .counters
            .consecutive_rejections
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        if consecutive == 1 {
            tracing::debug!(kind = %self.kind, "Frame rejected by track: {}", reason);
        }
        if consecutive >= self.degraded_after && !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                kind = %self.kind,
                consecutive,
                "Capture channel degraded: {}",
                reason
            );
            self.events.emit(RelayEvent::CaptureDegraded {
                kind: self.kind,
                consecutive_rejections: consecutive,
            });
        }
    }

    fn device_lost(&self, error: DeviceError) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.lost.store(true, Ordering::Release);
        tracing::error!(kind = %self.kind, "Capture device lost: {}", error);
        self.events.emit(RelayEvent::CaptureError {
            kind: self.kind,
            message: error.to_string(),
        });
    }

    fn show_preview(&self, frame: &crate::media::frame::VideoFrame) {
        let Some(target) = self.preview.current() else {
            return;
        };
        let Ok(display) = codec::to_display_frame(frame) else {
            return;
        };
        self.ui.post(move || {
            if let Some(target) = target.upgrade() {
                target.present(display);
            }
        });
    }
}

/// Binds one OS capture device to one outbound track
pub struct CaptureRelay {
    kind: MediaKind,
    provider: Arc<dyn CaptureDeviceProvider>,
    shared: Arc<Shared>,
    device: Option<Box<dyn CaptureDevice>>,
    state: CaptureState,
    selected: Option<usize>,
}

impl CaptureRelay {
    pub fn new(
        kind: MediaKind,
        provider: Arc<dyn CaptureDeviceProvider>,
        config: &CaptureConfig,
        ui: UiHandle,
        events: EventBus,
    ) -> Self {
        Self {
            kind,
            provider,
            shared: Arc::new(Shared {
                kind,
                active: AtomicBool::new(false),
                enabled: AtomicBool::new(true),
                lost: AtomicBool::new(false),
                binding: RwLock::new(None),
                preview: TargetSlot::new(),
                ui,
                events,
                counters: Counters::default(),
                degraded: AtomicBool::new(false),
                audio_timeout: config.audio_capture_timeout(),
                degraded_after: config.degraded_after_rejections.max(1),
            }),
            device: None,
            state: CaptureState::Stopped,
            selected: None,
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// A channel whose device was lost reads as stopped
    pub fn state(&self) -> CaptureState {
        if self.shared.lost.load(Ordering::Acquire) {
            CaptureState::Stopped
        } else {
            self.state
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == CaptureState::Running
    }

    /// Devices of this relay's kind
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.provider.devices(self.kind)
    }

    /// Index into [`devices`](Self::devices) used by the next start
    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    /// Device currently held open
    pub fn current_device(&self) -> Option<&DeviceInfo> {
        if self.shared.lost.load(Ordering::Acquire) {
            return None;
        }
        self.device.as_ref().map(|d| d.info())
    }

    /// Acquire the selected device and begin relaying
    pub fn start(&mut self) -> Result<(), DeviceError> {
        self.release_lost();
        if self.state != CaptureState::Stopped {
            return Ok(());
        }
        self.state = CaptureState::Starting;

        match self.open_and_start() {
            Ok(device) => {
                let name = device.info().name.clone();
                self.device = Some(device);
                self.state = CaptureState::Running;
                tracing::info!(kind = %self.kind, device = %name, "Capture started");
                self.shared.events.emit(RelayEvent::CaptureStarted {
                    kind: self.kind,
                    device: name,
                });
                Ok(())
            }
            Err(e) => {
                self.shared.active.store(false, Ordering::Release);
                self.state = CaptureState::Stopped;
                tracing::error!(kind = %self.kind, "Failed to start capture: {}", e);
                self.shared.events.emit(RelayEvent::CaptureError {
                    kind: self.kind,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn open_and_start(&mut self) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        let devices = self.devices();
        if devices.is_empty() {
            return Err(DeviceError::Unavailable(self.kind));
        }
        let index = match self.selected {
            Some(index) if index < devices.len() => index,
            _ => devices.iter().position(|d| d.is_default).unwrap_or(0),
        };
        self.selected = Some(index);

        let mut device = self.provider.open(&devices[index])?;

        let shared = self.shared.clone();
        let deliver: FrameCallback = Arc::new(move |frame| shared.deliver(frame));
        let shared = self.shared.clone();
        let lost: LossCallback = Arc::new(move |error| shared.device_lost(error));

        self.shared.active.store(true, Ordering::Release);
        device.start(deliver, lost)?;
        Ok(device)
    }

    /// Drop a device that reported loss. Returns true if there was one.
    fn release_lost(&mut self) -> bool {
        if !self.shared.lost.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(mut device) = self.device.take() {
            device.stop();
        }
        self.state = CaptureState::Stopped;
        tracing::info!(kind = %self.kind, "Released lost capture device");
        true
    }

    /// Stop relaying and release the device. The track binding is kept.
    pub fn stop(&mut self) {
        if self.release_lost() || self.state == CaptureState::Stopped {
            return;
        }
        self.shared.active.store(false, Ordering::Release);
        if let Some(mut device) = self.device.take() {
            device.stop();
        }
        self.state = CaptureState::Stopped;
        tracing::info!(kind = %self.kind, "Capture stopped");
        self.shared.events.emit(RelayEvent::CaptureStopped { kind: self.kind });
    }

    /// Choose the device at `index`. A running relay moves to it with one
    /// stop and one start.
    pub fn select_device(&mut self, index: usize) -> Result<(), DeviceError> {
        let available = self.devices().len();
        if index >= available {
            return Err(DeviceError::InvalidIndex { index, available });
        }
        if self.selected == Some(index) {
            return Ok(());
        }
        self.selected = Some(index);
        if self.is_running() {
            tracing::info!(kind = %self.kind, index, "Switching capture device");
            self.stop();
            self.start()?;
        }
        Ok(())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Replace the bound track. Only the session manager calls this.
    pub fn bind(&self, sink: Option<TrackSink>) {
        *self.shared.binding.write() = sink;
        self.shared
            .counters
            .consecutive_rejections
            .store(0, Ordering::Relaxed);
        self.shared.degraded.store(false, Ordering::Relaxed);
    }

    pub fn is_bound(&self) -> bool {
        self.shared.binding.read().is_some()
    }

    /// Local preview of captured video, presented on the UI thread
    pub fn set_preview(&self, target: Option<&Arc<dyn RenderTarget>>) {
        self.shared.preview.set(target);
    }

    pub fn stats(&self) -> CaptureStats {
        let c = &self.shared.counters;
        CaptureStats {
            delivered: c.delivered.load(Ordering::Relaxed),
            forwarded: c.forwarded.load(Ordering::Relaxed),
            dropped_disabled: c.dropped_disabled.load(Ordering::Relaxed),
            dropped_unbound: c.dropped_unbound.load(Ordering::Relaxed),
            format_errors: c.format_errors.load(Ordering::Relaxed),
            transport_errors: c.transport_errors.load(Ordering::Relaxed),
            degraded: self.shared.degraded.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CaptureRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::UiLoop;
    use crate::media::frame::{AudioFrame, DisplayFrame, PixelFormat, RawVideoFrame, VideoFrame};
    use crate::media::synthetic::{test_pattern, DeviceOp, Generation, SyntheticDeviceProvider};
    use crate::transport::{AudioTrackSink, VideoTrackSink};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingTrack {
        frames: AtomicUsize,
        reject: AtomicBool,
        panic: AtomicBool,
    }

    impl VideoTrackSink for RecordingTrack {
        fn capture_frame(&self, _frame: &VideoFrame) -> Result<(), TransportError> {
            if self.panic.load(Ordering::SeqCst) {
                panic!("sdk exploded");
            }
            if self.reject.load(Ordering::SeqCst) {
                return Err(TransportError::Rejected("busy".into()));
            }
            self.frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl AudioTrackSink for RecordingTrack {
        fn capture_frame(&self, _frame: &AudioFrame, _timeout: Duration) -> Result<(), TransportError> {
            self.frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn camera_relay(
        provider: &SyntheticDeviceProvider,
        events: EventBus,
    ) -> (CaptureRelay, Arc<RecordingTrack>) {
        let config = CaptureConfig {
            degraded_after_rejections: 3,
            ..CaptureConfig::default()
        };
        let ui = UiLoop::new();
        let relay = CaptureRelay::new(
            MediaKind::Camera,
            Arc::new(provider.clone()),
            &config,
            ui.handle(),
            events,
        );
        let track = Arc::new(RecordingTrack::default());
        relay.bind(Some(TrackSink::Video(track.clone())));
        (relay, track)
    }

    fn frame() -> CapturedFrame {
        CapturedFrame::Video(test_pattern(4, 4, 0))
    }

    #[test]
    fn test_stop_releases_device_for_next_start() {
        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Manual);
        let (mut relay, _) = camera_relay(&provider, EventBus::detached());

        relay.start().unwrap();
        relay.stop();
        relay.start().unwrap();
        assert!(relay.is_running());

        relay.stop();
        relay.stop();
        assert_eq!(relay.state(), CaptureState::Stopped);
        assert!(!provider.is_in_use("camera:0"));
    }

    #[test]
    fn test_start_is_idempotent() {
        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Manual);
        let (mut relay, _) = camera_relay(&provider, EventBus::detached());
        relay.start().unwrap();
        relay.start().unwrap();
        let opens = provider
            .ops()
            .iter()
            .filter(|op| matches!(op, DeviceOp::Open(_)))
            .count();
        assert_eq!(opens, 1);
    }

    #[test]
    fn test_disabled_drops_without_forwarding() {
        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Manual);
        let (mut relay, track) = camera_relay(&provider, EventBus::detached());
        relay.start().unwrap();

        provider.inject("camera:0", frame());
        relay.set_enabled(false);
        for _ in 0..5 {
            assert!(provider.inject("camera:0", frame()));
        }

        let stats = relay.stats();
        assert_eq!(stats.delivered, 6);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.dropped_disabled, 5);
        assert_eq!(track.frames.load(Ordering::SeqCst), 1);

        relay.set_enabled(true);
        provider.inject("camera:0", frame());
        assert_eq!(relay.stats().forwarded, 2);
    }

    #[test]
    fn test_unbound_and_unmappable_frames_are_counted() {
        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Manual);
        let (mut relay, _) = camera_relay(&provider, EventBus::detached());
        relay.start().unwrap();

        let planar = RawVideoFrame::packed(PixelFormat::Nv12, 4, 4, vec![0u8; 24]);
        provider.inject("camera:0", CapturedFrame::Video(planar));
        relay.bind(None);
        provider.inject("camera:0", frame());

        let stats = relay.stats();
        assert_eq!(stats.format_errors, 1);
        assert_eq!(stats.dropped_unbound, 1);
        assert_eq!(stats.forwarded, 0);
        assert!(relay.is_running());
    }

    #[test]
    fn test_sustained_rejection_degrades_once_and_recovers() {
        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Manual);
        let (events, rx) = EventBus::new();
        let (mut relay, track) = camera_relay(&provider, events);
        relay.start().unwrap();

        track.reject.store(true, Ordering::SeqCst);
        for _ in 0..6 {
            provider.inject("camera:0", frame());
        }
        assert!(relay.stats().degraded);
        assert_eq!(relay.stats().transport_errors, 6);
        let degraded = rx
            .try_iter()
            .filter(|e| matches!(e, RelayEvent::CaptureDegraded { .. }))
            .count();
        assert_eq!(degraded, 1);

        track.reject.store(false, Ordering::SeqCst);
        provider.inject("camera:0", frame());
        assert!(!relay.stats().degraded);
        assert!(relay.is_running());
    }

    #[test]
    fn test_panicking_track_does_not_escape_callback() {
        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Manual);
        let (mut relay, track) = camera_relay(&provider, EventBus::detached());
        relay.start().unwrap();

        track.panic.store(true, Ordering::SeqCst);
        provider.inject("camera:0", frame());
        track.panic.store(false, Ordering::SeqCst);
        provider.inject("camera:0", frame());

        let stats = relay.stats();
        assert_eq!(stats.transport_errors, 1);
        assert_eq!(stats.forwarded, 1);
    }

    #[test]
    fn test_acquisition_failure_reports_and_stays_stopped() {
        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Manual);
        provider.set_unavailable(true);
        let (events, rx) = EventBus::new();
        let (mut relay, _) = camera_relay(&provider, events);

        assert_eq!(
            relay.start(),
            Err(DeviceError::Unavailable(MediaKind::Camera))
        );
        assert_eq!(relay.state(), CaptureState::Stopped);
        assert!(matches!(rx.try_recv(), Ok(RelayEvent::CaptureError { .. })));
    }

    #[test]
    fn test_lost_device_stops_channel_until_restarted() {
        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Manual);
        let (events, rx) = EventBus::new();
        let (mut relay, track) = camera_relay(&provider, events);
        relay.start().unwrap();
        provider.inject("camera:0", frame());

        assert!(provider.lose("camera:0", "unplugged"));
        assert_eq!(relay.state(), CaptureState::Stopped);
        assert!(!relay.is_running());
        assert!(relay.current_device().is_none());
        let errors: Vec<_> = rx
            .try_iter()
            .filter_map(|e| match e {
                RelayEvent::CaptureError { kind, message } => Some((kind, message)),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, MediaKind::Camera);
        assert!(errors[0].1.contains("unplugged"));

        relay.start().unwrap();
        assert!(relay.is_running());
        assert!(provider.is_in_use("camera:0"));
        assert!(provider.inject("camera:0", frame()));
        assert_eq!(track.frames.load(Ordering::SeqCst), 2);
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, RelayEvent::CaptureStarted { .. })));
    }

    #[test]
    fn test_lost_screen_is_reported() {
        use crate::media::screen::{ScreenCaptureProvider, ScreenGrabber, ScreenGrabberFactory};

        struct Vanishing;

        impl ScreenGrabber for Vanishing {
            fn grab(&mut self) -> Result<Option<RawVideoFrame>, DeviceError> {
                Err(DeviceError::Backend("access lost".into()))
            }
        }

        impl ScreenGrabberFactory for Vanishing {
            fn screens(&self) -> Vec<DeviceInfo> {
                vec![DeviceInfo::new("screen:0", "Display 1", MediaKind::Screen)]
            }

            fn grabber(&self, _screen: &DeviceInfo) -> Result<Box<dyn ScreenGrabber>, DeviceError> {
                Ok(Box::new(Vanishing))
            }
        }

        let ui = UiLoop::new();
        let (events, rx) = EventBus::new();
        let mut relay = CaptureRelay::new(
            MediaKind::Screen,
            Arc::new(ScreenCaptureProvider::new(Arc::new(Vanishing), 30)),
            &CaptureConfig::default(),
            ui.handle(),
            events,
        );
        relay.start().unwrap();

        let next_error = || {
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            while let Ok(event) = rx.recv_deadline(deadline) {
                if matches!(event, RelayEvent::CaptureError { .. }) {
                    return Some(event);
                }
            }
            None
        };
        let error = next_error();
        assert_eq!(
            error,
            Some(RelayEvent::CaptureError {
                kind: MediaKind::Screen,
                message: DeviceError::Backend("access lost".into()).to_string(),
            })
        );
        assert_eq!(relay.state(), CaptureState::Stopped);

        // Starting again reacquires the screen rather than doing nothing
        relay.start().unwrap();
        assert!(next_error().is_some());
        relay.stop();
        assert!(relay.current_device().is_none());
    }

    #[test]
    fn test_switching_device_while_running() {
        let provider = SyntheticDeviceProvider::new(2, 0, Generation::Manual);
        let (mut relay, _) = camera_relay(&provider, EventBus::detached());

        relay.select_device(1).unwrap();
        relay.start().unwrap();
        assert_eq!(relay.current_device().map(|d| d.id.as_str()), Some("camera:1"));

        provider.clear_ops();
        relay.select_device(0).unwrap();

        assert_eq!(
            provider.ops(),
            vec![
                DeviceOp::Stop("camera:1".into()),
                DeviceOp::Release("camera:1".into()),
                DeviceOp::Open("camera:0".into()),
                DeviceOp::Start("camera:0".into()),
            ]
        );
        assert_eq!(relay.current_device().map(|d| d.id.as_str()), Some("camera:0"));
        assert_eq!(relay.selected_index(), Some(0));

        assert_eq!(
            relay.select_device(2),
            Err(DeviceError::InvalidIndex {
                index: 2,
                available: 2
            })
        );
    }

    #[test]
    fn test_preview_receives_frames_on_ui_thread() {
        struct Preview(Mutex<usize>);
        impl RenderTarget for Preview {
            fn present(&self, _frame: DisplayFrame) {
                *self.0.lock() += 1;
            }
        }

        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Manual);
        let mut ui = UiLoop::new();
        let mut relay = CaptureRelay::new(
            MediaKind::Camera,
            Arc::new(provider.clone()),
            &CaptureConfig::default(),
            ui.handle(),
            EventBus::detached(),
        );
        let preview = Arc::new(Preview(Mutex::new(0)));
        let target: Arc<dyn RenderTarget> = preview.clone();
        relay.set_preview(Some(&target));
        relay.start().unwrap();

        provider.inject("camera:0", frame());
        assert_eq!(*preview.0.lock(), 0);
        ui.run_pending();
        assert_eq!(*preview.0.lock(), 1);
        assert_eq!(relay.stats().dropped_unbound, 1);
    }
}
