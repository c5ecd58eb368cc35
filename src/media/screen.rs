//! Polled screen capture
//!
//! Desktop duplication APIs hand out frames on request rather than pushing
//! them, so a screen device runs its own timer thread that grabs at a fixed
//! rate and delivers whatever changed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::DeviceError;
use crate::media::device::{CaptureDevice, CaptureDeviceProvider, FrameCallback, LossCallback};
use crate::media::frame::{CapturedFrame, RawVideoFrame};
use crate::protocol::{DeviceInfo, MediaKind};

/// Platform frame grabber for one screen
pub trait ScreenGrabber: Send {
    /// Grab the current screen contents. `Ok(None)` means nothing changed
    /// since the last grab. An error means the screen was lost.
    fn grab(&mut self) -> Result<Option<RawVideoFrame>, DeviceError>;
}

/// Enumerates screens and creates grabbers for them
pub trait ScreenGrabberFactory: Send + Sync {
    fn screens(&self) -> Vec<DeviceInfo>;

    fn grabber(&self, screen: &DeviceInfo) -> Result<Box<dyn ScreenGrabber>, DeviceError>;
}

/// Capture device polling a [`ScreenGrabber`]
pub struct ScreenCapture {
    info: DeviceInfo,
    grabber: Option<Box<dyn ScreenGrabber>>,
    interval: Duration,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<Box<dyn ScreenGrabber>>>,
}

impl ScreenCapture {
    pub fn new(info: DeviceInfo, grabber: Box<dyn ScreenGrabber>, fps: u32) -> Self {
        Self {
            info,
            grabber: Some(grabber),
            interval: Duration::from_millis(1000 / fps.clamp(1, 120) as u64),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl CaptureDevice for ScreenCapture {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start(&mut self, deliver: FrameCallback, lost: LossCallback) -> Result<(), DeviceError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Reap a loop that ended on its own
        if let Some(handle) = self.thread_handle.take() {
            if let Ok(grabber) = handle.join() {
                self.grabber = Some(grabber);
            }
        }
        let mut grabber = self
            .grabber
            .take()
            .ok_or_else(|| DeviceError::Busy(self.info.id.clone()))?;

        let running = self.running.clone();
        let interval = self.interval;
        let name = self.info.name.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("screen-capture-{}", self.info.id))
            .spawn(move || {
                let mut next_deadline = Instant::now() + interval;
                let mut frames: u64 = 0;
                while running.load(Ordering::Relaxed) {
                    match grabber.grab() {
                        Ok(Some(frame)) => {
                            frames += 1;
                            deliver(CapturedFrame::Video(frame));
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(screen = %name, "Screen capture lost: {}", e);
                            running.store(false, Ordering::SeqCst);
                            lost(e);
                            break;
                        }
                    }

                    let now = Instant::now();
                    if now < next_deadline {
                        thread::sleep(next_deadline - now);
                        next_deadline += interval;
                    } else {
                        next_deadline = now + interval;
                    }
                }
                tracing::debug!(screen = %name, frames, "Screen capture loop ended");
                grabber
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if let Ok(grabber) = handle.join() {
                self.grabber = Some(grabber);
            }
        }
    }
}

impl Drop for ScreenCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Exposes a grabber factory as a screen capture provider
pub struct ScreenCaptureProvider {
    factory: Arc<dyn ScreenGrabberFactory>,
    fps: u32,
}

impl ScreenCaptureProvider {
    pub fn new(factory: Arc<dyn ScreenGrabberFactory>, fps: u32) -> Self {
        Self { factory, fps }
    }
}

impl CaptureDeviceProvider for ScreenCaptureProvider {
    fn devices(&self, kind: MediaKind) -> Vec<DeviceInfo> {
        match kind {
            MediaKind::Screen => self.factory.screens(),
            _ => Vec::new(),
        }
    }

    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        if device.kind != MediaKind::Screen {
            return Err(DeviceError::Unavailable(device.kind));
        }
        let grabber = self.factory.grabber(device)?;
        Ok(Box::new(ScreenCapture::new(device.clone(), grabber, self.fps)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::frame::PixelFormat;
    use std::sync::atomic::AtomicUsize;

    struct Countdown {
        remaining: usize,
    }

    impl ScreenGrabber for Countdown {
        fn grab(&mut self) -> Result<Option<RawVideoFrame>, DeviceError> {
            if self.remaining == 0 {
                return Err(DeviceError::Backend("access lost".into()));
            }
            self.remaining -= 1;
            if self.remaining % 2 == 0 {
                return Ok(None);
            }
            Ok(Some(RawVideoFrame::packed(PixelFormat::Bgra32, 1, 1, vec![0u8; 4])))
        }
    }

    #[test]
    fn test_unchanged_screens_are_not_delivered_and_loss_is_reported() {
        let info = DeviceInfo::new("screen:0", "Screen 1", MediaKind::Screen);
        let mut capture = ScreenCapture::new(info, Box::new(Countdown { remaining: 4 }), 120);

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let (lost_tx, lost_rx) = crossbeam_channel::unbounded();
        capture
            .start(
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                Arc::new(move |e| {
                    let _ = lost_tx.send(e);
                }),
            )
            .unwrap();

        let error = lost_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(error, DeviceError::Backend("access lost".into()));
        assert!(!capture.running.load(Ordering::SeqCst));
        capture.stop();

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert!(lost_rx.try_recv().is_err());
        assert!(capture.grabber.is_some());
    }
}
