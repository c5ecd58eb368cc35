//! Virtual capture devices
//!
//! Used by the demo binary on machines without a camera and by tests. A
//! provider can either generate frames on its own threads (test pattern
//! video, sine tone audio) or stay silent and let the caller inject frames
//! into the armed callback.

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::DeviceError;
use crate::media::device::{CaptureDevice, CaptureDeviceProvider, FrameCallback, LossCallback};
use crate::media::frame::{
    CapturedFrame, PixelFormat, RawAudioFrame, RawVideoFrame, SampleFormat,
};
use crate::media::screen::{ScreenGrabber, ScreenGrabberFactory};
use crate::protocol::{DeviceInfo, MediaKind};

/// Lifecycle operations observed on synthetic devices, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    Open(String),
    Start(String),
    Stop(String),
    Release(String),
}

/// How opened devices produce frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Generation {
    /// Frames only arrive through [`SyntheticDeviceProvider::inject`]
    Manual,
    /// Background threads produce frames at the given rate
    Pattern { fps: u32 },
}

#[derive(Default)]
struct Slot {
    in_use: bool,
    callback: Option<FrameCallback>,
    lost: Option<LossCallback>,
    running: Option<Arc<AtomicBool>>,
}

struct Inner {
    devices: Vec<DeviceInfo>,
    slots: Mutex<HashMap<String, Slot>>,
    ops: Mutex<Vec<DeviceOp>>,
    generation: Generation,
    video_size: (u32, u32),
    audio_format: (u32, u16),
    unavailable: AtomicBool,
}

/// Provider of virtual cameras and microphones
#[derive(Clone)]
pub struct SyntheticDeviceProvider {
    inner: Arc<Inner>,
}

impl SyntheticDeviceProvider {
    /// `cameras` cameras and `microphones` microphones
    pub fn new(cameras: usize, microphones: usize, generation: Generation) -> Self {
        let mut devices = Vec::new();
        for i in 0..cameras {
            let mut info =
                DeviceInfo::new(format!("camera:{}", i), format!("Virtual Camera {}", i + 1), MediaKind::Camera);
            info.is_default = i == 0;
            devices.push(info);
        }
        for i in 0..microphones {
            let mut info = DeviceInfo::new(
                format!("microphone:{}", i),
                format!("Virtual Microphone {}", i + 1),
                MediaKind::Microphone,
            );
            info.is_default = i == 0;
            devices.push(info);
        }
        Self {
            inner: Arc::new(Inner {
                devices,
                slots: Mutex::new(HashMap::new()),
                ops: Mutex::new(Vec::new()),
                generation,
                video_size: (320, 180),
                audio_format: (48_000, 1),
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Make every subsequent `open` fail as if the hardware vanished
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Deliver a frame through the callback armed on `device_id`.
    /// Returns false when the device is not started.
    pub fn inject(&self, device_id: &str, frame: CapturedFrame) -> bool {
        let callback = self
            .inner
            .slots
            .lock()
            .get(device_id)
            .and_then(|slot| slot.callback.clone());
        match callback {
            Some(callback) => {
                callback(frame);
                true
            }
            None => false,
        }
    }

    /// Simulate the hardware behind a started `device_id` going away.
    /// Returns false when the device is not started.
    pub fn lose(&self, device_id: &str, reason: &str) -> bool {
        let (lost, running) = match self.inner.slots.lock().get_mut(device_id) {
            Some(slot) => {
                slot.callback = None;
                (slot.lost.take(), slot.running.take())
            }
            None => return false,
        };
        let Some(lost) = lost else {
            return false;
        };
        if let Some(running) = running {
            running.store(false, Ordering::SeqCst);
        }
        lost(DeviceError::Backend(reason.to_string()));
        true
    }

    /// Whether `device_id` is currently opened
    pub fn is_in_use(&self, device_id: &str) -> bool {
        self.inner
            .slots
            .lock()
            .get(device_id)
            .map(|slot| slot.in_use)
            .unwrap_or(false)
    }

    /// Recorded device operations
    pub fn ops(&self) -> Vec<DeviceOp> {
        self.inner.ops.lock().clone()
    }

    pub fn clear_ops(&self) {
        self.inner.ops.lock().clear();
    }

    fn record(&self, op: DeviceOp) {
        self.inner.ops.lock().push(op);
    }
}

impl CaptureDeviceProvider for SyntheticDeviceProvider {
    fn devices(&self, kind: MediaKind) -> Vec<DeviceInfo> {
        self.inner
            .devices
            .iter()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }

    fn open(&self, device: &DeviceInfo) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(DeviceError::Unavailable(device.kind));
        }
        if !self.inner.devices.iter().any(|d| d.id == device.id) {
            return Err(DeviceError::NotFound(device.id.clone()));
        }
        {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(device.id.clone()).or_default();
            if slot.in_use {
                return Err(DeviceError::Busy(device.id.clone()));
            }
            slot.in_use = true;
        }
        self.record(DeviceOp::Open(device.id.clone()));
        Ok(Box::new(SyntheticDevice {
            info: device.clone(),
            provider: self.clone(),
            running: Arc::new(AtomicBool::new(false)),
            generator: None,
        }))
    }
}

struct SyntheticDevice {
    info: DeviceInfo,
    provider: SyntheticDeviceProvider,
    running: Arc<AtomicBool>,
    generator: Option<JoinHandle<()>>,
}

impl SyntheticDevice {
    fn spawn_generator(&mut self, fps: u32, deliver: FrameCallback) -> Result<(), DeviceError> {
        let running = self.running.clone();
        let kind = self.info.kind;
        let (width, height) = self.provider.inner.video_size;
        let (sample_rate, channels) = self.provider.inner.audio_format;
        let interval = Duration::from_millis(1000 / fps.clamp(1, 120) as u64);

        let handle = thread::Builder::new()
            .name(format!("synthetic-{}", self.info.id))
            .spawn(move || {
                let started = Instant::now();
                let mut index: u64 = 0;
                while running.load(Ordering::Relaxed) {
                    let timestamp_us = started.elapsed().as_micros() as i64;
                    let frame = match kind {
                        MediaKind::Microphone => CapturedFrame::Audio(tone_frame(
                            sample_rate,
                            channels,
                            interval,
                            index,
                            timestamp_us,
                        )),
                        _ => CapturedFrame::Video(
                            test_pattern(width, height, index).with_timestamp(timestamp_us),
                        ),
                    };
                    deliver(frame);
                    index += 1;
                    thread::sleep(interval);
                }
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;
        self.generator = Some(handle);
        Ok(())
    }
}

impl CaptureDevice for SyntheticDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start(&mut self, deliver: FrameCallback, lost: LossCallback) -> Result<(), DeviceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(handle) = self.generator.take() {
            let _ = handle.join();
        }
        if let Some(slot) = self.provider.inner.slots.lock().get_mut(&self.info.id) {
            slot.callback = Some(deliver.clone());
            slot.lost = Some(lost);
            slot.running = Some(self.running.clone());
        }
        self.provider.record(DeviceOp::Start(self.info.id.clone()));
        if let Generation::Pattern { fps } = self.provider.inner.generation {
            self.spawn_generator(fps, deliver)?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(handle) = self.generator.take() {
            let _ = handle.join();
        }
        if !was_running {
            return;
        }
        if let Some(slot) = self.provider.inner.slots.lock().get_mut(&self.info.id) {
            slot.callback = None;
            slot.lost = None;
            slot.running = None;
        }
        self.provider.record(DeviceOp::Stop(self.info.id.clone()));
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.stop();
        if let Some(slot) = self.provider.inner.slots.lock().get_mut(&self.info.id) {
            slot.in_use = false;
        }
        self.provider.record(DeviceOp::Release(self.info.id.clone()));
    }
}

/// Solid BGRA frame whose colour rotates with `index`
pub fn test_pattern(width: u32, height: u32, index: u64) -> RawVideoFrame {
    const COLOURS: [[u8; 4]; 6] = [
        [0x00, 0x00, 0xff, 0xff],
        [0x00, 0xff, 0xff, 0xff],
        [0x00, 0xff, 0x00, 0xff],
        [0xff, 0xff, 0x00, 0xff],
        [0xff, 0x00, 0x00, 0xff],
        [0xff, 0x00, 0xff, 0xff],
    ];
    let colour = COLOURS[(index / 30) as usize % COLOURS.len()];
    let pixels = width as usize * height as usize;
    let mut data = Vec::with_capacity(pixels * 4);
    for _ in 0..pixels {
        data.extend_from_slice(&colour);
    }
    RawVideoFrame::packed(PixelFormat::Bgra32, width, height, data)
}

/// 440 Hz sine chunk covering `duration`
pub fn tone_frame(
    sample_rate: u32,
    channels: u16,
    duration: Duration,
    index: u64,
    timestamp_us: i64,
) -> RawAudioFrame {
    let per_channel = (sample_rate as u128 * duration.as_micros() / 1_000_000) as usize;
    let offset = index as usize * per_channel;
    let mut bytes = BytesMut::with_capacity(per_channel * channels as usize * 2);
    for n in 0..per_channel {
        let t = (offset + n) as f32 / sample_rate as f32;
        let value = ((t * 440.0 * std::f32::consts::TAU).sin() * 0.2 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            bytes.put_i16_le(value);
        }
    }
    RawAudioFrame {
        format: SampleFormat::I16,
        sample_rate,
        channels,
        data: bytes.freeze(),
        timestamp_us,
    }
}

/// Screens that always show the test pattern
pub struct SyntheticScreens {
    screens: Vec<DeviceInfo>,
    size: (u32, u32),
}

impl SyntheticScreens {
    pub fn new(count: usize, width: u32, height: u32) -> Self {
        let screens = (0..count)
            .map(|i| {
                let mut info = DeviceInfo::new(
                    format!("screen:{}", i),
                    format!("Display {}", i + 1),
                    MediaKind::Screen,
                );
                info.is_default = i == 0;
                info
            })
            .collect();
        Self {
            screens,
            size: (width, height),
        }
    }
}

impl ScreenGrabberFactory for SyntheticScreens {
    fn screens(&self) -> Vec<DeviceInfo> {
        self.screens.clone()
    }

    fn grabber(&self, screen: &DeviceInfo) -> Result<Box<dyn ScreenGrabber>, DeviceError> {
        if !self.screens.iter().any(|s| s.id == screen.id) {
            return Err(DeviceError::NotFound(screen.id.clone()));
        }
        Ok(Box::new(PatternGrabber {
            size: self.size,
            index: 0,
        }))
    }
}

struct PatternGrabber {
    size: (u32, u32),
    index: u64,
}

impl ScreenGrabber for PatternGrabber {
    fn grab(&mut self) -> Result<Option<RawVideoFrame>, DeviceError> {
        self.index += 1;
        Ok(Some(test_pattern(self.size.0, self.size.1, self.index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_twice_is_busy_until_released() {
        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Manual);
        let cam = provider.devices(MediaKind::Camera).remove(0);

        let first = provider.open(&cam).unwrap();
        assert!(matches!(provider.open(&cam), Err(DeviceError::Busy(_))));

        drop(first);
        assert!(!provider.is_in_use(&cam.id));
        assert!(provider.open(&cam).is_ok());
    }

    #[test]
    fn test_inject_requires_started_device() {
        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Manual);
        let cam = provider.devices(MediaKind::Camera).remove(0);
        let mut device = provider.open(&cam).unwrap();
        let frame = CapturedFrame::Video(test_pattern(2, 2, 0));

        assert!(!provider.inject(&cam.id, frame.clone()));
        device.start(Arc::new(|_| {}), Arc::new(|_| {})).unwrap();
        assert!(provider.inject(&cam.id, frame.clone()));
        device.stop();
        assert!(!provider.inject(&cam.id, frame));
        assert!(!provider.lose(&cam.id, "unplugged"));
    }

    #[test]
    fn test_lost_device_reports_once_and_stops_delivery() {
        let provider = SyntheticDeviceProvider::new(1, 0, Generation::Pattern { fps: 100 });
        let cam = provider.devices(MediaKind::Camera).remove(0);
        let mut device = provider.open(&cam).unwrap();

        let (lost_tx, lost_rx) = crossbeam_channel::unbounded();
        device
            .start(
                Arc::new(|_| {}),
                Arc::new(move |e| {
                    let _ = lost_tx.send(e);
                }),
            )
            .unwrap();

        assert!(provider.lose(&cam.id, "unplugged"));
        assert!(!provider.lose(&cam.id, "unplugged"));
        assert_eq!(
            lost_rx.try_recv(),
            Ok(DeviceError::Backend("unplugged".into()))
        );
        assert!(lost_rx.try_recv().is_err());
        assert!(!provider.inject(&cam.id, CapturedFrame::Video(test_pattern(2, 2, 0))));

        device.stop();
        drop(device);
        assert!(!provider.is_in_use(&cam.id));
    }

    #[test]
    fn test_tone_frame_size() {
        let frame = tone_frame(48_000, 2, Duration::from_millis(10), 0, 0);
        assert_eq!(frame.data.len(), 480 * 2 * 2);
    }
}
