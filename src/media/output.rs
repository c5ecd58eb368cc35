//! Render and audio output seams
//!
//! Both are touched only on the UI thread. Render targets are owned by the
//! UI; the relay only ever holds weak references to them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::DeviceError;
use crate::media::frame::{DisplayFrame, PcmBuffer};

/// Video surface accepting display frames
pub trait RenderTarget: Send + Sync {
    fn present(&self, frame: DisplayFrame);
}

/// Opened audio output, created against a fixed sample rate/channel count
pub trait AudioOutput: Send {
    /// Queue PCM for playback, returning the number of samples accepted
    fn write(&mut self, pcm: &PcmBuffer) -> usize;

    fn set_volume(&mut self, volume: f32);

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Release the device
    fn stop(&mut self);
}

/// Creates audio outputs on demand
pub trait AudioOutputFactory: Send + Sync {
    fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn AudioOutput>, DeviceError>;
}

/// Discards audio while counting it. Used for headless runs.
#[derive(Default)]
pub struct NullOutputFactory {
    samples: Arc<AtomicU64>,
    opened: Arc<AtomicU64>,
}

impl NullOutputFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn outputs_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }
}

impl AudioOutputFactory for NullOutputFactory {
    fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn AudioOutput>, DeviceError> {
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(NullAudioOutput {
            sample_rate,
            channels,
            samples: self.samples.clone(),
        }))
    }
}

struct NullAudioOutput {
    sample_rate: u32,
    channels: u16,
    samples: Arc<AtomicU64>,
}

impl AudioOutput for NullAudioOutput {
    fn write(&mut self, pcm: &PcmBuffer) -> usize {
        let count = pcm.sample_count();
        self.samples.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn stop(&mut self) {}
}

#[cfg(feature = "cpal-devices")]
pub use self::cpal_output::{CpalAudioOutput, CpalOutputFactory};

#[cfg(feature = "cpal-devices")]
mod cpal_output {
    use cpal::traits::{DeviceTrait, StreamTrait};
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use super::*;
    use crate::codec::pcm_to_f32;
    use crate::media::buffer::{SampleRing, SharedSampleRing};
    use crate::media::device::get_default_output_device;

    /// Speaker output fed from a sample ring
    pub struct CpalAudioOutput {
        ring: SharedSampleRing,
        running: Arc<AtomicBool>,
        thread_handle: Option<JoinHandle<()>>,
        sample_rate: u32,
        channels: u16,
        volume: f32,
    }

    impl CpalAudioOutput {
        /// Open the default output device
        pub fn open(sample_rate: u32, channels: u16, buffer_ms: u32) -> Result<Self, DeviceError> {
            let device = get_default_output_device()?;
            let ring: SharedSampleRing =
                Arc::new(SampleRing::for_duration(sample_rate, channels, buffer_ms));
            let running = Arc::new(AtomicBool::new(true));
            let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

            let config = cpal::StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let ring_cb = ring.clone();
            let running_loop = running.clone();
            let handle = thread::Builder::new()
                .name("audio-output".into())
                .spawn(move || {
                    let stream = device.into_inner().build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            ring_cb.pop_into(data);
                        },
                        |err| tracing::warn!("Output stream error: {}", err),
                        None,
                    );
                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(DeviceError::Stream(e.to_string())));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(DeviceError::Stream(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    while running_loop.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                    }
                })
                .map_err(|e| DeviceError::Stream(e.to_string()))?;

            let mut output = Self {
                ring,
                running,
                thread_handle: Some(handle),
                sample_rate,
                channels,
                volume: 1.0,
            };
            match ready_rx.recv_timeout(Duration::from_secs(2)) {
                Ok(Ok(())) => Ok(output),
                Ok(Err(e)) => {
                    output.stop();
                    Err(e)
                }
                Err(_) => {
                    output.stop();
                    Err(DeviceError::Stream("output thread did not report".into()))
                }
            }
        }

        pub fn ring(&self) -> &SharedSampleRing {
            &self.ring
        }
    }

    impl AudioOutput for CpalAudioOutput {
        fn write(&mut self, pcm: &PcmBuffer) -> usize {
            let mut samples = pcm_to_f32(pcm);
            if (self.volume - 1.0).abs() > f32::EPSILON {
                for sample in samples.iter_mut() {
                    *sample *= self.volume;
                }
            }
            self.ring.push_slice(&samples)
        }

        fn set_volume(&mut self, volume: f32) {
            self.volume = volume.clamp(0.0, 1.0);
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn channels(&self) -> u16 {
            self.channels
        }

        fn stop(&mut self) {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.thread_handle.take() {
                let _ = handle.join();
            }
            self.ring.clear();
        }
    }

    impl Drop for CpalAudioOutput {
        fn drop(&mut self) {
            self.stop();
        }
    }

    /// Opens [`CpalAudioOutput`]s on the default device
    pub struct CpalOutputFactory {
        buffer_ms: u32,
    }

    impl CpalOutputFactory {
        pub fn new(buffer_ms: u32) -> Self {
            Self { buffer_ms }
        }
    }

    impl AudioOutputFactory for CpalOutputFactory {
        fn open(&self, sample_rate: u32, channels: u16) -> Result<Box<dyn AudioOutput>, DeviceError> {
            Ok(Box::new(CpalAudioOutput::open(sample_rate, channels, self.buffer_ms)?))
        }
    }
}
