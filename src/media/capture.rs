//! Microphone capture through cpal
//!
//! The cpal stream is not `Send` on every host, so it is built and kept
//! alive on a dedicated thread. Samples are delivered on cpal's callback
//! thread straight into the armed [`FrameCallback`].

use bytes::{BufMut, BytesMut};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::constants::DEFAULT_SAMPLE_RATE;
use crate::error::DeviceError;
use crate::media::device::{get_device_by_id, CaptureDevice, FrameCallback, LossCallback};
use crate::media::frame::{CapturedFrame, RawAudioFrame, SampleFormat};
use crate::protocol::DeviceInfo;

/// How long `start` waits for the stream thread to report back
const STREAM_READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Capture from one cpal input device
pub struct CpalMicrophone {
    info: DeviceInfo,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    samples_captured: Arc<AtomicU64>,
    config: StreamConfig,
}

impl CpalMicrophone {
    /// Resolve the device and its stream configuration
    pub fn new(
        info: DeviceInfo,
        sample_rate: Option<u32>,
        channels: Option<u16>,
    ) -> Result<Self, DeviceError> {
        let device = get_device_by_id(&info.id)?;
        let default_config = device.default_input_config()?;

        let config = StreamConfig {
            channels: channels.unwrap_or(default_config.channels()),
            sample_rate: cpal::SampleRate(sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            info,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            samples_captured: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl CaptureDevice for CpalMicrophone {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start(&mut self, deliver: FrameCallback, lost: LossCallback) -> Result<(), DeviceError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = get_device_by_id(&self.info.id)?;
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let running_for_errors = self.running.clone();
        let name = self.info.name.clone();
        let samples_captured = self.samples_captured.clone();
        let config = self.config.clone();
        let channels = self.config.channels;
        let sample_rate = self.config.sample_rate.0;
        let start_time = Instant::now();

        self.samples_captured.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("mic-capture-{}", self.info.name))
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        samples_captured.fetch_add(data.len() as u64, Ordering::Relaxed);

                        let mut bytes = BytesMut::with_capacity(data.len() * 4);
                        for sample in data {
                            bytes.put_f32_le(*sample);
                        }
                        deliver(CapturedFrame::Audio(RawAudioFrame {
                            format: SampleFormat::F32,
                            sample_rate,
                            channels,
                            data: bytes.freeze(),
                            timestamp_us: start_time.elapsed().as_micros() as i64,
                        }));
                    },
                    move |err| match err {
                        cpal::StreamError::DeviceNotAvailable => {
                            if running_for_errors.swap(false, Ordering::SeqCst) {
                                tracing::error!(device = %name, "Microphone lost");
                                lost(DeviceError::Stream(err.to_string()));
                            }
                        }
                        other => tracing::warn!(device = %name, "Microphone stream error: {}", other),
                    },
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

                // Keep the stream alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| DeviceError::Stream(e.to_string()))?;

        self.thread_handle = Some(handle);

        let outcome = ready_rx
            .recv_timeout(STREAM_READY_TIMEOUT)
            .unwrap_or_else(|_| Err(DeviceError::Stream("stream thread did not report".into())));
        if outcome.is_err() {
            self.stop();
        }
        outcome
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}
