//! Remote audio playback
//!
//! The output device is opened lazily on the UI thread once the first
//! frame reveals the stream format, and reopened if that format changes.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{PlaybackCounters, PlaybackStats};
use crate::codec::to_pcm_buffer;
use crate::dispatch::{EventBus, UiHandle};
use crate::error::TransportError;
use crate::media::frame::{AudioFrame, PcmBuffer};
use crate::media::output::{AudioOutput, AudioOutputFactory};
use crate::protocol::{RelayEvent, TrackKind};
use crate::transport::{FrameStream, RemoteTrack};

struct OutputState {
    output: Option<Box<dyn AudioOutput>>,
    volume: f32,
    /// Format whose output failed to open; not retried until it changes
    failed_format: Option<(u32, u16)>,
}

impl OutputState {
    fn play(
        &mut self,
        pcm: &PcmBuffer,
        factory: &dyn AudioOutputFactory,
        identity: &str,
        events: &EventBus,
    ) -> bool {
        let format = (pcm.sample_rate, pcm.channels);
        let matches = self
            .output
            .as_ref()
            .map(|o| (o.sample_rate(), o.channels()) == format)
            .unwrap_or(false);

        if !matches {
            if let Some(mut previous) = self.output.take() {
                tracing::info!(
                    identity,
                    sample_rate = format.0,
                    channels = format.1,
                    "Remote audio format changed, reopening output"
                );
                previous.stop();
            }
            if self.failed_format == Some(format) {
                return false;
            }
            match factory.open(format.0, format.1) {
                Ok(mut output) => {
                    output.set_volume(self.volume);
                    tracing::info!(
                        identity,
                        sample_rate = format.0,
                        channels = format.1,
                        "Audio output opened"
                    );
                    self.output = Some(output);
                    self.failed_format = None;
                }
                Err(e) => {
                    tracing::error!(identity, "Failed to open audio output: {}", e);
                    self.failed_format = Some(format);
                    events.emit(RelayEvent::PlaybackError {
                        identity: identity.to_string(),
                        kind: TrackKind::Audio,
                        message: e.to_string(),
                    });
                    return false;
                }
            }
        }

        match self.output.as_mut() {
            Some(output) => {
                output.write(pcm);
                true
            }
            None => false,
        }
    }

    fn release(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.stop();
        }
        self.failed_format = None;
    }
}

/// Playback of one remote audio track
pub struct AudioPlayback {
    identity: Arc<str>,
    sid: String,
    capacity: usize,
    ui: UiHandle,
    events: EventBus,
    factory: Arc<dyn AudioOutputFactory>,
    output: Arc<Mutex<OutputState>>,
    muted: Arc<AtomicBool>,
    counters: Arc<PlaybackCounters>,
    running: Arc<AtomicBool>,
    stream: Option<Arc<dyn FrameStream<AudioFrame>>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioPlayback {
    pub fn new(
        identity: &str,
        sid: impl Into<String>,
        capacity: usize,
        factory: Arc<dyn AudioOutputFactory>,
        ui: UiHandle,
        events: EventBus,
    ) -> Self {
        Self {
            identity: Arc::from(identity),
            sid: sid.into(),
            capacity,
            ui,
            events,
            factory,
            output: Arc::new(Mutex::new(OutputState {
                output: None,
                volume: 1.0,
                failed_format: None,
            })),
            muted: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(PlaybackCounters::default()),
            running: Arc::new(AtomicBool::new(false)),
            stream: None,
            thread_handle: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn start(&mut self, track: &dyn RemoteTrack) -> Result<(), TransportError> {
        if self.is_running() {
            return Ok(());
        }
        // Reap a read loop that ended with its stream
        self.stop();

        let stream = match track.open_audio_stream(self.capacity) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(identity = %self.identity, "Failed to open audio stream: {}", e);
                self.events.emit(RelayEvent::PlaybackError {
                    identity: self.identity.to_string(),
                    kind: TrackKind::Audio,
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        self.running = running.clone();

        let reader = stream.clone();
        let identity = self.identity.clone();
        let ui = self.ui.clone();
        let events = self.events.clone();
        let factory = self.factory.clone();
        let output = self.output.clone();
        let muted = self.muted.clone();
        let counters = self.counters.clone();

        let spawned = thread::Builder::new()
            .name(format!("audio-playback-{}", self.identity))
            .spawn(move || {
                while let Some(frame) = reader.read() {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    let read = counters.read();
                    if muted.load(Ordering::Relaxed) {
                        counters.muted();
                        continue;
                    }

                    let pcm = match to_pcm_buffer(&frame) {
                        Ok(pcm) => pcm,
                        Err(e) => {
                            counters.conversion_error();
                            tracing::warn!(identity = %identity, "Dropping remote audio frame: {}", e);
                            continue;
                        }
                    };

                    let running_ui = running.clone();
                    let factory = factory.clone();
                    let output = output.clone();
                    let identity_ui = identity.clone();
                    let events_ui = events.clone();
                    let counters_ui = counters.clone();
                    ui.post(move || {
                        if !running_ui.load(Ordering::Acquire) {
                            return;
                        }
                        let mut state = output.lock();
                        if state.play(&pcm, factory.as_ref(), &identity_ui, &events_ui) {
                            counters_ui.presented();
                        }
                    });

                    if read % 100 == 0 {
                        tracing::debug!(identity = %identity, frames = read, "Audio playback");
                    }
                }

                tracing::debug!(identity = %identity, "Audio read loop ended");
                if running.load(Ordering::Acquire) {
                    events.emit(RelayEvent::PlaybackEnded {
                        identity: identity.to_string(),
                        kind: TrackKind::Audio,
                    });
                }
            });

        match spawned {
            Ok(handle) => {
                self.stream = Some(stream);
                self.thread_handle = Some(handle);
                tracing::info!(identity = %self.identity, sid = %self.sid, "Audio playback started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                stream.close();
                Err(TransportError::StreamOpen(e.to_string()))
            }
        }
    }

    /// Close the stream, join the read loop, then release the output
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!(identity = %self.identity, "Audio playback thread panicked");
            }
            tracing::info!(identity = %self.identity, "Audio playback stopped");
        }
        self.output.lock().release();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self
                .thread_handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    /// Skip incoming frames while the remote side is muted
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Output volume in [0, 1], also applied to outputs opened later
    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        let mut state = self.output.lock();
        state.volume = volume;
        if let Some(output) = state.output.as_mut() {
            output.set_volume(volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.output.lock().volume
    }

    pub fn has_output(&self) -> bool {
        self.output.lock().output.is_some()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.counters.snapshot()
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
