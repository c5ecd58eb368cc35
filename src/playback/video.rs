//! Remote video playback
//!
//! One thread per channel blocks on the track's frame stream, converts each
//! frame and posts it to the UI loop. The render target is only touched on
//! the UI thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::target::TargetSlot;
use super::{PlaybackCounters, PlaybackStats};
use crate::codec::to_display_frame;
use crate::dispatch::{EventBus, UiHandle};
use crate::error::TransportError;
use crate::media::frame::VideoFrame;
use crate::media::output::RenderTarget;
use crate::protocol::{RelayEvent, TrackKind};
use crate::transport::{FrameStream, RemoteTrack};

/// Playback of one remote video track
pub struct VideoPlayback {
    identity: Arc<str>,
    sid: String,
    capacity: usize,
    ui: UiHandle,
    events: EventBus,
    target: Arc<TargetSlot>,
    counters: Arc<PlaybackCounters>,
    running: Arc<AtomicBool>,
    stream: Option<Arc<dyn FrameStream<VideoFrame>>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl VideoPlayback {
    pub fn new(
        identity: &str,
        sid: impl Into<String>,
        capacity: usize,
        ui: UiHandle,
        events: EventBus,
    ) -> Self {
        Self {
            identity: Arc::from(identity),
            sid: sid.into(),
            capacity,
            ui,
            events,
            target: Arc::new(TargetSlot::new()),
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

    /// Open the track's stream and start the read loop
    pub fn start(&mut self, track: &dyn RemoteTrack) -> Result<(), TransportError> {
        if self.is_running() {
            return Ok(());
        }
        // Reap a read loop that ended with its stream
        self.stop();

        let stream = match track.open_video_stream(self.capacity) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(identity = %self.identity, "Failed to open video stream: {}", e);
                self.events.emit(RelayEvent::PlaybackError {
                    identity: self.identity.to_string(),
                    kind: TrackKind::Video,
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
        let target = self.target.clone();
        let counters = self.counters.clone();

        let spawned = thread::Builder::new()
            .name(format!("video-playback-{}", self.identity))
            .spawn(move || {
                while let Some(frame) = reader.read() {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    let read = counters.read();

                    let display = match to_display_frame(&frame) {
                        Ok(display) => display,
                        Err(e) => {
                            counters.conversion_error();
                            tracing::warn!(identity = %identity, "Dropping remote video frame: {}", e);
                            continue;
                        }
                    };

                    let Some(weak_target) = target.current() else {
                        counters.without_target();
                        continue;
                    };

                    let running_ui = running.clone();
                    let counters_ui = counters.clone();
                    ui.post(move || {
                        if !running_ui.load(Ordering::Acquire) {
                            return;
                        }
                        match weak_target.upgrade() {
                            Some(target) => {
                                target.present(display);
                                counters_ui.presented();
                            }
                            None => counters_ui.without_target(),
                        }
                    });

                    if read % 100 == 0 {
                        tracing::debug!(identity = %identity, frames = read, "Video playback");
                    }
                }

                tracing::debug!(identity = %identity, "Video read loop ended");
                if running.load(Ordering::Acquire) {
                    events.emit(RelayEvent::PlaybackEnded {
                        identity: identity.to_string(),
                        kind: TrackKind::Video,
                    });
                }
            });

        match spawned {
            Ok(handle) => {
                self.stream = Some(stream);
                self.thread_handle = Some(handle);
                tracing::info!(identity = %self.identity, sid = %self.sid, "Video playback started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                stream.close();
                Err(TransportError::StreamOpen(e.to_string()))
            }
        }
    }

    /// Close the stream, then wait for the read loop to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!(identity = %self.identity, "Video playback thread panicked");
            }
            tracing::info!(identity = %self.identity, "Video playback stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self
                .thread_handle
                .as_ref()
                .map(|h| !h.is_finished())
                .unwrap_or(false)
    }

    pub fn set_render_target(&self, target: Option<&Arc<dyn RenderTarget>>) {
        self.target.set(target);
    }

    pub fn has_render_target(&self) -> bool {
        self.target.is_bound()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.counters.snapshot()
    }
}

impl Drop for VideoPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::UiLoop;
    use crate::media::frame::DisplayFrame;
    use crate::transport::loopback::LoopbackRemoteTrack;
    use crossbeam_channel::{bounded, Receiver, Sender};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        widths: Mutex<Vec<u32>>,
        presented: Arc<AtomicUsize>,
    }

    impl RenderTarget for Recorder {
        fn present(&self, frame: DisplayFrame) {
            self.widths.lock().push(frame.width);
            self.presented.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Produces a frame every 50 ms until closed, tracking readers inside `read`
    struct SlowStream {
        close_tx: Mutex<Option<Sender<()>>>,
        close_rx: Receiver<()>,
        in_read: AtomicUsize,
        reads: AtomicUsize,
    }

    impl SlowStream {
        fn new() -> Arc<Self> {
            let (tx, rx) = bounded(0);
            Arc::new(Self {
                close_tx: Mutex::new(Some(tx)),
                close_rx: rx,
                in_read: AtomicUsize::new(0),
                reads: AtomicUsize::new(0),
            })
        }
    }

    impl FrameStream<VideoFrame> for SlowStream {
        fn read(&self) -> Option<VideoFrame> {
            self.in_read.fetch_add(1, Ordering::SeqCst);
            let frame = match self.close_rx.recv_timeout(Duration::from_millis(50)) {
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => Some(VideoFrame::new(2, 2)),
                _ => None,
            };
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.in_read.fetch_sub(1, Ordering::SeqCst);
            frame
        }

        fn close(&self) {
            self.close_tx.lock().take();
        }
    }

    struct SlowTrack(Arc<SlowStream>);

    impl RemoteTrack for SlowTrack {
        fn sid(&self) -> String {
            "TR_slow".into()
        }

        fn kind(&self) -> TrackKind {
            TrackKind::Video
        }

        fn open_video_stream(
            &self,
            _capacity: usize,
        ) -> Result<Arc<dyn FrameStream<VideoFrame>>, TransportError> {
            Ok(self.0.clone())
        }

        fn open_audio_stream(
            &self,
            _capacity: usize,
        ) -> Result<Arc<dyn FrameStream<crate::media::frame::AudioFrame>>, TransportError> {
            Err(TransportError::StreamOpen("video only".into()))
        }
    }

    #[test]
    fn test_stop_returns_after_reader_exits() {
        let mut ui = UiLoop::new();
        let stream = SlowStream::new();
        let recorder = Arc::new(Recorder::default());
        let target: Arc<dyn RenderTarget> = recorder.clone();

        let mut playback = VideoPlayback::new("alice", "TR_slow", 3, ui.handle(), EventBus::detached());
        playback.set_render_target(Some(&target));
        playback.start(&SlowTrack(stream.clone())).unwrap();

        assert!(ui.run_until(Duration::from_secs(2), || recorder
            .presented
            .load(Ordering::SeqCst)
            >= 2));

        playback.stop();
        assert_eq!(stream.in_read.load(Ordering::SeqCst), 0);
        let reads = stream.reads.load(Ordering::SeqCst);
        let presented = recorder.presented.load(Ordering::SeqCst);

        thread::sleep(Duration::from_millis(120));
        ui.run_pending();
        assert_eq!(stream.reads.load(Ordering::SeqCst), reads);
        assert_eq!(recorder.presented.load(Ordering::SeqCst), presented);
        assert!(!playback.is_running());
    }

    #[test]
    fn test_frames_presented_in_read_order() {
        let mut ui = UiLoop::new();
        let track = LoopbackRemoteTrack::new(TrackKind::Video);
        let recorder = Arc::new(Recorder::default());
        let target: Arc<dyn RenderTarget> = recorder.clone();

        let mut playback = VideoPlayback::new("bob", track.sid(), 8, ui.handle(), EventBus::detached());
        playback.set_render_target(Some(&target));
        playback.start(track.as_ref()).unwrap();

        for width in 1..=5 {
            track.push_video(&VideoFrame::new(width, 1));
        }
        assert!(ui.run_until(Duration::from_secs(2), || recorder
            .presented
            .load(Ordering::SeqCst)
            == 5));
        assert_eq!(*recorder.widths.lock(), vec![1, 2, 3, 4, 5]);
        playback.stop();
    }

    #[test]
    fn test_dropped_target_is_skipped() {
        let mut ui = UiLoop::new();
        let track = LoopbackRemoteTrack::new(TrackKind::Video);
        let recorder = Arc::new(Recorder::default());
        let presented = recorder.presented.clone();
        let target: Arc<dyn RenderTarget> = recorder;

        let mut playback = VideoPlayback::new("carol", track.sid(), 3, ui.handle(), EventBus::detached());
        playback.set_render_target(Some(&target));
        playback.start(track.as_ref()).unwrap();

        track.push_video(&VideoFrame::new(4, 4));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while ui.pending() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        drop(target);
        ui.run_pending();
        assert_eq!(presented.load(Ordering::SeqCst), 0);
        assert_eq!(playback.stats().frames_without_target, 1);
        assert!(!playback.has_render_target());
        playback.stop();
    }

    #[test]
    fn test_end_of_stream_is_not_an_error() {
        let ui = UiLoop::new();
        let (events, rx) = EventBus::new();
        let track = LoopbackRemoteTrack::new(TrackKind::Video);

        let mut playback = VideoPlayback::new("dave", track.sid(), 3, ui.handle(), events);
        playback.start(track.as_ref()).unwrap();
        track.end();

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            event,
            RelayEvent::PlaybackEnded {
                identity: "dave".into(),
                kind: TrackKind::Video
            }
        );
        playback.stop();
    }

    #[test]
    fn test_restart_after_end_of_stream() {
        let mut ui = UiLoop::new();
        let (events, rx) = EventBus::new();
        let first = LoopbackRemoteTrack::new(TrackKind::Video);
        let recorder = Arc::new(Recorder::default());
        let target: Arc<dyn RenderTarget> = recorder.clone();

        let mut playback = VideoPlayback::new("frank", first.sid(), 3, ui.handle(), events);
        playback.set_render_target(Some(&target));
        playback.start(first.as_ref()).unwrap();
        first.end();
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(2)),
            Ok(RelayEvent::PlaybackEnded { .. })
        ));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while playback.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!playback.is_running());

        let second = LoopbackRemoteTrack::new(TrackKind::Video);
        playback.start(second.as_ref()).unwrap();
        assert!(playback.is_running());
        second.push_video(&VideoFrame::new(6, 1));
        assert!(ui.run_until(Duration::from_secs(2), || recorder
            .presented
            .load(Ordering::SeqCst)
            == 1));
        assert_eq!(*recorder.widths.lock(), vec![6]);
        playback.stop();
    }

    #[test]
    fn test_open_failure_reports_error() {
        let ui = UiLoop::new();
        let (events, rx) = EventBus::new();
        let track = LoopbackRemoteTrack::new(TrackKind::Audio);

        let mut playback = VideoPlayback::new("erin", track.sid(), 3, ui.handle(), events);
        assert!(playback.start(track.as_ref()).is_err());
        assert!(matches!(
            rx.try_recv(),
            Ok(RelayEvent::PlaybackError { .. })
        ));
        assert!(!playback.is_running());
    }
}
