//! Loopback Relay Demo
//!
//! Joins an in-process echo room, publishes synthetic camera, microphone
//! and screen media, and renders the echoed tracks into counting targets.
//!
//! Usage: relay-demo [room] [user] [--real-audio]

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_relay::{
    config::AppConfig,
    dispatch::{EventBus, UiHandle, UiLoop},
    media::{
        output::NullOutputFactory,
        synthetic::{Generation, SyntheticDeviceProvider, SyntheticScreens},
        AudioOutputFactory, CaptureDeviceProvider, DeviceHub, DisplayFrame, RenderTarget,
        ScreenCaptureProvider,
    },
    protocol::{MediaKind, RelayEvent, TrackKind},
    session::{MeetingSession, SessionDeps},
    transport::{
        self,
        loopback::{echo_identity, LoopbackNetwork},
    },
};

/// Counts presented frames instead of drawing them
#[derive(Default)]
struct CountingTarget {
    frames: AtomicU64,
}

impl RenderTarget for CountingTarget {
    fn present(&self, _frame: DisplayFrame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

fn audio_stack(
    config: &AppConfig,
    synthetic: &SyntheticDeviceProvider,
    real_audio: bool,
) -> (Arc<dyn CaptureDeviceProvider>, Arc<dyn AudioOutputFactory>) {
    #[cfg(feature = "cpal-devices")]
    if real_audio {
        use media_relay::media::{device::CpalDeviceProvider, output::CpalOutputFactory};
        tracing::info!("Using system microphone and speakers");
        return (
            Arc::new(CpalDeviceProvider::new(config.capture.clone())),
            Arc::new(CpalOutputFactory::new(config.playback.audio_buffer_ms)),
        );
    }
    #[cfg(not(feature = "cpal-devices"))]
    if real_audio {
        tracing::warn!("Built without cpal-devices; using synthetic audio");
    }
    let _ = config;
    (Arc::new(synthetic.clone()), Arc::new(NullOutputFactory::new()))
}

/// Run `task` on the UI thread and wait for its result
async fn on_ui<T, F>(ui: &UiHandle, task: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    if !ui.post(move || {
        let _ = tx.send(task());
    }) {
        return None;
    }
    rx.await.ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load_or_default();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting loopback relay demo");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let real_audio = args.iter().any(|a| a == "--real-audio");
    let mut names = args.iter().filter(|a| !a.starts_with("--"));
    let room = names.next().cloned().unwrap_or_else(|| "demo".to_string());
    let user = names.next().cloned().unwrap_or_else(|| "local".to_string());

    transport::initialize();

    let network = LoopbackNetwork::new(true);
    let synthetic = SyntheticDeviceProvider::new(2, 1, Generation::Pattern { fps: 15 });
    let screens = ScreenCaptureProvider::new(
        Arc::new(SyntheticScreens::new(1, 640, 360)),
        config.capture.screen_fps,
    );
    let (microphones, outputs) = audio_stack(&config, &synthetic, real_audio);
    let devices = DeviceHub::new()
        .with(MediaKind::Camera, Arc::new(synthetic.clone()))
        .with(MediaKind::Microphone, microphones)
        .with(MediaKind::Screen, Arc::new(screens));

    let deps = SessionDeps {
        client: Arc::new(network.clone()),
        credentials: network.credentials(),
        tracks: network.track_factory(),
        devices: Arc::new(devices),
        audio_outputs: outputs,
    };

    let mut ui_loop = UiLoop::new();
    let ui = ui_loop.handle();
    let (bus, events) = EventBus::new();
    let session = MeetingSession::new(config.clone(), deps, ui.clone(), bus);

    let running = Arc::new(AtomicBool::new(true));
    let running_ui = running.clone();
    let ui_thread = thread::Builder::new().name("ui".into()).spawn(move || {
        while running_ui.load(Ordering::Relaxed) {
            ui_loop.run_for(Duration::from_millis(50));
        }
        ui_loop.run_pending();
    })?;

    let _event_log = thread::Builder::new().name("relay-events".into()).spawn(move || {
        for event in events.iter() {
            match &event {
                RelayEvent::CaptureError { .. }
                | RelayEvent::CaptureDegraded { .. }
                | RelayEvent::PlaybackError { .. }
                | RelayEvent::ConnectionFailed { .. } => tracing::warn!(?event, "Relay event"),
                _ => tracing::info!(?event, "Relay event"),
            }
        }
    })?;

    let echo = echo_identity(&user);
    let remote_view = Arc::new(CountingTarget::default());
    let preview = Arc::new(CountingTarget::default());
    {
        let session = session.clone();
        let echo = echo.clone();
        let remote: Arc<dyn RenderTarget> = remote_view.clone();
        let preview: Arc<dyn RenderTarget> = preview.clone();
        let joined = on_ui(&ui, move || {
            session.bind_render_target(&echo, &remote);
            session.set_local_preview(MediaKind::Camera, Some(&preview));
            for kind in MediaKind::ALL {
                if let Err(e) = session.publish(kind) {
                    tracing::warn!(kind = %kind, "Not publishing: {}", e);
                }
            }
            session.join_room(&room, &user)
        })
        .await;
        if let Some(Err(e)) = joined {
            tracing::error!("Failed to join: {}", e);
        }
    }

    tracing::info!("Relaying - press Ctrl+C to stop");

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let session = session.clone();
                let echo = echo.clone();
                let snapshot = on_ui(&ui, move || {
                    (
                        session.connection_state(),
                        session.capture_stats(MediaKind::Camera),
                        session.capture_stats(MediaKind::Microphone),
                        session.playback_stats(&echo, TrackKind::Video),
                        session.playback_stats(&echo, TrackKind::Audio),
                    )
                })
                .await;
                let Some((state, camera, microphone, video, audio)) = snapshot else {
                    continue;
                };
                let snapshot = serde_json::json!({
                    "at": chrono::Local::now().to_rfc3339(),
                    "state": state,
                    "camera": camera,
                    "microphone": microphone,
                    "remote_video": video,
                    "remote_audio": audio,
                    "remote_view_frames": remote_view.frames.load(Ordering::Relaxed),
                    "preview_frames": preview.frames.load(Ordering::Relaxed),
                });
                tracing::info!("Stats: {}", snapshot);
            }
        }
    }

    tracing::info!("Shutting down");
    {
        let session = session.clone();
        on_ui(&ui, move || session.shutdown()).await;
    }
    running.store(false, Ordering::Relaxed);
    let _ = ui_thread.join();
    Ok(())
}
