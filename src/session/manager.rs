//! Device and track lifecycle for one meeting client
//!
//! [`MeetingSession`] owns the capture relays, the playback channels and
//! the room session. Every public method runs on the UI thread; blocking
//! SDK work is pushed to a worker and its result posted back.
//!
//! Leaving a room always runs in this order: disable event routing, stop
//! captures, stop playbacks, clear pending targets, drop publications,
//! disconnect, then replace the track bindings with fresh ones for the next
//! session. Relays are never left pointing at a track from an ended session.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::thread;

use super::router::{EventHandler, EventRouter};
use crate::capture::{CaptureRelay, CaptureState, CaptureStats};
use crate::config::AppConfig;
use crate::dispatch::{EventBus, UiHandle};
use crate::error::{Error, LifecycleError, Result, TransportError};
use crate::media::device::CaptureDeviceProvider;
use crate::media::output::{AudioOutputFactory, RenderTarget};
use crate::playback::{AudioPlayback, PendingTargets, PlaybackChannel, PlaybackStats, VideoPlayback};
use crate::protocol::{ConnectionState, DeviceInfo, MediaKind, RelayEvent, TrackKind};
use crate::transport::{
    self, CredentialProvider, LocalTrack, RemoteTrack, RoomClient, RoomEvent, RoomOptions,
    RoomSession, TrackFactory, TrackPublication,
};

/// External collaborators of a meeting session
#[derive(Clone)]
pub struct SessionDeps {
    pub client: Arc<dyn RoomClient>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub tracks: Arc<dyn TrackFactory>,
    pub devices: Arc<dyn CaptureDeviceProvider>,
    pub audio_outputs: Arc<dyn AudioOutputFactory>,
}

type PlaybackKey = (String, TrackKind);

struct Inner {
    config: AppConfig,
    deps: SessionDeps,
    ui: UiHandle,
    events: EventBus,

    state: ConnectionState,
    /// Bumped on every leave; tracks are created for one generation
    generation: u64,
    /// Bumped on every join and leave; stale connect results are discarded
    attempt: u64,
    room_name: String,
    user_name: String,
    room: Option<Arc<dyn RoomSession>>,
    router: Option<EventRouter>,

    captures: HashMap<MediaKind, CaptureRelay>,
    bindings: HashMap<MediaKind, LocalTrack>,
    publications: HashMap<MediaKind, Arc<dyn TrackPublication>>,
    /// Kinds the user wants published; survives leave/join
    armed: HashSet<MediaKind>,

    playbacks: HashMap<PlaybackKey, PlaybackChannel>,
    pending_targets: PendingTargets,
    remote_volume: f32,
}

impl Inner {
    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        tracing::info!(from = ?self.state, to = ?state, "Connection state changed");
        self.state = state;
        self.events.emit(RelayEvent::ConnectionStateChanged { state });
    }

    fn create_bindings(&mut self) {
        for kind in MediaKind::ALL {
            match self.deps.tracks.create_track(kind, self.generation) {
                Ok(track) => {
                    if let Some(relay) = self.captures.get(&kind) {
                        relay.bind(Some(track.sink.clone()));
                    }
                    self.bindings.insert(kind, track);
                }
                Err(e) => {
                    tracing::error!(kind = %kind, "Failed to create local track: {}", e);
                }
            }
        }
        tracing::debug!(generation = self.generation, "Track bindings created");
    }

    fn teardown(&mut self, reason: &str) {
        tracing::info!(reason, room = %self.room_name, "Leaving room");

        if let Some(mut router) = self.router.take() {
            router.stop();
        }
        for relay in self.captures.values_mut() {
            relay.stop();
        }
        for (_, mut channel) in self.playbacks.drain() {
            channel.stop();
        }
        self.pending_targets.clear();
        self.publications.clear();
        if let Some(room) = self.room.take() {
            room.disconnect();
        }

        for relay in self.captures.values() {
            relay.bind(None);
        }
        self.bindings.clear();
        self.generation += 1;
        self.create_bindings();

        self.attempt += 1;
        self.set_state(ConnectionState::Disconnected);
    }

    fn publish(&mut self, kind: MediaKind) -> Result<()> {
        let relay = self
            .captures
            .get_mut(&kind)
            .ok_or(LifecycleError::NoTrack(kind))?;
        relay.set_enabled(true);
        if !relay.is_running() {
            relay.start()?;
        }
        self.armed.insert(kind);

        let Some(room) = self.room.clone() else {
            tracing::debug!(kind = %kind, "Not connected, track will publish on join");
            return Ok(());
        };

        if let Some(publication) = self.publications.get(&kind) {
            publication.set_muted(false);
        } else {
            let track = self
                .bindings
                .get(&kind)
                .ok_or(LifecycleError::NoTrack(kind))?;
            let publication = room.local_participant().publish_track(track)?;
            tracing::info!(
                kind = %kind,
                sid = %publication.sid(),
                generation = track.generation,
                "Track published"
            );
            self.publications.insert(kind, publication);
        }
        self.events.emit(RelayEvent::PublishChanged {
            kind,
            published: true,
            muted: false,
        });
        Ok(())
    }

    fn unpublish(&mut self, kind: MediaKind) {
        self.armed.remove(&kind);
        if let Some(relay) = self.captures.get_mut(&kind) {
            relay.set_enabled(false);
            if kind == MediaKind::Screen {
                relay.stop();
            }
        }
        if let Some(publication) = self.publications.get(&kind) {
            publication.set_muted(true);
            tracing::info!(kind = %kind, "Track muted");
            self.events.emit(RelayEvent::PublishChanged {
                kind,
                published: true,
                muted: true,
            });
        }
    }

    fn subscribe(&mut self, identity: String, track: Arc<dyn RemoteTrack>) {
        let kind = track.kind();
        let key = (identity.clone(), kind);
        if let Some(mut previous) = self.playbacks.remove(&key) {
            tracing::debug!(identity = %identity, kind = %kind, "Replacing playback channel");
            previous.stop();
        }

        let started = match kind {
            TrackKind::Video => {
                let mut playback = VideoPlayback::new(
                    &identity,
                    track.sid(),
                    self.config.playback.video_stream_capacity,
                    self.ui.clone(),
                    self.events.clone(),
                );
                if let Some(target) = self.pending_targets.take(&identity) {
                    playback.set_render_target(Some(&target));
                }
                playback
                    .start(track.as_ref())
                    .map(|()| PlaybackChannel::Video(playback))
            }
            TrackKind::Audio => {
                let mut playback = AudioPlayback::new(
                    &identity,
                    track.sid(),
                    self.config.playback.audio_stream_capacity,
                    self.deps.audio_outputs.clone(),
                    self.ui.clone(),
                    self.events.clone(),
                );
                playback.set_volume(self.remote_volume);
                playback
                    .start(track.as_ref())
                    .map(|()| PlaybackChannel::Audio(playback))
            }
        };

        match started {
            Ok(channel) => {
                self.playbacks.insert(key, channel);
                self.events
                    .emit(RelayEvent::PlaybackStarted { identity, kind });
            }
            Err(e) => {
                tracing::warn!(identity = %identity, kind = %kind, "Playback not started: {}", e);
            }
        }
    }

    fn unsubscribe(&mut self, identity: String, sid: &str, kind: TrackKind) {
        let key = (identity, kind);
        let matches = self
            .playbacks
            .get(&key)
            .map(|channel| channel.sid() == sid)
            .unwrap_or(false);
        if matches {
            if let Some(mut channel) = self.playbacks.remove(&key) {
                channel.stop();
            }
        }
    }

    fn participant_left(&mut self, identity: &str) {
        let keys: Vec<PlaybackKey> = self
            .playbacks
            .keys()
            .filter(|(id, _)| id == identity)
            .cloned()
            .collect();
        for key in keys {
            if let Some(mut channel) = self.playbacks.remove(&key) {
                channel.stop();
            }
        }
        self.pending_targets.remove(identity);
        self.events.emit(RelayEvent::ParticipantLeft {
            identity: identity.to_string(),
        });
    }

    fn remote_muted(&mut self, identity: String, sid: String, muted: bool) {
        if let Some(PlaybackChannel::Audio(playback)) =
            self.playbacks.get(&(identity.clone(), TrackKind::Audio))
        {
            if playback.sid() == sid {
                playback.set_muted(muted);
            }
        }
        self.events
            .emit(RelayEvent::TrackMuted { identity, sid, muted });
    }

    /// Stop everything without preparing a next session
    fn shutdown(&mut self) {
        if let Some(mut router) = self.router.take() {
            router.stop();
        }
        for relay in self.captures.values_mut() {
            relay.stop();
        }
        for (_, mut channel) in self.playbacks.drain() {
            channel.stop();
        }
        self.pending_targets.clear();
        self.publications.clear();
        if let Some(room) = self.room.take() {
            room.disconnect();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to the meeting client's media core. Clones share state.
#[derive(Clone)]
pub struct MeetingSession {
    inner: Arc<Mutex<Inner>>,
}

impl MeetingSession {
    pub fn new(config: AppConfig, deps: SessionDeps, ui: UiHandle, events: EventBus) -> Self {
        if !transport::is_initialized() {
            tracing::warn!("Transport library not initialized; call transport::initialize() at startup");
        }

        let captures = MediaKind::ALL
            .into_iter()
            .map(|kind| {
                let relay = CaptureRelay::new(
                    kind,
                    deps.devices.clone(),
                    &config.capture,
                    ui.clone(),
                    events.clone(),
                );
                (kind, relay)
            })
            .collect();

        let remote_volume = config.playback.initial_volume.clamp(0.0, 1.0);
        let mut inner = Inner {
            config,
            deps,
            ui,
            events,
            state: ConnectionState::Disconnected,
            generation: 0,
            attempt: 0,
            room_name: String::new(),
            user_name: String::new(),
            room: None,
            router: None,
            captures,
            bindings: HashMap::new(),
            publications: HashMap::new(),
            armed: HashSet::new(),
            playbacks: HashMap::new(),
            pending_targets: PendingTargets::new(),
            remote_volume,
        };
        inner.create_bindings();

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn downgrade(&self) -> Weak<Mutex<Inner>> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<Mutex<Inner>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Join `room` as `user`. When already connected the current room is
    /// left first and the join follows after the rejoin delay.
    pub fn join_room(&self, room: &str, user: &str) -> std::result::Result<(), LifecycleError> {
        let (room, user) = (room.trim(), user.trim());
        if room.is_empty() || user.is_empty() {
            return Err(LifecycleError::InvalidRoom);
        }

        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Connecting {
            return Err(LifecycleError::AlreadyConnecting);
        }

        let rejoin = inner.room.is_some();
        if rejoin {
            inner.teardown("rejoin");
        }
        inner.attempt += 1;
        let attempt = inner.attempt;
        inner.room_name = room.to_string();
        inner.user_name = user.to_string();
        inner.set_state(ConnectionState::Connecting);

        if rejoin {
            let delay = inner.config.session.rejoin_delay();
            let weak = self.downgrade();
            tracing::info!(?delay, room, "Rejoining after delay");
            inner.ui.post_delayed(delay, move || {
                if let Some(session) = Self::upgrade(&weak) {
                    session.begin_connect(attempt);
                }
            });
        } else {
            drop(inner);
            self.begin_connect(attempt);
        }
        Ok(())
    }

    fn begin_connect(&self, attempt: u64) {
        let inner = self.inner.lock();
        if inner.attempt != attempt || inner.state != ConnectionState::Connecting {
            return;
        }
        let client = inner.deps.client.clone();
        let credentials = inner.deps.credentials.clone();
        let url = inner.config.session.server_url.clone();
        let options = RoomOptions {
            auto_subscribe: inner.config.session.auto_subscribe,
            dynacast: inner.config.session.dynacast,
        };
        let room = inner.room_name.clone();
        let user = inner.user_name.clone();
        let ui = inner.ui.clone();
        drop(inner);

        let weak = self.downgrade();
        tracing::info!(room = %room, user = %user, "Connecting");
        let spawned = thread::Builder::new()
            .name("room-connect".into())
            .spawn(move || {
                let result = credentials
                    .request(&room, &user)
                    .and_then(|token| client.connect(&url, &token, options));
                ui.post(move || {
                    if let Some(session) = Self::upgrade(&weak) {
                        session.finish_connect(attempt, result);
                    }
                });
            });

        if let Err(e) = spawned {
            self.finish_connect(attempt, Err(TransportError::ConnectFailed(e.to_string())));
        }
    }

    fn finish_connect(
        &self,
        attempt: u64,
        result: std::result::Result<Arc<dyn RoomSession>, TransportError>,
    ) {
        let mut inner = self.inner.lock();
        if inner.attempt != attempt {
            if let Ok(stale) = result {
                tracing::debug!("Discarding connection from an abandoned join");
                stale.disconnect();
            }
            return;
        }
        match result {
            Ok(room) => {
                drop(inner);
                self.on_room_connected(room);
            }
            Err(e) => {
                tracing::error!(room = %inner.room_name, "Failed to join room: {}", e);
                inner.set_state(ConnectionState::Disconnected);
                inner.events.emit(RelayEvent::ConnectionFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Adopt a connected room session: route its events, publish armed
    /// tracks and report participants already present.
    pub fn on_room_connected(&self, room: Arc<dyn RoomSession>) {
        let mut inner = self.inner.lock();
        if inner.room.is_some() {
            inner.teardown("replaced by new session");
        }

        let weak = self.downgrade();
        let handler: EventHandler = Arc::new(move |event| {
            if let Some(session) = Self::upgrade(&weak) {
                session.handle_room_event(event);
            }
        });
        match EventRouter::spawn(room.events(), inner.ui.clone(), handler) {
            Ok(router) => inner.router = Some(router),
            Err(e) => tracing::error!("Failed to start room event router: {}", e),
        }

        inner.room = Some(room.clone());
        inner.set_state(ConnectionState::Connected);
        tracing::info!(
            room = %inner.room_name,
            identity = %room.local_participant().identity(),
            generation = inner.generation,
            "Joined room"
        );

        for participant in room.remote_participants() {
            inner.events.emit(RelayEvent::ParticipantJoined {
                identity: participant.identity,
                name: participant.name,
            });
        }

        for kind in MediaKind::ALL {
            if inner.armed.contains(&kind) {
                if let Err(e) = inner.publish(kind) {
                    tracing::error!(kind = %kind, "Failed to publish armed track: {}", e);
                    inner.armed.remove(&kind);
                    inner.events.emit(RelayEvent::CaptureError {
                        kind,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Leave the current room, if any
    pub fn leave_room(&self) {
        let mut inner = self.inner.lock();
        if inner.room.is_none() && inner.state == ConnectionState::Disconnected {
            return;
        }
        inner.teardown("leave requested");
    }

    pub fn on_room_disconnecting(&self) {
        self.leave_room();
    }

    /// Apply one room event. Called on the UI thread by the event router.
    pub fn handle_room_event(&self, event: RoomEvent) {
        let mut inner = self.inner.lock();
        if inner.room.is_none() {
            tracing::debug!(event = event.name(), "Ignoring room event outside a session");
            return;
        }

        match event {
            RoomEvent::ParticipantConnected { identity, name } => {
                tracing::info!(identity = %identity, "Participant joined");
                inner
                    .events
                    .emit(RelayEvent::ParticipantJoined { identity, name });
            }
            RoomEvent::ParticipantDisconnected { identity } => {
                tracing::info!(identity = %identity, "Participant left");
                inner.participant_left(&identity);
            }
            RoomEvent::TrackSubscribed { identity, track } => {
                tracing::info!(identity = %identity, kind = %track.kind(), sid = %track.sid(), "Track subscribed");
                inner.subscribe(identity, track);
            }
            RoomEvent::TrackUnsubscribed { identity, sid, kind } => {
                tracing::info!(identity = %identity, kind = %kind, "Track unsubscribed");
                inner.unsubscribe(identity, &sid, kind);
            }
            RoomEvent::TrackMuted { identity, sid } => inner.remote_muted(identity, sid, true),
            RoomEvent::TrackUnmuted { identity, sid } => inner.remote_muted(identity, sid, false),
            RoomEvent::Reconnecting => inner.set_state(ConnectionState::Reconnecting),
            RoomEvent::Reconnected => inner.set_state(ConnectionState::Connected),
            RoomEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Disconnected by server");
                inner.teardown(&reason);
            }
            RoomEvent::DataReceived { identity, payload } => {
                inner.events.emit(RelayEvent::DataReceived {
                    identity,
                    len: payload.len(),
                });
            }
        }
    }

    /// Publish `kind`, starting its capture if needed. The first call
    /// publishes; later calls only unmute.
    pub fn publish(&self, kind: MediaKind) -> Result<()> {
        self.inner.lock().publish(kind)
    }

    /// Mute `kind`. The track stays published. Screen capture also stops.
    pub fn unpublish(&self, kind: MediaKind) {
        self.inner.lock().unpublish(kind);
    }

    /// Flip publishing of `kind`, returning whether it is now published
    pub fn toggle_publish(&self, kind: MediaKind) -> Result<bool> {
        if self.is_publishing(kind) {
            self.unpublish(kind);
            Ok(false)
        } else {
            self.publish(kind)?;
            Ok(true)
        }
    }

    pub fn is_publishing(&self, kind: MediaKind) -> bool {
        self.inner.lock().armed.contains(&kind)
    }

    pub fn is_published(&self, kind: MediaKind) -> bool {
        self.inner.lock().publications.contains_key(&kind)
    }

    pub fn start_capture(&self, kind: MediaKind) -> Result<()> {
        let mut inner = self.inner.lock();
        let relay = inner
            .captures
            .get_mut(&kind)
            .ok_or(LifecycleError::NoTrack(kind))?;
        relay.start().map_err(Error::from)
    }

    pub fn stop_capture(&self, kind: MediaKind) {
        if let Some(relay) = self.inner.lock().captures.get_mut(&kind) {
            relay.stop();
        }
    }

    pub fn set_capture_enabled(&self, kind: MediaKind, enabled: bool) {
        if let Some(relay) = self.inner.lock().captures.get(&kind) {
            relay.set_enabled(enabled);
        }
    }

    pub fn select_capture_device(&self, kind: MediaKind, index: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        let relay = inner
            .captures
            .get_mut(&kind)
            .ok_or(LifecycleError::NoTrack(kind))?;
        relay.select_device(index).map_err(Error::from)
    }

    pub fn capture_devices(&self, kind: MediaKind) -> Vec<DeviceInfo> {
        self.inner.lock().deps.devices.devices(kind)
    }

    pub fn capture_state(&self, kind: MediaKind) -> CaptureState {
        self.inner
            .lock()
            .captures
            .get(&kind)
            .map(|relay| relay.state())
            .unwrap_or(CaptureState::Stopped)
    }

    pub fn capture_stats(&self, kind: MediaKind) -> CaptureStats {
        self.inner
            .lock()
            .captures
            .get(&kind)
            .map(|relay| relay.stats())
            .unwrap_or_default()
    }

    /// Device the capture of `kind` currently holds open
    pub fn capture_device(&self, kind: MediaKind) -> Option<DeviceInfo> {
        self.inner
            .lock()
            .captures
            .get(&kind)
            .and_then(|relay| relay.current_device().cloned())
    }

    pub fn set_local_preview(&self, kind: MediaKind, target: Option<&Arc<dyn RenderTarget>>) {
        if let Some(relay) = self.inner.lock().captures.get(&kind) {
            relay.set_preview(target);
        }
    }

    /// Render `identity`'s video into `target`, now or as soon as it arrives
    pub fn bind_render_target(&self, identity: &str, target: &Arc<dyn RenderTarget>) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner
            .playbacks
            .get(&(identity.to_string(), TrackKind::Video))
        {
            Some(PlaybackChannel::Video(playback)) => playback.set_render_target(Some(target)),
            _ => {
                tracing::debug!(identity, "Render target pending until video arrives");
                inner.pending_targets.insert(identity, target);
            }
        }
    }

    pub fn unbind_render_target(&self, identity: &str) {
        let mut inner = self.inner.lock();
        if let Some(PlaybackChannel::Video(playback)) = inner
            .playbacks
            .get(&(identity.to_string(), TrackKind::Video))
        {
            playback.set_render_target(None);
        }
        inner.pending_targets.remove(identity);
        inner.events.emit(RelayEvent::RenderTargetRemoved {
            identity: identity.to_string(),
        });
    }

    /// Volume for every remote audio track, current and future
    pub fn set_remote_volume(&self, volume: f32) {
        let mut inner = self.inner.lock();
        inner.remote_volume = volume.clamp(0.0, 1.0);
        let volume = inner.remote_volume;
        for channel in inner.playbacks.values() {
            if let PlaybackChannel::Audio(playback) = channel {
                playback.set_volume(volume);
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Generation of the current track bindings
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Generation of the track bound to the capture of `kind`
    pub fn binding_generation(&self, kind: MediaKind) -> Option<u64> {
        self.inner
            .lock()
            .bindings
            .get(&kind)
            .map(|track| track.generation)
    }

    pub fn playbacks(&self) -> Vec<(String, TrackKind)> {
        let mut keys: Vec<_> = self.inner.lock().playbacks.keys().cloned().collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0).then((a.1 as u8).cmp(&(b.1 as u8))));
        keys
    }

    pub fn playback_stats(&self, identity: &str, kind: TrackKind) -> Option<PlaybackStats> {
        self.inner
            .lock()
            .playbacks
            .get(&(identity.to_string(), kind))
            .map(|channel| channel.stats())
    }

    pub fn pending_target_count(&self) -> usize {
        self.inner.lock().pending_targets.len()
    }

    /// Leave the room and stop every device
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown();
        inner.set_state(ConnectionState::Disconnected);
    }
}
