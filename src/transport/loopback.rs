//! In-process transport
//!
//! A room server living in the same process. Published local tracks become
//! remote tracks for every other member of the room, and with echo enabled
//! also for the publisher itself under a mirrored identity. Streams are
//! bounded crossbeam channels, closed by dropping a signal sender.

use bytes::Bytes;
use crossbeam_channel::{bounded, select, unbounded, Receiver, SendTimeoutError, Sender, TrySendError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

use super::{
    AudioTrackSink, CredentialProvider, FrameStream, LocalParticipant, LocalTrack,
    RemoteParticipant, RemoteTrack, RoomClient, RoomEvent, RoomOptions, RoomSession,
    TrackFactory, TrackPublication, TrackSink, VideoTrackSink,
};
use crate::error::TransportError;
use crate::media::frame::{AudioFrame, VideoFrame};
use crate::protocol::{MediaKind, TrackKind};

/// Retired tracks kept alive for inspection after their session ended
pub const RETIRED_HISTORY: usize = 32;

fn new_sid(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Identity under which a member sees its own echoed tracks
pub fn echo_identity(identity: &str) -> String {
    format!("{}-echo", identity)
}

struct LoopbackStream<F> {
    frames: Receiver<F>,
    closed: AtomicBool,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
}

impl<F> LoopbackStream<F> {
    fn new(frames: Receiver<F>) -> Self {
        let (close_tx, close_rx) = bounded(0);
        Self {
            frames,
            closed: AtomicBool::new(false),
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
        }
    }
}

impl<F: Send> FrameStream<F> for LoopbackStream<F> {
    fn read(&self) -> Option<F> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        select! {
            recv(self.frames) -> frame => frame.ok(),
            recv(self.close_rx) -> _ => None,
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_tx.lock().take();
    }
}

/// Remote side of a published track
pub struct LoopbackRemoteTrack {
    sid: String,
    kind: TrackKind,
    video_subscribers: Mutex<Vec<Sender<VideoFrame>>>,
    audio_subscribers: Mutex<Vec<Sender<AudioFrame>>>,
    ended: AtomicBool,
    overflowed: AtomicU64,
}

impl LoopbackRemoteTrack {
    pub fn new(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            sid: new_sid("TR"),
            kind,
            video_subscribers: Mutex::new(Vec::new()),
            audio_subscribers: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
            overflowed: AtomicU64::new(0),
        })
    }

    /// Fan a video frame out to every open stream. Full streams drop it.
    pub fn push_video(&self, frame: &VideoFrame) {
        self.video_subscribers
            .lock()
            .retain(|tx| match tx.try_send(frame.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.overflowed.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    /// Fan an audio frame out, waiting at most `timeout` per stream
    pub fn push_audio(&self, frame: &AudioFrame, timeout: Duration) -> Result<(), TransportError> {
        let mut result = Ok(());
        self.audio_subscribers
            .lock()
            .retain(|tx| match tx.send_timeout(frame.clone(), timeout) {
                Ok(()) => true,
                Err(SendTimeoutError::Timeout(_)) => {
                    self.overflowed.fetch_add(1, Ordering::Relaxed);
                    result = Err(TransportError::Timeout(timeout));
                    true
                }
                Err(SendTimeoutError::Disconnected(_)) => false,
            });
        result
    }

    /// End the track. Open streams drain and then report end of stream.
    pub fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.video_subscribers.lock().clear();
        self.audio_subscribers.lock().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.video_subscribers.lock().len() + self.audio_subscribers.lock().len()
    }

    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    fn check_open(&self, kind: TrackKind) -> Result<(), TransportError> {
        if self.kind != kind {
            return Err(TransportError::StreamOpen(format!(
                "{} is a {} track",
                self.sid, self.kind
            )));
        }
        if self.ended.load(Ordering::SeqCst) {
            return Err(TransportError::StreamOpen(format!("{} has ended", self.sid)));
        }
        Ok(())
    }
}

impl RemoteTrack for LoopbackRemoteTrack {
    fn sid(&self) -> String {
        self.sid.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn open_video_stream(
        &self,
        capacity: usize,
    ) -> Result<Arc<dyn FrameStream<VideoFrame>>, TransportError> {
        self.check_open(TrackKind::Video)?;
        let (tx, rx) = bounded(capacity.max(1));
        self.video_subscribers.lock().push(tx);
        Ok(Arc::new(LoopbackStream::new(rx)))
    }

    fn open_audio_stream(
        &self,
        capacity: usize,
    ) -> Result<Arc<dyn FrameStream<AudioFrame>>, TransportError> {
        self.check_open(TrackKind::Audio)?;
        let (tx, rx) = bounded(capacity.max(1));
        self.audio_subscribers.lock().push(tx);
        Ok(Arc::new(LoopbackStream::new(rx)))
    }
}

struct LocalTrackState {
    id: Uuid,
    source: MediaKind,
    generation: u64,
    frames: AtomicU64,
    stale_frames: AtomicU64,
    reject_next: AtomicU64,
    retired: AtomicBool,
    muted: AtomicBool,
    remote: Mutex<Option<Arc<LoopbackRemoteTrack>>>,
}

impl LocalTrackState {
    fn admit(&self) -> Result<Option<Arc<LoopbackRemoteTrack>>, TransportError> {
        if self.retired.load(Ordering::SeqCst) {
            self.stale_frames.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Closed);
        }
        let rejected = self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(TransportError::Rejected("backpressure".into()));
        }
        self.frames.fetch_add(1, Ordering::Relaxed);
        if self.muted.load(Ordering::Relaxed) {
            return Ok(None);
        }
        Ok(self.remote.lock().clone())
    }
}

struct LoopbackSink(Arc<LocalTrackState>);

impl VideoTrackSink for LoopbackSink {
    fn capture_frame(&self, frame: &VideoFrame) -> Result<(), TransportError> {
        if let Some(remote) = self.0.admit()? {
            remote.push_video(frame);
        }
        Ok(())
    }
}

impl AudioTrackSink for LoopbackSink {
    fn capture_frame(&self, frame: &AudioFrame, timeout: Duration) -> Result<(), TransportError> {
        match self.0.admit()? {
            Some(remote) => remote.push_audio(frame, timeout),
            None => Ok(()),
        }
    }
}

/// Inspection handle for a local track created by the loopback network
#[derive(Clone)]
pub struct LoopbackTrackHandle(Arc<LocalTrackState>);

impl LoopbackTrackHandle {
    pub fn id(&self) -> Uuid {
        self.0.id
    }

    pub fn source(&self) -> MediaKind {
        self.0.source
    }

    pub fn generation(&self) -> u64 {
        self.0.generation
    }

    /// Frames accepted while the track was live
    pub fn frames(&self) -> u64 {
        self.0.frames.load(Ordering::Relaxed)
    }

    /// Frames offered after the track's session ended
    pub fn stale_frames(&self) -> u64 {
        self.0.stale_frames.load(Ordering::Relaxed)
    }

    pub fn is_retired(&self) -> bool {
        self.0.retired.load(Ordering::SeqCst)
    }

    pub fn is_published(&self) -> bool {
        self.0.remote.lock().is_some()
    }

    /// Reject the next `count` frames as if the track were congested
    pub fn reject_next(&self, count: u64) {
        self.0.reject_next.store(count, Ordering::SeqCst);
    }
}

struct Published {
    track: Arc<LocalTrackState>,
    remote: Arc<LoopbackRemoteTrack>,
}

struct Member {
    identity: String,
    room: String,
    options: RoomOptions,
    events_tx: Sender<RoomEvent>,
    events_rx: Receiver<RoomEvent>,
    published: Mutex<Vec<Published>>,
    connected: AtomicBool,
}

impl Member {
    fn notify(&self, event: RoomEvent) {
        let _ = self.events_tx.send(event);
    }
}

struct NetworkInner {
    rooms: DashMap<String, Vec<Arc<Member>>>,
    /// Every track still alive somewhere, by id
    tracks: DashMap<Uuid, Weak<LocalTrackState>>,
    retired: Mutex<VecDeque<Arc<LocalTrackState>>>,
    echo: bool,
    reachable: AtomicBool,
    connect_delay: Mutex<Duration>,
}

impl NetworkInner {
    fn members(&self, room: &str) -> Vec<Arc<Member>> {
        self.rooms
            .get(room)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    /// Deliver an event about `publisher`'s tracks to every subscriber,
    /// including the publisher's own echo.
    fn broadcast_from<F>(&self, publisher: &Member, make: F)
    where
        F: Fn(&str) -> RoomEvent,
    {
        for member in self.members(&publisher.room) {
            if member.identity != publisher.identity && member.options.auto_subscribe {
                member.notify(make(&publisher.identity));
            }
        }
        if self.echo {
            publisher.notify(make(&echo_identity(&publisher.identity)));
        }
    }

    fn keep_retired(&self, track: Arc<LocalTrackState>) {
        let mut retired = self.retired.lock();
        retired.push_back(track);
        while retired.len() > RETIRED_HISTORY {
            retired.pop_front();
        }
    }

    fn leave(&self, member: &Arc<Member>) {
        if !member.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(mut members) = self.rooms.get_mut(&member.room) {
            members.retain(|m| !Arc::ptr_eq(m, member));
        }

        let published: Vec<Published> = member.published.lock().drain(..).collect();
        for entry in &published {
            entry.track.retired.store(true, Ordering::SeqCst);
            self.keep_retired(entry.track.clone());
            entry.track.remote.lock().take();
            entry.remote.end();
            let sid = entry.remote.sid.clone();
            let kind = entry.remote.kind;
            for other in self.members(&member.room) {
                other.notify(RoomEvent::TrackUnsubscribed {
                    identity: member.identity.clone(),
                    sid: sid.clone(),
                    kind,
                });
            }
        }
        for other in self.members(&member.room) {
            other.notify(RoomEvent::ParticipantDisconnected {
                identity: member.identity.clone(),
            });
        }
        tracing::debug!(identity = %member.identity, room = %member.room, "Loopback member left");
    }
}

/// The in-process room server. Also acts as the room client.
#[derive(Clone)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl LoopbackNetwork {
    /// `echo` mirrors each member's published tracks back to it
    pub fn new(echo: bool) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                rooms: DashMap::new(),
                tracks: DashMap::new(),
                retired: Mutex::new(VecDeque::new()),
                echo,
                reachable: AtomicBool::new(true),
                connect_delay: Mutex::new(Duration::ZERO),
            }),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make `connect` take at least `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.inner.connect_delay.lock() = delay;
    }

    pub fn track_factory(&self) -> Arc<dyn TrackFactory> {
        Arc::new(LoopbackTrackFactory {
            network: self.inner.clone(),
        })
    }

    pub fn credentials(&self) -> Arc<dyn CredentialProvider> {
        Arc::new(LoopbackCredentials { failure: None })
    }

    /// Local tracks still held by a client, plus the most recently retired
    /// ones, oldest generation first
    pub fn tracks(&self) -> Vec<LoopbackTrackHandle> {
        let mut tracks: Vec<_> = self
            .inner
            .tracks
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .map(LoopbackTrackHandle)
            .collect();
        tracks.sort_by_key(|t| t.generation());
        tracks
    }

    /// Identities currently in `room`
    pub fn members(&self, room: &str) -> Vec<String> {
        self.inner
            .members(room)
            .iter()
            .map(|m| m.identity.clone())
            .collect()
    }

    /// Drop `identity` from `room` as if the server ended its session
    pub fn kick(&self, room: &str, identity: &str, reason: &str) -> bool {
        let member = self
            .inner
            .members(room)
            .into_iter()
            .find(|m| m.identity == identity);
        match member {
            Some(member) => {
                self.inner.leave(&member);
                member.notify(RoomEvent::Disconnected {
                    reason: reason.to_string(),
                });
                true
            }
            None => false,
        }
    }

    /// Send a data packet from `from` to everyone else in `room`
    pub fn send_data(&self, room: &str, from: &str, payload: Bytes) {
        for member in self.inner.members(room) {
            if member.identity != from {
                member.notify(RoomEvent::DataReceived {
                    identity: from.to_string(),
                    payload: payload.clone(),
                });
            }
        }
    }
}

impl RoomClient for LoopbackNetwork {
    fn connect(
        &self,
        url: &str,
        token: &str,
        options: RoomOptions,
    ) -> Result<Arc<dyn RoomSession>, TransportError> {
        let delay = *self.inner.connect_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed(format!("{} unreachable", url)));
        }
        let (room, identity) = token
            .split_once(':')
            .filter(|(room, user)| !room.is_empty() && !user.is_empty())
            .ok_or_else(|| TransportError::ConnectFailed("invalid token".into()))?;

        let (events_tx, events_rx) = unbounded();
        let member = Arc::new(Member {
            identity: identity.to_string(),
            room: room.to_string(),
            options,
            events_tx,
            events_rx,
            published: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        });

        for other in self.inner.members(room) {
            other.notify(RoomEvent::ParticipantConnected {
                identity: member.identity.clone(),
                name: member.identity.clone(),
            });
            if options.auto_subscribe {
                for entry in other.published.lock().iter() {
                    member.notify(RoomEvent::TrackSubscribed {
                        identity: other.identity.clone(),
                        track: entry.remote.clone(),
                    });
                }
            }
        }
        self.inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .push(member.clone());

        tracing::debug!(identity, room, "Loopback member joined");
        Ok(Arc::new(LoopbackSession {
            member,
            network: self.inner.clone(),
        }))
    }
}

struct LoopbackSession {
    member: Arc<Member>,
    network: Arc<NetworkInner>,
}

impl RoomSession for LoopbackSession {
    fn local_participant(&self) -> Arc<dyn LocalParticipant> {
        Arc::new(LoopbackParticipant {
            member: self.member.clone(),
            network: Arc::downgrade(&self.network),
        })
    }

    fn remote_participants(&self) -> Vec<RemoteParticipant> {
        self.network
            .members(&self.member.room)
            .iter()
            .filter(|m| m.identity != self.member.identity)
            .map(|m| RemoteParticipant {
                identity: m.identity.clone(),
                name: m.identity.clone(),
            })
            .collect()
    }

    fn events(&self) -> Receiver<RoomEvent> {
        self.member.events_rx.clone()
    }

    fn disconnect(&self) {
        self.network.leave(&self.member);
    }
}

struct LoopbackParticipant {
    member: Arc<Member>,
    network: Weak<NetworkInner>,
}

impl LocalParticipant for LoopbackParticipant {
    fn identity(&self) -> String {
        self.member.identity.clone()
    }

    fn publish_track(&self, track: &LocalTrack) -> Result<Arc<dyn TrackPublication>, TransportError> {
        let network = self
            .network
            .upgrade()
            .ok_or_else(|| TransportError::PublishFailed("network gone".into()))?;
        if !self.member.connected.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed("not connected".into()));
        }
        let state = network
            .tracks
            .get(&track.id)
            .and_then(|entry| entry.value().upgrade())
            .ok_or_else(|| TransportError::PublishFailed(format!("unknown track {}", track.name)))?;
        if state.retired.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed(format!("{} is retired", track.name)));
        }

        let remote = LoopbackRemoteTrack::new(track.sink.kind());
        *state.remote.lock() = Some(remote.clone());
        let first = {
            let mut published = self.member.published.lock();
            published.push(Published {
                track: state.clone(),
                remote: remote.clone(),
            });
            published.len() == 1
        };

        if first && network.echo {
            self.member.notify(RoomEvent::ParticipantConnected {
                identity: echo_identity(&self.member.identity),
                name: format!("{} (echo)", self.member.identity),
            });
        }
        network.broadcast_from(&self.member, |identity| RoomEvent::TrackSubscribed {
            identity: identity.to_string(),
            track: remote.clone(),
        });

        Ok(Arc::new(LoopbackPublication {
            sid: remote.sid.clone(),
            state,
            member: self.member.clone(),
            network: self.network.clone(),
        }))
    }
}

struct LoopbackPublication {
    sid: String,
    state: Arc<LocalTrackState>,
    member: Arc<Member>,
    network: Weak<NetworkInner>,
}

impl TrackPublication for LoopbackPublication {
    fn sid(&self) -> String {
        self.sid.clone()
    }

    fn set_muted(&self, muted: bool) {
        if self.state.muted.swap(muted, Ordering::SeqCst) == muted {
            return;
        }
        let Some(network) = self.network.upgrade() else {
            return;
        };
        network.broadcast_from(&self.member, |identity| {
            let identity = identity.to_string();
            let sid = self.sid.clone();
            if muted {
                RoomEvent::TrackMuted { identity, sid }
            } else {
                RoomEvent::TrackUnmuted { identity, sid }
            }
        });
    }

    fn is_muted(&self) -> bool {
        self.state.muted.load(Ordering::SeqCst)
    }
}

struct LoopbackTrackFactory {
    network: Arc<NetworkInner>,
}

impl TrackFactory for LoopbackTrackFactory {
    fn create_track(&self, source: MediaKind, generation: u64) -> Result<LocalTrack, TransportError> {
        let state = Arc::new(LocalTrackState {
            id: Uuid::new_v4(),
            source,
            generation,
            frames: AtomicU64::new(0),
            stale_frames: AtomicU64::new(0),
            reject_next: AtomicU64::new(0),
            retired: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            remote: Mutex::new(None),
        });
        self.network.tracks.retain(|_, track| track.strong_count() > 0);
        self.network.tracks.insert(state.id, Arc::downgrade(&state));

        let sink = match source.track_kind() {
            TrackKind::Video => TrackSink::Video(Arc::new(LoopbackSink(state.clone()))),
            TrackKind::Audio => TrackSink::Audio(Arc::new(LoopbackSink(state.clone()))),
        };
        Ok(LocalTrack {
            id: state.id,
            name: source.track_name().to_string(),
            source,
            sink,
            generation,
        })
    }
}

/// Issues `room:user` tokens understood by [`LoopbackNetwork`]
pub struct LoopbackCredentials {
    failure: Option<String>,
}

impl LoopbackCredentials {
    /// Credentials service that always refuses with `reason`
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
        }
    }
}

impl CredentialProvider for LoopbackCredentials {
    fn request(&self, room: &str, user: &str) -> Result<String, TransportError> {
        match &self.failure {
            Some(reason) => Err(TransportError::Credential(reason.clone())),
            None => Ok(format!("{}:{}", room, user)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn connect(network: &LoopbackNetwork, room: &str, user: &str) -> Arc<dyn RoomSession> {
        let token = network.credentials().request(room, user).unwrap();
        network
            .connect("loopback://", &token, RoomOptions::default())
            .unwrap()
    }

    fn subscribed_track(events: &Receiver<RoomEvent>) -> (String, Arc<dyn RemoteTrack>) {
        loop {
            match events.recv_timeout(Duration::from_secs(1)).unwrap() {
                RoomEvent::TrackSubscribed { identity, track } => return (identity, track),
                _ => continue,
            }
        }
    }

    #[test]
    fn test_close_unblocks_pending_read() {
        let track = LoopbackRemoteTrack::new(TrackKind::Video);
        let stream = track.open_video_stream(3).unwrap();

        let reader = {
            let stream = stream.clone();
            thread::spawn(move || stream.read())
        };
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        stream.close();

        assert!(reader.join().unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_ended_track_drains_then_ends() {
        let track = LoopbackRemoteTrack::new(TrackKind::Video);
        let stream = track.open_video_stream(3).unwrap();
        track.push_video(&VideoFrame::new(1, 1));
        track.end();

        assert!(stream.read().is_some());
        assert!(stream.read().is_none());
        assert!(track.open_video_stream(3).is_err());
    }

    #[test]
    fn test_full_stream_drops_newest() {
        let track = LoopbackRemoteTrack::new(TrackKind::Video);
        let _stream = track.open_video_stream(2).unwrap();
        for _ in 0..5 {
            track.push_video(&VideoFrame::new(1, 1));
        }
        assert_eq!(track.overflowed(), 3);
    }

    #[test]
    fn test_publish_reaches_peer_and_echo() {
        let network = LoopbackNetwork::new(true);
        let factory = network.track_factory();
        let alice = connect(&network, "room", "alice");
        let bob = connect(&network, "room", "bob");

        let track = factory.create_track(MediaKind::Camera, 0).unwrap();
        let publication = alice.local_participant().publish_track(&track).unwrap();

        let (identity, remote) = subscribed_track(&bob.events());
        assert_eq!(identity, "alice");
        assert_eq!(remote.sid(), publication.sid());

        let (identity, _) = subscribed_track(&alice.events());
        assert_eq!(identity, "alice-echo");

        let stream = remote.open_video_stream(3).unwrap();
        if let TrackSink::Video(sink) = &track.sink {
            sink.capture_frame(&VideoFrame::new(2, 2)).unwrap();
        }
        assert_eq!(stream.read().map(|f| f.width), Some(2));
    }

    #[test]
    fn test_disconnect_retires_published_tracks() {
        let network = LoopbackNetwork::new(false);
        let factory = network.track_factory();
        let alice = connect(&network, "room", "alice");
        let track = factory.create_track(MediaKind::Microphone, 0).unwrap();
        alice.local_participant().publish_track(&track).unwrap();

        alice.disconnect();

        let handle = network.tracks().remove(0);
        assert!(handle.is_retired());
        if let TrackSink::Audio(sink) = &track.sink {
            let frame = AudioFrame::new(vec![0; 4], 48_000, 1);
            assert_eq!(
                sink.capture_frame(&frame, Duration::from_millis(1)),
                Err(TransportError::Closed)
            );
        }
        assert_eq!(handle.stale_frames(), 1);
        assert!(network.members("room").is_empty());
    }

    #[test]
    fn test_retired_tracks_do_not_accumulate() {
        let network = LoopbackNetwork::new(false);
        let factory = network.track_factory();
        for generation in 0..(RETIRED_HISTORY as u64 * 2) {
            let alice = connect(&network, "room", "alice");
            let track = factory.create_track(MediaKind::Camera, generation).unwrap();
            alice.local_participant().publish_track(&track).unwrap();
            alice.disconnect();
            // Never published, dropped straight away
            factory.create_track(MediaKind::Screen, generation).unwrap();
        }

        let tracks = network.tracks();
        assert_eq!(tracks.len(), RETIRED_HISTORY);
        assert!(tracks.iter().all(|t| t.is_retired()));
        assert_eq!(tracks[0].generation(), RETIRED_HISTORY as u64);
        assert!(network.inner.tracks.len() <= RETIRED_HISTORY + 2);
    }

    #[test]
    fn test_unreachable_and_bad_token() {
        let network = LoopbackNetwork::new(false);
        assert!(network
            .connect("loopback://", "no-separator", RoomOptions::default())
            .is_err());
        network.set_reachable(false);
        assert!(matches!(
            network.connect("loopback://", "room:alice", RoomOptions::default()),
            Err(TransportError::ConnectFailed(_))
        ));
    }
}
