//! Room event routing
//!
//! SDK events arrive on a transport-owned channel. The router thread moves
//! them onto the UI loop one task per event. While disabled (during room
//! transitions) events are dropped on both sides of the hand-off.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::dispatch::UiHandle;
use crate::transport::RoomEvent;

/// Receives routed events on the UI thread
pub type EventHandler = Arc<dyn Fn(RoomEvent) + Send + Sync>;

pub struct EventRouter {
    enabled: Arc<AtomicBool>,
    routed: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    shutdown: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl EventRouter {
    pub fn spawn(
        events: Receiver<RoomEvent>,
        ui: UiHandle,
        handler: EventHandler,
    ) -> std::io::Result<Self> {
        let enabled = Arc::new(AtomicBool::new(true));
        let routed = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let enabled_loop = enabled.clone();
        let routed_loop = routed.clone();
        let dropped_loop = dropped.clone();

        let handle = thread::Builder::new()
            .name("room-events".into())
            .spawn(move || {
                loop {
                    let event = select! {
                        recv(events) -> event => event.ok(),
                        recv(shutdown_rx) -> _ => None,
                    };
                    let Some(event) = event else {
                        break;
                    };

                    if !enabled_loop.load(Ordering::Acquire) {
                        dropped_loop.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(event = event.name(), "Dropping room event while disabled");
                        continue;
                    }

                    tracing::trace!(event = event.name(), "Routing room event");
                    let enabled_ui = enabled_loop.clone();
                    let handler = handler.clone();
                    ui.post(move || {
                        if enabled_ui.load(Ordering::Acquire) {
                            handler(event);
                        }
                    });
                    routed_loop.fetch_add(1, Ordering::Relaxed);
                }
                tracing::debug!("Room event router stopped");
            })?;

        Ok(Self {
            enabled,
            routed,
            dropped,
            shutdown: Some(shutdown_tx),
            thread_handle: Some(handle),
        })
    }

    /// Stop delivering events, including ones already queued on the UI loop
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn routed(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Disable, then wait for the router thread to exit
    pub fn stop(&mut self) {
        self.disable();
        self.shutdown.take();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::UiLoop;
    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn recording_handler() -> (EventHandler, Arc<Mutex<Vec<&'static str>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: EventHandler = Arc::new(move |event: RoomEvent| sink.lock().push(event.name()));
        (handler, seen)
    }

    #[test]
    fn test_events_reach_handler_on_ui_loop() {
        let mut ui = UiLoop::new();
        let (tx, rx) = unbounded();
        let (handler, seen) = recording_handler();
        let mut router = EventRouter::spawn(rx, ui.handle(), handler).unwrap();

        tx.send(RoomEvent::Reconnecting).unwrap();
        tx.send(RoomEvent::Reconnected).unwrap();

        assert!(ui.run_until(Duration::from_secs(2), || seen.lock().len() == 2));
        assert_eq!(*seen.lock(), vec!["reconnecting", "reconnected"]);
        router.stop();
    }

    #[test]
    fn test_disabled_router_delivers_nothing() {
        let mut ui = UiLoop::new();
        let (tx, rx) = unbounded();
        let (handler, seen) = recording_handler();
        let mut router = EventRouter::spawn(rx, ui.handle(), handler).unwrap();

        tx.send(RoomEvent::Reconnecting).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while router.routed() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        // Already queued on the UI loop, but disabled before it runs
        router.disable();
        tx.send(RoomEvent::Reconnected).unwrap();
        router.stop();
        ui.run_pending();

        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_router_exits_when_session_ends() {
        let ui = UiLoop::new();
        let (tx, rx) = unbounded::<RoomEvent>();
        let (handler, _) = recording_handler();
        let router = EventRouter::spawn(rx, ui.handle(), handler).unwrap();
        drop(tx);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !router
            .thread_handle
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
        {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
    }
}
