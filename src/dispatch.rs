//! UI-thread task loop and relay event bus
//!
//! Everything that touches render targets, audio outputs or session state
//! runs on one thread that drains a [`UiLoop`]. Other threads marshal work
//! onto it through a cloneable [`UiHandle`]. Tasks from one producer run
//! in the order they were posted.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

use crate::protocol::RelayEvent;

/// Unit of work executed on the UI thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    RunAt(Instant, Task),
}

/// Posting side of the UI loop
#[derive(Clone)]
pub struct UiHandle {
    tx: Sender<Message>,
}

impl UiHandle {
    /// Queue `task`. Never blocks. Returns false once the loop is gone.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Message::Run(Box::new(task))).is_ok()
    }

    /// Queue `task` to run no earlier than `delay` from now
    pub fn post_delayed<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Message::RunAt(Instant::now() + delay, Box::new(task)))
            .is_ok()
    }
}

/// Single-consumer task queue owned by the UI thread
pub struct UiLoop {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    timers: Vec<(Instant, u64, Task)>,
    timer_seq: u64,
}

impl Default for UiLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl UiLoop {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            timers: Vec::new(),
            timer_seq: 0,
        }
    }

    pub fn handle(&self) -> UiHandle {
        UiHandle {
            tx: self.tx.clone(),
        }
    }

    /// Number of queued immediate tasks plus pending timers
    pub fn pending(&self) -> usize {
        self.rx.len() + self.timers.len()
    }

    /// Run everything that is ready now without blocking
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        loop {
            let before = ran;
            loop {
                match self.rx.try_recv() {
                    Ok(message) => ran += self.accept(message),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            ran += self.fire_due_timers();
            if ran == before {
                return ran;
            }
        }
    }

    /// Keep running tasks until `duration` has elapsed
    pub fn run_for(&mut self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut ran = 0;
        loop {
            ran += self.run_pending();
            let now = Instant::now();
            if now >= deadline {
                return ran;
            }
            ran += self.wait_one(self.next_wake(deadline).saturating_duration_since(now));
        }
    }

    /// Run tasks until `done` holds or `timeout` elapses.
    /// Returns whether `done` was satisfied.
    pub fn run_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let wake = self.next_wake(deadline).min(now + Duration::from_millis(10));
            self.wait_one(wake.saturating_duration_since(now));
        }
    }

    fn next_wake(&self, deadline: Instant) -> Instant {
        self.timers
            .first()
            .map(|(at, _, _)| (*at).min(deadline))
            .unwrap_or(deadline)
    }

    fn wait_one(&mut self, wait: Duration) -> usize {
        match self.rx.recv_timeout(wait) {
            Ok(message) => self.accept(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn accept(&mut self, message: Message) -> usize {
        match message {
            Message::Run(task) => {
                task();
                1
            }
            Message::RunAt(at, task) => {
                self.timer_seq += 1;
                let seq = self.timer_seq;
                let index = self
                    .timers
                    .partition_point(|(t, s, _)| (*t, *s) <= (at, seq));
                self.timers.insert(index, (at, seq, task));
                0
            }
        }
    }

    fn fire_due_timers(&mut self) -> usize {
        let now = Instant::now();
        let due = self.timers.partition_point(|(at, _, _)| *at <= now);
        let fired: Vec<_> = self.timers.drain(..due).collect();
        let count = fired.len();
        for (_, _, task) in fired {
            task();
        }
        count
    }
}

/// Outbound notifications for the application
#[derive(Clone)]
pub struct EventBus {
    tx: Sender<RelayEvent>,
}

impl EventBus {
    pub fn new() -> (Self, Receiver<RelayEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    /// Bus whose events go nowhere
    pub fn detached() -> Self {
        Self::new().0
    }

    pub fn emit(&self, event: RelayEvent) {
        tracing::trace!(?event, "Relay event");
        let _ = self.tx.send(event);
    }
}
