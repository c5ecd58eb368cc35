//! Room session lifecycle: joining, leaving, publishing and subscribing

pub mod manager;
pub mod router;

pub use manager::{MeetingSession, SessionDeps};
pub use router::{EventHandler, EventRouter};
