//! Event catalogue and the in-process bus that carries it.

mod bus;

use std::fmt;
use std::sync::Arc;

use crate::live::{Info, Live};

pub use bus::{EventBus, Handler};

/// Kinds of events published on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    WatchStarted,
    WatchStopped,
    LiveStarted,
    LiveEnded,
    RoomRenamed,
    RoomInitializingFinished,
    CaptureStarted,
    CaptureStopped,
    PushStarted,
    PushStopped,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WatchStarted => "watch_started",
            Self::WatchStopped => "watch_stopped",
            Self::LiveStarted => "live_started",
            Self::LiveEnded => "live_ended",
            Self::RoomRenamed => "room_renamed",
            Self::RoomInitializingFinished => "room_initializing_finished",
            Self::CaptureStarted => "capture_started",
            Self::CaptureStopped => "capture_stopped",
            Self::PushStarted => "push_started",
            Self::PushStopped => "push_stopped",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable event. The payload is a room source for every type except
/// [`EventType::RoomInitializingFinished`].
#[derive(Debug, Clone)]
pub enum Event {
    Room {
        kind: EventType,
        live: Arc<dyn Live>,
    },
    InitializingFinished {
        placeholder: Arc<dyn Live>,
        resolved: Arc<dyn Live>,
        info: Info,
    },
}

impl Event {
    #[must_use]
    pub fn room(kind: EventType, live: Arc<dyn Live>) -> Self {
        Self::Room { kind, live }
    }

    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Room { kind, .. } => *kind,
            Self::InitializingFinished { .. } => EventType::RoomInitializingFinished,
        }
    }

    /// The room the event is about; the resolved source for initialization
    #[must_use]
    pub fn live(&self) -> &Arc<dyn Live> {
        match self {
            Self::Room { live, .. } => live,
            Self::InitializingFinished { resolved, .. } => resolved,
        }
    }
}
