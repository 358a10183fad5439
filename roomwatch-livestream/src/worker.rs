// Lifecycle state shared by watchers, recorders and pushers.
//
// Every worker moves forward only: Begin -> Pending -> Running -> Stopped.
// Transitions are compare-and-swap so a second start or close is a no-op.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Begin = 0,
    Pending = 1,
    Running = 2,
    Stopped = 3,
}

impl WorkerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Begin,
            1 => Self::Pending,
            2 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Begin => "begin",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// State word plus the stop signal observed by the worker loop
pub struct WorkerLifecycle {
    state: AtomicU8,
    stop: CancellationToken,
}

impl WorkerLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Begin as u8),
            stop: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Begin -> Pending. False when the worker was already started.
    pub fn begin_start(&self) -> bool {
        self.transition(WorkerState::Begin, WorkerState::Pending)
    }

    /// Pending -> Running. False when a close raced the start.
    pub fn finish_start(&self) -> bool {
        self.transition(WorkerState::Pending, WorkerState::Running)
    }

    /// Running (or Pending) -> Stopped and fire the stop signal.
    /// False when the worker was never started or is already stopped.
    pub fn close(&self) -> bool {
        let closed = self.transition(WorkerState::Running, WorkerState::Stopped)
            || self.transition(WorkerState::Pending, WorkerState::Stopped);
        if closed {
            self.stop.cancel();
        }
        closed
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Token cancelled on close
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}

impl Default for WorkerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
