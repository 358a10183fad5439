//! Liveness watchers.
//!
//! One [`Watcher`] per room polls its source on a jittered interval and turns
//! observed transitions into bus events. The [`WatcherManager`] owns the
//! RoomId -> watcher map.

mod manager;
mod status;

use std::sync::Arc;

use chrono::Local;
use roomwatch_core::{Config, Event, EventBus, EventType, Live, LiveId};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::util::{jittered_interval, sleep_or_stop};
use crate::worker::{WorkerLifecycle, WorkerState};

pub use manager::WatcherManager;
pub use status::{RoomStatus, StatusChange};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatcherError {
    #[error("Room {0} is already watched")]
    AlreadyExists(LiveId),

    #[error("Room {0} is not watched")]
    NotFound(LiveId),
}

/// Poll loop for one room
pub struct Watcher {
    live: Arc<dyn Live>,
    config: Arc<Config>,
    bus: Arc<EventBus>,
    lifecycle: WorkerLifecycle,
    status: parking_lot::Mutex<RoomStatus>,
}

impl Watcher {
    pub fn new(live: Arc<dyn Live>, config: Arc<Config>, bus: Arc<EventBus>) -> Self {
        Self {
            live,
            config,
            bus,
            lifecycle: WorkerLifecycle::new(),
            status: parking_lot::Mutex::new(RoomStatus::default()),
        }
    }

    pub fn live(&self) -> &Arc<dyn Live> {
        &self.live
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// Last observed room state
    pub fn status(&self) -> RoomStatus {
        self.status.lock().clone()
    }

    /// Publish `WatchStarted`, poll once, then keep polling in the
    /// background. Only the first call has any effect.
    pub async fn start(self: &Arc<Self>) {
        if !self.lifecycle.begin_start() {
            return;
        }

        self.publish(EventType::WatchStarted);
        self.refresh().await;
        tokio::spawn(Arc::clone(self).run());

        self.lifecycle.finish_start();
    }

    /// Stop polling and publish `WatchStopped`. Only the first call has any
    /// effect.
    pub fn close(&self) {
        if self.lifecycle.close() {
            self.publish(EventType::WatchStopped);
            debug!(room_id = %self.live.live_id(), "Watcher closed");
        }
    }

    async fn run(self: Arc<Self>) {
        let stop = self.lifecycle.stop_token();
        loop {
            let delay = jittered_interval(self.config.poll_interval());
            if sleep_or_stop(delay, &stop).await {
                return;
            }
            tokio::select! {
                () = stop.cancelled() => return,
                () = self.refresh() => {}
            }
        }
    }

    fn publish(&self, kind: EventType) {
        self.bus.publish(Event::room(kind, Arc::clone(&self.live)));
    }

    /// Fetch the room state once and publish the transition it implies.
    /// A failed fetch changes nothing.
    pub async fn refresh(&self) {
        let info = match self.live.get_info().await {
            Ok(info) => info,
            Err(e) => {
                error!(url = %self.live.raw_url(), error = %e, "Failed to load room info");
                return;
            }
        };

        let latest = RoomStatus::new(info.room_name.clone(), info.status);
        let change = {
            let mut status = self.status.lock();
            let change = status.diff(&latest);
            *status = latest;
            change
        };

        match change {
            StatusChange::NoChange => {}
            StatusChange::WentLive => {
                self.live.set_last_start_time(Local::now());
                self.publish(EventType::LiveStarted);
                info!(host = %info.host_name, room = %info.room_name, "Live start");
            }
            StatusChange::WentOffline => {
                self.publish(EventType::LiveEnded);
                info!(host = %info.host_name, room = %info.room_name, "Live end");
            }
            StatusChange::Renamed => {
                if self.config.video_split_strategies.on_room_name_changed {
                    self.publish(EventType::RoomRenamed);
                    info!(host = %info.host_name, room = %info.room_name, "Room name was changed");
                }
            }
        }

        if info.initializing {
            self.check_initialized().await;
        }
    }

    async fn check_initialized(&self) {
        let Some(resolved) = self.live.initializing_origin() else {
            return;
        };
        match resolved.get_info().await {
            Ok(info) => {
                info!(url = %resolved.raw_url(), "Room source resolved");
                self.bus.publish(Event::InitializingFinished {
                    placeholder: Arc::clone(&self.live),
                    resolved,
                    info,
                });
            }
            Err(e) => {
                debug!(url = %resolved.raw_url(), error = %e, "Room source still unavailable");
            }
        }
    }
}
