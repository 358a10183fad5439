use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use roomwatch_core::{same_live, Config, Event, EventBus, EventType, Handler, Live, LiveId};
use tracing::error;

use super::{Pusher, PusherError};
use crate::parser::ParserConfig;
use crate::watcher::WatcherManager;

/// Owns one pusher per live room with push enabled
pub struct PusherManager {
    pushers: RwLock<HashMap<LiveId, Arc<Pusher>>>,
    config: Arc<Config>,
    bus: Arc<EventBus>,
    watchers: Arc<WatcherManager>,
    parser_config: ParserConfig,
}

impl PusherManager {
    pub fn new(
        config: Arc<Config>,
        bus: Arc<EventBus>,
        watchers: Arc<WatcherManager>,
        ffmpeg: PathBuf,
    ) -> Self {
        let parser_config = ParserConfig {
            ffmpeg,
            timeout_in_us: config.timeout_in_us,
            max_file_size: 0,
            debug: config.debug,
        };
        Self {
            pushers: RwLock::new(HashMap::new()),
            config,
            bus,
            watchers,
            parser_config,
        }
    }

    /// `LiveStarted` adds a pusher for rooms that push; `LiveEnded` and
    /// `WatchStopped` remove it.
    pub fn register(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        self.bus.subscribe(
            EventType::LiveStarted,
            Handler::new(move |event: Event| {
                let manager = manager.upgrade();
                async move {
                    let Some(manager) = manager else {
                        return;
                    };
                    let live = Arc::clone(event.live());
                    let wants_push = manager
                        .config
                        .room_by_url(&live.raw_url())
                        .is_some_and(|room| room.push && !room.rtmp.is_empty());
                    if !wants_push {
                        return;
                    }
                    if let Err(e) = manager.add(live) {
                        error!(error = %e, "Failed to add pusher");
                    }
                }
            }),
        );

        for kind in [EventType::LiveEnded, EventType::WatchStopped] {
            let manager = Arc::downgrade(self);
            self.bus.subscribe(
                kind,
                Handler::new(move |event: Event| {
                    let manager = manager.upgrade();
                    async move {
                        if let Some(manager) = manager {
                            manager.remove_owned(event.live()).await;
                        }
                    }
                }),
            );
        }
    }

    /// Create and start a pusher. The room must be configured, listened to,
    /// currently watched, have an rtmp target and push enabled, checked in
    /// that order.
    pub fn add(&self, live: Arc<dyn Live>) -> Result<(), PusherError> {
        let id = live.live_id();
        let url = live.raw_url();
        let room = self
            .config
            .room_by_url(&url)
            .ok_or(PusherError::RoomNotConfigured(url))?;
        if !room.listen {
            return Err(PusherError::ListenNotEnabled(id));
        }
        if !self.watchers.has(&id) {
            return Err(PusherError::NoListening(id));
        }
        if room.rtmp.is_empty() {
            return Err(PusherError::RtmpNotExist(id));
        }
        if !room.push {
            return Err(PusherError::PushNotEnabled(id));
        }

        let pusher = {
            let mut pushers = self.pushers.write();
            if pushers.contains_key(&id) {
                return Err(PusherError::PusherExist(id));
            }
            let pusher = Arc::new(Pusher::new(
                live,
                Arc::clone(&self.config),
                Arc::clone(&self.bus),
                self.parser_config.clone(),
            ));
            pushers.insert(id, Arc::clone(&pusher));
            pusher
        };

        pusher.start();
        Ok(())
    }

    pub async fn remove(&self, id: &LiveId) -> Result<(), PusherError> {
        let pusher = self
            .pushers
            .write()
            .remove(id)
            .ok_or_else(|| PusherError::PusherNotExist(id.clone()))?;
        pusher.close().await;
        Ok(())
    }

    async fn remove_owned(&self, live: &Arc<dyn Live>) {
        let pusher = {
            let mut pushers = self.pushers.write();
            let id = live.live_id();
            match pushers.get(&id) {
                Some(current) if same_live(current.live(), live) => pushers.remove(&id),
                _ => None,
            }
        };
        if let Some(pusher) = pusher {
            pusher.close().await;
        }
    }

    pub fn get(&self, id: &LiveId) -> Result<Arc<Pusher>, PusherError> {
        self.pushers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| PusherError::PusherNotExist(id.clone()))
    }

    pub fn has(&self, id: &LiveId) -> bool {
        self.pushers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pushers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pushers.read().is_empty()
    }

    pub async fn close(&self) {
        let pushers: Vec<Arc<Pusher>> = self.pushers.write().drain().map(|(_, p)| p).collect();
        for pusher in pushers {
            pusher.close().await;
        }
    }
}
