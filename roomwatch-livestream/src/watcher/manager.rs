use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use roomwatch_core::{
    same_live, Config, Event, EventBus, EventType, Handler, Info, Live, LiveId, RoomTable,
};
use tracing::{error, info};

use super::{Watcher, WatcherError};

/// Owns one watcher per room id.
///
/// The map lock is held only for map operations; starting a watcher (which
/// polls the source once) happens after the lock is released.
pub struct WatcherManager {
    watchers: RwLock<HashMap<LiveId, Arc<Watcher>>>,
    config: Arc<Config>,
    bus: Arc<EventBus>,
    rooms: Arc<RoomTable>,
}

impl WatcherManager {
    pub fn new(config: Arc<Config>, bus: Arc<EventBus>, rooms: Arc<RoomTable>) -> Self {
        Self {
            watchers: RwLock::new(HashMap::new()),
            config,
            bus,
            rooms,
        }
    }

    /// Subscribe to placeholder resolution so resolved rooms replace their
    /// placeholder watchers.
    pub fn register(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        self.bus.subscribe(
            EventType::RoomInitializingFinished,
            Handler::new(move |event| {
                let manager = manager.clone();
                async move {
                    let Some(manager) = manager.upgrade() else {
                        return;
                    };
                    if let Event::InitializingFinished {
                        placeholder,
                        resolved,
                        info,
                    } = event
                    {
                        manager.on_initializing_finished(placeholder, resolved, info).await;
                    }
                }
            }),
        );
    }

    fn new_watcher(&self, live: Arc<dyn Live>) -> Arc<Watcher> {
        Arc::new(Watcher::new(
            live,
            Arc::clone(&self.config),
            Arc::clone(&self.bus),
        ))
    }

    pub async fn add(&self, live: Arc<dyn Live>) -> Result<(), WatcherError> {
        let watcher = {
            let mut watchers = self.watchers.write();
            let id = live.live_id();
            if watchers.contains_key(&id) {
                return Err(WatcherError::AlreadyExists(id));
            }
            let watcher = self.new_watcher(live);
            watchers.insert(id, Arc::clone(&watcher));
            watcher
        };

        watcher.start().await;
        Ok(())
    }

    pub fn remove(&self, id: &LiveId) -> Result<(), WatcherError> {
        let watcher = self
            .watchers
            .write()
            .remove(id)
            .ok_or_else(|| WatcherError::NotFound(id.clone()))?;
        watcher.close();
        Ok(())
    }

    pub fn get(&self, id: &LiveId) -> Result<Arc<Watcher>, WatcherError> {
        self.watchers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| WatcherError::NotFound(id.clone()))
    }

    pub fn has(&self, id: &LiveId) -> bool {
        self.watchers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.watchers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.read().is_empty()
    }

    /// Swap the watcher of `placeholder` for one watching `resolved`, which
    /// may carry a different id. Fails with `NotFound` unless the current
    /// watcher for that id is watching `placeholder` itself.
    pub async fn replace(
        &self,
        placeholder: &Arc<dyn Live>,
        resolved: Arc<dyn Live>,
    ) -> Result<(), WatcherError> {
        let old_id = placeholder.live_id();
        let new_id = resolved.live_id();

        let (old, new) = {
            let mut watchers = self.watchers.write();
            match watchers.get(&old_id) {
                Some(current) if same_live(current.live(), placeholder) => {}
                _ => return Err(WatcherError::NotFound(old_id)),
            }
            if new_id != old_id && watchers.contains_key(&new_id) {
                return Err(WatcherError::AlreadyExists(new_id));
            }

            let Some(old) = watchers.remove(&old_id) else {
                return Err(WatcherError::NotFound(old_id));
            };
            let new = self.new_watcher(resolved);
            watchers.insert(new_id.clone(), Arc::clone(&new));
            (old, new)
        };

        old.close();
        new.start().await;
        info!(old_id = %old_id, new_id = %new_id, "Replaced initializing watcher");
        Ok(())
    }

    async fn on_initializing_finished(
        &self,
        placeholder: Arc<dyn Live>,
        resolved: Arc<dyn Live>,
        info: Info,
    ) {
        if let Some(custom_id) = &info.custom_live_id {
            resolved.set_live_id_by_string(custom_id);
        }

        let old_id = placeholder.live_id();
        if old_id != resolved.live_id()
            && self
                .rooms
                .get(&old_id)
                .is_some_and(|known| same_live(&known, &placeholder))
        {
            self.rooms.remove(&old_id);
        }
        self.rooms.upsert(Arc::clone(&resolved));

        let url = resolved.raw_url();
        let Some(room) = self.config.room_by_url(&url) else {
            error!(url = %url, "Resolved room has no configuration entry");
            return;
        };

        if room.listen {
            if let Err(e) = self.replace(&placeholder, resolved).await {
                error!(url = %url, error = %e, "Failed to replace initializing watcher");
            }
        }
    }

    /// Close and drop every watcher
    pub fn close(&self) {
        let watchers: Vec<Arc<Watcher>> = self.watchers.write().drain().map(|(_, w)| w).collect();
        for watcher in watchers {
            watcher.close();
        }
    }
}
