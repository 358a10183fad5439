use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use roomwatch_core::{same_live, Config, EventBus, EventType, Handler, InfoCache, Live, LiveId};
use tracing::{debug, error, info, warn};

use super::{Recorder, RecorderContext, RecorderError};
use crate::parser::ParserConfig;
use crate::template::PathTemplate;
use crate::watcher::WatcherManager;

/// How often a recorder's session age is compared with `max_duration`
const CRON_INTERVAL: Duration = Duration::from_secs(15);

/// Owns one recorder per live room.
///
/// Recorders come and go with bus events: `LiveStarted` adds one when the
/// room has recording enabled, `LiveEnded` and `WatchStopped` remove it,
/// `RoomRenamed` restarts it into a new file.
pub struct RecorderManager {
    recorders: RwLock<HashMap<LiveId, Arc<Recorder>>>,
    ctx: RecorderContext,
    watchers: Arc<WatcherManager>,
}

impl RecorderManager {
    pub fn new(
        config: Arc<Config>,
        bus: Arc<EventBus>,
        cache: InfoCache,
        watchers: Arc<WatcherManager>,
        ffmpeg: PathBuf,
    ) -> Self {
        let template = PathTemplate::new(
            config.out_put_tmpl.as_deref(),
            config.on_record_finished.custom_commandline.as_deref(),
            config.feature.remove_symbol_other_character,
        );
        let parser_config = ParserConfig {
            ffmpeg,
            timeout_in_us: config.timeout_in_us,
            max_file_size: config.video_split_strategies.max_file_size,
            debug: config.debug,
        };
        Self {
            recorders: RwLock::new(HashMap::new()),
            ctx: RecorderContext {
                config,
                bus,
                cache,
                template: Arc::new(template),
                parser_config,
                pushing: Arc::default(),
            },
            watchers,
        }
    }

    pub fn register(self: &Arc<Self>) {
        self.on_room_event(EventType::LiveStarted, |manager, live| async move {
            let wants_record = manager
                .ctx
                .config
                .room_by_url(&live.raw_url())
                .is_some_and(|room| room.record);
            if !wants_record {
                return;
            }
            if let Err(e) = manager.add(live) {
                error!(error = %e, "Failed to add recorder");
            }
        });

        self.on_room_event(EventType::RoomRenamed, |manager, live| async move {
            if !manager.has(&live.live_id()) {
                return;
            }
            if let Err(e) = manager.restart(live).await {
                error!(error = %e, "Failed to restart recorder");
            }
        });

        for kind in [EventType::LiveEnded, EventType::WatchStopped] {
            self.on_room_event(kind, |manager, live| async move {
                manager.remove_owned(&live).await;
            });
        }

        // Reflected in the metadata written next to each recording.
        self.on_room_event(EventType::PushStarted, |manager, live| async move {
            manager.ctx.pushing.write().insert(live.live_id());
        });
        self.on_room_event(EventType::PushStopped, |manager, live| async move {
            manager.ctx.pushing.write().remove(&live.live_id());
        });
    }

    fn on_room_event<F, Fut>(self: &Arc<Self>, kind: EventType, f: F)
    where
        F: Fn(Arc<Self>, Arc<dyn Live>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let manager = Arc::downgrade(self);
        self.ctx.bus.subscribe(
            kind,
            Handler::new(move |event| {
                let job = manager
                    .upgrade()
                    .map(|manager| f(manager, Arc::clone(event.live())));
                async move {
                    if let Some(job) = job {
                        job.await;
                    }
                }
            }),
        );
    }

    /// Create and start a recorder for `live`.
    ///
    /// The room must be configured, listened to, currently watched and have
    /// recording enabled, checked in that order.
    pub fn add(self: &Arc<Self>, live: Arc<dyn Live>) -> Result<(), RecorderError> {
        let id = live.live_id();
        let url = live.raw_url();
        let room = self
            .ctx
            .config
            .room_by_url(&url)
            .ok_or(RecorderError::RoomNotConfigured(url))?;
        if !room.listen {
            return Err(RecorderError::ListenNotEnabled(id));
        }
        if !self.watchers.has(&id) {
            return Err(RecorderError::NoListening(id));
        }
        if !room.record {
            return Err(RecorderError::RecordNotEnabled(id));
        }

        let recorder = {
            let mut recorders = self.recorders.write();
            if recorders.contains_key(&id) {
                return Err(RecorderError::RecorderExist(id));
            }
            let recorder = Arc::new(Recorder::new(live, self.ctx.clone()));
            recorders.insert(id, Arc::clone(&recorder));
            recorder
        };

        let max_duration = self.ctx.config.video_split_strategies.max_duration;
        if !max_duration.is_zero() {
            tokio::spawn(cron_restart(
                Arc::downgrade(self),
                Arc::clone(&recorder),
                max_duration,
            ));
        }
        recorder.start();
        Ok(())
    }

    pub async fn remove(&self, id: &LiveId) -> Result<(), RecorderError> {
        let recorder = self
            .recorders
            .write()
            .remove(id)
            .ok_or_else(|| RecorderError::RecorderNotExist(id.clone()))?;
        recorder.close().await;
        Ok(())
    }

    /// Remove the recorder of `live` only if it was created for that very
    /// source object. Events about a replaced placeholder carry the old
    /// object and must not tear down the recorder of its successor.
    async fn remove_owned(&self, live: &Arc<dyn Live>) {
        let recorder = {
            let mut recorders = self.recorders.write();
            let id = live.live_id();
            match recorders.get(&id) {
                Some(current) if same_live(current.live(), live) => recorders.remove(&id),
                _ => None,
            }
        };
        if let Some(recorder) = recorder {
            recorder.close().await;
        }
    }

    /// Close the current recorder of `live` and start a fresh one, which
    /// begins a new output file
    pub async fn restart(self: &Arc<Self>, live: Arc<dyn Live>) -> Result<(), RecorderError> {
        self.remove(&live.live_id()).await?;
        self.add(live)
    }

    pub fn get(&self, id: &LiveId) -> Result<Arc<Recorder>, RecorderError> {
        self.recorders
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RecorderError::RecorderNotExist(id.clone()))
    }

    pub fn has(&self, id: &LiveId) -> bool {
        self.recorders.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.recorders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorders.read().is_empty()
    }

    pub async fn close(&self) {
        let recorders: Vec<Arc<Recorder>> =
            self.recorders.write().drain().map(|(_, r)| r).collect();
        for recorder in recorders {
            recorder.close().await;
        }
    }
}

/// Restart `recorder` once its session is `max_duration` old. Gives up as
/// soon as the manager is gone or holds a different recorder for the room.
async fn cron_restart(manager: Weak<RecorderManager>, recorder: Arc<Recorder>, max_duration: Duration) {
    let id = recorder.live().live_id();
    loop {
        let Some(manager) = manager.upgrade() else {
            return;
        };
        match manager.get(&id) {
            Ok(current) if Arc::ptr_eq(&current, &recorder) => {}
            _ => return,
        }

        if recorder.start_time().elapsed() >= max_duration {
            info!(room_id = %id, "Max duration reached, restarting recorder");
            if let Err(e) = manager.restart(Arc::clone(recorder.live())).await {
                warn!(room_id = %id, error = %e, "Failed to restart recorder");
            }
            return;
        }
        drop(manager);

        debug!(room_id = %id, "Recorder below max duration");
        tokio::time::sleep(CRON_INTERVAL).await;
    }
}
