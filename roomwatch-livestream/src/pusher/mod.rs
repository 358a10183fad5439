//! Re-emit workers: forward a live room to its configured RTMP target
//! through ffmpeg.

mod manager;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use roomwatch_core::{Config, Event, EventBus, EventType, Live, LiveId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::parser::{FfmpegParser, Parser, ParserConfig, ParserError, StatusParser};
use crate::util::{sleep_or_stop, RETRY_DELAY};
use crate::worker::{WorkerLifecycle, WorkerState};

pub use manager::PusherManager;

#[derive(Error, Debug)]
pub enum PusherError {
    #[error("Pusher for room {0} already exists")]
    PusherExist(LiveId),

    #[error("Pusher for room {0} does not exist")]
    PusherNotExist(LiveId),

    #[error("Room {0} has no rtmp target")]
    RtmpNotExist(LiveId),

    #[error("Room {0} is not configured")]
    RoomNotConfigured(String),

    #[error("Listen is not enabled for room {0}")]
    ListenNotEnabled(LiveId),

    #[error("Room {0} is not being watched")]
    NoListening(LiveId),

    #[error("Push is not enabled for room {0}")]
    PushNotEnabled(LiveId),

    #[error(transparent)]
    Parser(#[from] ParserError),
}

pub struct Pusher {
    live: Arc<dyn Live>,
    config: Arc<Config>,
    bus: Arc<EventBus>,
    parser_config: ParserConfig,
    lifecycle: WorkerLifecycle,
    parser: RwLock<Option<Arc<FfmpegParser>>>,
}

impl Pusher {
    pub(crate) fn new(
        live: Arc<dyn Live>,
        config: Arc<Config>,
        bus: Arc<EventBus>,
        parser_config: ParserConfig,
    ) -> Self {
        Self {
            live,
            config,
            bus,
            parser_config,
            lifecycle: WorkerLifecycle::new(),
            parser: RwLock::new(None),
        }
    }

    pub fn live(&self) -> &Arc<dyn Live> {
        &self.live
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    pub fn start(self: &Arc<Self>) {
        if !self.lifecycle.begin_start() {
            return;
        }

        tokio::spawn(Arc::clone(self).run());
        info!(room_id = %self.live.live_id(), url = %self.live.raw_url(), "Push start");
        self.publish(EventType::PushStarted);

        self.lifecycle.finish_start();
    }

    pub async fn close(&self) {
        if !self.lifecycle.close() {
            return;
        }

        let parser = self.parser.read().clone();
        if let Some(parser) = parser {
            if let Err(e) = parser.stop().await {
                warn!(room_id = %self.live.live_id(), error = %e, "Failed to stop push parser");
            }
        }
        info!(room_id = %self.live.live_id(), url = %self.live.raw_url(), "Push end");
        self.publish(EventType::PushStopped);
    }

    /// Progress of the running ffmpeg. `None` before the first session or
    /// when ffmpeg reported nothing in time.
    pub async fn get_status(&self) -> Result<Option<HashMap<String, String>>, PusherError> {
        let parser = self.parser.read().clone();
        match parser {
            Some(parser) => Ok(parser.status().await?),
            None => Ok(None),
        }
    }

    fn publish(&self, kind: EventType) {
        self.bus.publish(Event::room(kind, Arc::clone(&self.live)));
    }

    async fn run(self: Arc<Self>) {
        let stop = self.lifecycle.stop_token();
        while !stop.is_cancelled() {
            self.try_push(&stop).await;
        }
    }

    /// The rtmp target while the room still asks for pushing
    fn target(&self) -> Option<String> {
        self.config
            .room_by_url(&self.live.raw_url())
            .filter(|room| room.push && !room.rtmp.is_empty())
            .map(|room| room.rtmp.clone())
    }

    async fn try_push(&self, stop: &CancellationToken) {
        let Some(target) = self.target() else {
            debug!(room_id = %self.live.live_id(), "Push disabled or no rtmp target, idling");
            sleep_or_stop(RETRY_DELAY, stop).await;
            return;
        };

        let urls = match self.live.get_stream_urls().await {
            Ok(urls) if !urls.is_empty() => urls,
            Ok(_) => {
                warn!(url = %self.live.raw_url(), "No stream url, retrying in 5s");
                sleep_or_stop(RETRY_DELAY, stop).await;
                return;
            }
            Err(e) => {
                warn!(url = %self.live.raw_url(), error = %e, "Failed to get stream url, retrying in 5s");
                sleep_or_stop(RETRY_DELAY, stop).await;
                return;
            }
        };
        let url = &urls[0];

        let parser = Arc::new(FfmpegParser::new(self.parser_config.clone()));
        let previous = self.parser.write().replace(Arc::clone(&parser));
        if let Some(previous) = previous {
            if let Err(e) = previous.stop().await {
                warn!(error = %e, "Failed to stop previous push parser");
            }
        }
        if stop.is_cancelled() {
            let _ = parser.stop().await;
            return;
        }

        debug!(url = %url, target = %target, "Start pushing live stream");
        match parser
            .parse_live_stream(url, self.live.as_ref(), &target)
            .await
        {
            Ok(()) => info!(target = %target, "Push session finished"),
            Err(e) => warn!(target = %target, error = %e, "Push session ended with error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubLive;
    use roomwatch_core::config::LiveRoom;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const URL: &str = "https://live.example.com/1";

    fn pusher(live: Arc<StubLive>, room: LiveRoom) -> Arc<Pusher> {
        let config = Config {
            live_rooms: vec![room],
            ..Default::default()
        };
        Arc::new(Pusher::new(
            live,
            Arc::new(config),
            Arc::new(EventBus::new()),
            ParserConfig {
                ffmpeg: PathBuf::from("ffmpeg"),
                timeout_in_us: 1_000_000,
                max_file_size: 0,
                debug: false,
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_idles_without_rtmp_target() {
        let live = Arc::new(StubLive::new(URL));
        let room = LiveRoom {
            push: true,
            ..LiveRoom::from_url(URL)
        };
        let pusher = pusher(Arc::clone(&live), room);

        pusher.start();
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(live.url_calls.load(Ordering::SeqCst), 0);
        pusher.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stream_urls_with_target() {
        let live = Arc::new(StubLive::new(URL));
        let room = LiveRoom {
            push: true,
            rtmp: "rtmp://127.0.0.1/live/1".to_string(),
            ..LiveRoom::from_url(URL)
        };
        let pusher = pusher(Arc::clone(&live), room);

        pusher.start();
        tokio::time::sleep(Duration::from_millis(7_500)).await;
        assert_eq!(live.url_calls.load(Ordering::SeqCst), 2);

        pusher.close().await;
        pusher.close().await;
        assert_eq!(pusher.state(), WorkerState::Stopped);
        // No url ever resolved, so no ffmpeg session exists to report on.
        assert!(matches!(pusher.get_status().await, Ok(None)));
    }
}
