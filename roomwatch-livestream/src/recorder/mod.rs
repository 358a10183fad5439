//! Capture workers.
//!
//! A [`Recorder`] keeps re-acquiring a stream url for one live room and
//! copies it into a templated file until it is closed. The
//! [`RecorderManager`] decides when recorders exist, driven by bus events.

mod hooks;
mod manager;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use roomwatch_core::{Config, Event, EventBus, EventType, Info, InfoCache, Live, LiveId};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::parser::{new_parser, Parser, ParserConfig, ParserError};
use crate::template::PathTemplate;
use crate::util::{sleep_or_stop, RETRY_DELAY};
use crate::worker::{WorkerLifecycle, WorkerState};

pub use manager::RecorderManager;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Recorder for room {0} already exists")]
    RecorderExist(LiveId),

    #[error("Recorder for room {0} does not exist")]
    RecorderNotExist(LiveId),

    #[error("Parser does not support status")]
    ParserNotSupportStatus,

    #[error("Room {0} is not configured")]
    RoomNotConfigured(String),

    #[error("Listen is not enabled for room {0}")]
    ListenNotEnabled(LiveId),

    #[error("Room {0} is not being watched")]
    NoListening(LiveId),

    #[error("Record is not enabled for room {0}")]
    RecordNotEnabled(LiveId),

    #[error(transparent)]
    Parser(#[from] ParserError),
}

/// Shared collaborators every recorder of one manager uses
#[derive(Clone)]
pub(crate) struct RecorderContext {
    pub config: Arc<Config>,
    pub bus: Arc<EventBus>,
    pub cache: InfoCache,
    pub template: Arc<PathTemplate>,
    pub parser_config: ParserConfig,
    /// Rooms with a running pusher, tracked from push events
    pub pushing: Arc<RwLock<HashSet<LiveId>>>,
}

pub struct Recorder {
    live: Arc<dyn Live>,
    ctx: RecorderContext,
    lifecycle: WorkerLifecycle,
    start_time: Mutex<Instant>,
    parser: RwLock<Option<Arc<dyn Parser>>>,
}

impl Recorder {
    pub(crate) fn new(live: Arc<dyn Live>, ctx: RecorderContext) -> Self {
        Self {
            live,
            ctx,
            lifecycle: WorkerLifecycle::new(),
            start_time: Mutex::new(Instant::now()),
            parser: RwLock::new(None),
        }
    }

    pub fn live(&self) -> &Arc<dyn Live> {
        &self.live
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// When the current parser session began, or when the recorder was
    /// created if no session has started yet
    pub fn start_time(&self) -> Instant {
        *self.start_time.lock()
    }

    pub fn start(self: &Arc<Self>) {
        if !self.lifecycle.begin_start() {
            return;
        }

        tokio::spawn(Arc::clone(self).run());
        info!(room_id = %self.live.live_id(), url = %self.live.raw_url(), "Record start");
        self.publish(EventType::CaptureStarted);

        self.lifecycle.finish_start();
    }

    /// Stop the loop and the active parser. Only the first call has any
    /// effect.
    pub async fn close(&self) {
        if !self.lifecycle.close() {
            return;
        }

        let parser = self.parser.read().clone();
        if let Some(parser) = parser {
            if let Err(e) = parser.stop().await {
                warn!(room_id = %self.live.live_id(), error = %e, "Failed to stop parser");
            }
        }
        info!(room_id = %self.live.live_id(), url = %self.live.raw_url(), "Record end");
        self.publish(EventType::CaptureStopped);
    }

    /// Progress of the active parser session
    pub async fn get_status(&self) -> Result<Option<HashMap<String, String>>, RecorderError> {
        let parser = self.parser.read().clone();
        match parser.as_deref().and_then(|p| p.as_status()) {
            Some(status) => Ok(status.status().await?),
            None => Err(RecorderError::ParserNotSupportStatus),
        }
    }

    fn publish(&self, kind: EventType) {
        self.ctx.bus.publish(Event::room(kind, Arc::clone(&self.live)));
    }

    async fn run(self: Arc<Self>) {
        let stop = self.lifecycle.stop_token();
        while !stop.is_cancelled() {
            self.try_record(&stop).await;
        }
    }

    async fn room_info(&self) -> Option<Info> {
        if let Some(info) = self.ctx.cache.get(&self.live.live_id()) {
            return Some(info);
        }
        self.live
            .get_info()
            .await
            .map_err(|e| warn!(url = %self.live.raw_url(), error = %e, "Failed to load room info"))
            .ok()
    }

    /// Output file for a session on `url`
    fn output_path(&self, url: &Url, info: &Info) -> Result<PathBuf, handlebars::RenderError> {
        let rendered = self.ctx.template.render_output(self.live.as_ref(), info)?;
        let mut file_name = self.ctx.config.out_put_path.join(rendered);
        if url.path().contains("m3u8") {
            file_name.set_extension("ts");
        }
        if info.audio_only {
            file_name.set_extension("aac");
        }
        Ok(file_name)
    }

    /// One parser session: acquire a url, write the file, post-process.
    async fn try_record(&self, stop: &CancellationToken) {
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

        let Some(info) = self.room_info().await else {
            sleep_or_stop(RETRY_DELAY, stop).await;
            return;
        };

        let file_name = match self.output_path(url, &info) {
            Ok(file_name) => file_name,
            Err(e) => {
                error!(error = %e, "Failed to render output path");
                sleep_or_stop(RETRY_DELAY, stop).await;
                return;
            }
        };
        if let Some(dir) = file_name.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                error!(dir = %dir.display(), error = %e, "Failed to create output directory");
                sleep_or_stop(RETRY_DELAY, stop).await;
                return;
            }
        }

        let parser = new_parser(
            url,
            self.ctx.config.feature.use_native_flv_parser,
            &self.ctx.parser_config,
        );
        self.set_and_close_parser(Arc::clone(&parser)).await;
        if stop.is_cancelled() {
            let _ = parser.stop().await;
            return;
        }
        *self.start_time.lock() = Instant::now();

        let metadata_path = file_name.with_extension("metadata.json");
        let mut document = self.session_info(&info);
        document.recording = true;
        self.save_metadata(&metadata_path, &document).await;

        debug!(
            url = %url,
            file = %file_name.display(),
            parser = parser.name(),
            "Start parsing live stream"
        );
        let destination = file_name.to_string_lossy();
        match parser
            .parse_live_stream(url, self.live.as_ref(), &destination)
            .await
        {
            Ok(()) => info!(file = %file_name.display(), "Parser session finished"),
            Err(e) => warn!(file = %file_name.display(), error = %e, "Parser session ended with error"),
        }

        document.recording = false;
        document.pushing = self.is_pushing();
        self.save_metadata(&metadata_path, &document).await;
        remove_if_empty(&file_name).await;

        hooks::on_record_finished(
            &self.ctx.config.on_record_finished,
            &self.ctx.template,
            hooks::FinishedRecording {
                live: self.live.as_ref(),
                info: &info,
                file: &file_name,
                ffmpeg: &self.ctx.parser_config.ffmpeg,
            },
            self.ctx.config.debug,
        )
        .await;
    }

    /// Install `parser` as the active session, stopping the previous one
    async fn set_and_close_parser(&self, parser: Arc<dyn Parser>) {
        let previous = self.parser.write().replace(parser);
        if let Some(previous) = previous {
            if let Err(e) = previous.stop().await {
                warn!(error = %e, "Failed to stop previous parser");
            }
        }
    }

    /// `info` plus the room's configured switches and what is running for it
    fn session_info(&self, info: &Info) -> Info {
        let mut session = info.clone();
        if let Some(room) = self.ctx.config.room_by_url(&self.live.raw_url()) {
            session.apply_room(room);
        }
        // A recorder never outlives its room's watcher.
        session.listening = true;
        session.pushing = self.is_pushing();
        session
    }

    fn is_pushing(&self) -> bool {
        self.ctx.pushing.read().contains(&self.live.live_id())
    }

    async fn save_metadata(&self, path: &Path, info: &Info) {
        let document = info.document(self.live.as_ref());
        let bytes = match serde_json::to_vec_pretty(&document) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Failed to serialize room metadata");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(path, bytes).await {
            error!(file = %path.display(), error = %e, "Failed to write room metadata");
        }
    }
}

async fn remove_if_empty(file: &Path) {
    match tokio::fs::metadata(file).await {
        Ok(meta) if meta.len() == 0 => {
            if let Err(e) = tokio::fs::remove_file(file).await {
                warn!(file = %file.display(), error = %e, "Failed to remove empty recording");
            }
        }
        _ => {}
    }
}
