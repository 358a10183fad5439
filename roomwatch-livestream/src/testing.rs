// In-crate room source double for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use roomwatch_core::{Info, Live, LiveId, SourceError};
use url::Url;

pub struct StubLive {
    url: String,
    id: RwLock<LiveId>,
    info: Mutex<Result<Info, SourceError>>,
    stream_urls: Mutex<Result<Vec<Url>, SourceError>>,
    last_start: RwLock<Option<DateTime<Local>>>,
    origin: Option<Arc<dyn Live>>,
    pub info_calls: AtomicUsize,
    pub url_calls: AtomicUsize,
}

impl StubLive {
    pub fn new(url: &str) -> Self {
        let id = Url::parse(url).map_or_else(|_| LiveId::from_string(url), |u| LiveId::from_url(&u));
        Self {
            url: url.to_string(),
            id: RwLock::new(id),
            info: Mutex::new(Ok(Info::default())),
            stream_urls: Mutex::new(Ok(Vec::new())),
            last_start: RwLock::new(None),
            origin: None,
            info_calls: AtomicUsize::new(0),
            url_calls: AtomicUsize::new(0),
        }
    }

    /// Placeholder whose real source is `origin`
    pub fn initializing(url: &str, origin: Arc<dyn Live>) -> Self {
        let stub = Self {
            origin: Some(origin),
            ..Self::new(url)
        };
        stub.set_info(Info {
            room_name: url.to_string(),
            initializing: true,
            ..Default::default()
        });
        stub
    }

    pub fn set_info(&self, info: Info) {
        *self.info.lock() = Ok(info);
    }

    pub fn set_live(&self, room_name: &str, status: bool) {
        self.set_info(Info {
            host_name: "host".to_string(),
            room_name: room_name.to_string(),
            status,
            ..Default::default()
        });
    }

    pub fn fail_info(&self, message: &str) {
        *self.info.lock() = Err(SourceError::Request(message.to_string()));
    }

    pub fn set_stream_urls(&self, urls: Vec<Url>) {
        *self.stream_urls.lock() = Ok(urls);
    }

    pub fn fail_stream_urls(&self, message: &str) {
        *self.stream_urls.lock() = Err(SourceError::Request(message.to_string()));
    }
}

#[async_trait]
impl Live for StubLive {
    fn live_id(&self) -> LiveId {
        self.id.read().clone()
    }

    fn set_live_id_by_string(&self, value: &str) {
        *self.id.write() = LiveId::from_string(value);
    }

    fn raw_url(&self) -> String {
        self.url.clone()
    }

    fn platform_name(&self) -> String {
        "stub".to_string()
    }

    async fn get_info(&self) -> Result<Info, SourceError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.info.lock().clone()
    }

    async fn get_stream_urls(&self) -> Result<Vec<Url>, SourceError> {
        self.url_calls.fetch_add(1, Ordering::SeqCst);
        self.stream_urls.lock().clone()
    }

    fn last_start_time(&self) -> Option<DateTime<Local>> {
        *self.last_start.read()
    }

    fn set_last_start_time(&self, time: DateTime<Local>) {
        *self.last_start.write() = Some(time);
    }

    fn initializing_origin(&self) -> Option<Arc<dyn Live>> {
        self.origin.clone()
    }
}
