use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use moka::sync::Cache;
use url::Url;

use super::{Info, Live, LiveId, SourceError};

const INFO_CACHE_CAPACITY: u64 = 1024;

/// Process-wide best-effort cache of the latest [`Info`] per room.
/// A miss means "temporarily unknown", never an error.
#[derive(Clone)]
pub struct InfoCache {
    inner: Cache<LiveId, Info>,
}

impl InfoCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Cache::new(INFO_CACHE_CAPACITY),
        }
    }

    #[must_use]
    pub fn get(&self, id: &LiveId) -> Option<Info> {
        self.inner.get(id)
    }

    pub fn insert(&self, id: LiveId, info: Info) {
        self.inner.insert(id, info);
    }

    /// Apply `f` to the cached entry, if any
    pub fn update(&self, id: &LiveId, f: impl FnOnce(&mut Info)) {
        if let Some(mut info) = self.inner.get(id) {
            f(&mut info);
            self.inner.insert(id.clone(), info);
        }
    }
}

impl Default for InfoCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a source so every successful `get_info` refreshes the cache and
/// every failure is surfaced through the cached room name.
pub struct CachedLive {
    inner: Arc<dyn Live>,
    cache: InfoCache,
}

impl CachedLive {
    #[must_use]
    pub fn new(inner: Arc<dyn Live>, cache: InfoCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Live for CachedLive {
    fn live_id(&self) -> LiveId {
        self.inner.live_id()
    }

    fn set_live_id_by_string(&self, value: &str) {
        self.inner.set_live_id_by_string(value);
    }

    fn raw_url(&self) -> String {
        self.inner.raw_url()
    }

    fn platform_name(&self) -> String {
        self.inner.platform_name()
    }

    async fn get_info(&self) -> Result<Info, SourceError> {
        let id = self.inner.live_id();
        match self.inner.get_info().await {
            Ok(info) => {
                self.cache.insert(id, info.clone());
                Ok(info)
            }
            Err(e) => {
                let message = e.to_string();
                self.cache.update(&id, |info| info.room_name = message);
                Err(e)
            }
        }
    }

    async fn get_stream_urls(&self) -> Result<Vec<Url>, SourceError> {
        self.inner.get_stream_urls().await
    }

    fn last_start_time(&self) -> Option<DateTime<Local>> {
        self.inner.last_start_time()
    }

    fn set_last_start_time(&self, time: DateTime<Local>) {
        self.inner.set_last_start_time(time);
    }

    fn initializing_origin(&self) -> Option<Arc<dyn Live>> {
        self.inner.initializing_origin()
    }
}
