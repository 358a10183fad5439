use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use url::Url;

use super::{BaseLive, Info, Live, LiveId, LiveOptions, SourceError};

/// Stand-in for a room whose source could not be resolved at startup.
///
/// It reports itself offline and initializing, has no media, and keeps the
/// real source around so the watcher can retry it and swap it in once it
/// answers.
pub struct InitializingLive {
    base: BaseLive,
    origin: Arc<dyn Live>,
}

impl InitializingLive {
    #[must_use]
    pub fn new(origin: Arc<dyn Live>, url: Url, options: LiveOptions) -> Self {
        Self {
            base: BaseLive::new(url, options),
            origin,
        }
    }
}

#[async_trait]
impl Live for InitializingLive {
    fn live_id(&self) -> LiveId {
        self.base.live_id()
    }

    fn set_live_id_by_string(&self, value: &str) {
        self.base.set_live_id_by_string(value);
    }

    fn raw_url(&self) -> String {
        self.base.raw_url()
    }

    fn platform_name(&self) -> String {
        String::new()
    }

    async fn get_info(&self) -> Result<Info, SourceError> {
        Ok(Info {
            room_name: self.base.raw_url(),
            initializing: true,
            ..Default::default()
        })
    }

    async fn get_stream_urls(&self) -> Result<Vec<Url>, SourceError> {
        Ok(Vec::new())
    }

    fn last_start_time(&self) -> Option<DateTime<Local>> {
        self.base.last_start_time()
    }

    fn set_last_start_time(&self, time: DateTime<Local>) {
        self.base.set_last_start_time(time);
    }

    fn initializing_origin(&self) -> Option<Arc<dyn Live>> {
        Some(Arc::clone(&self.origin))
    }
}
