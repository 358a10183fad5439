//! Room source capability.
//!
//! A [`Live`] is everything the engine knows about one room on a third-party
//! platform: how to ask whether it is on air, and where its media currently
//! lives. Platform adapters plug in through [`SourceBuilder`]; anything
//! without a dedicated adapter is treated as a [`DirectLive`] stream url.

mod base;
mod cache;
mod direct;
mod info;
mod initializing;
mod registry;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub use base::{BaseLive, LiveOptions};
pub use cache::{CachedLive, InfoCache};
pub use direct::DirectLive;
pub use info::{Info, InfoDocument};
pub use initializing::InitializingLive;
pub use registry::{RoomTable, SourceBuilder, SourceRegistry};

/// Errors reported by room sources
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected response status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Unsupported url: {0}")]
    Unsupported(String),

    #[error("Room not found: {0}")]
    RoomNotFound(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}

/// Stable room identifier: md5 hex of the canonical url's host and path,
/// or of a custom id supplied by the platform once the room is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LiveId(String);

impl LiveId {
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        Self::from_string(&format!("{}{}", url.host_str().unwrap_or_default(), url.path()))
    }

    #[must_use]
    pub fn from_string(value: &str) -> Self {
        Self(format!("{:x}", md5::compute(value.as_bytes())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability interface every room source exposes to the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Live: Send + Sync {
    fn live_id(&self) -> LiveId;

    /// Replace the url-derived id with one derived from `value`
    fn set_live_id_by_string(&self, value: &str);

    fn raw_url(&self) -> String;

    fn platform_name(&self) -> String;

    async fn get_info(&self) -> Result<Info, SourceError>;

    /// Media urls ordered by preference
    async fn get_stream_urls(&self) -> Result<Vec<Url>, SourceError>;

    fn last_start_time(&self) -> Option<DateTime<Local>>;

    fn set_last_start_time(&self, time: DateTime<Local>);

    /// The real source behind an initializing placeholder
    fn initializing_origin(&self) -> Option<Arc<dyn Live>> {
        None
    }
}

/// Whether two handles refer to the same source object
#[must_use]
pub fn same_live(a: &Arc<dyn Live>, b: &Arc<dyn Live>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl fmt::Debug for dyn Live {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Live")
            .field("id", &self.live_id())
            .field("url", &self.raw_url())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_id_from_url_ignores_query() {
        let a = Url::parse("https://live.example.com/1001?from=home").unwrap();
        let b = Url::parse("https://live.example.com/1001").unwrap();
        assert_eq!(LiveId::from_url(&a), LiveId::from_url(&b));
        assert_eq!(
            LiveId::from_url(&b),
            LiveId::from_string("live.example.com/1001")
        );
    }

    #[test]
    fn test_same_live_is_identity() {
        let a: Arc<dyn Live> = Arc::new(MockLive::new());
        let b: Arc<dyn Live> = Arc::new(MockLive::new());
        assert!(same_live(&a, &Arc::clone(&a)));
        assert!(!same_live(&a, &b));
    }

    #[test]
    fn test_live_id_is_md5_hex() {
        let id = LiveId::from_string("abc");
        assert_eq!(id.as_str(), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(id.to_string().len(), 32);
    }
}
