use chrono::{DateTime, Local};
use parking_lot::RwLock;
use url::Url;

use super::LiveId;

/// Per-source options resolved from configuration
#[derive(Debug, Clone, Default)]
pub struct LiveOptions {
    /// Raw `Cookie` header value for the platform host
    pub cookies: Option<String>,
    pub quality: i32,
}

impl LiveOptions {
    /// Normalize a `k1=v1; k2=v2` string, dropping malformed pairs
    #[must_use]
    pub fn with_kv_cookies(mut self, cookies: &str) -> Self {
        let pairs: Vec<String> = cookies
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| format!("{name}={}", value.trim()))
            })
            .collect();
        self.cookies = (!pairs.is_empty()).then(|| pairs.join("; "));
        self
    }

    #[must_use]
    pub fn with_quality(mut self, quality: i32) -> Self {
        self.quality = quality;
        self
    }
}

/// State every source carries. Adapters hold one and forward to it.
#[derive(Debug)]
pub struct BaseLive {
    url: Url,
    live_id: RwLock<LiveId>,
    last_start_time: RwLock<Option<DateTime<Local>>>,
    options: LiveOptions,
}

impl BaseLive {
    #[must_use]
    pub fn new(url: Url, options: LiveOptions) -> Self {
        Self {
            live_id: RwLock::new(LiveId::from_url(&url)),
            url,
            last_start_time: RwLock::new(None),
            options,
        }
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub const fn options(&self) -> &LiveOptions {
        &self.options
    }

    #[must_use]
    pub fn live_id(&self) -> LiveId {
        self.live_id.read().clone()
    }

    pub fn set_live_id_by_string(&self, value: &str) {
        *self.live_id.write() = LiveId::from_string(value);
    }

    #[must_use]
    pub fn raw_url(&self) -> String {
        self.url.to_string()
    }

    #[must_use]
    pub fn last_start_time(&self) -> Option<DateTime<Local>> {
        *self.last_start_time.read()
    }

    pub fn set_last_start_time(&self, time: DateTime<Local>) {
        *self.last_start_time.write() = Some(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_cookies() {
        let options = LiveOptions::default().with_kv_cookies(" a = 1 ;broken; b=2=3 ;");
        assert_eq!(options.cookies.as_deref(), Some("a=1; b=2=3"));

        let empty = LiveOptions::default().with_kv_cookies("nothing here");
        assert!(empty.cookies.is_none());
    }

    #[test]
    fn test_custom_live_id() {
        let url = Url::parse("https://live.example.com/room/7").unwrap();
        let base = BaseLive::new(url.clone(), LiveOptions::default());
        assert_eq!(base.live_id(), LiveId::from_url(&url));

        base.set_live_id_by_string("custom-7");
        assert_eq!(base.live_id(), LiveId::from_string("custom-7"));
        assert_eq!(base.raw_url(), "https://live.example.com/room/7");
    }
}
