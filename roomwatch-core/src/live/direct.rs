use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use reqwest::header::{COOKIE, USER_AGENT};
use url::Url;

use super::{BaseLive, Info, Live, LiveId, LiveOptions, SourceError};

const PROBE_USER_AGENT: &str = "Chrome/59.0.3071.115";

/// A room whose url is itself the media stream (`.flv`, `.m3u8`, ...).
///
/// Liveness is probed with a GET: a 2xx answer means on air, a 4xx answer
/// means offline, anything else is an error.
pub struct DirectLive {
    base: BaseLive,
    client: reqwest::Client,
}

impl DirectLive {
    pub fn new(url: Url, options: LiveOptions) -> Result<Self, SourceError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SourceError::Unsupported(url.to_string()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            base: BaseLive::new(url, options),
            client,
        })
    }

    fn host_name(&self) -> String {
        self.base.url().host_str().unwrap_or_default().to_string()
    }

    fn room_name(&self) -> String {
        self.base
            .url()
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .unwrap_or_default()
            .to_string()
    }

    fn audio_only(&self) -> bool {
        let path = self.base.url().path();
        [".aac", ".mp3", ".m4a"].iter().any(|ext| path.ends_with(ext))
    }
}

#[async_trait]
impl Live for DirectLive {
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
        "direct".to_string()
    }

    async fn get_info(&self) -> Result<Info, SourceError> {
        let mut request = self
            .client
            .get(self.base.url().clone())
            .header(USER_AGENT, PROBE_USER_AGENT);
        if let Some(cookies) = &self.base.options().cookies {
            request = request.header(COOKIE, cookies);
        }

        // Only the status line matters, the body is dropped unread.
        let status = request.send().await?.status();
        let on_air = if status.is_success() {
            true
        } else if status.is_client_error() {
            false
        } else {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: self.base.raw_url(),
            });
        };

        Ok(Info {
            host_name: self.host_name(),
            room_name: self.room_name(),
            status: on_air,
            audio_only: self.audio_only(),
            ..Default::default()
        })
    }

    async fn get_stream_urls(&self) -> Result<Vec<Url>, SourceError> {
        Ok(vec![self.base.url().clone()])
    }

    fn last_start_time(&self) -> Option<DateTime<Local>> {
        self.base.last_start_time()
    }

    fn set_last_start_time(&self, time: DateTime<Local>) {
        self.base.set_last_start_time(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn live_for(server: &MockServer, route: &str, options: LiveOptions) -> DirectLive {
        let url = Url::parse(&format!("{}{route}", server.uri())).unwrap();
        DirectLive::new(url, options).unwrap()
    }

    #[tokio::test]
    async fn test_on_air_when_stream_answers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/live/show.flv"))
            .and(header("cookie", "sid=1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"FLV".to_vec()))
            .mount(&server)
            .await;

        let options = LiveOptions::default().with_kv_cookies("sid=1");
        let live = live_for(&server, "/live/show.flv", options).await;
        let info = live.get_info().await.unwrap();

        assert!(info.status);
        assert_eq!(info.room_name, "show.flv");
        assert_eq!(info.host_name, "127.0.0.1");
        assert_eq!(live.get_stream_urls().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_on_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let live = live_for(&server, "/live/gone.flv", LiveOptions::default()).await;
        assert!(!live.get_info().await.unwrap().status);
    }

    #[tokio::test]
    async fn test_error_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let live = live_for(&server, "/live/broken.flv", LiveOptions::default()).await;
        assert!(matches!(
            live.get_info().await,
            Err(SourceError::Status { status: 502, .. })
        ));
    }

    #[test]
    fn test_rejects_non_http_urls() {
        let url = Url::parse("rtmp://live.example.com/app/key").unwrap();
        assert!(matches!(
            DirectLive::new(url, LiveOptions::default()),
            Err(SourceError::Unsupported(_))
        ));
    }
}
