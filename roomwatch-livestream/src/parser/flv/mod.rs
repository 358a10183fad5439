//! Native HTTP-FLV remuxer.

mod tag;

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::USER_AGENT;
use roomwatch_core::Live;
use tokio::fs::OpenOptions;
use tokio::io::{BufReader, BufWriter};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use super::{Parser, ParserError, NATIVE};

pub use tag::{FlvMetadata, FlvSession, FLV_SIGNATURE};

#[cfg(test)]
pub(crate) use tag::tests as test_support;

const NATIVE_USER_AGENT: &str = "Chrome/59.0.3071.115";

/// Downloads an FLV stream over HTTP and writes it tag by tag
pub struct FlvParser {
    client: reqwest::Client,
    stop: CancellationToken,
    metadata: parking_lot::Mutex<FlvMetadata>,
}

impl FlvParser {
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            stop: CancellationToken::new(),
            metadata: parking_lot::Mutex::new(FlvMetadata::default()),
        }
    }

    /// Header flags of the last session
    pub fn metadata(&self) -> FlvMetadata {
        *self.metadata.lock()
    }
}

impl Default for FlvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Parser for FlvParser {
    fn name(&self) -> &'static str {
        NATIVE
    }

    async fn parse_live_stream(
        &self,
        url: &Url,
        _live: &dyn Live,
        destination: &str,
    ) -> Result<(), ParserError> {
        if self.stop.is_cancelled() {
            return Ok(());
        }

        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, NATIVE_USER_AGENT)
            .send()
            .await?
            .error_for_status()?;
        let body = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(destination)
            .await?;

        info!(url = %url, destination, "Native FLV parser started");
        let mut session = FlvSession::new(BufReader::new(body), BufWriter::new(file));
        let result = session.run(&self.stop).await;
        *self.metadata.lock() = session.metadata();

        // Keep whatever was remuxed before a failure.
        let flushed = session.flush().await;
        result?;
        flushed
    }

    async fn stop(&self) -> Result<(), ParserError> {
        self.stop.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::tag::tests::sample_stream;
    use super::*;
    use crate::testing::StubLive;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_parse_http_stream_to_file() {
        let server = MockServer::start().await;
        let input = sample_stream();
        Mock::given(method("GET"))
            .and(path("/live/room.flv"))
            .and(header("user-agent", NATIVE_USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(input.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.flv");
        let url = Url::parse(&format!("{}/live/room.flv", server.uri())).unwrap();
        let live = StubLive::new(url.as_str());

        let parser = FlvParser::new();
        parser
            .parse_live_stream(&url, &live, destination.to_str().unwrap())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), input);
        assert!(parser.metadata().has_audio);
        assert!(parser.metadata().has_video);
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.flv");
        let url = Url::parse(&format!("{}/live/gone.flv", server.uri())).unwrap();
        let live = StubLive::new(url.as_str());

        let err = FlvParser::new()
            .parse_live_stream(&url, &live, destination.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ParserError::Http(_)));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_stopped_parser_does_not_connect() {
        let parser = FlvParser::new();
        parser.stop().await.unwrap();

        let url = Url::parse("http://127.0.0.1:9/live/room.flv").unwrap();
        let live = StubLive::new(url.as_str());
        parser
            .parse_live_stream(&url, &live, "/nonexistent/out.flv")
            .await
            .unwrap();
    }
}
