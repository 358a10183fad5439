//! Stream parsers.
//!
//! A parser consumes one media url and writes it to a destination until the
//! stream ends, fails, or [`Parser::stop`] is called. Two implementations
//! exist: [`FfmpegParser`] drives an ffmpeg subprocess in copy mode, and
//! [`FlvParser`] remuxes HTTP-FLV tag by tag without any external tool.

mod ffmpeg;
pub mod flv;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use roomwatch_core::Live;
use thiserror::Error;
use url::Url;

pub use ffmpeg::{build_args, FfmpegParser};
pub use flv::{FlvMetadata, FlvParser};

/// Name of the subprocess parser
pub const FFMPEG: &str = "ffmpeg";
/// Name of the built-in FLV parser
pub const NATIVE: &str = "native";

/// User agent presented by ffmpeg to stream servers
pub const FFMPEG_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_12_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/59.0.3071.115 Safari/537.36";

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Not an FLV stream")]
    NotFlvStream,

    #[error("Unknown FLV tag type {0}")]
    UnknownTag(u8),

    #[error("EOF: new sps/pps")]
    SequenceHeaderChanged,

    #[error("Incomplete write: {remaining} of {expected} bytes left after retries")]
    IncompleteWrite { expected: usize, remaining: usize },

    #[error("Malformed FLV tag: {0}")]
    MalformedTag(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ffmpeg exited with status {0:?}")]
    ProcessExited(Option<i32>),

    #[error("ffmpeg binary not found")]
    FfmpegNotFound,
}

/// Settings shared by every parser a worker creates
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub ffmpeg: PathBuf,
    /// Passed to ffmpeg as `-rw_timeout`
    pub timeout_in_us: u64,
    /// Passed to ffmpeg as `-fs` when non-zero
    pub max_file_size: u64,
    /// Forward ffmpeg stderr to ours
    pub debug: bool,
}

#[async_trait]
pub trait Parser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Copy the stream at `url` into `destination`, returning when the
    /// stream ends, fails, or the parser is stopped.
    async fn parse_live_stream(
        &self,
        url: &Url,
        live: &dyn Live,
        destination: &str,
    ) -> Result<(), ParserError>;

    /// Ask the running session to end. Idempotent; blocked I/O may take its
    /// own timeout to unwind.
    async fn stop(&self) -> Result<(), ParserError>;

    /// Status access for parsers that can report progress
    fn as_status(&self) -> Option<&dyn StatusParser> {
        None
    }
}

#[async_trait]
pub trait StatusParser: Parser {
    /// Latest progress block, `None` when nothing arrived in time
    async fn status(&self) -> Result<Option<HashMap<String, String>>, ParserError>;
}

/// Pick the parser for `url`: the native FLV parser only when enabled and the
/// url path names an `.flv` resource, ffmpeg otherwise.
#[must_use]
pub fn new_parser(url: &Url, use_native_flv: bool, config: &ParserConfig) -> Arc<dyn Parser> {
    if use_native_flv && url.path().contains(".flv") {
        Arc::new(FlvParser::new())
    } else {
        Arc::new(FfmpegParser::new(config.clone()))
    }
}

/// Resolve the ffmpeg binary: the configured path when it exists, otherwise
/// the first `ffmpeg` found on `PATH`.
pub fn locate_ffmpeg(configured: Option<&Path>) -> Result<PathBuf, ParserError> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "Configured ffmpeg not found, searching PATH");
    }

    let names: &[&str] = if cfg!(windows) {
        &["ffmpeg.exe", "ffmpeg"]
    } else {
        &["ffmpeg"]
    };

    std::env::var_os("PATH")
        .iter()
        .flat_map(std::env::split_paths)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
        .ok_or(ParserError::FfmpegNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ParserConfig {
        ParserConfig {
            ffmpeg: PathBuf::from("ffmpeg"),
            timeout_in_us: 60_000_000,
            max_file_size: 0,
            debug: false,
        }
    }

    #[test]
    fn test_new_parser_selection() {
        let flv = Url::parse("https://cdn.example.com/live/room.flv?token=1").unwrap();
        let hls = Url::parse("https://cdn.example.com/live/room.m3u8").unwrap();

        assert_eq!(new_parser(&flv, true, &config()).name(), NATIVE);
        assert_eq!(new_parser(&flv, false, &config()).name(), FFMPEG);
        assert_eq!(new_parser(&hls, true, &config()).name(), FFMPEG);
    }

    #[test]
    fn test_status_capability() {
        let url = Url::parse("https://cdn.example.com/live/room.flv").unwrap();
        assert!(new_parser(&url, false, &config()).as_status().is_some());
        assert!(new_parser(&url, true, &config()).as_status().is_none());
    }

    #[test]
    fn test_locate_ffmpeg_prefers_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("my-ffmpeg");
        std::fs::write(&binary, b"").unwrap();

        assert_eq!(locate_ffmpeg(Some(&binary)).unwrap(), binary);
    }
}
