use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures::StreamExt;
use roomwatch_core::Live;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, info, warn};
use url::Url;

use super::{Parser, ParserConfig, ParserError, StatusParser, FFMPEG, FFMPEG_USER_AGENT};

/// Terminator line ffmpeg writes after each `-progress` block
const PROGRESS_SENTINEL: &[u8] = b"progress=continue\n";
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

type Status = HashMap<String, String>;

/// Arguments for a copy-mode ffmpeg run from `url` into `destination`
#[must_use]
pub fn build_args(url: &Url, referer: &str, config: &ParserConfig, destination: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "-nostats",
        "-progress",
        "-",
        "-y",
        "-re",
        "-user_agent",
        FFMPEG_USER_AGENT,
        "-referer",
        referer,
        "-rw_timeout",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect();

    args.push(config.timeout_in_us.to_string());
    args.extend(
        ["-i", url.as_str(), "-c", "copy", "-bsf:a", "aac_adtstoasc", "-f", "flv"]
            .iter()
            .map(|s| (*s).to_string()),
    );
    if config.max_file_size > 0 {
        args.push("-fs".to_string());
        args.push(config.max_file_size.to_string());
    }
    args.push(destination.to_string());
    args
}

/// Splits ffmpeg's progress output into blocks ending at the sentinel line
#[derive(Debug, Default)]
struct ProgressCodec;

impl Decoder for ProgressCodec {
    type Item = BytesMut;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(idx) = src
            .windows(PROGRESS_SENTINEL.len())
            .position(|window| window == PROGRESS_SENTINEL)
        else {
            return Ok(None);
        };
        let block = src.split_to(idx);
        src.advance(PROGRESS_SENTINEL.len());
        Ok(Some(block))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let block = self.decode(src)?;
        if block.is_none() {
            // Partial block from an exiting process
            src.clear();
        }
        Ok(block)
    }
}

fn decode_status(block: &[u8]) -> Status {
    let mut status = HashMap::from([("parser".to_string(), FFMPEG.to_string())]);
    for line in String::from_utf8_lossy(block).lines() {
        if let Some((key, value)) = line.split_once('=') {
            status.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    status
}

/// Drains progress blocks and hands one out per status request.
/// Ends when ffmpeg closes its stdout, which drops `responses`.
async fn schedule_status<R>(
    mut blocks: FramedRead<R, ProgressCodec>,
    mut requests: mpsc::Receiver<()>,
    responses: mpsc::Sender<Option<Status>>,
) where
    R: AsyncRead + Unpin,
{
    let mut requests_open = true;
    loop {
        tokio::select! {
            biased;

            request = requests.recv(), if requests_open => {
                if request.is_none() {
                    requests_open = false;
                    continue;
                }
                match tokio::time::timeout(STATUS_TIMEOUT, blocks.next()).await {
                    Ok(Some(Ok(block))) => {
                        let _ = responses.try_send(Some(decode_status(&block)));
                    }
                    Ok(_) => return,
                    Err(_) => {
                        let _ = responses.try_send(None);
                    }
                }
            }
            block = blocks.next() => {
                if !matches!(block, Some(Ok(_))) {
                    return;
                }
            }
        }
    }
}

/// Parser backed by an ffmpeg subprocess
pub struct FfmpegParser {
    config: ParserConfig,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    stopped: AtomicBool,
    exited: AtomicBool,
    status_requests: mpsc::Sender<()>,
    status_responses: tokio::sync::Mutex<mpsc::Receiver<Option<Status>>>,
    // Scheduler ends of the status channels, taken by the first session
    scheduler_channels: parking_lot::Mutex<Option<(mpsc::Receiver<()>, mpsc::Sender<Option<Status>>)>>,
}

impl FfmpegParser {
    #[must_use]
    pub fn new(config: ParserConfig) -> Self {
        let (req_tx, req_rx) = mpsc::channel(1);
        let (resp_tx, resp_rx) = mpsc::channel(1);
        Self {
            config,
            stdin: tokio::sync::Mutex::new(None),
            stopped: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            status_requests: req_tx,
            status_responses: tokio::sync::Mutex::new(resp_rx),
            scheduler_channels: parking_lot::Mutex::new(Some((req_rx, resp_tx))),
        }
    }

    async fn send_quit(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        if let Some(stdin) = self.stdin.lock().await.as_mut() {
            let result = async {
                stdin.write_all(b"q").await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = result {
                debug!(error = %e, "Failed to send quit to ffmpeg");
            }
        }
    }
}

#[async_trait]
impl Parser for FfmpegParser {
    fn name(&self) -> &'static str {
        FFMPEG
    }

    async fn parse_live_stream(
        &self,
        url: &Url,
        live: &dyn Live,
        destination: &str,
    ) -> Result<(), ParserError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }

        let args = build_args(url, &live.raw_url(), &self.config, destination);
        debug!(ffmpeg = %self.config.ffmpeg.display(), ?args, "Starting ffmpeg");

        let mut child = Command::new(&self.config.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.config.debug {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stdout is not piped"))?;
        let blocks = FramedRead::new(stdout, ProgressCodec);
        match self.scheduler_channels.lock().take() {
            Some((requests, responses)) => {
                tokio::spawn(schedule_status(blocks, requests, responses));
            }
            None => {
                tokio::spawn(blocks.for_each(|_| async {}));
            }
        }

        *self.stdin.lock().await = child.stdin.take();
        if self.stopped.load(Ordering::SeqCst) {
            self.send_quit().await;
        }

        let status = child.wait().await;
        self.exited.store(true, Ordering::SeqCst);
        self.stdin.lock().await.take();

        let status = status?;
        if status.success() {
            info!(destination, "ffmpeg finished");
            Ok(())
        } else {
            warn!(destination, code = ?status.code(), "ffmpeg exited abnormally");
            Err(ParserError::ProcessExited(status.code()))
        }
    }

    async fn stop(&self) -> Result<(), ParserError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.send_quit().await;
        Ok(())
    }

    fn as_status(&self) -> Option<&dyn StatusParser> {
        Some(self)
    }
}

#[async_trait]
impl StatusParser for FfmpegParser {
    async fn status(&self) -> Result<Option<Status>, ParserError> {
        let mut responses = self.status_responses.lock().await;
        // Answer to a request whose caller gave up; never hand it to this one.
        while responses.try_recv().is_ok() {}

        if tokio::time::timeout(STATUS_TIMEOUT, self.status_requests.send(()))
            .await
            .is_err()
        {
            return Ok(None);
        }

        match tokio::time::timeout(STATUS_TIMEOUT + Duration::from_secs(1), responses.recv()).await {
            Ok(Some(status)) => Ok(status),
            Ok(None) | Err(_) => Ok(None),
        }
    }
}
