// FLV tag loop.
//
// File layout: 9-byte header, then repeated
//   [previous tag size: 4][type: 1][data size: 3][timestamp: 3][ts ext: 1][stream id: 3][data]
// The 4-byte previous tag size is read together with the 11-byte tag header,
// so every iteration consumes a fixed 15-byte prefix. Output is byte-identical
// to input; one tag at a time is held in memory at most.

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::parser::ParserError;

pub const FLV_SIGNATURE: [u8; 4] = [0x46, 0x4C, 0x56, 0x01];
const FLV_HEADER_SIZE: usize = 9;
const TAG_PREFIX_SIZE: usize = 15;

const TAG_AUDIO: u8 = 8;
const TAG_VIDEO: u8 = 9;
const TAG_SCRIPT: u8 = 18;

const SOUND_FORMAT_AAC: u8 = 10;
const CODEC_AVC: u8 = 7;
const AVC_SEQUENCE_HEADER: u8 = 0;
const AVC_NALU: u8 = 1;

const WRITE_RETRIES: usize = 3;
const COPY_CHUNK_SIZE: usize = 32 * 1024;

/// Stream properties announced by the FLV header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlvMetadata {
    pub has_video: bool,
    pub has_audio: bool,
}

/// One remux session from `reader` to `writer`
pub struct FlvSession<R, W> {
    reader: R,
    writer: W,
    metadata: FlvMetadata,
    sequence_headers: u8,
    tag_count: u64,
}

impl<R, W> FlvSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            metadata: FlvMetadata::default(),
            sequence_headers: 0,
            tag_count: 0,
        }
    }

    pub fn metadata(&self) -> FlvMetadata {
        self.metadata
    }

    pub fn tag_count(&self) -> u64 {
        self.tag_count
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub async fn flush(&mut self) -> Result<(), ParserError> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Validate the header, then forward tags until the input ends or `stop`
    /// fires. `stop` is observed between tags.
    pub async fn run(&mut self, stop: &CancellationToken) -> Result<(), ParserError> {
        self.parse_header().await?;

        loop {
            let prefix = tokio::select! {
                biased;

                () = stop.cancelled() => return Ok(()),
                prefix = read_up_to(&mut self.reader, TAG_PREFIX_SIZE) => prefix?,
            };

            if prefix.len() < TAG_PREFIX_SIZE {
                // End of stream: only the trailing previous tag size is left.
                self.write(&prefix).await?;
                debug!(tags = self.tag_count, "FLV stream ended");
                return Ok(());
            }

            self.tag_count += 1;
            self.parse_tag(prefix).await?;
        }
    }

    async fn parse_header(&mut self) -> Result<(), ParserError> {
        let mut header = [0u8; FLV_HEADER_SIZE];
        self.reader.read_exact(&mut header).await?;

        if header[..4] != FLV_SIGNATURE {
            return Err(ParserError::NotFlvStream);
        }
        self.metadata = FlvMetadata {
            has_video: header[4] & 0x04 != 0,
            has_audio: header[4] & 0x01 != 0,
        };
        if BigEndian::read_u32(&header[5..]) != FLV_HEADER_SIZE as u32 {
            return Err(ParserError::NotFlvStream);
        }

        self.write(&header).await
    }

    async fn parse_tag(&mut self, prefix: Vec<u8>) -> Result<(), ParserError> {
        let tag_type = prefix[4];
        let length = BigEndian::read_u24(&prefix[5..8]);
        trace!(tag_type, length, "FLV tag");

        match tag_type {
            TAG_AUDIO => self.parse_audio_tag(prefix, length).await,
            TAG_VIDEO => self.parse_video_tag(prefix, length).await,
            TAG_SCRIPT => {
                self.write(&prefix).await?;
                self.copy_payload(length).await
            }
            other => Err(ParserError::UnknownTag(other)),
        }
    }

    async fn parse_audio_tag(&mut self, mut head: Vec<u8>, length: u32) -> Result<(), ParserError> {
        let flags = self.reader.read_u8().await?;
        head.push(flags);
        let mut remaining = shrink(length, 1)?;

        if flags >> 4 == SOUND_FORMAT_AAC {
            head.push(self.reader.read_u8().await?);
            remaining = shrink(remaining, 1)?;
        }

        self.write(&head).await?;
        self.copy_payload(remaining).await
    }

    async fn parse_video_tag(&mut self, mut head: Vec<u8>, length: u32) -> Result<(), ParserError> {
        let flags = self.reader.read_u8().await?;
        head.push(flags);
        let mut remaining = shrink(length, 1)?;

        if flags & 0x0F == CODEC_AVC {
            let packet_type = self.reader.read_u8().await?;
            head.push(packet_type);
            remaining = shrink(remaining, 1)?;

            match packet_type {
                AVC_NALU => {
                    let mut composition_time = [0u8; 3];
                    self.reader.read_exact(&mut composition_time).await?;
                    head.extend_from_slice(&composition_time);
                    remaining = shrink(remaining, 3)?;
                }
                AVC_SEQUENCE_HEADER => {
                    self.sequence_headers += 1;
                    if self.sequence_headers > 1 {
                        return Err(ParserError::SequenceHeaderChanged);
                    }
                }
                _ => {}
            }
        }

        self.write(&head).await?;
        self.copy_payload(remaining).await
    }

    async fn copy_payload(&mut self, length: u32) -> Result<(), ParserError> {
        let mut left = length as usize;
        let mut chunk = vec![0u8; left.min(COPY_CHUNK_SIZE)];

        while left > 0 {
            let want = left.min(chunk.len());
            let read = self.reader.read(&mut chunk[..want]).await?;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended with {left} payload bytes missing"),
                )
                .into());
            }
            self.write(&chunk[..read]).await?;
            left -= read;
        }
        Ok(())
    }

    /// Write `buf`, tolerating a bounded number of short writes
    async fn write(&mut self, buf: &[u8]) -> Result<(), ParserError> {
        let mut written = 0;
        for _ in 0..WRITE_RETRIES {
            if written == buf.len() {
                break;
            }
            written += self.writer.write(&buf[written..]).await?;
            if written < buf.len() {
                debug!(remaining = buf.len() - written, "Short write");
            }
        }

        if written < buf.len() {
            return Err(ParserError::IncompleteWrite {
                expected: buf.len(),
                remaining: buf.len() - written,
            });
        }
        Ok(())
    }
}

fn shrink(length: u32, by: u32) -> Result<u32, ParserError> {
    length
        .checked_sub(by)
        .ok_or_else(|| ParserError::MalformedTag(format!("{length} byte payload is shorter than its headers")))
}

/// Read until `n` bytes or end of stream
async fn read_up_to<R: AsyncRead + Unpin>(reader: &mut R, n: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buf.truncate(filled);
    Ok(buf)
}
