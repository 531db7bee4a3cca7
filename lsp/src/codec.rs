//! `Content-Length` framing for JSON-RPC over a byte stream.
//!
//! Each message is a header block terminated by an empty line, followed by
//! exactly `Content-Length` bytes of UTF-8 JSON.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Default cap on a single message body.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Default, PartialEq, Eq)]
struct FrameHeader {
    content_length: Option<usize>,
    content_type: Option<String>,
}

impl FrameHeader {
    fn apply(&mut self, line: &str) -> Result<()> {
        let Some((name, value)) = line.split_once(':') else {
            bail!("malformed header line: {line:?}");
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-length") {
            let len = value
                .parse()
                .with_context(|| format!("invalid Content-Length {value:?}"))?;
            self.content_length = Some(len);
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            self.content_type = Some(value.to_string());
        }
        Ok(())
    }

    /// Bodies are JSON text; anything other than UTF-8 is refused.
    fn check_charset(&self) -> Result<()> {
        let Some(content_type) = &self.content_type else {
            return Ok(());
        };
        let charset = content_type
            .split(';')
            .filter_map(|param| param.trim().split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
            .map(|(_, value)| value.trim().trim_matches('"'));
        match charset {
            None => Ok(()),
            Some(cs) if cs.eq_ignore_ascii_case("utf-8") || cs.eq_ignore_ascii_case("utf8") => {
                Ok(())
            }
            Some(cs) => bail!("unsupported charset {cs:?}"),
        }
    }
}

pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    #[must_use]
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// Next message, or `Ok(None)` when the stream ends between messages.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(header) = self.read_header().await? else {
            return Ok(None);
        };
        header.check_charset()?;
        let len = header
            .content_length
            .context("header block has no Content-Length")?;
        if len > self.max_frame_bytes {
            bail!("frame of {len} bytes exceeds limit of {}", self.max_frame_bytes);
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .context("stream ended inside a frame body")?;
        let value = serde_json::from_slice(&body).context("frame body is not valid JSON")?;
        Ok(Some(value))
    }

    async fn read_header(&mut self) -> Result<Option<FrameHeader>> {
        let mut header = FrameHeader::default();
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header")?;
            if n == 0 {
                if started {
                    bail!("stream ended inside a header block");
                }
                return Ok(None);
            }

            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if started {
                    return Ok(Some(header));
                }
                // Stray blank line between messages.
                continue;
            }
            started = true;
            header.apply(line)?;
        }
    }
}

pub struct FrameWriter<W> {
    writer: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: Vec::new(),
        }
    }

    /// Serialize `msg` and write it as one frame.
    pub async fn write_frame<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<()> {
        let body = serde_json::to_vec(msg).context("serializing message")?;
        self.buf.clear();
        self.buf
            .extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        self.buf.extend_from_slice(&body);

        self.writer
            .write_all(&self.buf)
            .await
            .context("writing frame")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
