use std::io::Read;
use std::time::Duration;

use bytes::BytesMut;
use chrono::Utc;
use ipcam_common::config::StreamConfig;
use ipcam_common::frame::Frame;
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, warn};

use super::{http_client, VideoSource};
use crate::acquisition::StopSignal;
use crate::error::SourceError;

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 64 * 1024;
/// A part that grows past this without a closing boundary means the stream is
/// not the multipart we think it is.
const MAX_PART_BYTES: usize = 16 * 1024 * 1024;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--<boundary>`.
    SeekingBoundary,
    /// Found boundary, now looking for end of part headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting part bytes until the next boundary.
    CollectingPart,
}

/// Incremental splitter for `multipart/x-mixed-replace` bodies.
///
/// Feed it chunks as they arrive with [`push`](Self::push); [`next_part`](Self::next_part)
/// yields each complete part body, in order, however the chunks were cut.
#[derive(Debug)]
pub struct MjpegParser {
    marker: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    /// Where the boundary search resumes inside a part being collected.
    scan_from: usize,
    /// Buffered bytes allowed past a boundary before giving up on the part.
    max_part: usize,
}

impl MjpegParser {
    pub fn new(boundary: &str) -> Self {
        let boundary = boundary.trim_start_matches("--");
        Self {
            marker: format!("--{boundary}").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            scan_from: 0,
            max_part: MAX_PART_BYTES,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete part body, or `None` if more input is needed.
    pub fn next_part(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.marker) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + self.marker.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > self.marker.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - self.marker.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    let Some(pos) = find_subsequence(&self.buffer, HEADER_END) else {
                        if self.buffer.len() > self.max_part {
                            warn!(bytes = self.buffer.len(), "oversized MJPEG part headers, resyncing");
                            self.resync();
                        }
                        return None;
                    };
                    let _ = self.buffer.split_to(pos + HEADER_END.len());
                    self.scan_from = 0;
                    self.state = ParseState::CollectingPart;
                }
                ParseState::CollectingPart => {
                    let Some(offset) = find_subsequence(&self.buffer[self.scan_from..], &self.marker)
                    else {
                        if self.buffer.len() > self.max_part {
                            warn!(bytes = self.buffer.len(), "oversized MJPEG part, resyncing");
                            self.resync();
                        } else {
                            // Avoid re-scanning old data on the next chunk
                            self.scan_from = self.buffer.len().saturating_sub(self.marker.len());
                        }
                        return None;
                    };

                    let part_end = self.scan_from + offset;
                    // Strip the CRLF that precedes the boundary
                    let end = if self.buffer[..part_end].ends_with(b"\r\n") {
                        part_end - 2
                    } else {
                        part_end
                    };
                    let part = self.buffer[..end].to_vec();

                    // Advance past the boundary, straight into the next part's headers
                    let _ = self.buffer.split_to(part_end + self.marker.len());
                    self.state = ParseState::SeekingHeaderEnd;

                    if !part.is_empty() {
                        return Some(part);
                    }
                }
            }
        }
    }
}

impl MjpegParser {
    fn resync(&mut self) {
        self.buffer.clear();
        self.scan_from = 0;
        self.state = ParseState::SeekingBoundary;
    }
}

/// Extract the boundary parameter from a `multipart/x-mixed-replace` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .filter(|boundary| !boundary.is_empty())
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

struct Connection {
    response: Response,
    parser: MjpegParser,
}

/// Blocking reader for an HTTP MJPEG (`multipart/x-mixed-replace`) camera stream.
///
/// A lost connection is re-established on the next read, after an exponential
/// backoff that a stop request cuts short.
pub struct MjpegSource {
    url: String,
    client: Client,
    connection: Option<Connection>,
    backoff: Duration,
    max_backoff: Duration,
    read_buf: Vec<u8>,
    seq: u64,
    stop: StopSignal,
}

impl MjpegSource {
    pub fn new(stream: &StreamConfig) -> Result<Self, SourceError> {
        Ok(Self {
            url: stream.stream_url(),
            client: http_client(stream)?,
            connection: None,
            backoff: INITIAL_BACKOFF,
            max_backoff: stream.max_backoff().max(INITIAL_BACKOFF),
            read_buf: vec![0u8; READ_CHUNK],
            seq: 0,
            stop: StopSignal::new(),
        })
    }

    fn connect(&mut self) -> Result<(), SourceError> {
        info!(url = %self.url, "connecting to MJPEG stream");
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(SourceError::Connect)?;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }

        let boundary = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(boundary_from_content_type)
            .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());

        info!(status = %response.status(), boundary, "connected to MJPEG stream");

        self.connection = Some(Connection {
            response,
            parser: MjpegParser::new(&boundary),
        });
        self.backoff = INITIAL_BACKOFF;
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), SourceError> {
        debug!(url = %self.url, backoff = ?self.backoff, "reconnecting to MJPEG stream");
        let waited = self.stop.sleep(self.backoff);
        self.backoff = self.backoff.saturating_mul(2).min(self.max_backoff);
        if !waited {
            return Ok(());
        }
        self.connect()
    }

    /// Read until the parser yields one complete part.
    fn read_part(&mut self) -> Result<Vec<u8>, SourceError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(SourceError::StreamEnded);
        };
        loop {
            if let Some(part) = connection.parser.next_part() {
                return Ok(part);
            }
            let n = connection
                .response
                .read(&mut self.read_buf)
                .map_err(SourceError::Stream)?;
            if n == 0 {
                return Err(SourceError::StreamEnded);
            }
            connection.parser.push(&self.read_buf[..n]);
        }
    }
}

impl VideoSource for MjpegSource {
    fn open(&mut self) -> Result<(), SourceError> {
        self.connect()
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if self.connection.is_none() {
            self.reconnect()?;
            if self.connection.is_none() {
                // Stop requested during backoff
                return Ok(Frame::empty());
            }
        }

        match self.read_part() {
            Ok(jpeg) => {
                self.seq += 1;
                Ok(Frame::from_jpeg(jpeg, Utc::now().timestamp_millis(), self.seq))
            }
            Err(e) => {
                self.connection = None;
                Err(e)
            }
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }

    fn bind_stop_signal(&mut self, stop: StopSignal) {
        self.stop = stop;
    }
}
