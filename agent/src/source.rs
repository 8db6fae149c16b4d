use std::time::Duration;

use accident_watch_common::frame::Frame;
use bytes::BytesMut;
use chrono::Local;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// A live camera: produces the next frame or fails.
///
/// Any error is terminal for the capture loop — there is no retry policy,
/// a source that cannot deliver a frame ends the run (fail closed).
pub trait FrameSource {
    async fn next_frame(&mut self) -> Result<Frame, SourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("camera connection failed: {0}")]
    Connect(reqwest::Error),
    #[error("camera stream error: {0}")]
    Stream(reqwest::Error),
    #[error("camera returned HTTP status {0}")]
    Status(u16),
    #[error("camera stream ended")]
    EndOfStream,
}

// ---------------------------------------------------------------------------
// MJPEG multipart stream source
// ---------------------------------------------------------------------------

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental parser extracting JPEG parts from a multipart byte stream.
///
/// Bytes go in via [`push`](Self::push); complete frames come out via
/// [`next_jpeg`](Self::next_jpeg). Parse state survives across chunk
/// boundaries, so a boundary marker split over two chunks still matches.
struct MultipartParser {
    buffer: BytesMut,
    state: ParseState,
    /// Watermark into `buffer` below which a boundary was already ruled
    /// out, so each new chunk is only scanned once.
    jpeg_start: usize,
}

impl MultipartParser {
    fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Advance the parser over the buffered bytes, returning the next
    /// complete JPEG part if one is available.
    fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        // Discard headers
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        return None;
                    }
                }
                ParseState::CollectingJpeg => {
                    // Look for the next boundary to know where the JPEG ends
                    if let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY) {
                        let jpeg_end = self.jpeg_start + pos;
                        // Strip trailing \r\n before boundary
                        let end = if jpeg_end >= 2
                            && self.buffer[jpeg_end - 2] == b'\r'
                            && self.buffer[jpeg_end - 1] == b'\n'
                        {
                            jpeg_end - 2
                        } else {
                            jpeg_end
                        };

                        let jpeg = self.buffer[..end].to_vec();

                        // Advance past the boundary
                        let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::SeekingHeaderEnd;

                        if !jpeg.is_empty() {
                            return Some(jpeg);
                        }
                    } else {
                        // No boundary yet; remember how far we scanned
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        return None;
                    }
                }
            }
        }
    }
}

/// Camera source reading an MJPEG multipart HTTP stream.
pub struct MjpegSource {
    stream: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    parser: MultipartParser,
}

impl MjpegSource {
    pub async fn connect(url: &str) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(SourceError::Connect)?;
        let response = client.get(url).send().await.map_err(SourceError::Connect)?;

        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }

        info!(status = %response.status(), "connected to MJPEG stream");

        Ok(Self {
            stream: response.bytes_stream().boxed(),
            parser: MultipartParser::new(),
        })
    }
}

impl FrameSource for MjpegSource {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        loop {
            if let Some(jpeg) = self.parser.next_jpeg() {
                return Ok(Frame::new(jpeg, Local::now()));
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => self.parser.push(&chunk),
                Some(Err(e)) => return Err(SourceError::Stream(e)),
                None => return Err(SourceError::EndOfStream),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Polling source
// ---------------------------------------------------------------------------

/// Fallback source: fetch single JPEG frames on a fixed interval.
pub struct PollingSource {
    client: reqwest::Client,
    url: String,
    ticker: tokio::time::Interval,
}

impl PollingSource {
    pub fn new(url: &str, interval: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(SourceError::Connect)?;
        let mut ticker = tokio::time::interval(interval);
        // A capture pause must not be repaid with a burst of ticks.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Ok(Self {
            client,
            url: url.to_string(),
            ticker,
        })
    }
}

impl FrameSource for PollingSource {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        self.ticker.tick().await;
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(SourceError::Stream)?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }
        let jpeg = response.bytes().await.map_err(SourceError::Stream)?.to_vec();
        Ok(Frame::new(jpeg, Local::now()))
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
