use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use bytes::BytesMut;
use chrono::Utc;
use futures_util::StreamExt;
use image::ImageReader;
use kernel_lab_common::config::CameraConfig;
use kernel_lab_common::frame::{CapturedFrame, FrameError, PixelBuffer};
use tracing::{debug, info};

/// Multipart boundary name assumed when the response does not declare one.
const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("cannot open camera: {0}")]
    HttpConnect(reqwest::Error),
    #[error("cannot open camera: HTTP status {0}")]
    HttpStatus(u16),
    #[error("can't receive frame: {0}")]
    HttpStream(reqwest::Error),
    #[error("can't receive frame: stream ended before a complete frame")]
    NoFrame,
    #[error("cannot open camera: failed to read {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("camera mode \"file\" requires camera.path")]
    MissingPath,
    #[error("unknown camera mode {0:?}, expected \"snapshot\", \"mjpeg\" or \"file\"")]
    UnknownMode(String),
    #[error("can't receive frame: failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("can't receive frame: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone)]
enum CaptureMode {
    /// One `GET` returns one encoded image.
    Snapshot { url: String },
    /// Multipart MJPEG stream; the first complete part is used.
    Mjpeg { url: String },
    File { path: PathBuf },
}

/// Grabs a single grayscale frame per call.
#[derive(Debug, Clone)]
pub struct FrameSource {
    mode: CaptureMode,
    client: reqwest::Client,
}

impl FrameSource {
    pub fn from_config(config: &CameraConfig) -> Result<Self, CaptureError> {
        let mode = match config.mode.as_str() {
            "snapshot" => CaptureMode::Snapshot {
                url: config.url.clone(),
            },
            "mjpeg" => CaptureMode::Mjpeg {
                url: config.url.clone(),
            },
            "file" => CaptureMode::File {
                path: config.path.clone().ok_or(CaptureError::MissingPath)?,
            },
            other => return Err(CaptureError::UnknownMode(other.to_string())),
        };
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(CaptureError::HttpConnect)?;
        Ok(Self { mode, client })
    }

    /// URL or path the frames come from.
    pub fn describe(&self) -> String {
        match &self.mode {
            CaptureMode::Snapshot { url } | CaptureMode::Mjpeg { url } => url.clone(),
            CaptureMode::File { path } => path.display().to_string(),
        }
    }

    pub async fn capture(&self) -> Result<CapturedFrame, CaptureError> {
        let encoded = match &self.mode {
            CaptureMode::Snapshot { url } => self.fetch_snapshot(url).await?,
            CaptureMode::Mjpeg { url } => self.fetch_first_mjpeg_part(url).await?,
            CaptureMode::File { path } => tokio::fs::read(path)
                .await
                .map_err(|e| CaptureError::ReadFile(path.display().to_string(), e))?,
        };
        let captured_at_ms = Utc::now().timestamp_millis();
        let pixels = decode_grayscale(&encoded)?;
        info!(
            source = %self.describe(),
            bytes = encoded.len(),
            width = pixels.width(),
            height = pixels.height(),
            "captured frame"
        );
        Ok(CapturedFrame::new(pixels, captured_at_ms, self.describe()))
    }

    async fn fetch_snapshot(&self, url: &str) -> Result<Vec<u8>, CaptureError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(CaptureError::HttpConnect)?;
        if !response.status().is_success() {
            return Err(CaptureError::HttpStatus(response.status().as_u16()));
        }
        let body = response.bytes().await.map_err(CaptureError::HttpStream)?;
        Ok(body.to_vec())
    }

    async fn fetch_first_mjpeg_part(&self, url: &str) -> Result<Vec<u8>, CaptureError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(CaptureError::HttpConnect)?;
        if !response.status().is_success() {
            return Err(CaptureError::HttpStatus(response.status().as_u16()));
        }
        let boundary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(boundary_from_content_type)
            .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());
        debug!(status = %response.status(), boundary = %boundary, "connected to MJPEG stream");

        let mut parser = MjpegParser::with_boundary(&boundary);
        let mut byte_stream = response.bytes_stream();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(CaptureError::HttpStream)?;
            if let Some(jpeg) = parser.push(&chunk) {
                // Dropping the stream closes the connection.
                return Ok(jpeg);
            }
        }
        Err(CaptureError::NoFrame)
    }
}

/// Decode any supported image format and convert it to 8-bit luma.
pub fn decode_grayscale(encoded: &[u8]) -> Result<PixelBuffer, CaptureError> {
    let img = ImageReader::new(Cursor::new(encoded))
        .with_guessed_format()
        .map_err(|e| CaptureError::Decode(image::ImageError::IoError(e)))?
        .decode()?;
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();
    Ok(PixelBuffer::from_vec(w as usize, h as usize, gray.into_raw())?)
}

/// The `boundary` parameter of a `multipart/x-mixed-replace` content type,
/// without quotes or a leading `--`.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        let value = value.strip_prefix("--").unwrap_or(value);
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--<name>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental parser that yields the first complete JPEG part of a
/// `multipart/x-mixed-replace` body.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    /// `--<name>\r\n`
    boundary: Vec<u8>,
    /// Offset in `buffer` from which to resume the boundary search.
    scan_from: usize,
}

impl MjpegParser {
    /// Parser for the `--frame` boundary.
    pub fn new() -> Self {
        Self::with_boundary(DEFAULT_BOUNDARY)
    }

    pub fn with_boundary(name: &str) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            boundary: format!("--{name}\r\n").into_bytes(),
            scan_from: 0,
        }
    }

    /// Feed the next chunk. Returns the first JPEG once it is complete.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    let Some(pos) = find_subsequence(&self.buffer, &self.boundary) else {
                        // Keep only a tail that could hold a split boundary.
                        let keep = self.boundary.len();
                        if self.buffer.len() > keep {
                            let _ = self.buffer.split_to(self.buffer.len() - keep);
                        }
                        return None;
                    };
                    let _ = self.buffer.split_to(pos + self.boundary.len());
                    self.state = ParseState::SeekingHeaderEnd;
                }
                ParseState::SeekingHeaderEnd => {
                    let pos = find_subsequence(&self.buffer, HEADER_END)?;
                    let _ = self.buffer.split_to(pos + HEADER_END.len());
                    self.scan_from = 0;
                    self.state = ParseState::CollectingJpeg;
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.scan_from..], &self.boundary)
                    else {
                        self.scan_from = self.buffer.len().saturating_sub(self.boundary.len());
                        return None;
                    };
                    let jpeg_end = self.scan_from + pos;
                    // Strip trailing \r\n before boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let jpeg = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + self.boundary.len());
                    self.state = ParseState::SeekingHeaderEnd;
                    if !jpeg.is_empty() {
                        return Some(jpeg);
                    }
                }
            }
        }
    }
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
