//! Payload Download
//!
//! Streams an update payload to a single well-known file, counts bytes,
//! sniffs the first four bytes to tell archives from raw bundles, and
//! reports progress after every chunk.
//!
//! There is no protection against two downloads writing the same file at
//! once; callers serialize downloads per package root.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::ACCEPT_ENCODING;
use serde_json::{json, Value};

use super::error::{Result, UpdateError};

/// Read buffer size for payload streaming
pub const DOWNLOAD_BUFFER_SIZE: usize = 256 * 1024;

/// ZIP local file header signature
pub const ZIP_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

const USER_AGENT: &str = concat!("ota-updater/", env!("CARGO_PKG_VERSION"));

/// What the downloaded bytes turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// ZIP archive to be extracted into the package folder
    Archive,
    /// The bundle file itself
    RawBundle,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archive => write!(f, "archive"),
            Self::RawBundle => write!(f, "raw bundle"),
        }
    }
}

/// Collects the first four bytes of a stream regardless of chunking
#[derive(Debug, Default)]
struct HeaderSniffer {
    header: [u8; 4],
    filled: usize,
}

impl HeaderSniffer {
    fn feed(&mut self, chunk: &[u8]) {
        let take = (self.header.len() - self.filled).min(chunk.len());
        self.header[self.filled..self.filled + take].copy_from_slice(&chunk[..take]);
        self.filled += take;
    }

    fn kind(&self) -> PayloadKind {
        if self.filled == self.header.len() && self.header == ZIP_SIGNATURE {
            PayloadKind::Archive
        } else {
            PayloadKind::RawBundle
        }
    }
}

/// Progress of a running download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Declared payload size, `None` when the server did not send one
    pub total_bytes: Option<u64>,
    pub received_bytes: u64,
}

impl DownloadProgress {
    pub fn is_completed(&self) -> bool {
        self.total_bytes == Some(self.received_bytes)
    }

    /// Percentage received, if the total is known
    pub fn percentage(&self) -> Option<u8> {
        match self.total_bytes {
            Some(0) => Some(100),
            Some(total) => Some(((self.received_bytes as f64 / total as f64) * 100.0).min(100.0) as u8),
            None => None,
        }
    }

    /// Event payload for the host runtime; an unknown total is `-1`
    pub fn to_json(&self) -> Value {
        let total = self.total_bytes.map_or(-1, |t| t as i64);
        json!({
            "totalBytes": total,
            "receivedBytes": self.received_bytes,
        })
    }
}

/// An opened payload stream
pub struct Payload {
    pub reader: Box<dyn Read + Send>,
    pub content_length: Option<u64>,
}

/// Source of payload streams
pub trait Transport: Send + Sync {
    fn open(&self, url: &str) -> Result<Payload>;
}

/// HTTP(S) transport over a blocking reqwest client
pub struct HttpTransport {
    pub(super) client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Create a transport; `timeout` of `None` waits indefinitely
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &str) -> Result<Payload> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| UpdateError::MalformedDescriptor(format!("Invalid download URL {}: {}", url, e)))?;

        // Byte counts are checked against Content-Length, so no transfer encoding
        let response = self
            .client
            .get(parsed)
            .header(ACCEPT_ENCODING, "identity")
            .send()?;

        if !response.status().is_success() {
            return Err(UpdateError::Network(format!("HTTP {}", response.status())));
        }

        let content_length = response.content_length();
        Ok(Payload {
            reader: Box::new(response),
            content_length,
        })
    }
}

/// Cooperative cancellation flag, checked between chunks
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Download result with metadata
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub received_bytes: u64,
    pub total_bytes: Option<u64>,
    pub kind: PayloadKind,
}

/// Download manager for update payloads
#[derive(Clone)]
pub struct Downloader {
    transport: Arc<dyn Transport>,
    buffer_size: usize,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            buffer_size: DOWNLOAD_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Download `url` into `dest`, overwriting it.
    ///
    /// On failure the partial file is removed.
    pub fn download<F>(
        &self,
        url: &str,
        dest: &Path,
        mut on_progress: F,
        cancel: &CancelToken,
    ) -> Result<DownloadResult>
    where
        F: FnMut(DownloadProgress),
    {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        tracing::info!("Starting download from {}", url);
        let payload = self.transport.open(url)?;

        let result = self.write_payload(payload, dest, &mut on_progress, cancel);
        match &result {
            Ok(download) => tracing::info!(
                "Download complete: {} bytes ({})",
                download.received_bytes,
                download.kind
            ),
            Err(e) => {
                tracing::warn!("Download from {} failed: {}", url, e);
                if let Err(e) = fs::remove_file(dest) {
                    if e.kind() != ErrorKind::NotFound {
                        tracing::warn!("Unable to remove partial download {:?}: {}", dest, e);
                    }
                }
            }
        }
        result
    }

    fn write_payload(
        &self,
        payload: Payload,
        dest: &Path,
        on_progress: &mut dyn FnMut(DownloadProgress),
        cancel: &CancelToken,
    ) -> Result<DownloadResult> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let Payload {
            mut reader,
            content_length,
        } = payload;

        let mut writer = BufWriter::with_capacity(self.buffer_size, File::create(dest)?);
        let mut buffer = vec![0u8; self.buffer_size];
        let mut sniffer = HeaderSniffer::default();
        let mut received_bytes: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(UpdateError::Cancelled);
            }

            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(UpdateError::Network(e.to_string())),
            };

            let chunk = &buffer[..read];
            sniffer.feed(chunk);
            writer.write_all(chunk)?;
            received_bytes += read as u64;

            on_progress(DownloadProgress {
                total_bytes: content_length,
                received_bytes,
            });
        }

        writer
            .into_inner()
            .map_err(|e| UpdateError::Storage(e.into_error()))?
            .sync_all()?;

        if let Some(expected) = content_length {
            if expected != received_bytes {
                return Err(UpdateError::ContentIntegrity {
                    expected,
                    received: received_bytes,
                });
            }
        }

        let kind = sniffer.kind();
        tracing::debug!("Classified payload as {}", kind);

        Ok(DownloadResult {
            path: dest.to_path_buf(),
            received_bytes,
            total_bytes: content_length,
            kind,
        })
    }
}
