//! Transfer transport for edgerec.
//!
//! Defines the [`Transport`] seam the coordinator drives, and the HTTP
//! implementation: a streamed multipart/form-data POST that preserves the
//! original filename, carries an optional bearer token, and aborts the
//! connection as soon as the shared pause flag flips mid-transfer.

use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::PauseFlag;
use crate::config::UploadConfig;
use crate::error::{Error, Result};

/// The result of a single transfer attempt.
///
/// A transfer is never partially successful: it is either fully accepted
/// by the receiver or it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The receiver accepted the whole file (HTTP 200 or 201).
    Accepted,
    /// The receiver answered with a non-success status.
    Rejected(u16),
    /// The transfer was aborted because the coordinator was paused.
    Interrupted,
    /// The transfer failed at the connection level (timeout, refused,
    /// dropped, local read error).
    Failed(String),
}

impl TransferOutcome {
    /// Check whether this outcome is a terminal success.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// A transport able to ship one file to the remote endpoint.
///
/// Implementations must be interruptible: when the pause flag flips
/// during a transfer, the attempt ends with
/// [`TransferOutcome::Interrupted`] rather than blocking until
/// completion.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send a single file, streaming its contents to the endpoint.
    async fn send_file(&self, path: &Path, pause: &PauseFlag) -> TransferOutcome;
}

/// A file-content stream that aborts when the pause flag flips.
///
/// Yielding an error from the body stream makes the HTTP client tear
/// down the in-flight connection, which is the only cancellation
/// mechanism the transfer contract assumes.
struct PausableStream {
    inner: ReaderStream<tokio::fs::File>,
    pause: PauseFlag,
}

impl PausableStream {
    fn new(inner: ReaderStream<tokio::fs::File>, pause: PauseFlag) -> Self {
        Self { inner, pause }
    }
}

impl Stream for PausableStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.pause.is_paused() {
            return Poll::Ready(Some(Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "transfer paused for recording priority",
            ))));
        }
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

/// HTTP(S) transport posting multipart/form-data uploads.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
    chunk_size: usize,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport from the upload configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &UploadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_token: config.api_token.clone(),
            chunk_size: config.chunk_size,
            timeout: Duration::from_secs(config.transfer_timeout_secs),
        })
    }

    /// Get the configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send_file(&self, path: &Path, pause: &PauseFlag) -> TransferOutcome {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => return TransferOutcome::Failed(format!("open {}: {e}", path.display())),
        };
        let size = match file.metadata().await {
            Ok(metadata) => metadata.len(),
            Err(e) => return TransferOutcome::Failed(format!("stat {}: {e}", path.display())),
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        let reader = ReaderStream::with_capacity(file, self.chunk_size);
        let body = reqwest::Body::wrap_stream(PausableStream::new(reader, pause.clone()));

        // A fresh Form per attempt gives every attempt a unique multipart
        // boundary token.
        let part = match reqwest::multipart::Part::stream_with_length(body, size)
            .file_name(file_name)
            .mime_str("application/octet-stream")
        {
            Ok(part) => part,
            Err(e) => return TransferOutcome::Failed(format!("build multipart body: {e}")),
        };
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .timeout(self.timeout);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        debug!(path = %path.display(), size_bytes = size, "starting transfer");

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if status == 200 || status == 201 {
                    TransferOutcome::Accepted
                } else {
                    TransferOutcome::Rejected(status)
                }
            }
            Err(e) => {
                if pause.is_paused() {
                    TransferOutcome::Interrupted
                } else {
                    TransferOutcome::Failed(e.to_string())
                }
            }
        }
    }
}
