//! File download responder.
//!
//! Streams a file from disk as a series of download progress events followed
//! by a single response carrying the whole body. The stream can be cancelled
//! through its [`CancellationToken`] or by dropping it; either way the file
//! handle is released.

use crate::error::MockError;
use crate::response::{HttpEvent, IntoReply, MockReply, MockResponse, ResponseStream};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Where to read from and how to present the download.
#[derive(Debug, Clone)]
pub struct FileMockOptions {
    pub path: PathBuf,
    /// Name in `Content-Disposition`; defaults to the file name of `path`
    pub filename: Option<String>,
    /// Defaults to `application/octet-stream`
    pub content_type: Option<String>,
    /// Extra headers on the final response
    pub headers: HashMap<String, String>,
    /// Pause before each chunk read
    pub chunk_delay: Option<Duration>,
    pub chunk_size: usize,
}

impl FileMockOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filename: None,
            content_type: None,
            headers: HashMap::new(),
            chunk_delay: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    fn disposition_name(&self) -> String {
        self.filename.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "download".to_string())
        })
    }
}

/// A started download: the event stream and the token that stops it.
pub struct FileDownload {
    stream: ResponseStream,
    cancel: CancellationToken,
}

impl FileDownload {
    /// Token that stops the stream at its next suspension point.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn into_stream(self) -> ResponseStream {
        self.stream
    }

    pub fn stream_mut(&mut self) -> &mut ResponseStream {
        &mut self.stream
    }
}

impl IntoReply for FileDownload {
    fn into_reply(self) -> anyhow::Result<MockReply> {
        Ok(MockReply::Stream(self.stream))
    }
}

/// Start streaming the file described by `options`.
///
/// Nothing is opened until the stream is first polled.
pub fn file_response(options: FileMockOptions) -> FileDownload {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let stream = stream::unfold(DownloadState::Pending(options), move |state| {
        let token = token.clone();
        async move { advance(state, token).await }
    })
    .boxed();

    FileDownload { stream, cancel }
}

enum DownloadState {
    Pending(FileMockOptions),
    Reading(Transfer),
    Done,
}

struct Transfer {
    file: File,
    options: FileMockOptions,
    total: u64,
    data: Vec<u8>,
}

type Step = Option<(Result<HttpEvent, MockError>, DownloadState)>;

async fn advance(mut state: DownloadState, cancel: CancellationToken) -> Step {
    loop {
        match state {
            DownloadState::Done => return None,
            DownloadState::Pending(options) => {
                let opened = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(path = %options.path.display(), "Download cancelled before open");
                        return None;
                    }
                    opened = open(&options.path) => opened,
                };
                match opened {
                    Ok((file, total)) => {
                        state = DownloadState::Reading(Transfer {
                            file,
                            options,
                            total,
                            data: Vec::with_capacity(total as usize),
                        });
                    }
                    Err(err) => {
                        return Some((Ok(read_failure(&options.path, &err)), DownloadState::Done))
                    }
                }
            }
            DownloadState::Reading(mut transfer) => {
                let delay = transfer.options.chunk_delay;
                let size = transfer.options.chunk_size;
                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(
                            path = %transfer.options.path.display(),
                            loaded = transfer.data.len(),
                            "Download cancelled"
                        );
                        return None;
                    }
                    read = read_chunk(&mut transfer.file, delay, size) => read,
                };

                return match read {
                    Ok(chunk) if chunk.is_empty() => {
                        let response = finish(transfer);
                        Some((Ok(HttpEvent::Response(response)), DownloadState::Done))
                    }
                    Ok(chunk) => {
                        transfer.data.extend_from_slice(&chunk);
                        let event = HttpEvent::DownloadProgress {
                            loaded: transfer.data.len() as u64,
                            total: Some(transfer.total),
                        };
                        Some((Ok(event), DownloadState::Reading(transfer)))
                    }
                    Err(err) => {
                        let response = read_failure(&transfer.options.path, &err);
                        Some((Ok(response), DownloadState::Done))
                    }
                };
            }
        }
    }
}

async fn open(path: &Path) -> std::io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let total = file.metadata().await?.len();
    Ok((file, total))
}

async fn read_chunk(file: &mut File, delay: Option<Duration>, size: usize) -> std::io::Result<Vec<u8>> {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let mut buf = vec![0u8; size];
    let n = file.read(&mut buf).await?;
    buf.truncate(n);
    Ok(buf)
}

fn finish(transfer: Transfer) -> MockResponse {
    let Transfer { options, data, .. } = transfer;
    let content_type = options
        .content_type
        .clone()
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let mut response = MockResponse::ok(data)
        .with_header("Content-Type", content_type)
        .with_header(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", options.disposition_name()),
        );
    for (name, value) in options.headers {
        response = response.with_header(name, value);
    }
    response
}

fn read_failure(path: &Path, err: &std::io::Error) -> HttpEvent {
    warn!(path = %path.display(), error = %err, "Failed to read mock file");
    HttpEvent::Response(MockResponse::new(500).with_body(format!(
        "Failed to read file {}: {}",
        path.display(),
        err
    )))
}
