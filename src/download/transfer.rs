//! Single-task transfer: probe, resolve a target, fetch with resume, verify.
//!
//! [`TransferEngine::download`] runs the whole state machine for one task and
//! always returns a [`DownloadResult`]. The fetch and verify steps are
//! wrapped in the [`RetryPolicy`]; probing and target resolution run once.
//!
//! Bytes are always written to `<target>.part`. The rename to the target is
//! the only step that makes a file visible as complete, and it only happens
//! after the byte count checks out.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Response;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::{header_content_length, header_content_range};
use super::constants::{
    CHUNK_SIZE, DEFAULT_CONFIRM_BASE_URL, MAX_INTERSTITIAL_PAGE_BYTES, PROGRESS_PERCENT_STEP,
    UNKNOWN_SIZE_PROGRESS_STEP,
};
use super::filename::{FilenameResolver, Reservation, Resolution};
use super::interstitial::{self, HtmlWithoutDisposition, InterstitialDetector};
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use super::{DownloadError, DownloadResult, DownloadTask, HttpClient, ProbeInfo};

/// How the partial file is opened for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Continue after the bytes already on disk.
    Append,
    /// Start over from byte zero.
    Truncate,
}

/// Mutable state of one in-flight attempt.
#[derive(Debug)]
pub struct TransferState {
    bytes_written: u64,
    expected_total_bytes: Option<u64>,
    target_path: PathBuf,
    partial_path: PathBuf,
    open_mode: OpenMode,
    next_progress_mark: u64,
}

impl TransferState {
    fn new(
        target_path: &Path,
        partial_path: PathBuf,
        expected_total_bytes: Option<u64>,
        offset: u64,
        open_mode: OpenMode,
    ) -> Self {
        let mut state = Self {
            bytes_written: offset,
            expected_total_bytes,
            target_path: target_path.to_path_buf(),
            partial_path,
            open_mode,
            next_progress_mark: 0,
        };
        state.next_progress_mark = state.progress_mark_after(offset);
        state
    }

    /// Bytes present in the partial file, including resumed ones.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Best known total size, if any.
    #[must_use]
    pub fn expected_total_bytes(&self) -> Option<u64> {
        self.expected_total_bytes
    }

    /// Final path of the file.
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Staging path of the file.
    #[must_use]
    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    /// Open mode chosen when the attempt started.
    #[must_use]
    pub fn open_mode(&self) -> OpenMode {
        self.open_mode
    }

    fn progress_step(&self) -> u64 {
        match self.expected_total_bytes {
            Some(total) => (total.saturating_mul(PROGRESS_PERCENT_STEP) / 100).max(1),
            None => UNKNOWN_SIZE_PROGRESS_STEP,
        }
    }

    fn progress_mark_after(&self, bytes: u64) -> u64 {
        let step = self.progress_step();
        (bytes / step).saturating_add(1).saturating_mul(step)
    }

    fn record(&mut self, len: u64) {
        self.bytes_written = self.bytes_written.saturating_add(len);
        if self.bytes_written < self.next_progress_mark {
            return;
        }
        self.next_progress_mark = self.progress_mark_after(self.bytes_written);
        match self.expected_total_bytes {
            Some(total) => debug!(
                path = %self.partial_path.display(),
                bytes = self.bytes_written,
                total,
                percent = self.bytes_written.saturating_mul(100) / total.max(1),
                "download progress"
            ),
            None => debug!(
                path = %self.partial_path.display(),
                bytes = self.bytes_written,
                "download progress"
            ),
        }
    }
}

/// Runs the transfer state machine for one task at a time.
///
/// Clones of the underlying [`HttpClient`] and [`FilenameResolver`] share
/// their session and reservations, so one engine can serve a whole batch.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    client: HttpClient,
    resolver: FilenameResolver,
    retry_policy: RetryPolicy,
    detector: Arc<dyn InterstitialDetector>,
    confirm_base: Url,
    chunk_size: usize,
}

impl TransferEngine {
    /// Creates an engine with the default confirmation detector and host.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if the built-in confirmation
    /// host cannot be parsed.
    pub fn new(
        client: HttpClient,
        resolver: FilenameResolver,
        retry_policy: RetryPolicy,
    ) -> Result<Self, DownloadError> {
        let confirm_base = Url::parse(DEFAULT_CONFIRM_BASE_URL)
            .map_err(|_| DownloadError::invalid_url(DEFAULT_CONFIRM_BASE_URL))?;
        Ok(Self {
            client,
            resolver,
            retry_policy,
            detector: Arc::new(HtmlWithoutDisposition),
            confirm_base,
            chunk_size: CHUNK_SIZE,
        })
    }

    /// Replaces the confirmation page classifier.
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn InterstitialDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Sets the host that relative confirmation targets are resolved against.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] if `base` is not an absolute URL.
    pub fn with_confirm_base(mut self, base: &str) -> Result<Self, DownloadError> {
        self.confirm_base = Url::parse(base).map_err(|_| DownloadError::invalid_url(base))?;
        Ok(self)
    }

    /// Sets the write buffer size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The retry policy in use.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// The resolver in use.
    #[must_use]
    pub fn resolver(&self) -> &FilenameResolver {
        &self.resolver
    }

    /// Downloads one task. Never fails: every outcome is a [`DownloadResult`].
    #[instrument(skip(self, task), fields(link = %task.original_link))]
    pub async fn download(&self, task: &DownloadTask) -> DownloadResult {
        let probe = self.probe(task).await;

        let reservation = match self.resolver.reserve(
            task,
            probe.filename.as_deref(),
            probe.content_length,
        ) {
            Ok(Resolution::AlreadyPresent(path)) => {
                info!(path = %path.display(), "file already present, skipping");
                return DownloadResult::skipped(task, path);
            }
            Ok(Resolution::Reserved(reservation)) => reservation,
            Err(error) => {
                warn!(error = %error, "could not resolve target path");
                return DownloadResult::failed(task, error, 0);
            }
        };
        debug!(path = %reservation.path().display(), "resolved target path");

        let mut expected = probe.content_length.filter(|size| *size > 0);
        let mut attempt = 1u32;
        loop {
            let outcome = self.attempt(task, &reservation, &mut expected).await;
            match outcome {
                Ok(bytes) => {
                    if bytes == 0 && !task.is_export {
                        warn!(path = %reservation.path().display(), "downloaded file is empty");
                    }
                    info!(
                        path = %reservation.path().display(),
                        bytes,
                        attempts = attempt,
                        "download complete"
                    );
                    let path = reservation.path().to_path_buf();
                    reservation.complete();
                    return DownloadResult::completed(task, path, bytes, attempt);
                }
                Err(error) => {
                    let kind = classify_error(&error);
                    match self.retry_policy.should_retry(kind, attempt) {
                        RetryDecision::Retry {
                            delay,
                            attempt: next_attempt,
                        } => {
                            info!(
                                attempt,
                                next_attempt,
                                delay_ms = delay.as_millis(),
                                error = %error,
                                "retrying download"
                            );
                            tokio::time::sleep(delay).await;
                            attempt = next_attempt;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            warn!(attempts = attempt, error = %error, reason, "download failed");
                            return DownloadResult::failed(task, error, attempt);
                        }
                    }
                }
            }
        }
    }

    /// Header-only probe. Failures degrade to an empty [`ProbeInfo`], and so
    /// does a confirmation page: its size and name are not the file's.
    async fn probe(&self, task: &DownloadTask) -> ProbeInfo {
        match self.client.probe(&task.download_url).await {
            Ok(info) if self.detector.is_interstitial(&info.headers) => {
                debug!("HEAD answered with a confirmation page, ignoring its headers");
                ProbeInfo::default()
            }
            Ok(info) => info,
            Err(error) => {
                debug!(error = %error, "probe failed, continuing without size or name");
                ProbeInfo::default()
            }
        }
    }

    /// One fetch + verify pass. Returns the final size.
    ///
    /// `expected` is refined from the response headers and outlives the
    /// attempt, so a retry after a broken stream can resume.
    async fn attempt(
        &self,
        task: &DownloadTask,
        reservation: &Reservation,
        expected: &mut Option<u64>,
    ) -> Result<u64, DownloadError> {
        let partial = reservation.partial_path();
        let mut existing = partial_size(&partial).await?;

        match *expected {
            Some(total) if existing == total => {
                info!(path = %partial.display(), "partial file already complete");
                finish(&partial, reservation.path()).await?;
                return Ok(total);
            }
            Some(total) if existing > total => {
                warn!(
                    path = %partial.display(),
                    existing,
                    total,
                    "partial file larger than expected, discarding"
                );
                discard(&partial).await?;
                existing = 0;
            }
            _ => {}
        }

        // With no known size the server decides: 206 appends, 200 restarts.
        let range_start = (existing > 0).then_some(existing);
        if let Some(offset) = range_start {
            info!(offset, "resuming partial download");
        }

        let response = self.fetch(task, range_start).await?;
        let mut state = open_state(
            &task.download_url,
            reservation,
            &partial,
            &response,
            *expected,
            range_start,
        )
        .await?;
        *expected = state.expected_total_bytes;

        let file = open_partial(&partial, state.open_mode).await?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);
        let streamed = stream_body(&mut writer, response, &task.download_url, &mut state).await;
        let flushed = writer.flush().await.map_err(|e| DownloadError::io(&partial, e));
        streamed?;
        flushed?;

        verify(&state).await?;
        finish(&partial, reservation.path()).await?;
        Ok(state.bytes_written)
    }

    /// GET with interstitial negotiation.
    async fn fetch(
        &self,
        task: &DownloadTask,
        range_start: Option<u64>,
    ) -> Result<Response, DownloadError> {
        let response = self.client.get(&task.download_url, range_start).await?;
        if !self.detector.is_interstitial(response.headers()) {
            return Ok(response);
        }

        debug!("response looks like a confirmation page");
        let page = interstitial::read_page(
            response,
            &task.download_url,
            MAX_INTERSTITIAL_PAGE_BYTES,
        )
        .await?;
        interstitial::negotiate(
            &self.client,
            self.detector.as_ref(),
            &page,
            &task.original_link,
            &self.confirm_base,
            range_start,
        )
        .await
    }
}

/// Chooses append or truncate from the response status and refines the
/// expected size from the response headers.
async fn open_state(
    url: &str,
    reservation: &Reservation,
    partial: &Path,
    response: &Response,
    expected: Option<u64>,
    range_start: Option<u64>,
) -> Result<TransferState, DownloadError> {
    let headers = response.headers();
    let is_partial_content = response.status().as_u16() == 206;
    let content_length = header_content_length(headers);
    let content_range = header_content_range(headers);

    let (offset, mode) = match range_start {
        Some(requested) if is_partial_content => {
            if let Some(range) = content_range
                && range.start != requested
            {
                warn!(
                    requested,
                    actual = range.start,
                    "server resumed at the wrong offset, discarding partial file"
                );
                discard(partial).await?;
                return Err(DownloadError::RangeMismatch {
                    url: url.to_string(),
                    requested,
                    actual: range.start,
                });
            }
            (requested, OpenMode::Append)
        }
        Some(_) => {
            info!("server sent the full file, restarting from zero");
            (0, OpenMode::Truncate)
        }
        None => (0, OpenMode::Truncate),
    };

    let announced = if is_partial_content {
        content_range
            .and_then(|range| range.total)
            .or_else(|| content_length.map(|len| offset.saturating_add(len)))
    } else {
        content_length
    };
    let expected = announced.filter(|size| *size > 0).or(expected);

    Ok(TransferState::new(
        reservation.path(),
        partial.to_path_buf(),
        expected,
        offset,
        mode,
    ))
}

async fn partial_size(partial: &Path) -> Result<u64, DownloadError> {
    match tokio::fs::metadata(partial).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DownloadError::io(partial, e)),
    }
}

async fn discard(partial: &Path) -> Result<(), DownloadError> {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DownloadError::io(partial, e)),
    }
}

async fn open_partial(partial: &Path, mode: OpenMode) -> Result<File, DownloadError> {
    let result = match mode {
        OpenMode::Append => {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(partial)
                .await
        }
        OpenMode::Truncate => File::create(partial).await,
    };
    result.map_err(|e| DownloadError::io(partial, e))
}

/// Streams the body into `writer` in arrival order.
async fn stream_body(
    writer: &mut BufWriter<File>,
    response: Response,
    url: &str,
    state: &mut TransferState,
) -> Result<(), DownloadError> {
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(&state.partial_path, e))?;
        state.record(chunk.len() as u64);
    }
    Ok(())
}

/// Compares the bytes on disk with the expected size.
async fn verify(state: &TransferState) -> Result<(), DownloadError> {
    let Some(expected) = state.expected_total_bytes else {
        return Ok(());
    };
    let written = state.bytes_written;
    if written < expected {
        return Err(DownloadError::truncated(
            &state.partial_path,
            expected,
            written,
        ));
    }
    if written > expected {
        discard(&state.partial_path).await?;
        return Err(DownloadError::integrity(
            &state.target_path,
            expected,
            written,
        ));
    }
    Ok(())
}

/// Renames the partial file into place. An existing target is never replaced.
async fn finish(partial: &Path, target: &Path) -> Result<(), DownloadError> {
    let target_exists = tokio::fs::try_exists(target)
        .await
        .map_err(|e| DownloadError::io(target, e))?;
    if target_exists {
        return Err(DownloadError::RenameCollision {
            path: target.to_path_buf(),
        });
    }
    tokio::fs::rename(partial, target)
        .await
        .map_err(|e| DownloadError::io(target, e))
}
