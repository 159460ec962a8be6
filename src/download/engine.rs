//! Batch orchestrator: runs many tasks through one [`TransferEngine`] with a
//! bounded worker pool.
//!
//! # Concurrency Model
//!
//! - Each task runs in its own Tokio task
//! - A semaphore permit is acquired before spawning each task
//! - Permits are released automatically when tasks complete (RAII)
//! - The interruption flag is raced against permit acquisition, so a
//!   cancelled batch stops submitting work immediately
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use sharelink_core::download::{
//!     ClientSettings, DownloadEngine, DownloadTask, FilenameResolver, HttpClient, RetryPolicy,
//!     TransferEngine,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(&ClientSettings::default())?;
//! let transfer = TransferEngine::new(
//!     client,
//!     FilenameResolver::new("downloaded_files"),
//!     RetryPolicy::default(),
//! )?;
//! let engine = DownloadEngine::new(transfer, 5)?;
//! let tasks = vec![DownloadTask::new(
//!     "https://drive.google.com/file/d/abc/view",
//!     "abc",
//!     "https://drive.google.com/uc?export=download&id=abc",
//!     "abc",
//! )];
//! let results = engine.run_batch(tasks, Arc::new(AtomicBool::new(false))).await;
//! println!("{} results", results.len());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::{DownloadResult, DownloadTask, ErrorKind, TransferEngine};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Time in-flight tasks get to finish after the batch is interrupted.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Poll interval of the interruption flag.
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error type for download engine construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Runs batches of tasks concurrently.
#[derive(Debug)]
pub struct DownloadEngine {
    transfer: Arc<TransferEngine>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    grace_period: Duration,
    batch_timeout: Option<Duration>,
}

impl DownloadEngine {
    /// Creates an engine with `concurrency` workers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(transfer))]
    pub fn new(transfer: TransferEngine, concurrency: usize) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = transfer.retry_policy().max_attempts(),
            "creating download engine"
        );

        Ok(Self {
            transfer: Arc::new(transfer),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            grace_period: DEFAULT_GRACE_PERIOD,
            batch_timeout: None,
        })
    }

    /// Sets how long in-flight tasks may run after an interruption.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Interrupts the batch automatically after `timeout`.
    #[must_use]
    pub fn with_batch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs every task and returns exactly one result per task.
    ///
    /// Setting `interrupted` (or reaching the batch timeout, which sets it)
    /// stops new submissions; tasks not yet started are reported as
    /// interrupted, and in-flight tasks are aborted once the grace period
    /// runs out. Aborted transfers leave their `.part` file behind for a
    /// later resume.
    #[instrument(
        skip(self, tasks, interrupted),
        fields(task_count = tasks.len(), concurrency = self.concurrency)
    )]
    pub async fn run_batch(
        &self,
        tasks: Vec<DownloadTask>,
        interrupted: Arc<AtomicBool>,
    ) -> Vec<DownloadResult> {
        let mut results = Vec::with_capacity(tasks.len());
        let mut handles: Vec<(DownloadTask, JoinHandle<DownloadResult>)> = Vec::new();

        let timer = self.batch_timeout.map(|timeout| {
            let flag = Arc::clone(&interrupted);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(timeout_secs = timeout.as_secs(), "batch timeout reached, interrupting");
                flag.store(true, Ordering::SeqCst);
            })
        });

        info!("starting batch");

        let mut pending = tasks.into_iter();
        while let Some(task) = pending.next() {
            if interrupted.load(Ordering::SeqCst) {
                results.push(DownloadResult::interrupted(&task));
                break;
            }

            // Race the permit against the interrupt flag so a cancelled batch
            // does not wait for a free worker.
            let permit = tokio::select! {
                biased;
                () = wait_for_interrupt(&interrupted) => None,
                permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                results.push(DownloadResult::interrupted(&task));
                break;
            };

            let transfer = Arc::clone(&self.transfer);
            let owned = task.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                transfer.download(&owned).await
            });
            handles.push((task, handle));
        }

        let skipped: Vec<DownloadResult> =
            pending.map(|task| DownloadResult::interrupted(&task)).collect();
        if !skipped.is_empty() {
            info!(count = skipped.len(), "tasks not started because the batch was interrupted");
        }
        results.extend(skipped);

        debug!(task_count = handles.len(), "waiting for running tasks");

        let mut deadline: Option<Instant> = None;
        for (task, handle) in handles {
            let result = self
                .collect(&task, handle, &interrupted, &mut deadline)
                .await;
            results.push(result);
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            succeeded,
            failed = results.len() - succeeded,
            interrupted = interrupted.load(Ordering::SeqCst),
            "batch complete"
        );
        results
    }

    /// Waits for one running task, switching to the grace deadline once the
    /// batch is interrupted.
    async fn collect(
        &self,
        task: &DownloadTask,
        mut handle: JoinHandle<DownloadResult>,
        interrupted: &AtomicBool,
        deadline: &mut Option<Instant>,
    ) -> DownloadResult {
        let until = match *deadline {
            Some(until) => until,
            None => {
                tokio::select! {
                    biased;
                    joined = &mut handle => return join_result(task, joined),
                    () = wait_for_interrupt(interrupted) => {}
                }
                let until = Instant::now() + self.grace_period;
                *deadline = Some(until);
                until
            }
        };

        match tokio::time::timeout_at(until, &mut handle).await {
            Ok(joined) => join_result(task, joined),
            Err(_) => {
                handle.abort();
                warn!(link = %task.original_link, "task aborted after interruption");
                DownloadResult::interrupted(task)
            }
        }
    }
}

async fn wait_for_interrupt(interrupted: &AtomicBool) {
    while !interrupted.load(Ordering::SeqCst) {
        tokio::time::sleep(INTERRUPT_POLL_INTERVAL).await;
    }
}

/// Converts a task join outcome into a result; a panicking worker becomes a
/// failed result instead of tearing down the batch.
fn join_result(task: &DownloadTask, joined: Result<DownloadResult, JoinError>) -> DownloadResult {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => DownloadResult::interrupted(task),
        Err(e) => {
            error!(link = %task.original_link, error = %e, "download task panicked");
            DownloadResult::aborted(
                task.original_link.clone(),
                ErrorKind::Internal,
                format!("download task panicked: {e}"),
            )
        }
    }
}
