use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use kiln_types::{DownloadItem, DownloadTask};

use crate::error::FetchError;

/// How to treat a destination file that already has bytes in it.
///
/// The interactive variant belongs to the CLI; daemon and detached paths use
/// [`ResumePolicy::ResumeAlways`] and never touch the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    /// Ask on the terminal, cortex-style: "Continue download [Y/n]".
    Prompted,
    /// Resume partial files, treat complete files as done.
    #[default]
    ResumeAlways,
    /// Truncate and fetch from byte zero.
    RestartAlways,
}

/// Invoked after a synchronous task finishes successfully.
pub type TaskCallback = Box<dyn FnOnce(&DownloadTask) + Send>;

/// Invoked once every worker of a detached task has reached a terminal state.
pub type DetachedCallback = Box<dyn FnOnce(TaskSummary) + Send>;

/// Terminal report of a detached task.
#[derive(Debug)]
pub struct TaskSummary {
    pub task_id: String,
    pub completed: Vec<PathBuf>,
    pub failed: Vec<ItemFailure>,
}

impl TaskSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One worker's failure, kept as a string so the summary stays `Send + Debug`.
#[derive(Debug)]
pub struct ItemFailure {
    pub url: String,
    pub local_path: PathBuf,
    pub error: String,
}

enum ItemOutcome {
    Ok(PathBuf),
    Failed(ItemFailure),
}

/// HTTPS file fetcher with probe, resume and detached fan-out.
#[derive(Clone)]
pub struct DownloadService {
    client: Client,
    retry_count: usize,
    retry_delay: Duration,
}

impl Default for DownloadService {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadService {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            retry_count: 3,
            retry_delay: Duration::from_secs(3),
        }
    }

    /// Set the number of probe retries (default: `3`).
    pub fn set_retry_count(mut self, count: usize) -> Self {
        self.retry_count = count;
        self
    }

    /// Set the delay between probe retries (default: 3 s).
    pub fn set_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// HEAD-style size probe, following redirects.
    ///
    /// Returns `0` when the remote does not report a length; callers treat
    /// that as "unknown size" and disable resume for the item.
    pub async fn probe_size(&self, url: &str) -> Result<u64, FetchError> {
        let mut last_err: Option<reqwest::Error> = None;
        for attempt in 0..self.retry_count.max(1) {
            match self.probe_once(url).await {
                Ok(size) => return Ok(size),
                Err(e) => {
                    debug!(url, attempt, error = %e, "size probe failed");
                    last_err = Some(e);
                    if attempt + 1 < self.retry_count {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(FetchError::Probe {
            url: url.to_owned(),
            // retry_count is clamped to at least one attempt above
            source: last_err.expect("at least one probe attempt"),
        })
    }

    async fn probe_once(&self, url: &str) -> Result<u64, reqwest::Error> {
        let resp = self.client.head(url).send().await?.error_for_status()?;
        Ok(resp.content_length().unwrap_or(0))
    }

    /// Execute a task synchronously.
    ///
    /// Pre-flight: every item is probed and `expected_bytes` populated; if
    /// any probe fails the task aborts before a single byte is written. Items
    /// are then fetched in the order supplied.
    pub async fn run_task(
        &self,
        task: &mut DownloadTask,
        policy: ResumePolicy,
        on_complete: Option<TaskCallback>,
    ) -> Result<(), FetchError> {
        info!(task_id = %task.id, items = task.items.len(), "validating download items");
        for item in &mut task.items {
            let size = self.probe_size(&item.url).await?;
            item.expected_bytes = Some(size);
        }

        for item in &task.items {
            info!(task_id = %task.id, url = %item.url, "start downloading");
            self.fetch_item(item, policy).await?;
        }

        if let Some(cb) = on_complete {
            cb(task);
        }
        Ok(())
    }

    /// Execute a task detached: one worker per item, return immediately.
    ///
    /// Workers are independent; a failed item is logged and does not stop its
    /// siblings. Each worker reports a terminal status to a supervisor, which
    /// invokes `on_complete` once counts reach the item total.
    pub fn run_task_detached(&self, task: DownloadTask, on_complete: Option<DetachedCallback>) {
        let total = task.items.len();
        let task_id = task.id.clone();
        let (tx, mut rx) = mpsc::channel::<ItemOutcome>(total.max(1));

        for item in task.items {
            let service = self.clone();
            let tx = tx.clone();
            let worker_task_id = task_id.clone();
            tokio::spawn(async move {
                let outcome = match service.fetch_detached_item(&item).await {
                    Ok(()) => ItemOutcome::Ok(item.local_path.clone()),
                    Err(e) => {
                        warn!(
                            task_id = %worker_task_id,
                            url = %item.url,
                            error = %e,
                            "download worker failed; partial file kept for resume"
                        );
                        ItemOutcome::Failed(ItemFailure {
                            url: item.url.clone(),
                            local_path: item.local_path.clone(),
                            error: e.to_string(),
                        })
                    }
                };
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        tokio::spawn(async move {
            let mut summary = TaskSummary {
                task_id,
                completed: Vec::new(),
                failed: Vec::new(),
            };
            let mut seen = 0usize;
            while let Some(outcome) = rx.recv().await {
                seen += 1;
                match outcome {
                    ItemOutcome::Ok(path) => summary.completed.push(path),
                    ItemOutcome::Failed(failure) => summary.failed.push(failure),
                }
                if seen == total {
                    break;
                }
            }
            info!(
                task_id = %summary.task_id,
                completed = summary.completed.len(),
                failed = summary.failed.len(),
                "detached task finished"
            );
            if let Some(cb) = on_complete {
                cb(summary);
            }
        });
    }

    /// Probe-then-fetch for one detached worker. Never prompts.
    async fn fetch_detached_item(&self, item: &DownloadItem) -> Result<(), FetchError> {
        let mut item = item.clone();
        item.expected_bytes = Some(self.probe_size(&item.url).await?);
        self.fetch_item(&item, ResumePolicy::ResumeAlways).await
    }

    /// Fetch one item honouring the resume protocol.
    pub async fn fetch_item(
        &self,
        item: &DownloadItem,
        policy: ResumePolicy,
    ) -> Result<(), FetchError> {
        debug!(url = %item.url, path = %item.local_path.display(), "fetching item");

        if let Some(parent) = item.local_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let expected = item.expected_bytes.unwrap_or(0);
        let mut resume_from = 0u64;

        // expected == 0 means the remote never told us a size: resume is
        // meaningless, so any existing bytes are overwritten.
        if expected > 0 {
            if let Ok(meta) = fs::metadata(&item.local_path).await {
                let have = meta.len();
                if have > 0 && have < expected {
                    let missing = expected - have;
                    let resume = match policy {
                        ResumePolicy::ResumeAlways => true,
                        ResumePolicy::RestartAlways => false,
                        ResumePolicy::Prompted => {
                            info!(missing, "found unfinished download");
                            confirm(&format!(
                                "Found unfinished download ({missing} bytes missing). Continue download [Y/n]: "
                            ))
                        }
                    };
                    if resume {
                        resume_from = have;
                    }
                } else if have >= expected {
                    match policy {
                        ResumePolicy::ResumeAlways => {
                            debug!(path = %item.local_path.display(), "already downloaded");
                            return Ok(());
                        }
                        ResumePolicy::RestartAlways => {}
                        ResumePolicy::Prompted => {
                            if !confirm("Already downloaded. Re-download [Y/n]: ") {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }

        self.stream_to_file(item, expected, resume_from).await
    }

    async fn stream_to_file(
        &self,
        item: &DownloadItem,
        expected: u64,
        mut resume_from: u64,
    ) -> Result<(), FetchError> {
        let mut request = self.client.get(&item.url);
        if resume_from > 0 {
            request = request.header(RANGE, format!("bytes={resume_from}-"));
        }
        let resp = request.send().await?.error_for_status()?;

        // A server that ignores Range replies 200 with the full body; fall
        // back to a clean restart so we don't append a duplicate prefix.
        if resume_from > 0 && resp.status() != StatusCode::PARTIAL_CONTENT {
            debug!(url = %item.url, "server ignored range request; restarting");
            resume_from = 0;
        }

        let mut file = if resume_from > 0 {
            fs::OpenOptions::new()
                .append(true)
                .open(&item.local_path)
                .await?
        } else {
            fs::File::create(&item.local_path).await?
        };

        // Checksums cover the whole file; a resumed transfer never saw the
        // prefix, so verification is skipped with a note.
        let mut hasher = match (&item.checksum, resume_from) {
            (Some(_), 0) => Some(Sha256::new()),
            (Some(_), _) => {
                debug!(path = %item.local_path.display(), "resumed transfer; skipping checksum");
                None
            }
            (None, _) => None,
        };

        let mut stream = resp.bytes_stream();
        let mut written = resume_from;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(h) = hasher.as_mut() {
                h.update(&chunk);
            }
        }
        file.flush().await?;

        if expected > 0 && written != expected {
            return Err(FetchError::SizeMismatch {
                path: item.local_path.clone(),
                expected,
                actual: written,
            });
        }

        if let (Some(h), Some(want)) = (hasher, &item.checksum) {
            let got = hex_digest(h);
            if !got.eq_ignore_ascii_case(want) {
                return Err(FetchError::ChecksumMismatch {
                    path: item.local_path.clone(),
                });
            }
        }

        info!(path = %item.local_path.display(), bytes = written, "download complete");
        Ok(())
    }
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Terminal yes/no prompt; empty answer means yes, like the original tool.
fn confirm(prompt: &str) -> bool {
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "" | "y" | "Y")
}
