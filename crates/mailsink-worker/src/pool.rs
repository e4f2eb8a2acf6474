//! Worker pool and per-batch processing
//!
//! Each worker is an independent task: it pulls one batch at a time from the
//! dispatch queue, parses every file, makes a single bulk import call, writes
//! terminal status rows, and finalizes each file per its outcome. A worker
//! owns its status connection and index client; nothing but the queue and
//! the tenant cache is shared. A failing batch never takes the worker down:
//! the remaining files are quarantined best-effort and the loop continues.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use mailsink_common::error::{MailError, Result};
use mailsink_common::types::{BatchImportResult, Mail, MailBatch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatch::{recv_next, SharedReceiver};
use crate::index::MailIndex;
use crate::lifecycle;
use crate::status::{StatusConn, StatusStore};

/// Staging directories a worker needs to finalize files.
#[derive(Debug, Clone)]
pub struct WorkerDirs {
    pub run_dir: PathBuf,
    pub buggy_dir: PathBuf,
}

/// Handles to the spawned workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to stop, bounded per worker.
    pub async fn join(self, timeout: Duration) {
        for handle in self.handles {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!(?timeout, "Worker did not stop in time; abandoning join");
            }
        }
    }
}

/// Spawn `count` workers pulling from the shared receiver.
///
/// The factory runs inside each worker task so every worker constructs and
/// owns its index client; the status connection is opened lazily on the
/// first batch. Both are released when the worker's loop ends.
pub fn spawn_workers<I, F>(
    count: usize,
    rx: SharedReceiver,
    token: CancellationToken,
    store: StatusStore,
    dirs: WorkerDirs,
    index_factory: F,
) -> WorkerPool
where
    I: MailIndex + 'static,
    F: Fn(usize) -> Result<I> + Clone + Send + 'static,
{
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("worker-{}", i + 1);
        let rx = rx.clone();
        let token = token.clone();
        let store = store.clone();
        let dirs = dirs.clone();
        let factory = index_factory.clone();
        handles.push(tokio::spawn(async move {
            let index = match factory(i) {
                Ok(index) => index,
                Err(e) => {
                    error!(worker = %name, error = %e, "Failed to construct index client");
                    return;
                },
            };
            worker_loop(&name, rx, token, store, dirs, index).await;
        }));
    }
    WorkerPool { handles }
}

async fn worker_loop<I: MailIndex>(
    name: &str,
    rx: SharedReceiver,
    token: CancellationToken,
    store: StatusStore,
    dirs: WorkerDirs,
    index: I,
) {
    info!(worker = name, "Worker started");
    let mut status: Option<StatusConn> = None;
    loop {
        let item = tokio::select! {
            _ = token.cancelled() => break,
            item = recv_next(&rx) => item,
        };
        let batch = match item {
            // Channel closed, or a shutdown sentinel.
            None | Some(None) => break,
            Some(Some(batch)) => batch,
        };
        if let Err(e) = handle_batch(&batch, &dirs, &index, &store, &mut status).await {
            error!(worker = name, domain = %batch.domain, error = %e, "Batch processing failed");
            quarantine_remaining(&batch.file_paths, &dirs.buggy_dir);
        }
    }
    if let Some(conn) = status.take() {
        conn.close().await;
    }
    info!(worker = name, "Worker exiting");
}

/// Best-effort sweep of whatever batch files still exist into quarantine.
fn quarantine_remaining(files: &[PathBuf], buggy_dir: &Path) {
    for path in files {
        if path.exists() {
            if let Err(e) = lifecycle::quarantine(path, buggy_dir) {
                error!(path = %path.display(), error = %e, "Failed to quarantine file after batch error");
            }
        }
    }
}

/// Get the worker's status connection, opening it on first use.
async fn status_conn<'a>(
    slot: &'a mut Option<StatusConn>,
    store: &StatusStore,
) -> Result<&'a mut StatusConn> {
    if slot.is_none() {
        *slot = Some(store.connect().await?);
    }
    slot.as_mut()
        .ok_or_else(|| MailError::config("status connection unavailable"))
}

async fn handle_batch<I: MailIndex>(
    batch: &MailBatch,
    dirs: &WorkerDirs,
    index: &I,
    store: &StatusStore,
    status_slot: &mut Option<StatusConn>,
) -> Result<()> {
    let status = status_conn(status_slot, store).await?;
    process_batch(batch, &dirs.run_dir, &dirs.buggy_dir, index, status).await;
    Ok(())
}

fn read_mail_file(path: &Path) -> Result<Mail> {
    let bytes = std::fs::read(path)?;
    Mail::from_json_slice(&bytes)
}

/// Drive one batch through parse → import → status update → finalization.
///
/// Infrastructure failures along the way (status writes, file moves) are
/// logged and skipped rather than aborting the batch; throughput wins over
/// strict bookkeeping consistency here.
pub async fn process_batch<I: MailIndex>(
    batch: &MailBatch,
    run_dir: &Path,
    buggy_dir: &Path,
    index: &I,
    status: &mut StatusConn,
) -> BatchImportResult {
    // Parse every file; keep the first staged path seen per mail id so the
    // file can be finalized once the outcome is known.
    let mut mails: Vec<Mail> = Vec::new();
    let mut mail_to_path: HashMap<String, PathBuf> = HashMap::new();
    let mut parse_failed: Vec<&PathBuf> = Vec::new();
    for path in &batch.file_paths {
        match read_mail_file(path) {
            Ok(mail) => {
                mail_to_path
                    .entry(mail.mail_id.clone())
                    .or_insert_with(|| path.clone());
                mails.push(mail);
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse mail file");
                parse_failed.push(path);
            },
        }
    }

    // Parse failures are isolated: quarantine the file, import the rest.
    for path in parse_failed {
        if let Err(e) = lifecycle::quarantine(path, buggy_dir) {
            error!(path = %path.display(), error = %e, "Failed to quarantine parse-failed file");
        }
    }

    if mails.is_empty() {
        return BatchImportResult::empty(batch.domain.clone());
    }

    let outcome = match index.import_batch(&mails).await {
        Ok(outcome) => outcome,
        Err(e) => {
            // The call itself failed: the entire batch is failed. Quarantine
            // every original file and record a batch error for every parsed
            // mail.
            error!(domain = %batch.domain, error = %e, "Index batch import failed");
            quarantine_remaining(&batch.file_paths, buggy_dir);
            let reason = format!("batch_error: {e}");
            let rows: Vec<(&Mail, String)> =
                mails.iter().map(|m| (m, reason.clone())).collect();
            if let Err(de) = status.mark_failure_many(&rows).await {
                error!(domain = %batch.domain, error = %de, "Failed recording batch error rows");
            }
            let failed = mails
                .iter()
                .map(|m| (m.mail_id.clone(), reason.clone()))
                .collect();
            return BatchImportResult {
                domain: batch.domain.clone(),
                success_ids: Vec::new(),
                failed,
            };
        },
    };

    let by_id: HashMap<&str, &Mail> = mails.iter().map(|m| (m.mail_id.as_str(), m)).collect();

    let success_rows: Vec<&Mail> = outcome
        .success_ids
        .iter()
        .filter_map(|id| by_id.get(id.as_str()).copied())
        .collect();
    if !success_rows.is_empty() {
        if let Err(e) = status.mark_success_many(&success_rows).await {
            error!(domain = %batch.domain, error = %e, "Failed recording success rows");
        }
    }

    let failure_rows: Vec<(&Mail, String)> = outcome
        .failed
        .iter()
        .filter_map(|(id, message)| by_id.get(id.as_str()).map(|m| (*m, message.clone())))
        .collect();
    if !failure_rows.is_empty() {
        if let Err(e) = status.mark_failure_many(&failure_rows).await {
            error!(domain = %batch.domain, error = %e, "Failed recording failure rows");
        }
    }

    // Finalize per outcome: delete on success, quarantine on failure. Fall
    // back to the conventional `<mail_id>.json` staging name if the parsed
    // path mapping was lost.
    let success_set: HashSet<&str> = outcome.success_ids.iter().map(|s| s.as_str()).collect();
    for mail in &mails {
        let path = mail_to_path
            .get(&mail.mail_id)
            .cloned()
            .unwrap_or_else(|| run_dir.join(format!("{}.json", mail.mail_id)));
        let succeeded = success_set.contains(mail.mail_id.as_str());
        if let Err(e) = lifecycle::finalize(&path, succeeded, buggy_dir) {
            error!(path = %path.display(), error = %e, "Failed to finalize mail file");
        }
    }

    BatchImportResult {
        domain: batch.domain.clone(),
        success_ids: outcome.success_ids,
        failed: outcome.failed,
    }
}
