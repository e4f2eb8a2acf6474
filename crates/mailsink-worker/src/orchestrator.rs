//! The dispatch loop
//!
//! A single control task polls the waiting directory, claims files by moving
//! them into the run directory, pre-inserts pending status rows, and hands
//! batches to the worker pool through the bounded queue. Claiming happens
//! strictly before hand-off, so no two tasks ever own the same file state
//! transition. Errors inside one tick are logged and the loop continues.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use mailsink_common::error::{MailError, Result};
use mailsink_common::types::{Mail, MailBatch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::dispatch::{DispatchSender, TryDispatchError};
use crate::lifecycle;
use crate::selector;
use crate::status::{StatusConn, StatusStore};

pub struct Orchestrator {
    wait_dir: PathBuf,
    run_dir: PathBuf,
    poll: Duration,
    queue: DispatchSender,
    store: StatusStore,
    token: CancellationToken,
    /// Batches already staged but not yet accepted by the queue; retried
    /// ahead of new selection on the next tick.
    backlog: VecDeque<MailBatch>,
}

impl Orchestrator {
    pub fn new(
        wait_dir: PathBuf,
        run_dir: PathBuf,
        poll: Duration,
        queue: DispatchSender,
        store: StatusStore,
        token: CancellationToken,
    ) -> Self {
        Self {
            wait_dir,
            run_dir,
            poll,
            queue,
            store,
            token,
            backlog: VecDeque::new(),
        }
    }

    /// Run the dispatch loop until the cancellation token fires.
    pub async fn run(mut self) -> Result<()> {
        let mut status = self.store.connect().await?;
        info!(wait_dir = %self.wait_dir.display(), poll = ?self.poll, "Dispatch loop started");
        while !self.token.is_cancelled() {
            if let Err(e) = self.tick(&mut status).await {
                error!(error = %e, "Dispatch tick failed");
            }
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(self.poll) => {},
            }
        }
        status.close().await;
        info!("Dispatch loop stopped");
        Ok(())
    }

    async fn tick(&mut self, status: &mut StatusConn) -> Result<()> {
        // Staged batches deferred by a full queue go first; their files
        // already left the waiting directory and will not be re-scanned.
        while let Some(batch) = self.backlog.pop_front() {
            match self.queue.try_dispatch(batch) {
                Ok(()) => {},
                Err(TryDispatchError::Full(batch)) => {
                    self.backlog.push_front(batch);
                    return Ok(());
                },
                Err(TryDispatchError::Closed(batch)) => {
                    self.backlog.push_front(batch);
                    return Err(MailError::config("dispatch queue closed"));
                },
            }
        }

        let capacity = self.queue.remaining_capacity();
        if capacity == 0 {
            return Ok(());
        }

        let buckets = selector::discover_candidates(&self.wait_dir, selector::SCAN_LIMIT);
        let selected = selector::select_batches(buckets, capacity);
        for batch in selected {
            // Claim the files first; a file that fails to move is skipped,
            // not fatal to the batch.
            let moved = lifecycle::stage_files(&batch.file_paths, &self.run_dir);
            if moved.is_empty() {
                continue;
            }
            let staged = MailBatch::new(batch.domain, moved);

            // Pending rows make staged work visible to progress queries.
            // Insert failures are logged, never fatal.
            let pending = parse_pending(&staged.file_paths);
            if !pending.is_empty() {
                if let Err(e) = status.mark_pending_many(&pending).await {
                    error!(domain = %staged.domain, error = %e, "Failed to insert pending rows");
                }
            }

            let domain = staged.domain.clone();
            let files = staged.file_paths.len();
            match self.queue.try_dispatch(staged) {
                Ok(()) => {
                    info!(domain = %domain, files, "Enqueued batch");
                },
                Err(TryDispatchError::Full(batch)) => {
                    info!(domain = %domain, "Queue full while enqueuing; deferring to next tick");
                    self.backlog.push_back(batch);
                    break;
                },
                Err(TryDispatchError::Closed(batch)) => {
                    self.backlog.push_back(batch);
                    return Err(MailError::config("dispatch queue closed"));
                },
            }
        }
        Ok(())
    }
}

/// Best-effort parse of freshly staged files for pending bookkeeping.
///
/// Files that fail to parse here are left to the worker, which owns
/// quarantine for them.
fn parse_pending(files: &[PathBuf]) -> Vec<Mail> {
    let mut pending = Vec::with_capacity(files.len());
    for path in files {
        let Ok(bytes) = std::fs::read(path) else { continue };
        match Mail::from_json_slice(&bytes) {
            Ok(mail) => pending.push(mail),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping pending row for unparsable file");
            },
        }
    }
    pending
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::dispatch;
    use std::fs;
    use std::path::Path;

    struct Fixture {
        _root: tempfile::TempDir,
        wait: PathBuf,
        run: PathBuf,
        store: StatusStore,
    }

    async fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let wait = root.path().join("wait");
        let run = root.path().join("run");
        fs::create_dir_all(&wait).unwrap();
        fs::create_dir_all(&run).unwrap();
        let store = StatusStore::new(&root.path().join("status.db"));
        store.ensure_schema().await.unwrap();
        Fixture {
            _root: root,
            wait,
            run,
            store,
        }
    }

    fn write_mail(dir: &Path, id: &str, domain: &str) {
        let body = serde_json::json!({
            "mail_id": id,
            "user_id": format!("user@{domain}"),
            "received_time": "2024-03-05T10:30:00",
            "subject": "s",
            "content": "c",
        });
        fs::write(
            dir.join(format!("{id}__domain={domain}__.json")),
            body.to_string(),
        )
        .unwrap();
    }

    fn orchestrator(f: &Fixture, queue: DispatchSender) -> Orchestrator {
        Orchestrator::new(
            f.wait.clone(),
            f.run.clone(),
            Duration::from_millis(100),
            queue,
            f.store.clone(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_tick_stages_and_enqueues() {
        let f = fixture().await;
        write_mail(&f.wait, "m1", "a.com");
        write_mail(&f.wait, "m2", "a.com");

        let (tx, rx) = dispatch::channel(4);
        let mut orch = orchestrator(&f, tx);
        let mut status = f.store.connect().await.unwrap();
        orch.tick(&mut status).await.unwrap();

        // Files were claimed out of waiting into run.
        assert_eq!(fs::read_dir(&f.wait).unwrap().count(), 0);
        assert_eq!(fs::read_dir(&f.run).unwrap().count(), 2);

        // One batch for the domain is on the queue.
        let batch = dispatch::recv_next(&rx).await.unwrap().unwrap();
        assert_eq!(batch.domain, "a.com");
        assert_eq!(batch.file_paths.len(), 2);

        // Both mails are visible as pending.
        let stats = status.domain_stats("a.com").await.unwrap();
        assert_eq!(stats.pending, 2);
        status.close().await;
    }

    #[tokio::test]
    async fn test_capacity_gates_staging() {
        let f = fixture().await;
        write_mail(&f.wait, "m1", "a.com");
        write_mail(&f.wait, "m2", "b.com");

        // Capacity 1: with remaining capacity computed before staging, the
        // selector offers one batch per tick; fill the queue first so the
        // staged batch is deferred.
        let (tx, rx) = dispatch::channel(1);
        let mut orch = orchestrator(&f, tx.clone());
        let mut status = f.store.connect().await.unwrap();

        orch.tick(&mut status).await.unwrap();
        assert!(orch.backlog.is_empty());

        // Second tick: queue still holds the first batch, capacity is 0, so
        // nothing new is staged.
        orch.tick(&mut status).await.unwrap();
        assert_eq!(fs::read_dir(&f.wait).unwrap().count(), 1);

        // Drain the queue; the next tick dispatches the second domain.
        let first = dispatch::recv_next(&rx).await.unwrap().unwrap();
        orch.tick(&mut status).await.unwrap();
        let second = dispatch::recv_next(&rx).await.unwrap().unwrap();
        let mut domains = vec![first.domain, second.domain];
        domains.sort();
        assert_eq!(domains, vec!["a.com".to_string(), "b.com".to_string()]);
        status.close().await;
    }

    #[tokio::test]
    async fn test_backlog_is_retried_before_new_selection() {
        let f = fixture().await;
        let (tx, rx) = dispatch::channel(1);
        let mut orch = orchestrator(&f, tx.clone());
        let mut status = f.store.connect().await.unwrap();

        // Simulate a batch staged last tick that could not be enqueued.
        write_mail(&f.run, "m9", "old.com");
        orch.backlog.push_back(MailBatch::new(
            "old.com",
            vec![f.run.join("m9__domain=old.com__.json")],
        ));
        write_mail(&f.wait, "m1", "new.com");

        orch.tick(&mut status).await.unwrap();
        let first = dispatch::recv_next(&rx).await.unwrap().unwrap();
        assert_eq!(first.domain, "old.com");

        orch.tick(&mut status).await.unwrap();
        let second = dispatch::recv_next(&rx).await.unwrap().unwrap();
        assert_eq!(second.domain, "new.com");
        status.close().await;
    }

    #[tokio::test]
    async fn test_unparsable_file_gets_no_pending_row_but_is_dispatched() {
        let f = fixture().await;
        fs::write(f.wait.join("bad__domain=a.com__.json"), b"not json").unwrap();
        write_mail(&f.wait, "m1", "a.com");

        let (tx, rx) = dispatch::channel(4);
        let mut orch = orchestrator(&f, tx);
        let mut status = f.store.connect().await.unwrap();
        orch.tick(&mut status).await.unwrap();

        let batch = dispatch::recv_next(&rx).await.unwrap().unwrap();
        assert_eq!(batch.file_paths.len(), 2);
        let stats = status.domain_stats("a.com").await.unwrap();
        assert_eq!(stats.pending, 1);
        status.close().await;
    }
}
