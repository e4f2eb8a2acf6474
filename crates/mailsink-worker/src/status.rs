//! Durable per-mail status store
//!
//! One SQLite row per mail id records whether the mail completed and whether
//! it succeeded, upserted so re-ingestion of the same id overwrites rather
//! than duplicates. SQLite allows a single writer per connection, so every
//! task owns its own [`StatusConn`]; multi-row writes run inside one
//! explicit transaction. The schema carries the three covering indexes the
//! aggregate queries need to stay non-scanning.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use mailsink_common::error::Result;
use mailsink_common::types::{Mail, StatusCounts};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Connection, Row, SqliteConnection};
use tracing::debug;

const UPSERT_SQL: &str = r#"
INSERT INTO mail_status (mail_id, user_id, domain, is_completed, is_success, received_time, error_message)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(mail_id) DO UPDATE SET
    user_id = excluded.user_id,
    domain = excluded.domain,
    is_completed = excluded.is_completed,
    is_success = excluded.is_success,
    received_time = excluded.received_time,
    error_message = excluded.error_message
"#;

/// Handle to the status database; cheap to clone, one per process.
///
/// `connect()` hands out an owned connection per task; the store itself
/// never shares a connection across tasks.
#[derive(Debug, Clone)]
pub struct StatusStore {
    options: SqliteConnectOptions,
}

impl StatusStore {
    pub fn new(sqlite_path: &Path) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(sqlite_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);
        Self { options }
    }

    /// Open an owned connection for the calling task.
    pub async fn connect(&self) -> Result<StatusConn> {
        let conn = SqliteConnection::connect_with(&self.options).await?;
        Ok(StatusConn { conn })
    }

    /// Create the table and covering indexes if missing.
    ///
    /// Runs on a short-lived bootstrap connection; call once at startup
    /// before any worker connects.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mail_status (
                mail_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                domain TEXT NOT NULL,
                is_completed INTEGER NOT NULL,
                is_success INTEGER NOT NULL,
                received_time TEXT NOT NULL,
                error_message TEXT NULL
            )
            "#,
        )
        .execute(&mut conn.conn)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_domain_stats ON mail_status (domain, is_completed, is_success)",
        )
        .execute(&mut conn.conn)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_user_stats ON mail_status (user_id, is_completed, is_success)",
        )
        .execute(&mut conn.conn)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_time_progress ON mail_status (received_time, is_completed)",
        )
        .execute(&mut conn.conn)
        .await?;
        conn.close().await;
        Ok(())
    }
}

/// An owned status-database connection.
pub struct StatusConn {
    conn: SqliteConnection,
}

impl StatusConn {
    /// Record a set of mails as pending (staged but not yet imported).
    pub async fn mark_pending_many(&mut self, mails: &[Mail]) -> Result<()> {
        let mut tx = self.conn.begin().await?;
        for mail in mails {
            sqlx::query(UPSERT_SQL)
                .bind(&mail.mail_id)
                .bind(&mail.user_id)
                .bind(&mail.domain)
                .bind(false)
                .bind(false)
                .bind(&mail.received_time)
                .bind(Option::<&str>::None)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Record a set of mails as completed successfully.
    pub async fn mark_success_many(&mut self, mails: &[&Mail]) -> Result<()> {
        let mut tx = self.conn.begin().await?;
        for mail in mails {
            sqlx::query(UPSERT_SQL)
                .bind(&mail.mail_id)
                .bind(&mail.user_id)
                .bind(&mail.domain)
                .bind(true)
                .bind(true)
                .bind(&mail.received_time)
                .bind(Option::<&str>::None)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Record a set of mails as completed with a failure reason.
    pub async fn mark_failure_many(&mut self, rows: &[(&Mail, String)]) -> Result<()> {
        let mut tx = self.conn.begin().await?;
        for (mail, error) in rows {
            sqlx::query(UPSERT_SQL)
                .bind(&mail.mail_id)
                .bind(&mail.user_id)
                .bind(&mail.domain)
                .bind(true)
                .bind(false)
                .bind(&mail.received_time)
                .bind(Some(error.as_str()))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Single-row convenience for a record that failed to parse.
    pub async fn mark_parsing_failure(&mut self, mail: &Mail, error: &str) -> Result<()> {
        self.mark_failure_many(&[(mail, error.to_string())]).await
    }

    /// Success/failure/pending counts for one domain.
    pub async fn domain_stats(&mut self, domain: &str) -> Result<StatusCounts> {
        let rows = sqlx::query(
            "SELECT is_completed, is_success, COUNT(*) FROM mail_status \
             WHERE domain = ?1 GROUP BY is_completed, is_success",
        )
        .bind(domain)
        .fetch_all(&mut self.conn)
        .await?;
        Ok(fold_counts(&rows))
    }

    /// Success/failure/pending counts for one user.
    pub async fn user_stats(&mut self, user_id: &str) -> Result<StatusCounts> {
        let rows = sqlx::query(
            "SELECT is_completed, is_success, COUNT(*) FROM mail_status \
             WHERE user_id = ?1 GROUP BY is_completed, is_success",
        )
        .bind(user_id)
        .fetch_all(&mut self.conn)
        .await?;
        Ok(fold_counts(&rows))
    }

    /// Received time of the most recently completed mail, if any.
    pub async fn last_completed_time(&mut self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT MAX(received_time) FROM mail_status WHERE is_completed = 1")
            .fetch_one(&mut self.conn)
            .await?;
        Ok(row.get(0))
    }

    /// Close the connection, logging rather than propagating any error.
    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "Failed to close status connection");
        }
    }
}

/// Collapse `(is_completed, is_success) -> count` groups into status counts;
/// a missing group counts as zero.
fn fold_counts(rows: &[sqlx::sqlite::SqliteRow]) -> StatusCounts {
    let mut groups: HashMap<(i64, i64), u64> = HashMap::new();
    for row in rows {
        let completed: i64 = row.get(0);
        let success: i64 = row.get(1);
        let count: i64 = row.get(2);
        groups.insert((completed, success), count.max(0) as u64);
    }
    let completed_success = groups.get(&(1, 1)).copied().unwrap_or(0);
    let completed_failure = groups.get(&(1, 0)).copied().unwrap_or(0);
    // (0, 1) should not occur; counted as pending if it ever does.
    let pending = groups.get(&(0, 0)).copied().unwrap_or(0)
        + groups.get(&(0, 1)).copied().unwrap_or(0);
    StatusCounts {
        completed_success,
        completed_failure,
        pending,
        total: completed_success + completed_failure + pending,
    }
}
