//! Index-store seam
//!
//! The pipeline only needs three operations from the index store, captured
//! by [`MailIndex`]. Client/version quirks live entirely inside the adapter
//! implementing the trait ([`weaviate::WeaviateIndex`] in production, an
//! in-memory fake in tests).

use std::collections::HashMap;

use async_trait::async_trait;
use mailsink_common::error::Result;
use mailsink_common::types::Mail;

pub mod weaviate;

pub use weaviate::WeaviateIndex;

/// Per-record outcome of one bulk import call.
///
/// The sets are disjoint and cover every record handed to the call: a record
/// not reported failed is treated as succeeded.
#[derive(Debug, Clone, Default)]
pub struct ImportOutcome {
    pub success_ids: Vec<String>,
    /// mail_id -> rejection reason
    pub failed: HashMap<String, String>,
}

/// The operations the pipeline needs from the index store.
#[async_trait]
pub trait MailIndex: Send + Sync {
    /// Create the multi-tenant collection if it does not exist.
    async fn ensure_collection(&self) -> Result<()>;

    /// Register a tenant for one domain, idempotently.
    async fn ensure_tenant(&self, domain: &str) -> Result<()>;

    /// Import a batch of parsed mails in one call.
    ///
    /// An `Err` means the call itself failed and the whole batch must be
    /// treated as failed; per-record rejections come back in the outcome.
    async fn import_batch(&self, mails: &[Mail]) -> Result<ImportOutcome>;
}
