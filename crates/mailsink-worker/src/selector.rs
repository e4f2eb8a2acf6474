//! Domain bucketing and greedy batch selection
//!
//! The selector scans the waiting directory, derives a partition key
//! (domain) per file, and picks which domain buckets to dispatch under a
//! capacity budget. Selection is largest-bucket-first with ties broken by
//! discovery order; this ordering is deliberate and covered by tests, since
//! it trades per-domain fairness for fewer, larger index-store calls.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use mailsink_common::types::MailBatch;
use regex::Regex;
use tracing::debug;

/// Upper bound on files examined per scan, for a deterministic bounded tick.
pub const SCAN_LIMIT: usize = 1000;

/// Per-domain cap on files picked up in a single scan. Files beyond the cap
/// stay in the waiting directory and remain candidates on the next poll.
pub const MAX_FILES_PER_DOMAIN: usize = 50;

/// A discovery-ordered group of waiting files sharing one domain.
#[derive(Debug, Clone)]
pub struct DomainBucket {
    pub domain: String,
    pub files: Vec<PathBuf>,
}

fn domain_eq_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"domain=([A-Za-z0-9.-]+)").unwrap())
}

fn at_domain_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@([A-Za-z0-9.-]+)").unwrap())
}

/// Derive the domain from a filename, without touching file contents.
fn domain_from_filename(name: &str) -> Option<String> {
    if let Some(caps) = domain_eq_pattern().captures(name) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = at_domain_pattern().captures(name) {
        return Some(caps[1].to_string());
    }
    None
}

/// Fallback: peek the JSON body for an explicit domain or a user-id domain.
fn domain_from_content(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let record: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    if let Some(domain) = record.get("domain").and_then(|v| v.as_str()) {
        if !domain.is_empty() {
            return Some(domain.to_string());
        }
    }
    record
        .get("user_id")
        .and_then(|v| v.as_str())
        .and_then(|user| user.split_once('@'))
        .map(|(_, domain)| domain.to_string())
}

/// Resolve the partition key for one candidate file.
fn domain_for_file(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    domain_from_filename(&name)
        .or_else(|| domain_from_content(path))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Scan the waiting directory and group candidate files by domain.
///
/// The scan is bounded to the first `limit` files in lexicographic filename
/// order so repeated scans of the same directory are deterministic. Buckets
/// preserve discovery order and are capped at [`MAX_FILES_PER_DOMAIN`].
pub fn discover_candidates(wait_dir: &Path, limit: usize) -> Vec<DomainBucket> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(wait_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(e) => {
            debug!(dir = %wait_dir.display(), error = %e, "Failed to scan waiting directory");
            return Vec::new();
        },
    };
    files.sort();
    files.truncate(limit);

    let mut buckets: Vec<DomainBucket> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for path in files {
        let domain = domain_for_file(&path);
        let slot = *index.entry(domain.clone()).or_insert_with(|| {
            buckets.push(DomainBucket {
                domain,
                files: Vec::new(),
            });
            buckets.len() - 1
        });
        let bucket = &mut buckets[slot];
        if bucket.files.len() < MAX_FILES_PER_DOMAIN {
            bucket.files.push(path);
        }
    }
    buckets
}

/// Greedily pick buckets to dispatch under a capacity budget.
///
/// Iterates candidate bucket sizes from [`MAX_FILES_PER_DOMAIN`] down to 1
/// and takes any bucket of exactly that size while capacity remains; one
/// unit of capacity buys one batch regardless of its file count.
pub fn select_batches(buckets: Vec<DomainBucket>, capacity: usize) -> Vec<MailBatch> {
    let mut selected = Vec::new();
    if capacity == 0 {
        return selected;
    }
    let mut remaining = capacity;
    let mut slots: Vec<Option<DomainBucket>> = buckets.into_iter().map(Some).collect();
    for size in (1..=MAX_FILES_PER_DOMAIN).rev() {
        if remaining == 0 {
            break;
        }
        for slot in slots.iter_mut() {
            if remaining == 0 {
                break;
            }
            if let Some(bucket) = slot.take_if(|b| b.files.len() == size) {
                selected.push(MailBatch::new(bucket.domain, bucket.files));
                remaining -= 1;
            }
        }
    }
    selected
}
