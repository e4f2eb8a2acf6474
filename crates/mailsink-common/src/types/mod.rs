//! Domain types shared across Mailsink

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{MailError, Result};

/// Raw mail record as it appears in a staged JSON file.
///
/// Producers are allowed to use two field-name pairs for the free-text
/// fields (`subject`/`mail_header` and `content`/`mail_content`); the
/// canonical name wins when both are present.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMailRecord {
    pub mail_id: String,
    pub user_id: String,
    #[serde(default)]
    pub domain: Option<String>,
    pub received_time: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub mail_header: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub mail_content: Option<String>,
    #[serde(default)]
    pub mailbox: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

/// A single validated mail record.
///
/// `domain` is the partition key for batching and index-store tenancy; it
/// falls back to the domain part of `user_id`, else `"unknown"`. The
/// received timestamp is validated at construction so downstream code can
/// derive year/month/day filters without re-checking.
#[derive(Debug, Clone, PartialEq)]
pub struct Mail {
    pub mail_id: String,
    pub user_id: String,
    pub domain: String,
    pub received_time: String,
    pub subject: String,
    pub content: String,
    /// Optional product filter fields, keyed as `filter_<name>`
    pub extra_filters: BTreeMap<String, String>,
    received: NaiveDateTime,
}

/// Parse an ISO-8601 timestamp, with or without a UTC offset.
///
/// Non-ISO timestamps are a fatal parse error for the record that carries
/// them, so the failure surfaces before any index-store call.
fn parse_received_time(value: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_local());
    }
    value
        .parse::<NaiveDateTime>()
        .map_err(|e| MailError::Parse(format!("invalid received_time '{value}': {e}")))
}

impl Mail {
    /// Validate and build a mail record from its parts.
    pub fn new(
        mail_id: String,
        user_id: String,
        domain: Option<String>,
        received_time: String,
        subject: String,
        content: String,
        extra_filters: BTreeMap<String, String>,
    ) -> Result<Self> {
        if mail_id.is_empty() {
            return Err(MailError::parse("mail_id must not be empty"));
        }
        let received = parse_received_time(&received_time)?;
        let domain = match domain.filter(|d| !d.is_empty()) {
            Some(d) => d,
            None => user_id
                .split_once('@')
                .map(|(_, dom)| dom.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        };
        Ok(Self {
            mail_id,
            user_id,
            domain,
            received_time,
            subject,
            content,
            extra_filters,
            received,
        })
    }

    /// Parse a staged JSON file body into a mail record.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let raw: RawMailRecord = serde_json::from_slice(bytes)?;
        Self::from_raw(raw)
    }

    /// Normalize a raw record into a validated mail.
    pub fn from_raw(raw: RawMailRecord) -> Result<Self> {
        let subject = raw.subject.or(raw.mail_header).unwrap_or_default();
        let content = raw.content.or(raw.mail_content).unwrap_or_default();

        let mut extra_filters = BTreeMap::new();
        if let Some(mailbox) = raw.mailbox {
            extra_filters.insert("filter_mailbox".to_string(), mailbox);
        }
        if let Some(folder) = raw.folder {
            extra_filters.insert("filter_folder".to_string(), folder);
        }

        Self::new(
            raw.mail_id,
            raw.user_id,
            raw.domain,
            raw.received_time,
            subject,
            content,
            extra_filters,
        )
    }

    /// The validated received timestamp.
    pub fn received(&self) -> NaiveDateTime {
        self.received
    }

    /// Year/month/day filter values split out of the received timestamp.
    pub fn ymd_filters(&self) -> BTreeMap<String, String> {
        use chrono::Datelike;
        let mut filters = BTreeMap::new();
        filters.insert("filter_year".to_string(), format!("{:04}", self.received.year()));
        filters.insert("filter_month".to_string(), format!("{:02}", self.received.month()));
        filters.insert("filter_day".to_string(), format!("{:02}", self.received.day()));
        filters
    }

    /// Flat property map sent to the index store.
    ///
    /// Vectors are generated server-side; only text properties go here.
    pub fn index_properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        props.insert("filter_user_id".to_string(), self.user_id.clone());
        props.extend(self.ymd_filters());
        props.insert("mail_id".to_string(), self.mail_id.clone());
        props.insert("search_mail_content".to_string(), self.content.clone());
        props.insert("search_mail_header".to_string(), self.subject.clone());
        props.extend(self.extra_filters.clone());
        props
    }
}

/// A batch of staged mail files sharing one domain.
///
/// Immutable work unit: all files are parsed and imported as a single
/// index-store call.
#[derive(Debug, Clone)]
pub struct MailBatch {
    pub domain: String,
    pub file_paths: Vec<PathBuf>,
}

impl MailBatch {
    pub fn new(domain: impl Into<String>, file_paths: Vec<PathBuf>) -> Self {
        Self {
            domain: domain.into(),
            file_paths,
        }
    }
}

/// Outcome of importing one batch into the index store.
#[derive(Debug, Clone, Default)]
pub struct BatchImportResult {
    pub domain: String,
    pub success_ids: Vec<String>,
    /// mail_id -> error message
    pub failed: HashMap<String, String>,
}

impl BatchImportResult {
    pub fn empty(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            success_ids: Vec::new(),
            failed: HashMap::new(),
        }
    }
}

/// Aggregate status counts for a domain or user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub completed_success: u64,
    pub completed_failure: u64,
    pub pending: u64,
    pub total: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn raw(json: serde_json::Value) -> Result<Mail> {
        Mail::from_json_slice(json.to_string().as_bytes())
    }

    #[test]
    fn test_parse_minimal_record() {
        let mail = raw(serde_json::json!({
            "mail_id": "m1",
            "user_id": "alice@example.com",
            "received_time": "2024-03-05T10:30:00",
        }))
        .unwrap();

        assert_eq!(mail.mail_id, "m1");
        assert_eq!(mail.domain, "example.com");
        assert_eq!(mail.subject, "");
        assert_eq!(mail.content, "");
        assert!(mail.extra_filters.is_empty());
    }

    #[test]
    fn test_domain_override_beats_user_id() {
        let mail = raw(serde_json::json!({
            "mail_id": "m1",
            "user_id": "alice@example.com",
            "domain": "other.org",
            "received_time": "2024-03-05T10:30:00",
        }))
        .unwrap();
        assert_eq!(mail.domain, "other.org");
    }

    #[test]
    fn test_domain_unknown_without_at_sign() {
        let mail = raw(serde_json::json!({
            "mail_id": "m1",
            "user_id": "not-an-email",
            "received_time": "2024-03-05T10:30:00",
        }))
        .unwrap();
        assert_eq!(mail.domain, "unknown");
    }

    #[test]
    fn test_alternate_field_names() {
        let mail = raw(serde_json::json!({
            "mail_id": "m1",
            "user_id": "alice@example.com",
            "received_time": "2024-03-05T10:30:00",
            "mail_header": "Hello",
            "mail_content": "Body text",
        }))
        .unwrap();
        assert_eq!(mail.subject, "Hello");
        assert_eq!(mail.content, "Body text");
    }

    #[test]
    fn test_canonical_field_names_win() {
        let mail = raw(serde_json::json!({
            "mail_id": "m1",
            "user_id": "alice@example.com",
            "received_time": "2024-03-05T10:30:00",
            "subject": "Canonical",
            "mail_header": "Alias",
        }))
        .unwrap();
        assert_eq!(mail.subject, "Canonical");
    }

    #[test]
    fn test_extra_filters_mapped() {
        let mail = raw(serde_json::json!({
            "mail_id": "m1",
            "user_id": "alice@example.com",
            "received_time": "2024-03-05T10:30:00",
            "mailbox": "inbox",
            "folder": "work",
        }))
        .unwrap();
        assert_eq!(mail.extra_filters.get("filter_mailbox").unwrap(), "inbox");
        assert_eq!(mail.extra_filters.get("filter_folder").unwrap(), "work");
    }

    #[test]
    fn test_bad_timestamp_is_parse_error() {
        let err = raw(serde_json::json!({
            "mail_id": "m1",
            "user_id": "alice@example.com",
            "received_time": "05/03/2024 10:30",
        }))
        .unwrap_err();
        assert!(matches!(err, MailError::Parse(_)));
    }

    #[test]
    fn test_rfc3339_timestamp_accepted() {
        let mail = raw(serde_json::json!({
            "mail_id": "m1",
            "user_id": "alice@example.com",
            "received_time": "2024-03-05T10:30:00+02:00",
        }))
        .unwrap();
        assert_eq!(mail.ymd_filters().get("filter_year").unwrap(), "2024");
    }

    #[test]
    fn test_ymd_filters_zero_padded() {
        let mail = raw(serde_json::json!({
            "mail_id": "m1",
            "user_id": "alice@example.com",
            "received_time": "2024-03-05T10:30:00",
        }))
        .unwrap();
        let ymd = mail.ymd_filters();
        assert_eq!(ymd.get("filter_year").unwrap(), "2024");
        assert_eq!(ymd.get("filter_month").unwrap(), "03");
        assert_eq!(ymd.get("filter_day").unwrap(), "05");
    }

    #[test]
    fn test_index_properties_shape() {
        let mail = raw(serde_json::json!({
            "mail_id": "m1",
            "user_id": "alice@example.com",
            "received_time": "2024-03-05T10:30:00",
            "subject": "Hi",
            "content": "Body",
            "mailbox": "inbox",
        }))
        .unwrap();
        let props = mail.index_properties();
        assert_eq!(props.get("filter_user_id").unwrap(), "alice@example.com");
        assert_eq!(props.get("mail_id").unwrap(), "m1");
        assert_eq!(props.get("search_mail_header").unwrap(), "Hi");
        assert_eq!(props.get("search_mail_content").unwrap(), "Body");
        assert_eq!(props.get("filter_mailbox").unwrap(), "inbox");
        assert_eq!(props.get("filter_day").unwrap(), "05");
    }

    #[test]
    fn test_missing_mail_id_rejected() {
        let err = raw(serde_json::json!({
            "user_id": "alice@example.com",
            "received_time": "2024-03-05T10:30:00",
        }))
        .unwrap_err();
        assert!(matches!(err, MailError::Serialization(_)));
    }
}
