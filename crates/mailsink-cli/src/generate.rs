//! Sample mail generation
//!
//! Writes synthetic mail records into a waiting directory for local testing
//! and demos: ids are sequential, domains round-robin, and timestamps step
//! forward 30 seconds per mail from the chosen start.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime, Utc};
use serde_json::json;

/// Knobs for the sample generator.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// How many mails to generate
    pub count: u32,
    /// How many `exampleN.com` domains to cycle through
    pub domains: u32,
    /// Start timestamp (ISO); defaults to now minus one day
    pub start: Option<String>,
    /// Mailbox value stamped on every record
    pub mailbox: String,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            count: 200,
            domains: 4,
            start: None,
            mailbox: "inbox".to_string(),
        }
    }
}

/// Generate sample mail JSON files into `out`. Returns how many were written.
pub fn generate_mails(out: &Path, options: &GenerateOptions) -> Result<usize> {
    std::fs::create_dir_all(out)
        .with_context(|| format!("creating output directory {}", out.display()))?;
    if options.domains == 0 {
        anyhow::bail!("--domains must be at least 1");
    }

    let start = match &options.start {
        Some(value) => value
            .parse::<NaiveDateTime>()
            .with_context(|| format!("invalid start timestamp '{value}'"))?,
        None => Utc::now().naive_utc() - Duration::days(1),
    };

    for i in 1..=options.count {
        let domain = format!("example{}.com", (i % options.domains) + 1);
        let user = format!("user{i}@{domain}");
        let received = (start + Duration::seconds(i as i64 * 30))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        let mail_id = format!("mail{i:05}");
        let record = json!({
            "mail_id": mail_id,
            "user_id": user,
            "received_time": received,
            "subject": format!("Test Email {i}"),
            "content": format!("This is a generated email number {i} for {domain}"),
            "domain": domain,
            "mailbox": options.mailbox,
        });
        let name = format!("{mail_id}__domain={domain}__.json");
        std::fs::write(out.join(&name), record.to_string())
            .with_context(|| format!("writing {name}"))?;
    }
    Ok(options.count as usize)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mailsink_common::types::Mail;

    #[test]
    fn test_generates_requested_count() {
        let dir = tempfile::tempdir().unwrap();
        let options = GenerateOptions {
            count: 12,
            domains: 3,
            start: Some("2024-01-01T00:00:00".to_string()),
            ..GenerateOptions::default()
        };
        assert_eq!(generate_mails(dir.path(), &options).unwrap(), 12);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 12);
    }

    #[test]
    fn test_records_parse_as_mail() {
        let dir = tempfile::tempdir().unwrap();
        let options = GenerateOptions {
            count: 4,
            domains: 2,
            start: Some("2024-01-01T00:00:00".to_string()),
            mailbox: "archive".to_string(),
        };
        generate_mails(dir.path(), &options).unwrap();

        let bytes = std::fs::read(dir.path().join("mail00001__domain=example2.com__.json")).unwrap();
        let mail = Mail::from_json_slice(&bytes).unwrap();
        assert_eq!(mail.mail_id, "mail00001");
        assert_eq!(mail.domain, "example2.com");
        assert_eq!(mail.received_time, "2024-01-01T00:00:30");
        assert_eq!(mail.extra_filters.get("filter_mailbox").unwrap(), "archive");
    }

    #[test]
    fn test_domains_round_robin() {
        let dir = tempfile::tempdir().unwrap();
        let options = GenerateOptions {
            count: 6,
            domains: 2,
            start: Some("2024-01-01T00:00:00".to_string()),
            ..GenerateOptions::default()
        };
        generate_mails(dir.path(), &options).unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert!(names[0].contains("domain=example2.com"));
        assert!(names[1].contains("domain=example1.com"));
        assert_eq!(
            names.iter().filter(|n| n.contains("example1")).count(),
            3
        );
    }

    #[test]
    fn test_bad_start_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let options = GenerateOptions {
            start: Some("yesterday".to_string()),
            ..GenerateOptions::default()
        };
        assert!(generate_mails(dir.path(), &options).is_err());
    }

    #[test]
    fn test_zero_domains_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let options = GenerateOptions {
            domains: 0,
            ..GenerateOptions::default()
        };
        assert!(generate_mails(dir.path(), &options).is_err());
    }
}
