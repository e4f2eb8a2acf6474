//! Mailsink Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Mailsink project.
//!
//! # Overview
//!
//! This crate provides common functionality used across all Mailsink
//! workspace members:
//!
//! - **Error Handling**: Custom error and result types
//! - **Logging**: Centralized `tracing` subscriber initialization
//! - **Types**: The mail record, batch, and status-count domain types
//!
//! # Example
//!
//! ```no_run
//! use mailsink_common::{MailError, Result};
//! use mailsink_common::types::Mail;
//!
//! fn parse_record(bytes: &[u8]) -> Result<Mail> {
//!     let mail = Mail::from_json_slice(bytes)?;
//!     Ok(mail)
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{MailError, Result};
