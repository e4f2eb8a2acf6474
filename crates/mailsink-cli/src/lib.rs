//! Mailsink CLI Library
//!
//! Read-only status queries and sample-data generation for the mail
//! ingestion pipeline. The hot path lives in `mailsink-worker`; this crate
//! is the operator surface.

pub mod generate;
