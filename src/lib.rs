//! LinkStash library.
//!
//! A personal link-bookmarking service. Every saved link gets an archive
//! record that a background worker fills with the page's readable content,
//! fetched under SSRF, size and time limits and tracked through an
//! append-only state machine.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod archiver;
pub mod config;
pub mod constants;
pub mod db;
pub mod extractor;
pub mod fetch;
pub mod jobs;
pub mod links;
