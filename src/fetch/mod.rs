//! Network access for the archival pipeline.

mod client;
pub mod validator;

pub use client::{is_html_content_type, FetchedContent, HttpFetcher};
pub use validator::{is_blocked_ip, Resolver, StaticResolver, SystemResolver, UrlValidator};
