//! Shared helpers for integration tests.
//!
//! Test hostnames such as `site.test` resolve to a public address for the
//! validator, while the HTTP client routes them to the local mock server.
//! SSRF checks therefore stay fully active in tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use linkstash::config::ArchiveConfig;
use linkstash::db::{insert_link_with_archive, Database, NewLink};
use linkstash::fetch::{HttpFetcher, StaticResolver, UrlValidator};
use tempfile::TempDir;
use wiremock::MockServer;

/// What every test hostname "resolves" to as far as the validator knows.
pub const PUBLIC_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));

pub const CONTACT_URL: &str = "https://linkstash.test/about";

pub async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

/// Default limits with short timeouts so timeout tests stay fast.
pub fn test_archive_config() -> ArchiveConfig {
    ArchiveConfig {
        connect_timeout: Duration::from_millis(500),
        read_timeout: Duration::from_millis(500),
        retry_backoff_base: Duration::from_millis(100),
        ..ArchiveConfig::with_contact_url(CONTACT_URL)
    }
}

/// A fetcher that sends every host in `public_hosts` to `server`.
///
/// `private_hosts` resolve to 10.0.0.5 for the validator and are never
/// reachable by the client.
pub fn fetcher_for(
    server: &MockServer,
    public_hosts: &[&str],
    private_hosts: &[&str],
    config: ArchiveConfig,
) -> HttpFetcher {
    let server_addr = *server.address();
    let mut resolver = StaticResolver::new();
    let mut builder = HttpFetcher::client_builder(&config);
    for host in public_hosts {
        resolver = resolver.with_host(host, PUBLIC_IP);
        builder = builder.resolve(host, server_addr);
    }
    for host in private_hosts {
        resolver = resolver.with_host(host, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
    }
    let client = builder.build().expect("Failed to build test client");
    HttpFetcher::with_client(client, config, UrlValidator::new(Arc::new(resolver)))
}

/// `http://<host>:<mock port><path>`.
pub fn url(server: &MockServer, host: &str, path: &str) -> String {
    format!("http://{host}:{}{path}", server.address().port())
}

/// Insert a link with its pending archive, returning `(link_id, archive_id)`.
pub async fn create_link(db: &Database, url: &str) -> (i64, i64) {
    insert_link_with_archive(
        db.pool(),
        &NewLink {
            url: url.to_string(),
            notes: None,
        },
    )
    .await
    .expect("Failed to insert link")
}

/// A page whose main content is long enough to be picked by the extractor.
pub fn article_html(title: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
<head>
    <title>{title}</title>
    <meta property="og:title" content="{title}">
    <meta name="description" content="A page about {title}.">
</head>
<body>
    <nav><a href="/">Home</a> <a href="/archive">Archive</a></nav>
    <article>
        <h1>{title}</h1>
        <p onclick="track()">The first paragraph explains the idea in enough detail, with a few clauses, to look like prose.</p>
        <script>alert(1)</script>
        <p>The second paragraph continues the thought, adds an example, and links <a href="/more">somewhere else</a>.</p>
        <p>A closing paragraph wraps up, repeats the main point, and thanks the reader for getting this far.</p>
    </article>
    <footer>Footer text</footer>
</body>
</html>"#
    )
}
