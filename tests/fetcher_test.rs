//! Integration tests for the HTTP fetcher: redirects, SSRF, limits, timeouts.

mod common;

use std::time::Duration;

use common::{fetcher_for, test_archive_config, url, CONTACT_URL};
use linkstash::archiver::FailureKind;
use linkstash::config::ArchiveConfig;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_fetch_html_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>hi</body></html>", "text/html; charset=utf-8"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, &["site.test"], &[], test_archive_config());
    let fetched = fetcher
        .fetch(&url(&server, "site.test", "/page"))
        .await
        .expect("fetch should succeed");

    assert_eq!(fetched.status, 200);
    assert!(fetched.is_html());
    assert_eq!(fetched.text(), "<html><body>hi</body></html>");
    assert_eq!(fetched.final_url.as_str(), url(&server, "site.test", "/page"));
}

#[tokio::test]
async fn test_sends_archival_user_agent() {
    let server = MockServer::start().await;
    let expected = format!("LinkStash/{} (+{CONTACT_URL})", env!("CARGO_PKG_VERSION"));
    Mock::given(method("GET"))
        .and(header("user-agent", expected.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw("ok", "text/plain"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, &["site.test"], &[], test_archive_config());
    let fetched = fetcher.fetch(&url(&server, "site.test", "/")).await.unwrap();
    assert!(!fetched.is_html());
}

#[tokio::test]
async fn test_follows_relative_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new?x=1"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("moved", "text/plain"))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, &["site.test"], &[], test_archive_config());
    let fetched = fetcher.fetch(&url(&server, "site.test", "/old")).await.unwrap();

    assert_eq!(fetched.final_url.as_str(), url(&server, "site.test", "/new?x=1"));
    assert_eq!(fetched.body, b"moved");
}

#[tokio::test]
async fn test_redirect_to_private_host_blocked_at_that_hop() {
    let server = MockServer::start().await;
    let hop_b = url(&server, "cdn.test", "/b");
    let hop_c = url(&server, "internal.test", "/c");

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", hop_b.as_str()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(307).insert_header("location", hop_c.as_str()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(
        &server,
        &["site.test", "cdn.test"],
        &["internal.test"],
        test_archive_config(),
    );
    let err = fetcher
        .fetch(&url(&server, "site.test", "/a"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Blocked);
    assert_eq!(err.details["current_url"], hop_b.as_str());
    assert_eq!(err.details["redirect_url"], hop_c.as_str());
    assert_eq!(err.details["validation_reason"], "private_ip");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_loopback_literal_blocked_without_request() {
    let server = MockServer::start().await;
    let fetcher = fetcher_for(&server, &[], &[], test_archive_config());

    let err = fetcher.fetch("http://127.0.0.1/admin").await.unwrap_err();

    assert_eq!(err.kind, FailureKind::Blocked);
    assert_eq!(err.details["validation_reason"], "private_ip");
    assert_eq!(err.details["address"], "127.0.0.1");
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn test_unsupported_scheme() {
    let server = MockServer::start().await;
    let fetcher = fetcher_for(&server, &[], &[], test_archive_config());

    let err = fetcher.fetch("ftp://site.test/file").await.unwrap_err();

    assert_eq!(err.kind, FailureKind::InvalidUrl);
    assert_eq!(err.details["scheme"], "ftp");
}

#[tokio::test]
async fn test_unresolvable_host() {
    let server = MockServer::start().await;
    let fetcher = fetcher_for(&server, &[], &[], test_archive_config());

    let err = fetcher.fetch("https://nowhere.test/").await.unwrap_err();

    assert_eq!(err.kind, FailureKind::InvalidUrl);
    assert_eq!(err.details["hostname"], "nowhere.test");
}

async fn mount_redirect_chain(server: &MockServer, hops: usize) {
    for i in 0..hops {
        let next = url(server, "site.test", &format!("/r{}", i + 1));
        Mock::given(method("GET"))
            .and(path(format!("/r{i}")))
            .respond_with(ResponseTemplate::new(302).insert_header("location", next.as_str()))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_too_many_redirects() {
    let server = MockServer::start().await;
    mount_redirect_chain(&server, 6).await;
    Mock::given(method("GET"))
        .and(path("/r6"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, &["site.test"], &[], test_archive_config());
    let err = fetcher
        .fetch(&url(&server, "site.test", "/r0"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::TooManyRedirects);
    assert_eq!(err.message, "Too many redirects: 6 exceeds the limit of 5");
    assert_eq!(err.details["redirect_count"], 6);
    assert_eq!(err.details["max_redirects"], 5);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_redirect_limit_is_inclusive() {
    let server = MockServer::start().await;
    mount_redirect_chain(&server, 5).await;
    Mock::given(method("GET"))
        .and(path("/r5"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("done", "text/plain"))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, &["site.test"], &[], test_archive_config());
    let fetched = fetcher.fetch(&url(&server, "site.test", "/r0")).await.unwrap();
    assert_eq!(fetched.body, b"done");
}

#[tokio::test]
async fn test_redirect_without_location() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(302))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, &["site.test"], &[], test_archive_config());
    let err = fetcher.fetch(&url(&server, "site.test", "/")).await.unwrap_err();

    assert_eq!(err.kind, FailureKind::InvalidUrl);
    assert_eq!(err.details["status"], 302);
}

#[tokio::test]
async fn test_http_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server, &["site.test"], &[], test_archive_config());
    let err = fetcher
        .fetch(&url(&server, "site.test", "/missing"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::NetworkError);
    assert_eq!(err.message, "HTTP 404 Not Found");
    assert_eq!(err.http_status(), Some(404));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_oversized_head_skips_get() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", "1000")
                .set_body_bytes(vec![0u8; 1000]),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = ArchiveConfig {
        max_content_size: 100,
        ..test_archive_config()
    };
    let fetcher = fetcher_for(&server, &["site.test"], &[], config);
    let err = fetcher
        .fetch(&url(&server, "site.test", "/big.iso"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::SizeLimit);
    assert_eq!(err.details["content_length"], 1000);
    assert_eq!(err.details["max_size"], 100);
}

#[tokio::test]
async fn test_oversized_get_body_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 1000]))
        .mount(&server)
        .await;

    let config = ArchiveConfig {
        max_content_size: 100,
        ..test_archive_config()
    };
    let fetcher = fetcher_for(&server, &["site.test"], &[], config);
    let err = fetcher
        .fetch(&url(&server, "site.test", "/no-head"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::SizeLimit);
}

#[tokio::test]
async fn test_slow_response_is_retryable_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = ArchiveConfig {
        connect_timeout: Duration::from_millis(100),
        read_timeout: Duration::from_millis(200),
        ..test_archive_config()
    };
    let fetcher = fetcher_for(&server, &["site.test"], &[], config);
    let err = fetcher
        .fetch(&url(&server, "site.test", "/slow"))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.kind, FailureKind::NetworkError);
    assert_eq!(err.details["timeout"], true);
    assert!(err.message.starts_with("Fetch failed"));
}
