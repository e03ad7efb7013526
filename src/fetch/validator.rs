//! URL validation and SSRF defense.
//!
//! Every URL the fetcher is about to request, the submitted one and each
//! redirect target, passes through [`UrlValidator::validate`]. A URL whose
//! host resolves to any private, loopback or link-local address is refused.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use url::{Host, Url};

use crate::archiver::ArchiveError;

const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Hostname resolution used by the validator.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `host` to its addresses. `port` is only a hint for resolvers that need one.
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Resolver answering from a fixed table. Unknown hosts fail to resolve.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_host(mut self, host: &str, addr: IpAddr) -> Self {
        self.hosts
            .entry(host.to_ascii_lowercase())
            .or_default()
            .push(addr);
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address configured for {host}"),
                )
            })
    }
}

#[derive(Clone)]
pub struct UrlValidator {
    resolver: Arc<dyn Resolver>,
}

impl fmt::Debug for UrlValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlValidator").finish_non_exhaustive()
    }
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new(Arc::new(SystemResolver))
    }
}

impl UrlValidator {
    #[must_use]
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }

    /// Check that `raw` is a fetchable public http(s) URL.
    ///
    /// Checks run in order: parse, scheme, resolution, address range. The
    /// returned URL is the input as parsed; query and fragment are kept.
    ///
    /// # Errors
    ///
    /// `invalid_url` for unparseable input, a disallowed scheme or an
    /// unresolvable host; `blocked` when any resolved address is private.
    pub async fn validate(&self, raw: &str) -> Result<Url, ArchiveError> {
        let url = Url::parse(raw).map_err(|e| {
            ArchiveError::invalid_url(format!("Invalid URL: {e}")).with_detail("url", raw)
        })?;

        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return Err(
                ArchiveError::invalid_url(format!("Unsupported URL scheme: {}", url.scheme()))
                    .with_detail("url", raw)
                    .with_detail("scheme", url.scheme())
                    .with_detail("allowed_schemes", ALLOWED_SCHEMES.to_vec()),
            );
        }

        let host = url.host().ok_or_else(|| {
            ArchiveError::invalid_url("URL has no host").with_detail("url", raw)
        })?;
        let hostname = url.host_str().unwrap_or_default().to_string();

        let addrs = match host {
            Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
            Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
            Host::Domain(domain) => {
                let port = url.port_or_known_default().unwrap_or(80);
                match self.resolver.resolve(domain, port).await {
                    Ok(addrs) if !addrs.is_empty() => addrs,
                    Ok(_) => {
                        return Err(ArchiveError::invalid_url(format!(
                            "Hostname {hostname} did not resolve to any address"
                        ))
                        .with_detail("url", raw)
                        .with_detail("hostname", hostname));
                    }
                    Err(e) => {
                        return Err(ArchiveError::invalid_url(format!(
                            "Could not resolve hostname {hostname}: {e}"
                        ))
                        .with_detail("url", raw)
                        .with_detail("hostname", hostname));
                    }
                }
            }
        };

        if let Some(addr) = addrs.into_iter().find(|addr| is_blocked_ip(*addr)) {
            return Err(ArchiveError::blocked(format!(
                "URL resolves to a private network address ({hostname} -> {addr})"
            ))
            .with_detail("url", raw)
            .with_detail("hostname", hostname)
            .with_detail("address", addr.to_string())
            .with_detail("validation_reason", "private_ip"));
        }

        Ok(url)
    }
}

/// Whether an address lies in a range we refuse to fetch from.
#[must_use]
pub fn is_blocked_ip(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 0.0.0.0/8 "this network"
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    let first = ip.segments()[0];
    // fc00::/7 unique local, fe80::/10 link-local
    if (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80 {
        return true;
    }
    // IPv4-mapped (::ffff:a.b.c.d) and IPv4-compatible (::a.b.c.d) forms
    if ip.to_ipv4().is_some_and(is_blocked_ipv4) {
        return true;
    }
    embedded_ipv4(ip).is_some_and(is_blocked_ipv4)
}

/// The IPv4 address carried by a NAT64 (64:ff9b::/96) or 6to4 (2002::/16)
/// address.
fn embedded_ipv4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    let octets = ip.octets();
    let segments = ip.segments();
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        return Some(Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]));
    }
    if segments[0] == 0x2002 {
        return Some(Ipv4Addr::new(octets[2], octets[3], octets[4], octets[5]));
    }
    None
}
