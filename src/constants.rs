//! Shared constants used across the application.

/// Product name advertised in the archival User-Agent.
pub const SERVICE_NAME: &str = "LinkStash";

/// Crate version, baked in at compile time.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the User-Agent sent with every archival request.
///
/// Format: `<ServiceName>/<version> (+<contact_url>)`. Unlike a spoofed
/// browser string this tells site operators who is fetching and how to reach us.
#[must_use]
pub fn archival_user_agent(contact_url: &str) -> String {
    format!("{SERVICE_NAME}/{SERVICE_VERSION} (+{contact_url})")
}

/// HTTP status codes that are followed as redirects.
pub const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Content-Type fragments that route a response to HTML extraction.
pub const HTML_CONTENT_TYPES: [&str; 2] = ["text/html", "application/xhtml+xml"];

/// Message persisted when an archive fails for a reason we did not anticipate.
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred while archiving";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_format() {
        let ua = archival_user_agent("https://example.com/about");
        assert!(ua.starts_with("LinkStash/"));
        assert!(ua.ends_with(" (+https://example.com/about)"));
        assert!(ua.contains(SERVICE_VERSION));
    }
}
