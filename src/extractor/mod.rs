//! HTML content extraction.
//!
//! Turns a fetched HTML page into the readable, sanitized content stored on
//! an archive. Extraction is synchronous: parsed documents are not `Send`
//! and must never be held across an await point.

mod markup;
pub mod metadata;
pub mod readable;
pub mod sanitize;
pub mod text;

use std::fmt::Display;

use scraper::Html;
use url::Url;

use crate::archiver::ArchiveError;

pub use metadata::{extract_page_metadata, PageMetadata};
pub use readable::extract_main_content;
pub use sanitize::sanitize_html;
pub use text::html_to_text;

/// Deepest element nesting the recursive walkers accept.
pub const MAX_DEPTH: usize = 256;

/// Where in the pipeline an extraction failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStage {
    Metadata,
    Content,
    Sanitization,
}

impl ExtractionStage {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Metadata => "Metadata extraction",
            Self::Content => "Content extraction",
            Self::Sanitization => "HTML sanitization",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Content => "content",
            Self::Sanitization => "sanitization",
        }
    }

    /// An `extraction_error` whose message names this stage.
    pub(crate) fn error(self, detail: impl Display) -> ArchiveError {
        ArchiveError::extraction(format!("{} error: {detail}", self.label()))
            .with_detail("stage", self.as_str())
    }
}

/// Everything extraction produces for one page.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub content_html: String,
    pub content_text: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub metadata: PageMetadata,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentExtractor;

impl ContentExtractor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Extract metadata and readable content from `html` served at `page_url`.
    ///
    /// # Errors
    ///
    /// Returns an `extraction_error` naming the failing stage.
    pub fn extract(&self, html: &str, page_url: &Url) -> Result<ExtractedContent, ArchiveError> {
        let document = Html::parse_document(html);

        let metadata = extract_page_metadata(&document, page_url)?;
        let raw_content = extract_main_content(html, &document, page_url)?;
        let content_html = sanitize_html(&raw_content, page_url)?;
        let content_text = html_to_text(&content_html);

        Ok(ExtractedContent {
            content_html,
            content_text,
            title: metadata.title.clone(),
            description: metadata.description.clone(),
            image_url: metadata.image.clone(),
            metadata,
        })
    }
}
