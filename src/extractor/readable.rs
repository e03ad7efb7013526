//! Main-content detection.
//!
//! Semantic containers (`article`, `main`) win when they carry enough text.
//! Otherwise the page goes through the `readability` scorer, and the body is
//! the last resort. Whichever region is chosen is serialized without
//! navigation, sidebars and other page furniture. The result is raw HTML;
//! it still has to go through the sanitizer.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;
use url::Url;

use super::markup::{escape_attr, escape_text, is_void, visible_text, INVISIBLE_ELEMENTS};
use super::{ExtractionStage, MAX_DEPTH};
use crate::archiver::ArchiveError;

/// Class/id fragments of elements that are rarely content.
static UNLIKELY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(comments?|sidebar|share|sharing|social|related|nav|navbar|menu|breadcrumbs?|footer|masthead|advert|ads?|sponsor(ed)?|promo|newsletter|subscribe|cookie|popup|modal|banner)\b",
    )
    .unwrap()
});

/// Class/id fragments of elements that usually are content.
static LIKELY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(article|body|content|entry|main|post|story|text|blog)\b").unwrap()
});

/// Elements that are page furniture wherever they appear.
const FURNITURE: [&str; 8] = [
    "nav", "aside", "footer", "form", "button", "select", "input", "textarea",
];

/// Text a semantic container (`article`, `main`) needs before we trust it.
const MIN_SEMANTIC_TEXT: usize = 200;

fn selector(css: &str) -> Result<Selector, ArchiveError> {
    Selector::parse(css)
        .map_err(|e| ExtractionStage::Content.error(format!("invalid selector '{css}': {e:?}")))
}

fn nesting_error() -> ArchiveError {
    ExtractionStage::Content.error(format!("element nesting deeper than {MAX_DEPTH} levels"))
}

/// Serialize the main content region of the page.
///
/// `document` must be the parse of `html`.
///
/// # Errors
///
/// Returns an `extraction_error` if no readable content is found or the
/// document nests deeper than we are willing to walk.
pub fn extract_main_content(html: &str, document: &Html, page_url: &Url) -> Result<String, ArchiveError> {
    check_depth(document)?;

    if let Some(element) = semantic_candidate(document)? {
        let mut renderer = Renderer::default();
        renderer.element(element, true, 0)?;
        if renderer.has_content() {
            return Ok(renderer.out);
        }
    }

    let scored = readability_content(html, page_url)?;
    let fragment = Html::parse_fragment(&scored);
    let mut renderer = Renderer::default();
    renderer.children(fragment.root_element(), 0)?;
    if renderer.has_content() {
        return Ok(renderer.out);
    }

    debug!(url = %page_url, "No scored content, falling back to body");
    let body = document
        .select(&selector("body")?)
        .next()
        .ok_or_else(|| ExtractionStage::Content.error("document has no body"))?;
    let mut renderer = Renderer::default();
    renderer.element(body, true, 0)?;
    if !renderer.has_content() {
        return Err(ExtractionStage::Content.error("no readable content found"));
    }
    Ok(renderer.out)
}

/// Refuse documents nested deeper than [`MAX_DEPTH`] before any recursive
/// walker sees them.
fn check_depth(document: &Html) -> Result<(), ArchiveError> {
    let mut depths = HashMap::new();
    for node in document.tree.root().descendants() {
        let depth = node
            .parent()
            .and_then(|parent| depths.get(&parent.id()).copied())
            .map_or(0, |parent_depth: usize| parent_depth + 1);
        if depth > MAX_DEPTH {
            return Err(nesting_error());
        }
        if node.has_children() {
            depths.insert(node.id(), depth);
        }
    }
    Ok(())
}

/// The largest `article`/`main` region, if it carries enough text.
fn semantic_candidate(document: &Html) -> Result<Option<ElementRef<'_>>, ArchiveError> {
    for css in ["article", "main", r#"[role="main"]"#] {
        let best = document
            .select(&selector(css)?)
            .map(|element| (visible_text(element).len(), element))
            .max_by_key(|(len, _)| *len);
        if let Some((len, element)) = best {
            if len >= MIN_SEMANTIC_TEXT {
                return Ok(Some(element));
            }
        }
    }
    Ok(None)
}

/// Inner HTML of the region the readability scorer ranks highest.
fn readability_content(html: &str, page_url: &Url) -> Result<String, ArchiveError> {
    let mut cursor = Cursor::new(html.as_bytes());
    let product = readability::extractor::extract(&mut cursor, page_url)
        .map_err(|e| ExtractionStage::Content.error(format!("readability failed: {e}")))?;
    Ok(product.content)
}

fn class_and_id(element: ElementRef<'_>) -> String {
    let el = element.value();
    format!(
        "{} {}",
        el.attr("class").unwrap_or_default(),
        el.attr("id").unwrap_or_default()
    )
}

fn inside_article(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().name() == "article")
}

fn is_furniture(element: ElementRef<'_>) -> bool {
    let el = element.value();
    if FURNITURE.contains(&el.name()) || INVISIBLE_ELEMENTS.contains(&el.name()) {
        return true;
    }
    // Site banners, but an article's own header is part of the article.
    if el.name() == "header" && !inside_article(element) {
        return true;
    }
    if el.attr("hidden").is_some() || el.attr("aria-hidden") == Some("true") {
        return true;
    }
    let names = class_and_id(element);
    UNLIKELY.is_match(&names) && !LIKELY.is_match(&names)
}

#[derive(Default)]
struct Renderer {
    out: String,
    text_chars: usize,
    images: usize,
}

impl Renderer {
    fn has_content(&self) -> bool {
        self.text_chars > 0 || self.images > 0
    }

    fn element(&mut self, element: ElementRef<'_>, is_root: bool, depth: usize) -> Result<(), ArchiveError> {
        if depth > MAX_DEPTH {
            return Err(nesting_error());
        }
        if !is_root && is_furniture(element) {
            return Ok(());
        }

        let name = element.value().name();
        self.out.push('<');
        self.out.push_str(name);
        for (attr, value) in element.value().attrs() {
            self.out.push(' ');
            self.out.push_str(attr);
            self.out.push_str("=\"");
            escape_attr(value, &mut self.out);
            self.out.push('"');
        }
        self.out.push('>');

        if name == "img" {
            self.images += 1;
        }
        if is_void(name) {
            return Ok(());
        }

        self.children(element, depth)?;

        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
        Ok(())
    }

    fn children(&mut self, element: ElementRef<'_>, depth: usize) -> Result<(), ArchiveError> {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => {
                    self.text_chars += text.trim().len();
                    escape_text(text, &mut self.out);
                }
                Node::Element(_) => {
                    if let Some(child_element) = ElementRef::wrap(child) {
                        self.element(child_element, false, depth + 1)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}
