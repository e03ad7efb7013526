//! Allowlist HTML sanitizer for stored content.
//!
//! Anything not explicitly allowed is either dropped with its content
//! (active or embedded content) or unwrapped (unknown presentational tags).
//! Attribute values carrying URLs are resolved against the page and kept
//! only for safe schemes.

use scraper::{ElementRef, Html, Node};
use url::Url;

use super::markup::{escape_attr, escape_text, is_void};
use super::{ExtractionStage, MAX_DEPTH};
use crate::archiver::ArchiveError;

/// Removed together with everything inside them.
const DROPPED_ELEMENTS: &[&str] = &[
    "script", "style", "iframe", "frame", "frameset", "object", "embed", "applet", "noscript",
    "template", "svg", "math", "form", "input", "button", "select", "textarea", "option", "link",
    "meta", "base", "title", "head", "canvas", "audio", "video", "source", "track",
];

/// Kept as elements. Everything else is unwrapped.
const ALLOWED_ELEMENTS: &[&str] = &[
    "a", "abbr", "article", "b", "blockquote", "br", "caption", "cite", "code", "dd", "del",
    "details", "dfn", "div", "dl", "dt", "em", "figcaption", "figure", "h1", "h2", "h3", "h4",
    "h5", "h6", "hr", "i", "img", "ins", "kbd", "li", "mark", "ol", "p", "pre", "q", "s", "samp",
    "section", "small", "span", "strong", "sub", "summary", "sup", "table", "tbody", "td", "tfoot",
    "th", "thead", "time", "tr", "u", "ul", "var",
];

const URL_ATTRIBUTES: [&str; 3] = ["href", "src", "cite"];

const SAFE_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

const LINK_REL: &str = "nofollow noopener noreferrer";

fn allowed_attributes(element: &str) -> &'static [&'static str] {
    match element {
        "a" => &["href", "title"],
        "img" => &["src", "alt", "title", "width", "height"],
        "blockquote" | "q" | "del" | "ins" => &["cite", "title"],
        "td" | "th" => &["colspan", "rowspan", "title"],
        "time" => &["datetime", "title"],
        "ol" => &["start", "title"],
        "abbr" | "dfn" => &["title"],
        _ => &["title"],
    }
}

/// Sanitize an HTML fragment for storage and later display.
///
/// # Errors
///
/// Returns an `extraction_error` if the fragment nests deeper than
/// we are willing to walk.
pub fn sanitize_html(fragment: &str, base_url: &Url) -> Result<String, ArchiveError> {
    let parsed = Html::parse_fragment(fragment);
    let mut sanitizer = Sanitizer {
        base_url,
        out: String::with_capacity(fragment.len()),
    };
    sanitizer.children(parsed.root_element(), 0)?;
    Ok(sanitizer.out)
}

struct Sanitizer<'a> {
    base_url: &'a Url,
    out: String,
}

impl Sanitizer<'_> {
    fn children(&mut self, element: ElementRef<'_>, depth: usize) -> Result<(), ArchiveError> {
        if depth > MAX_DEPTH {
            return Err(ExtractionStage::Sanitization.error(format!(
                "element nesting deeper than {MAX_DEPTH} levels"
            )));
        }
        for child in element.children() {
            match child.value() {
                Node::Text(text) => escape_text(text, &mut self.out),
                Node::Element(_) => {
                    if let Some(child_element) = ElementRef::wrap(child) {
                        self.element(child_element, depth + 1)?;
                    }
                }
                // comments, doctypes, processing instructions
                _ => {}
            }
        }
        Ok(())
    }

    fn element(&mut self, element: ElementRef<'_>, depth: usize) -> Result<(), ArchiveError> {
        let name = element.value().name();
        if DROPPED_ELEMENTS.contains(&name) {
            return Ok(());
        }
        if !ALLOWED_ELEMENTS.contains(&name) {
            return self.children(element, depth);
        }

        let attributes = self.attributes(name, element);
        if name == "img" && !attributes.iter().any(|(attr, _)| *attr == "src") {
            return Ok(());
        }

        self.out.push('<');
        self.out.push_str(name);
        for (attr, value) in &attributes {
            self.out.push(' ');
            self.out.push_str(attr);
            self.out.push_str("=\"");
            escape_attr(value, &mut self.out);
            self.out.push('"');
        }
        if name == "a" && attributes.iter().any(|(attr, _)| *attr == "href") {
            self.out.push_str(" rel=\"");
            self.out.push_str(LINK_REL);
            self.out.push('"');
        }
        self.out.push('>');

        if is_void(name) {
            return Ok(());
        }
        self.children(element, depth)?;
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
        Ok(())
    }

    fn attributes(&self, name: &str, element: ElementRef<'_>) -> Vec<(&'static str, String)> {
        allowed_attributes(name)
            .iter()
            .filter_map(|&attr| {
                let value = element.value().attr(attr)?;
                if URL_ATTRIBUTES.contains(&attr) {
                    safe_url(value, self.base_url).map(|url| (attr, url))
                } else {
                    Some((attr, value.to_string()))
                }
            })
            .collect()
    }
}

/// Resolve `value` against the page, keeping only safe schemes.
///
/// Whitespace and control characters are stripped first; browsers ignore
/// them inside scheme names, so `java\tscript:` must not slip through.
fn safe_url(value: &str, base_url: &Url) -> Option<String> {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();
    if compact.is_empty() {
        return None;
    }
    if compact.starts_with('#') {
        return Some(compact);
    }
    let resolved = base_url.join(&compact).ok()?;
    SAFE_SCHEMES
        .contains(&resolved.scheme())
        .then(|| resolved.to_string())
}
