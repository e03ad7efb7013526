//! Page-level metadata: Open Graph, Twitter Card, canonical URL.

use std::collections::BTreeMap;

use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

use super::markup::collapse_whitespace;
use super::ExtractionStage;
use crate::archiver::ArchiveError;

/// Metadata extracted from a page's `<head>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageMetadata {
    /// og:title, then twitter:title, then `<title>`.
    pub title: Option<String>,
    /// og:description, then meta description, then twitter:description.
    pub description: Option<String>,
    /// Absolute preview image URL.
    pub image: Option<String>,
    /// Absolute canonical URL from `<link rel="canonical">`.
    pub canonical_url: Option<String>,
    pub site_name: Option<String>,
    /// All `og:*` properties, keyed without the prefix. First occurrence wins.
    pub open_graph: BTreeMap<String, String>,
    /// All `twitter:*` properties, keyed without the prefix.
    pub twitter: BTreeMap<String, String>,
}

impl PageMetadata {
    /// Whether nothing at all was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.image.is_none()
            && self.canonical_url.is_none()
            && self.open_graph.is_empty()
            && self.twitter.is_empty()
    }

    /// The metadata map persisted on the archive.
    #[must_use]
    pub fn to_json_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("open_graph".to_string(), string_map(&self.open_graph));
        map.insert("twitter".to_string(), string_map(&self.twitter));
        if let Some(canonical) = &self.canonical_url {
            map.insert("canonical_url".to_string(), canonical.clone().into());
        }
        if let Some(site_name) = &self.site_name {
            map.insert("site_name".to_string(), site_name.clone().into());
        }
        map
    }
}

fn string_map(values: &BTreeMap<String, String>) -> Value {
    Value::Object(
        values
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn selector(css: &str) -> Result<Selector, ArchiveError> {
    Selector::parse(css).map_err(|e| {
        ExtractionStage::Metadata.error(format!("invalid selector '{css}': {e:?}"))
    })
}

/// Extract page metadata, resolving relative URLs against `page_url`.
///
/// # Errors
///
/// Returns an `extraction_error` if a selector cannot be built.
pub fn extract_page_metadata(document: &Html, page_url: &Url) -> Result<PageMetadata, ArchiveError> {
    let open_graph = collect_prefixed(document, r#"meta[property^="og:"]"#, "og:")?;
    let twitter = collect_prefixed(
        document,
        r#"meta[name^="twitter:"], meta[property^="twitter:"]"#,
        "twitter:",
    )?;

    let title = open_graph
        .get("title")
        .or_else(|| twitter.get("title"))
        .cloned()
        .or(title_tag(document)?);

    let description = open_graph
        .get("description")
        .cloned()
        .or(meta_content(document, r#"meta[name="description"]"#)?)
        .or_else(|| twitter.get("description").cloned());

    let image = open_graph
        .get("image")
        .or_else(|| open_graph.get("image:url"))
        .or_else(|| twitter.get("image"))
        .cloned()
        .or(link_href(document, r#"link[rel="image_src"]"#)?)
        .and_then(|src| absolutize(page_url, &src));

    let canonical_url = link_href(document, r#"link[rel="canonical"]"#)?
        .and_then(|href| absolutize(page_url, &href));

    let site_name = open_graph.get("site_name").cloned();

    Ok(PageMetadata {
        title,
        description,
        image,
        canonical_url,
        site_name,
        open_graph,
        twitter,
    })
}

fn collect_prefixed(
    document: &Html,
    css: &str,
    prefix: &str,
) -> Result<BTreeMap<String, String>, ArchiveError> {
    let sel = selector(css)?;
    let mut values = BTreeMap::new();

    for element in document.select(&sel) {
        let el = element.value();
        let Some(key) = el.attr("property").or_else(|| el.attr("name")) else {
            continue;
        };
        let Some(key) = key.strip_prefix(prefix) else {
            continue;
        };
        if let Some(content) = non_empty(el.attr("content")) {
            values.entry(key.to_string()).or_insert(content);
        }
    }

    Ok(values)
}

fn title_tag(document: &Html) -> Result<Option<String>, ArchiveError> {
    let sel = selector("title")?;
    Ok(document.select(&sel).next().and_then(|element| {
        let text = collapse_whitespace(&element.text().collect::<String>());
        non_empty(Some(text.as_str()))
    }))
}

fn meta_content(document: &Html, css: &str) -> Result<Option<String>, ArchiveError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .find_map(|element| non_empty(element.value().attr("content"))))
}

fn link_href(document: &Html, css: &str) -> Result<Option<String>, ArchiveError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .find_map(|element| non_empty(element.value().attr("href"))))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Resolve `href` against the page and keep it only if it is http(s).
fn absolutize(page_url: &Url, href: &str) -> Option<String> {
    page_url
        .join(href)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(String::from)
}
