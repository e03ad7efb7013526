//! Plain-text rendering of sanitized content, used for search and previews.

use scraper::{ElementRef, Html, Node};

use super::markup::{collapse_whitespace, INVISIBLE_ELEMENTS};

/// Elements that start a new line of text.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "details", "div", "dl", "dt", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "ol",
    "p", "pre", "section", "summary", "table", "tr", "ul",
];

/// Render HTML as text: one line per block, whitespace collapsed, no blank lines.
///
/// Expects sanitized input, whose nesting depth is already bounded.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut raw = String::new();
    collect(fragment.root_element(), &mut raw);

    raw.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                if INVISIBLE_ELEMENTS.contains(&el.name()) {
                    continue;
                }
                let block = BLOCK_ELEMENTS.contains(&el.name());
                if block {
                    out.push('\n');
                }
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect(child_element, out);
                }
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_become_lines() {
        let text = html_to_text("<h1>Title</h1><p>First   paragraph\n spanning lines.</p><p>Second</p>");
        assert_eq!(text, "Title\nFirst paragraph spanning lines.\nSecond");
    }

    #[test]
    fn test_inline_elements_stay_inline() {
        let text = html_to_text("<p>Some <strong>bold</strong> and <a href=\"#\">linked</a> text.</p>");
        assert_eq!(text, "Some bold and linked text.");
    }

    #[test]
    fn test_lists_and_breaks() {
        let text = html_to_text("<ul><li>one</li><li>two</li></ul>line<br>break");
        assert_eq!(text, "one\ntwo\nline\nbreak");
    }

    #[test]
    fn test_entities_decoded() {
        assert_eq!(html_to_text("<p>1 &lt; 2 &amp;&amp; 3</p>"), "1 < 2 && 3");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(html_to_text(""), "");
    }
}
