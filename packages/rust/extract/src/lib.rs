//! Page text extraction and fixed-size chunking.
//!
//! Turns a raw page payload into normalized plain text (markup, scripts,
//! navigation chrome and images dropped, whitespace collapsed) and splits that
//! text into fixed-size, non-overlapping fragments.

mod chunk;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, instrument};

pub use chunk::chunk_text;

/// Subtrees dropped entirely during extraction.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "head", "nav", "footer", "iframe", "img", "svg", "noscript", "template",
];

/// Elements whose boundaries separate words even without surrounding whitespace.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "aside", "header", "br", "li", "ul", "ol", "tr",
    "td", "th", "table", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote", "dd", "dt",
];

/// Normalized text pulled out of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    /// Plain text, single-spaced and trimmed.
    pub text: String,
    /// Length of `text` in chars.
    pub char_count: usize,
}

impl ExtractedText {
    /// Whether the text reaches `min_chars` (inclusive).
    pub fn is_at_least(&self, min_chars: usize) -> bool {
        self.char_count >= min_chars
    }
}

/// Extract normalized plain text from a raw HTML payload.
///
/// Never fails: malformed markup is parsed leniently, and an empty or
/// markup-only payload yields empty text. Whether the result is long enough
/// to be useful is the caller's decision.
#[instrument(skip(html), fields(payload_len = html.len()))]
pub fn extract_text(html: &str) -> ExtractedText {
    static BODY_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("body").expect("valid selector"));

    let doc = Html::parse_document(html);
    let root = doc
        .select(&BODY_SEL)
        .next()
        .unwrap_or_else(|| doc.root_element());

    let mut raw = String::with_capacity(html.len() / 2);
    collect_text(root, &mut raw);

    let text = collapse_whitespace(&raw);
    let char_count = text.chars().count();

    debug!(char_count, "text extracted");

    ExtractedText { text, char_count }
}

/// Depth-first text collection, skipping noise subtrees.
fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if SKIPPED_TAGS.contains(&el.name()) => {}
            Node::Element(el) => {
                let block = BLOCK_TAGS.contains(&el.name());
                if block {
                    out.push(' ');
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if block {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// Collapse every whitespace run to a single space and trim the ends.
fn collapse_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    WS_RE.replace_all(text, " ").trim().to_string()
}
