//! Page content extraction.
//!
//! Reads a parsed document and produces a bounded [`PageSummary`]. Nothing
//! here mutates the document: stripped subtrees are skipped while walking,
//! which is equivalent to removing them from a clone.

use scraper::{ElementRef, Html, Node, Selector};

use crate::types::{Heading, Link, PageSummary, take_chars};

/// Element id of the extension's own panel; never part of extracted content.
pub const PANEL_ID: &str = "ai-chatbot-panel";

pub const MAX_HEADINGS: usize = 20;
pub const HEADING_MAX_CHARS: usize = 200;
pub const MAIN_CONTENT_MAX_CHARS: usize = 5000;
pub const MAX_LINKS: usize = 20;
pub const LINK_TEXT_MAX_CHARS: usize = 100;
/// Blunt cut of the serialized document; may end mid-tag.
pub const HTML_MAX_CHARS: usize = 50_000;

/// Probed in order; the first one that matches anything wins.
const MAIN_SELECTORS: [&str; 7] = [
    "main",
    "article",
    "[role=\"main\"]",
    ".content",
    "#content",
    ".post",
    ".article",
];

const STRIPPED_TAGS: [&str; 6] = ["script", "style", "nav", "footer", "header", "aside"];

/// Parse `html` and summarize it.
pub fn extract_page(url: &str, html: &str) -> PageSummary {
    let document = Html::parse_document(html);
    summarize(url, &document)
}

/// Summarize an already parsed document.
pub fn summarize(url: &str, document: &Html) -> PageSummary {
    PageSummary {
        url: url.to_string(),
        title: page_title(document),
        description: meta_description(document),
        headings: headings(document),
        main_content: main_content(document),
        links: links(document),
        html: take_chars(&document.root_element().html(), HTML_MAX_CHARS).to_string(),
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first_match<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    selector(css).and_then(|sel| document.select(&sel).next())
}

fn page_title(document: &Html) -> String {
    first_match(document, "title")
        .map(|title| compact_ws(&text_content(title)))
        .unwrap_or_default()
}

fn meta_description(document: &Html) -> String {
    first_match(document, "meta[name=\"description\"]")
        .and_then(|meta| meta.value().attr("content"))
        .unwrap_or_default()
        .to_string()
}

fn headings(document: &Html) -> Vec<Heading> {
    let Some(sel) = selector("h1, h2, h3") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|h| {
            let level = h.value().name().get(1..)?.parse().ok()?;
            let text = text_content(h);
            Some(Heading {
                level,
                text: take_chars(text.trim(), HEADING_MAX_CHARS).to_string(),
            })
        })
        .take(MAX_HEADINGS)
        .collect()
}

fn main_content(document: &Html) -> String {
    let root = MAIN_SELECTORS
        .iter()
        .find_map(|css| first_match(document, css))
        .or_else(|| first_match(document, "body"))
        .unwrap_or_else(|| document.root_element());

    let mut raw = String::new();
    visible_text(root, &mut raw);
    take_chars(&compact_ws(&raw), MAIN_CONTENT_MAX_CHARS).to_string()
}

fn links(document: &Html) -> Vec<Link> {
    let Some(sel) = selector("a[href]") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let text = text_content(a);
            let text = text.trim();
            if text.is_empty()
                || href.is_empty()
                || href.starts_with('#')
                || href.starts_with("javascript:")
            {
                return None;
            }
            Some(Link {
                text: take_chars(text, LINK_TEXT_MAX_CHARS).to_string(),
                href: href.to_string(),
            })
        })
        .take(MAX_LINKS)
        .collect()
}

/// Concatenated text of an element, like the DOM's `textContent`.
pub(crate) fn text_content(element: ElementRef<'_>) -> String {
    element.text().collect()
}

/// Collapse every whitespace run to one space and trim.
pub(crate) fn compact_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_stripped(element: ElementRef<'_>) -> bool {
    let value = element.value();
    STRIPPED_TAGS.contains(&value.name()) || value.id() == Some(PANEL_ID)
}

fn visible_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    if !is_stripped(child) {
                        visible_text(child, out);
                    }
                }
            }
            _ => {}
        }
    }
}
