//! Readable-text extraction from HTML and feed entries. Pure functions, no I/O.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

/// Structural markup that never carries article text.
const STRIP_TAGS: [&str; 7] = [
    "script", "style", "noscript", "nav", "header", "footer", "aside",
];

static STRIP_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    STRIP_TAGS
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b.*?</{tag}\s*>")).expect("valid strip regex"))
        .collect()
});

static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Container strategies, cheapest-most-specific first. First match wins.
static CONTAINER_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "main",
        "article",
        "[class*='post']",
        "[class*='content']",
        "[class*='entry']",
        "[class*='article']",
        "body",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("valid static selector"))
    .collect()
});

/// Extract readable plain text from an HTML document.
///
/// Strips non-content markup, picks the most specific content container
/// available, collapses runs of blank lines, and hard-caps the result at
/// `max_chars` as the final step.
pub fn extract_text(html: &str, max_chars: usize) -> String {
    let mut cleaned = html.to_string();
    for re in STRIP_RES.iter() {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }

    let document = Html::parse_document(&cleaned);
    let mut text = String::new();
    for selector in CONTAINER_SELECTORS.iter() {
        if let Some(container) = document.select(selector).next() {
            text = node_text(container);
            break;
        }
    }
    if text.is_empty() {
        text = node_text(document.root_element());
    }

    truncate_chars(&collapse_blank_lines(&text), max_chars)
}

fn node_text(element: scraper::ElementRef<'_>) -> String {
    let mut out = String::new();
    for chunk in element.text() {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(chunk);
    }
    out
}

/// Collapse runs of 3+ consecutive newlines to exactly one blank line.
pub fn collapse_blank_lines(text: &str) -> String {
    BLANK_LINES.replace_all(text, "\n\n").into_owned()
}

/// Hard cap on character count, applied as the final extraction step.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

/// Best available text for a feed entry: prefer the full content body, fall
/// back to the summary/description, else empty. An empty result signals the
/// caller to fetch the article page instead.
pub fn entry_text(entry: &feed_rs::model::Entry, max_chars: usize) -> String {
    if let Some(content) = &entry.content {
        if let Some(body) = &content.body {
            if !body.is_empty() {
                return extract_text(body, max_chars);
            }
        }
    }
    if let Some(summary) = &entry.summary {
        if !summary.content.is_empty() {
            return extract_text(&summary.content, max_chars);
        }
    }
    String::new()
}
