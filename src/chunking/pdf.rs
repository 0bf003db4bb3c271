//! PDF-to-markdown rendering.
//!
//! Text extraction yields plain per-page text; markdown structure is
//! recovered by passing through lines that already carry ATX heading
//! syntax and promoting short, unpunctuated title lines (ALL-CAPS to `#`,
//! Title Case to `##`). The heuristic is deliberately conservative and
//! fully deterministic.

use regex::Regex;
use std::sync::OnceLock;

use super::ChunkerError;

/// Extract each page of the PDF as markdown.
pub fn extract_pages(pdf_bytes: &[u8]) -> Result<Vec<String>, ChunkerError> {
    if pdf_bytes.is_empty() {
        return Err(ChunkerError::Input {
            reason: "empty byte stream".to_string(),
        });
    }
    let pages =
        pdf_extract::extract_text_from_mem_by_pages(pdf_bytes).map_err(|err| {
            ChunkerError::Input {
                reason: format!("PDF text extraction failed: {err}"),
            }
        })?;
    if pages.is_empty() {
        return Err(ChunkerError::Input {
            reason: "document has no pages".to_string(),
        });
    }
    Ok(pages.iter().map(|page| render_page_markdown(page)).collect())
}

fn atx_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#{1,6}[ \t]+\S").expect("static regex"))
}

/// Render one page of extracted text as markdown.
pub fn render_page_markdown(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        let trimmed = line.trim();
        if atx_regex().is_match(trimmed) {
            out.push_str(trimmed);
        } else if let Some(level) = heading_level(trimmed) {
            out.push_str(&"#".repeat(level as usize));
            out.push(' ');
            out.push_str(trimmed);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Heading level for a plain-text line, or `None` for body text.
fn heading_level(line: &str) -> Option<u8> {
    if line.len() < 3 || line.len() > 80 {
        return None;
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() || words.len() > 12 {
        return None;
    }
    if line.ends_with(['.', ',', ';', ':']) {
        return None;
    }
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    if letters.iter().all(|c| c.is_uppercase()) {
        return Some(1);
    }
    let title_case = words.iter().all(|w| {
        w.chars()
            .find(|c| c.is_alphabetic())
            .is_none_or(|c| c.is_uppercase())
    });
    if title_case && words.len() >= 2 {
        return Some(2);
    }
    None
}
