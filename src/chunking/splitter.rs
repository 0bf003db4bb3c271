//! Header-based and recursive character splitting.
//!
//! The header split partitions the markdown at ATX headings, keeping each
//! heading line attached to the content that follows it. Oversized pieces
//! are then split recursively over a separator ladder with an exact
//! partition of the parent span (trailing separators stay with the
//! preceding piece).

use regex::Regex;
use std::sync::OnceLock;

/// Separator ladder for the recursive split; the first separator that
/// yields in-budget pieces wins, the empty separator falls back to raw
/// character slicing.
pub const SEPARATORS: [&str; 7] = [". ", "! ", "? ", "; ", ", ", " ", ""];

/// A contiguous piece of the source markdown produced by the header split.
#[derive(Clone, Debug, PartialEq)]
pub struct Section {
    /// Byte offset of the section in the source markdown.
    pub start: usize,
    /// Section text, an exact substring of the source.
    pub text: String,
}

/// Leading ATX heading of a section, when present.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadingLine {
    pub level: u8,
    pub title: String,
    /// Byte length of the heading line (without its newline).
    pub line_len: usize,
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,6})[ \t]+\S").expect("static regex"))
}

fn heading_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})[ \t]+(.*)$").expect("static regex"))
}

/// Partition `markdown` at every line-start ATX heading.
///
/// The heading line stays with the content following it; any preamble
/// before the first heading forms its own section. Whitespace-only pieces
/// are dropped.
pub fn header_split(markdown: &str) -> Vec<Section> {
    let mut boundaries: Vec<usize> = heading_regex().find_iter(markdown).map(|m| m.start()).collect();
    if boundaries.first() != Some(&0) {
        boundaries.insert(0, 0);
    }
    boundaries.push(markdown.len());

    let mut sections = Vec::new();
    for pair in boundaries.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        let text = &markdown[start..end];
        if text.trim().is_empty() {
            continue;
        }
        sections.push(Section {
            start,
            text: text.to_string(),
        });
    }
    sections
}

/// Parse the leading ATX heading of a section, if any.
#[must_use]
pub fn leading_heading(section_text: &str) -> Option<HeadingLine> {
    let first_line = section_text.lines().next()?;
    let caps = heading_line_regex().captures(first_line)?;
    let level = caps.get(1).map(|m| m.as_str().len())? as u8;
    let title = caps.get(2).map(|m| m.as_str().trim().to_string())?;
    if title.is_empty() {
        return None;
    }
    Some(HeadingLine {
        level,
        title,
        line_len: first_line.len(),
    })
}

/// Recursively split `text` into pieces of at most `budget` bytes.
///
/// The pieces concatenate back to exactly `text`. Separators stay at the
/// end of the piece they close.
#[must_use]
pub fn split_recursive(text: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    split_with(text, budget, &SEPARATORS)
}

fn split_with(text: &str, budget: usize, separators: &[&str]) -> Vec<String> {
    if text.len() <= budget {
        return vec![text.to_string()];
    }

    let sep_idx = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep))
        .unwrap_or(separators.len() - 1);
    let sep = separators[sep_idx];

    if sep.is_empty() {
        return slice_by_chars(text, budget);
    }

    let pieces = split_keeping_separator(text, sep);
    let remaining = &separators[sep_idx + 1..];

    // Greedy merge of adjacent pieces up to the budget; pieces that alone
    // exceed the budget recurse with the remaining separators.
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if piece.len() > budget {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            out.extend(split_with(&piece, budget, remaining));
        } else if current.len() + piece.len() > budget {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            current.push_str(&piece);
        } else {
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_keeping_separator(text: &str, sep: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut prev = 0usize;
    for (idx, _) in text.match_indices(sep) {
        let end = idx + sep.len();
        pieces.push(text[prev..end].to_string());
        prev = end;
    }
    if prev < text.len() {
        pieces.push(text[prev..].to_string());
    }
    pieces
}

fn slice_by_chars(text: &str, budget: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0usize;
    while start < text.len() {
        let mut end = (start + budget).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single character wider than the budget still advances.
            end = text[start..]
                .char_indices()
                .nth(1)
                .map_or(text.len(), |(i, _)| start + i);
        }
        out.push(text[start..end].to_string());
        start = end;
    }
    out
}
