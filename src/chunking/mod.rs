//! Structure-aware chunking of course PDFs.
//!
//! The chunker is a pure function of bytes plus configuration: PDF pages are
//! rendered to markdown, partitioned at ATX headings, size-gated by word
//! count, recursively split where oversized, then ordered, renumbered,
//! validated, and annotated with header ancestry and page ranges. There are
//! no partial outputs: the run either yields the full chunk sequence or an
//! error.

pub mod hierarchy;
pub mod pages;
pub mod pdf;
pub mod splitter;
pub mod types;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;
use tracing::debug;

use hierarchy::assign_hierarchy;
use pages::{PageMap, SpanLocator};
use splitter::{header_split, leading_heading, split_recursive};

pub use types::{Chunk, SplitLevel};

/// Default word budget per chunk.
pub const DEFAULT_MAX_WORDS: usize = 350;

/// Character budget per word for the recursive split.
const CHARS_PER_WORD: usize = 6;

/// Errors from the chunking pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum ChunkerError {
    /// The input PDF is unreadable, empty, or has no extractable text.
    #[error("unreadable or empty document: {reason}")]
    #[diagnostic(
        code(lectern::chunker::input),
        help("The PDF must contain at least one page of extractable text.")
    )]
    Input { reason: String },

    /// A post-build invariant failed; the run is discarded.
    #[error("sibling chunks for source unit {original_chunk_id} are invalid: {detail}")]
    #[diagnostic(code(lectern::chunker::invariant))]
    Invariant {
        original_chunk_id: usize,
        detail: String,
    },
}

/// Chunk a PDF byte stream.
pub fn chunk_pdf(
    pdf_bytes: &[u8],
    course_id: &str,
    slide_id: &str,
    s3_file_name: &str,
    max_words: usize,
) -> Result<Vec<Chunk>, ChunkerError> {
    let pages = pdf::extract_pages(pdf_bytes)?;
    chunk_pages(&pages, course_id, slide_id, s3_file_name, max_words)
}

struct DocContext<'a> {
    course_id: &'a str,
    slide_id: &'a str,
    s3_file_name: &'a str,
    total_pages: u32,
    timestamp: DateTime<Utc>,
}

/// Chunk already-rendered per-page markdown.
///
/// This is the pure core `chunk_pdf` feeds; it is also the natural entry
/// point for callers that render pages themselves.
pub fn chunk_pages(
    pages: &[String],
    course_id: &str,
    slide_id: &str,
    s3_file_name: &str,
    max_words: usize,
) -> Result<Vec<Chunk>, ChunkerError> {
    if pages.is_empty() {
        return Err(ChunkerError::Input {
            reason: "document has no pages".to_string(),
        });
    }
    let (markdown, page_map) = PageMap::from_pages(pages);
    if markdown.trim().is_empty() {
        return Err(ChunkerError::Input {
            reason: "document has no extractable text".to_string(),
        });
    }

    let ctx = DocContext {
        course_id,
        slide_id,
        s3_file_name,
        total_pages: page_map.total_pages(),
        timestamp: Utc::now(),
    };
    let max_words = max_words.max(1);
    let char_budget = max_words * CHARS_PER_WORD;

    let sections = header_split(&markdown);
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut next_unit = 0usize;

    for section in &sections {
        let words = count_words(&section.text);
        if words <= max_words {
            chunks.push(draft(
                &ctx,
                section.text.clone(),
                section.start,
                take_unit(&mut next_unit),
                SplitLevel::Markdown,
                1,
                0,
            ));
            continue;
        }

        // Oversized. A leading heading keeps its level metadata and stays a
        // markdown-level chunk; only the content below it is split.
        if let Some(heading) = leading_heading(&section.text) {
            let mut line_end = heading.line_len;
            if section.text[line_end..].starts_with('\n') {
                line_end += 1;
            }
            chunks.push(draft(
                &ctx,
                section.text[..line_end].to_string(),
                section.start,
                take_unit(&mut next_unit),
                SplitLevel::Markdown,
                1,
                0,
            ));

            let content = &section.text[line_end..];
            if content.trim().is_empty() {
                continue;
            }
            let content_start = section.start + line_end;
            if count_words(content) <= max_words {
                chunks.push(draft(
                    &ctx,
                    content.to_string(),
                    content_start,
                    take_unit(&mut next_unit),
                    SplitLevel::Markdown,
                    1,
                    0,
                ));
            } else {
                push_recursive(
                    &ctx,
                    &mut chunks,
                    content,
                    content_start,
                    take_unit(&mut next_unit),
                    char_budget,
                );
            }
        } else {
            push_recursive(
                &ctx,
                &mut chunks,
                &section.text,
                section.start,
                take_unit(&mut next_unit),
                char_budget,
            );
        }
    }

    // Reading order, dense indices, stable IDs.
    chunks.sort_by_key(|c| c.char_start_pos);
    for (index, chunk) in chunks.iter_mut().enumerate() {
        chunk.chunk_index = index;
        chunk.refresh_id();
    }

    validate_sibling_contiguity(&chunks)?;
    assign_hierarchy(&mut chunks);

    // Re-derive spans with a monotone substring search, then map to pages.
    let mut locator = SpanLocator::new(&markdown);
    for chunk in chunks.iter_mut() {
        match locator.locate(&chunk.text) {
            Some((start, end)) => {
                chunk.char_start_pos = start;
                chunk.char_end_pos = end;
                let (page_start, page_end) = page_map.page_range(start, end);
                chunk.page_start = page_start;
                chunk.page_end = page_end;
            }
            None => {
                chunk.page_start = 1;
                chunk.page_end = 1;
            }
        }
    }

    debug!(
        target: "lectern::chunking",
        course_id,
        slide_id,
        sections = sections.len(),
        chunks = chunks.len(),
        "chunking complete"
    );
    Ok(chunks)
}

fn take_unit(next: &mut usize) -> usize {
    let unit = *next;
    *next += 1;
    unit
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

fn draft(
    ctx: &DocContext<'_>,
    text: String,
    start: usize,
    unit: usize,
    split_level: SplitLevel,
    sibling_count: usize,
    sibling_index: usize,
) -> Chunk {
    let word_count = count_words(&text);
    let char_count = text.len();
    let end = start + text.len();
    Chunk {
        id: String::new(),
        course_id: ctx.course_id.to_string(),
        slide_id: ctx.slide_id.to_string(),
        chunk_index: 0,
        text,
        word_count,
        char_count,
        split_level,
        page_start: 1,
        page_end: 1,
        headers_hierarchy: Vec::new(),
        headers_hierarchy_titles: Vec::new(),
        char_start_pos: start,
        char_end_pos: end,
        original_chunk_id: unit,
        sentence_sibling_count: sibling_count,
        sentence_sibling_index: sibling_index,
        is_header: false,
        header_level: None,
        header_text: None,
        embedding: None,
        s3_file_name: ctx.s3_file_name.to_string(),
        total_pages: ctx.total_pages,
        timestamp: ctx.timestamp,
    }
}

fn push_recursive(
    ctx: &DocContext<'_>,
    chunks: &mut Vec<Chunk>,
    text: &str,
    start: usize,
    unit: usize,
    char_budget: usize,
) {
    let pieces = split_recursive(text, char_budget);
    let count = pieces.len();
    let mut offset = start;
    for (sibling_index, piece) in pieces.into_iter().enumerate() {
        let piece_len = piece.len();
        chunks.push(draft(
            ctx,
            piece,
            offset,
            unit,
            SplitLevel::Recursive,
            count,
            sibling_index,
        ));
        offset += piece_len;
    }
}

fn validate_sibling_contiguity(chunks: &[Chunk]) -> Result<(), ChunkerError> {
    use rustc_hash::FxHashMap;

    let mut groups: FxHashMap<usize, Vec<&Chunk>> = FxHashMap::default();
    for chunk in chunks {
        groups.entry(chunk.original_chunk_id).or_default().push(chunk);
    }

    for (unit, group) in groups {
        for (position, chunk) in group.iter().enumerate() {
            if position > 0 && chunk.chunk_index != group[position - 1].chunk_index + 1 {
                return Err(ChunkerError::Invariant {
                    original_chunk_id: unit,
                    detail: format!(
                        "chunk_index jumps from {} to {}",
                        group[position - 1].chunk_index,
                        chunk.chunk_index
                    ),
                });
            }
            if chunk.sentence_sibling_index != position {
                return Err(ChunkerError::Invariant {
                    original_chunk_id: unit,
                    detail: format!(
                        "sentence_sibling_index {} at group position {position}",
                        chunk.sentence_sibling_index
                    ),
                });
            }
            if chunk.sentence_sibling_count != group.len() {
                return Err(ChunkerError::Invariant {
                    original_chunk_id: unit,
                    detail: format!(
                        "sentence_sibling_count {} for a group of {}",
                        chunk.sentence_sibling_count,
                        group.len()
                    ),
                });
            }
        }
    }
    Ok(())
}
