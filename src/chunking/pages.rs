//! Page-boundary bookkeeping and span-to-page mapping.

use tracing::warn;

/// Maps character offsets in the concatenated markdown back to 1-based
/// page numbers via the recorded page-start offsets.
#[derive(Clone, Debug)]
pub struct PageMap {
    /// `(char_offset_of_page_start, page_number)`, ascending by offset.
    markers: Vec<(usize, u32)>,
    total_pages: u32,
}

impl PageMap {
    /// Concatenate per-page markdown (newline-joined) and record one marker
    /// per page boundary.
    pub fn from_pages(pages: &[String]) -> (String, PageMap) {
        let mut markers = Vec::with_capacity(pages.len());
        let mut markdown = String::new();
        let mut offset = 0usize;
        for (i, page) in pages.iter().enumerate() {
            markers.push((offset, (i + 1) as u32));
            markdown.push_str(page);
            offset += page.len();
            if i + 1 < pages.len() {
                markdown.push('\n');
                offset += 1;
            }
        }
        let map = PageMap {
            markers,
            total_pages: pages.len().max(1) as u32,
        };
        (markdown, map)
    }

    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    /// Page containing the character at `pos`.
    fn page_at(&self, pos: usize) -> u32 {
        let idx = self.markers.partition_point(|(offset, _)| *offset <= pos);
        if idx == 0 {
            1
        } else {
            self.markers[idx - 1].1
        }
    }

    /// Inclusive page range spanned by `[start, end)`.
    #[must_use]
    pub fn page_range(&self, start: usize, end: usize) -> (u32, u32) {
        if self.markers.is_empty() {
            return (1, 1);
        }
        let page_start = self.page_at(start);
        let last_char = if end > start { end - 1 } else { start };
        let page_end = self.page_at(last_char).max(page_start);
        (page_start, page_end)
    }
}

/// Locates chunk texts in the source markdown with a monotone cursor, so
/// repeated text resolves to successive occurrences in document order.
pub struct SpanLocator<'a> {
    source: &'a str,
    cursor: usize,
}

impl<'a> SpanLocator<'a> {
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self { source, cursor: 0 }
    }

    /// Find `text` at or after the cursor; retries on the trimmed text when
    /// the exact form is absent. Advances the cursor past the match.
    pub fn locate(&mut self, text: &str) -> Option<(usize, usize)> {
        if let Some(span) = self.find_from_cursor(text) {
            return Some(span);
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() && trimmed != text {
            if let Some(span) = self.find_from_cursor(trimmed) {
                return Some(span);
            }
        }
        warn!(
            target: "lectern::chunking",
            text_prefix = &text[..text.len().min(40)],
            "chunk text not found in source markdown; falling back to page (1, 1)"
        );
        None
    }

    fn find_from_cursor(&mut self, needle: &str) -> Option<(usize, usize)> {
        if needle.is_empty() {
            return None;
        }
        let rel = self.source.get(self.cursor..)?.find(needle)?;
        let start = self.cursor + rel;
        let end = start + needle.len();
        self.cursor = end;
        Some((start, end))
    }
}
