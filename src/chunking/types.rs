//! Chunk record and post-build validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a chunk was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitLevel {
    /// Emitted directly by the header-based markdown split.
    Markdown,
    /// Emitted by the recursive character split of an oversized section.
    Recursive,
}

/// The atomic indexed unit: a contiguous piece of document text plus
/// structure and provenance metadata.
///
/// Identity is `(course_id, slide_id, chunk_index)`; `id` is the stable
/// stringified form `"{course}:{slide}:{index}"` used as the store key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub course_id: String,
    pub slide_id: String,
    pub chunk_index: usize,

    pub text: String,
    pub word_count: usize,
    pub char_count: usize,
    pub split_level: SplitLevel,

    /// 1-based inclusive page range, `1 <= page_start <= page_end <= total_pages`.
    pub page_start: u32,
    pub page_end: u32,

    /// Indices of ancestor header chunks, outermost first.
    pub headers_hierarchy: Vec<usize>,
    /// `"H{level}^{text}"` titles aligned 1-1 with `headers_hierarchy`.
    pub headers_hierarchy_titles: Vec<String>,

    /// Span in the concatenated source markdown.
    pub char_start_pos: usize,
    pub char_end_pos: usize,

    /// Index of the markdown-split unit this chunk came from.
    pub original_chunk_id: usize,
    /// Number of chunks sharing `original_chunk_id`.
    pub sentence_sibling_count: usize,
    /// Position of this chunk within its sibling group.
    pub sentence_sibling_index: usize,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_header: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_text: Option<String>,

    /// Populated by the embedding stage; `None` before.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub s3_file_name: String,
    pub total_pages: u32,
    pub timestamp: DateTime<Utc>,
}

impl Chunk {
    /// Stable store key for a chunk identity.
    #[must_use]
    pub fn stable_id(course_id: &str, slide_id: &str, chunk_index: usize) -> String {
        format!("{course_id}:{slide_id}:{chunk_index}")
    }

    /// Re-derive `id` from the identity fields (after renumbering).
    pub(crate) fn refresh_id(&mut self) {
        self.id = Self::stable_id(&self.course_id, &self.slide_id, self.chunk_index);
    }

    /// Copy of this chunk with the embedding dropped (retrieval shaping).
    #[must_use]
    pub fn without_embedding(&self) -> Self {
        let mut copy = self.clone();
        copy.embedding = None;
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_level_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SplitLevel::Markdown).unwrap(),
            "\"markdown\""
        );
        assert_eq!(
            serde_json::to_string(&SplitLevel::Recursive).unwrap(),
            "\"recursive\""
        );
    }

    #[test]
    fn stable_id_format() {
        assert_eq!(Chunk::stable_id("C1", "S1", 4), "C1:S1:4");
    }
}
