//! Header-hierarchy reconstruction.
//!
//! A single forward pass over the ordered chunks tracks the most recent
//! header at each level 1..=6. Header chunks record their own level and
//! clear deeper levels; every chunk snapshots the non-empty ancestors above
//! its level (all six levels for body chunks).

use super::splitter::leading_heading;
use super::types::Chunk;

#[derive(Clone, Debug, Default)]
struct LevelSlot {
    index: Option<usize>,
    title: Option<String>,
}

/// Populate `headers_hierarchy`, `headers_hierarchy_titles`, and the header
/// attributes on chunks already sorted and densely renumbered.
pub fn assign_hierarchy(chunks: &mut [Chunk]) {
    let mut current: [LevelSlot; 6] = Default::default();

    for chunk in chunks.iter_mut() {
        let heading = leading_heading(chunk.text.trim_start());
        match heading {
            Some(h) => {
                let level = h.level as usize;
                for slot in current.iter_mut().skip(level) {
                    *slot = LevelSlot::default();
                }
                let titled = format!("H{}^{}", h.level, h.title);
                current[level - 1] = LevelSlot {
                    index: Some(chunk.chunk_index),
                    title: Some(titled),
                };

                let (parents, titles) = collect(&current[..level - 1]);
                chunk.headers_hierarchy = parents;
                chunk.headers_hierarchy_titles = titles;
                chunk.is_header = true;
                chunk.header_level = Some(h.level);
                chunk.header_text = Some(h.title);
            }
            None => {
                let (parents, titles) = collect(&current);
                chunk.headers_hierarchy = parents;
                chunk.headers_hierarchy_titles = titles;
            }
        }
    }
}

fn collect(slots: &[LevelSlot]) -> (Vec<usize>, Vec<String>) {
    let mut parents = Vec::new();
    let mut titles = Vec::new();
    for slot in slots {
        if let (Some(index), Some(title)) = (slot.index, slot.title.as_ref()) {
            parents.push(index);
            titles.push(title.clone());
        }
    }
    (parents, titles)
}
