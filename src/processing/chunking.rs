//! Text chunking.
//!
//! Two strategies are available:
//!
//! - Separator lines: when any of the caller's custom separators occurs in the text, every line
//!   containing a separator closes the current chunk and is itself discarded.
//! - Fixed size: with a `chunk_size`, the text is cut into character windows of at most
//!   `chunk_size` characters. Each cut prefers the coarsest natural boundary available in the
//!   window (paragraph, line, sentence, punctuation, word) and consecutive chunks share exactly
//!   `chunk_overlap` characters.
//!
//! Without either option the text is returned as a single chunk.

use super::pool::{self, Parallelism};
use super::types::ChunkingError;

/// Line count above which separator splitting fans out to the worker pool.
pub const SEPARATOR_PARALLEL_THRESHOLD: usize = 1000;
/// Character count above which fixed-size splitting fans out per paragraph.
pub const FIXED_SIZE_PARALLEL_THRESHOLD: usize = 100_000;

/// Cut points in priority order. A tier wins when any of its separators fits the window.
const BOUNDARY_TIERS: [&[&str]; 5] = [
    &["\n\n"],
    &["\n"],
    &[". ", "! ", "? "],
    &[".", "!", "?"],
    &[" "],
];

/// How a text should be divided.
#[derive(Debug, Clone, Default)]
pub struct ChunkOptions {
    /// Maximum chunk length in characters.
    pub chunk_size: Option<usize>,
    /// Characters shared between consecutive fixed-size chunks.
    pub chunk_overlap: Option<usize>,
    /// Substrings marking separator lines.
    pub custom_separators: Option<Vec<String>>,
    /// Fan-out policy for large inputs.
    pub parallelism: Parallelism,
}

/// Split `text` according to `options`.
pub fn split_text(text: &str, options: &ChunkOptions) -> Result<Vec<String>, ChunkingError> {
    let separators: Vec<&str> = options
        .custom_separators
        .iter()
        .flatten()
        .map(String::as_str)
        .filter(|separator| !separator.is_empty())
        .collect();

    if separators.iter().any(|separator| text.contains(separator)) {
        return split_on_separator_lines(text, &separators, options.parallelism);
    }

    if let Some(chunk_size) = options.chunk_size {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        let overlap = options
            .chunk_overlap
            .unwrap_or(0)
            .min(chunk_size.saturating_sub(1));
        return split_fixed_size(text, chunk_size, overlap, options.parallelism);
    }

    Ok(vec![text.to_string()])
}

fn split_on_separator_lines(
    text: &str,
    separators: &[&str],
    parallelism: Parallelism,
) -> Result<Vec<String>, ChunkingError> {
    let lines: Vec<&str> = text.split('\n').collect();

    let chunks = if parallelism.applies(lines.len(), SEPARATOR_PARALLEL_THRESHOLD) {
        // A chunk spanning a block edge comes out as two chunks.
        let block_len = (lines.len() / parallelism.max_workers).max(1);
        let blocks: Vec<&[&str]> = lines.chunks(block_len).collect();
        let per_block = pool::try_map_ordered(&blocks, parallelism.max_workers, |block| {
            Ok::<_, ChunkingError>(collect_separated(block, separators))
        })?;
        per_block.into_iter().flatten().collect()
    } else {
        collect_separated(&lines, separators)
    };

    Ok(chunks)
}

fn collect_separated(lines: &[&str], separators: &[&str]) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in lines {
        if separators.iter().any(|separator| line.contains(separator)) {
            flush(&mut current, &mut chunks);
        } else {
            current.push(*line);
        }
    }
    flush(&mut current, &mut chunks);

    chunks
}

fn flush(current: &mut Vec<&str>, chunks: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    let joined = current.join("\n");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}

fn split_fixed_size(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    parallelism: Parallelism,
) -> Result<Vec<String>, ChunkingError> {
    if parallelism.applies(text.chars().count(), FIXED_SIZE_PARALLEL_THRESHOLD) {
        // Paragraphs are split independently; no overlap crosses a paragraph break.
        let paragraphs: Vec<&str> = text
            .split("\n\n")
            .filter(|paragraph| !paragraph.trim().is_empty())
            .collect();
        let per_paragraph =
            pool::try_map_ordered(&paragraphs, parallelism.max_workers, |paragraph| {
                Ok::<_, ChunkingError>(split_window(paragraph, chunk_size, overlap))
            })?;
        return Ok(per_paragraph.into_iter().flatten().collect());
    }

    Ok(split_window(text, chunk_size, overlap))
}

/// Sequential fixed-size splitter. Requires `overlap < chunk_size`.
fn split_window(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    // Byte offset of every char boundary, including the end of the text.
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = offsets.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < total {
        let limit = (start + chunk_size).min(total);
        let end = if limit == total {
            total
        } else {
            find_boundary(text, &offsets, start, start + overlap + 1, limit)
        };

        let chunk = &text[offsets[start]..offsets[end]];
        if !chunk.trim().is_empty() {
            chunks.push(chunk.to_string());
        }
        if end == total {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Char index in `[min_end, max_end]` at which to end the chunk starting at `start`.
fn find_boundary(
    text: &str,
    offsets: &[usize],
    start: usize,
    min_end: usize,
    max_end: usize,
) -> usize {
    let base = offsets[start];
    let window = &text[base..offsets[max_end]];

    for tier in BOUNDARY_TIERS {
        let best = tier
            .iter()
            .filter_map(|separator| {
                window
                    .rfind(separator)
                    .map(|position| base + position + separator.len())
            })
            .filter_map(|byte_end| offsets.binary_search(&byte_end).ok())
            .filter(|end| *end >= min_end)
            .max();
        if let Some(end) = best {
            return end;
        }
    }

    max_end
}
