//! PDF text extraction with lopdf.

use lopdf::Document;

use crate::processing::pool::{self, Parallelism};
use crate::processing::types::ReaderError;

/// Page count above which pages are extracted on the worker pool.
pub const PAGE_PARALLEL_THRESHOLD: usize = 10;

/// Extract the text of every page, joining pages with `\n`.
///
/// Large documents are split into contiguous page ranges, one per worker. Each worker loads its
/// own copy of the document from `bytes`.
pub(crate) fn extract_text(bytes: &[u8], parallelism: Parallelism) -> Result<String, ReaderError> {
    let document = Document::load_mem(bytes).map_err(|e| ReaderError::Pdf(e.to_string()))?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();

    let texts: Vec<String> = if parallelism.applies(pages.len(), PAGE_PARALLEL_THRESHOLD) {
        let group_len = pages.len().div_ceil(parallelism.max_workers);
        let groups: Vec<&[u32]> = pages.chunks(group_len).collect();
        let per_group = pool::try_map_ordered(&groups, parallelism.max_workers, |group| {
            let document =
                Document::load_mem(bytes).map_err(|e| ReaderError::Pdf(e.to_string()))?;
            Ok::<_, ReaderError>(
                group
                    .iter()
                    .map(|page| page_text(&document, *page))
                    .collect::<Vec<_>>(),
            )
        })?;
        per_group.into_iter().flatten().collect()
    } else {
        pages
            .iter()
            .map(|page| page_text(&document, *page))
            .collect()
    };

    tracing::debug!(pages = texts.len(), "PDF text extracted");
    Ok(texts.join("\n"))
}

fn page_text(document: &Document, page: u32) -> String {
    document.extract_text(&[page]).unwrap_or_else(|error| {
        tracing::warn!(page, %error, "Failed to extract PDF page text");
        String::new()
    })
}
