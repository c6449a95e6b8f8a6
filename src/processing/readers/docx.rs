//! DOCX text extraction.
//!
//! Paragraphs of `word/document.xml` are located in a single pass, then parsed in groups of
//! [`PARAGRAPH_GROUP_SIZE`]. Output is one line per paragraph in document order.

use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::Read;
use std::ops::Range;

use crate::processing::pool::{self, Parallelism};
use crate::processing::types::ReaderError;

const DOCUMENT_XML: &str = "word/document.xml";
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Paragraphs handled per worker task.
pub const PARAGRAPH_GROUP_SIZE: usize = 100;

/// Extract the document text, joining paragraphs with `\n`.
pub(crate) fn extract_text(bytes: &[u8], parallelism: Parallelism) -> Result<String, ReaderError> {
    let xml = read_document_xml(bytes)?;
    let spans = paragraph_spans(&xml)?;

    let paragraphs: Vec<String> = if parallelism.applies(spans.len(), PARAGRAPH_GROUP_SIZE) {
        let groups: Vec<&[Range<usize>]> = spans.chunks(PARAGRAPH_GROUP_SIZE).collect();
        let per_group = pool::try_map_ordered(&groups, parallelism.max_workers, |group| {
            group
                .iter()
                .map(|span| paragraph_text(&xml[span.clone()]))
                .collect::<Result<Vec<_>, _>>()
        })?;
        per_group.into_iter().flatten().collect()
    } else {
        spans
            .iter()
            .map(|span| paragraph_text(&xml[span.clone()]))
            .collect::<Result<_, _>>()?
    };

    tracing::debug!(paragraphs = paragraphs.len(), "DOCX text extracted");
    Ok(paragraphs.join("\n"))
}

fn read_document_xml(bytes: &[u8]) -> Result<Vec<u8>, ReaderError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ReaderError::Docx(e.to_string()))?;
    let entry = archive
        .by_name(DOCUMENT_XML)
        .map_err(|e| ReaderError::Docx(format!("{DOCUMENT_XML}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ReaderError::Docx(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ReaderError::Docx(format!(
            "{DOCUMENT_XML} exceeds size limit ({MAX_XML_ENTRY_BYTES} bytes)"
        )));
    }
    Ok(out)
}

fn position(reader: &Reader<&[u8]>) -> usize {
    #[allow(clippy::unnecessary_cast)]
    let offset = reader.buffer_position() as usize;
    offset
}

/// Byte ranges of every top-level `<w:p>` element.
fn paragraph_spans(xml: &[u8]) -> Result<Vec<Range<usize>>, ReaderError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    loop {
        let before = position(&reader);
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"p" => {
                if depth == 0 {
                    start = before;
                }
                depth += 1;
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"p" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    spans.push(start..position(&reader));
                }
            }
            Ok(Event::Empty(e)) if depth == 0 && e.local_name().as_ref() == b"p" => {
                spans.push(before..position(&reader));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ReaderError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(spans)
}

/// Visible text of a single paragraph element.
fn paragraph_text(xml: &[u8]) -> Result<String, ReaderError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;
    // Tab stops inside paragraph properties are not content.
    let mut properties_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"pPr" => properties_depth += 1,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"pPr" => properties_depth = properties_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Empty(e)) if properties_depth == 0 => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(text)) if in_text => {
                let unescaped = text
                    .unescape()
                    .map_err(|e| ReaderError::Docx(e.to_string()))?;
                out.push_str(&unescaped);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ReaderError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
