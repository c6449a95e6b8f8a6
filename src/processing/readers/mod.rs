//! Format readers turning a document reference into ingestible text segments.
//!
//! The reader is chosen from the reference's extension. Plain text is handed to the chunker;
//! CSV files yield one segment per row; DOCX, PDF, and JSON yield a single text which is then
//! chunked like plain text.

mod docx;
mod pdf;

use serde_json::Value;
use std::path::Path;

use super::chunking::{ChunkOptions, split_text};
use super::fetch::Fetcher;
use super::pool::{self, Parallelism};
use super::types::ReaderError;

/// Row count above which CSV rows are formatted on the worker pool.
pub const CSV_PARALLEL_THRESHOLD: usize = 100;

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// `.txt`
    Text,
    /// `.docx`
    Docx,
    /// `.pdf`
    Pdf,
    /// `.csv`
    Csv,
    /// `.json`
    Json,
}

impl FileType {
    /// Determine the format from the reference's extension (case-insensitive).
    pub fn from_reference(reference: &str) -> Result<Self, ReaderError> {
        // Query strings and fragments never carry the extension.
        let path = if Fetcher::is_url(reference) {
            reference.split(['?', '#']).next().unwrap_or(reference)
        } else {
            reference
        };
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "txt" => Ok(Self::Text),
            "docx" => Ok(Self::Docx),
            "pdf" => Ok(Self::Pdf),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(ReaderError::UnsupportedFormat(format!(".{extension}"))),
        }
    }
}

/// Reads and segments documents from URLs or sandboxed local paths.
#[derive(Debug, Clone)]
pub struct DocumentReader {
    fetcher: Fetcher,
}

impl DocumentReader {
    /// Wrap a fetcher.
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    /// Read `reference` and return its text segments in document order.
    pub async fn read_file(
        &self,
        reference: &str,
        options: &ChunkOptions,
    ) -> Result<Vec<String>, ReaderError> {
        let file_type = FileType::from_reference(reference)?;
        let parallelism = options.parallelism;
        tracing::debug!(reference, ?file_type, "Reading document");

        let text = match file_type {
            FileType::Text => self.fetcher.fetch_text(reference).await?,
            FileType::Json => {
                let raw = self.fetcher.fetch_text(reference).await?;
                run_blocking(move || pretty_json(&raw)).await?
            }
            FileType::Csv => {
                let raw = self.fetcher.fetch_text(reference).await?;
                let rows = run_blocking(move || csv_rows(&raw, parallelism)).await?;
                tracing::info!(reference, rows = rows.len(), "CSV rows read");
                return Ok(rows);
            }
            FileType::Docx => {
                let bytes = self.fetcher.fetch_bytes(reference).await?;
                run_blocking(move || docx::extract_text(&bytes, parallelism)).await?
            }
            FileType::Pdf => {
                let bytes = self.fetcher.fetch_bytes(reference).await?;
                run_blocking(move || pdf::extract_text(&bytes, parallelism)).await?
            }
        };

        let options = options.clone();
        let chunks = run_blocking(move || split_text(&text, &options).map_err(ReaderError::from))
            .await?;
        tracing::info!(reference, chunks = chunks.len(), "Document chunked");
        Ok(chunks)
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T, ReaderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ReaderError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ReaderError::Join(e.to_string()))?
}

/// Re-serialize a JSON document with two-space indentation.
fn pretty_json(raw: &str) -> Result<String, ReaderError> {
    let value: Value = serde_json::from_str(raw)?;
    Ok(serde_json::to_string_pretty(&value)?)
}

/// One `header: value` block per CSV row.
fn csv_rows(raw: &str, parallelism: Parallelism) -> Result<Vec<String>, ReaderError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(raw.as_bytes());
    let headers = reader.headers()?.clone();
    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;

    let render = |row: &csv::StringRecord| format_row(&headers, row);
    if parallelism.applies(rows.len(), CSV_PARALLEL_THRESHOLD) {
        pool::try_map_ordered(&rows, parallelism.max_workers, |row| {
            Ok::<_, ReaderError>(render(row))
        })
    } else {
        Ok(rows.iter().map(render).collect())
    }
}

fn format_row(headers: &csv::StringRecord, row: &csv::StringRecord) -> String {
    headers
        .iter()
        .enumerate()
        .map(|(index, header)| format!("{header}: {}", row.get(index).unwrap_or("")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn reader_for(dir: &TempDir) -> DocumentReader {
        let fetcher = Fetcher::with_limits(
            vec![dir.path().to_path_buf()],
            10 * 1024 * 1024,
            Duration::from_secs(5),
        )
        .expect("fetcher");
        DocumentReader::new(fetcher)
    }

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).expect("write");
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn file_type_is_case_insensitive_and_ignores_query() {
        assert_eq!(FileType::from_reference("a/B.TXT").ok(), Some(FileType::Text));
        assert_eq!(
            FileType::from_reference("https://host/doc.pdf?dl=1").ok(),
            Some(FileType::Pdf)
        );
        let error = FileType::from_reference("archive.xlsx").expect_err("unsupported");
        assert_eq!(error.to_string(), "Unsupported file type: .xlsx");
    }

    #[test]
    fn csv_rows_pair_headers_with_values() {
        let rows = csv_rows("name,age\nAda,36\nLinus\n", Parallelism::sequential()).expect("rows");
        assert_eq!(rows, vec!["name: Ada\nage: 36", "name: Linus\nage: "]);
    }

    #[test]
    fn parallel_csv_rows_keep_file_order() {
        let mut raw = String::from("id,label\n");
        for index in 0..150 {
            raw.push_str(&format!("{index},row {index}\n"));
        }
        let parallel = csv_rows(&raw, Parallelism::new(4)).expect("parallel");
        let sequential = csv_rows(&raw, Parallelism::sequential()).expect("sequential");
        assert_eq!(parallel.len(), 150);
        assert_eq!(parallel, sequential);
        assert_eq!(parallel[149], "id: 149\nlabel: row 149");
    }

    #[test]
    fn json_is_pretty_printed_in_source_key_order() {
        let pretty = pretty_json(r#"{"b":1,"a":{"c":[1,2]}}"#).expect("json");
        assert_eq!(
            pretty,
            "{\n  \"b\": 1,\n  \"a\": {\n    \"c\": [\n      1,\n      2\n    ]\n  }\n}"
        );
    }

    #[tokio::test]
    async fn text_file_is_split_on_custom_separators() {
        let dir = tempdir().expect("tempdir");
        let path = write_file(&dir, "notes.txt", b"first part\n---\nsecond part\n");
        let options = ChunkOptions {
            custom_separators: Some(vec!["---".into()]),
            ..ChunkOptions::default()
        };
        let chunks = reader_for(&dir)
            .read_file(&path, &options)
            .await
            .expect("chunks");
        assert_eq!(chunks, vec!["first part", "second part"]);
    }

    #[tokio::test]
    async fn csv_rows_are_not_rechunked() {
        let dir = tempdir().expect("tempdir");
        let path = write_file(&dir, "people.csv", b"name,city\nAda,London\nGrace,Arlington\n");
        let options = ChunkOptions {
            chunk_size: Some(5),
            ..ChunkOptions::default()
        };
        let chunks = reader_for(&dir)
            .read_file(&path, &options)
            .await
            .expect("rows");
        assert_eq!(chunks, vec!["name: Ada\ncity: London", "name: Grace\ncity: Arlington"]);
    }

    #[tokio::test]
    async fn docx_and_pdf_are_extracted_then_chunked() {
        let dir = tempdir().expect("tempdir");
        let body = "<w:p><w:r><w:t>Docx body</w:t></w:r></w:p>";
        let docx_path = write_file(&dir, "report.docx", &docx::tests::docx_with_body(body));
        let pdf_path = write_file(
            &dir,
            "report.pdf",
            &pdf::tests::pdf_with_pages(&["PdfBody".to_string()]),
        );
        let reader = reader_for(&dir);

        let docx_chunks = reader
            .read_file(&docx_path, &ChunkOptions::default())
            .await
            .expect("docx");
        assert_eq!(docx_chunks, vec!["Docx body"]);

        let pdf_chunks = reader
            .read_file(&pdf_path, &ChunkOptions::default())
            .await
            .expect("pdf");
        assert_eq!(pdf_chunks.len(), 1);
        assert!(pdf_chunks[0].contains("PdfBody"));
    }

    #[tokio::test]
    async fn json_file_reads_back_to_the_same_value() {
        let dir = tempdir().expect("tempdir");
        let original = serde_json::json!({
            "title": "Größenordnung",
            "tags": ["a", "b"],
            "nested": {"count": 3, "ratio": 0.5, "empty": null, "flag": true}
        });
        let path = write_file(&dir, "doc.json", original.to_string().as_bytes());

        let chunks = reader_for(&dir)
            .read_file(&path, &ChunkOptions::default())
            .await
            .expect("json");

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Größenordnung"));
        let parsed: Value = serde_json::from_str(&chunks[0]).expect("chunk is valid json");
        assert_eq!(parsed, original);
    }

    #[tokio::test]
    async fn invalid_json_is_a_reader_error() {
        let dir = tempdir().expect("tempdir");
        let path = write_file(&dir, "broken.json", b"{not json");
        let error = reader_for(&dir)
            .read_file(&path, &ChunkOptions::default())
            .await
            .expect_err("invalid json");
        assert!(matches!(error, ReaderError::Json(_)));
        assert!(error.is_client_error());
    }
}
