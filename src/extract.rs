//! Text extraction from source files.

use std::path::Path;

use lopdf::Document;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    text_util::normalize_text,
};

/// Turns a file into raw text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}

fn parse_error(path: &Path, reason: impl ToString) -> Error {
    Error::Parse {
        source_id: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Extracts the text layer of a PDF, page by page.
///
/// Image-only PDFs have no text layer and fail with a parse error.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl PdfExtractor {
    pub fn extract_bytes(
        &self,
        bytes: &[u8],
        source_id: &str,
    ) -> Result<String> {
        let doc = Document::load_mem(bytes).map_err(|e| Error::Parse {
            source_id: source_id.to_string(),
            reason: e.to_string(),
        })?;
        document_text(&doc, source_id)
    }
}

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let doc = Document::load(path).map_err(|e| parse_error(path, e))?;
        document_text(&doc, &path.display().to_string())
    }
}

fn document_text(doc: &Document, source_id: &str) -> Result<String> {
    let pages = doc.get_pages();
    let mut texts = Vec::with_capacity(pages.len());

    for &page in pages.keys() {
        match doc.extract_text(&[page]) {
            Ok(raw) => {
                let text = normalize_text(&raw);
                if !text.is_empty() {
                    texts.push(text);
                }
            }
            Err(e) => warn!(source = source_id, page, "skipping page: {e}"),
        }
    }

    debug!(
        source = source_id,
        pages = pages.len(),
        with_text = texts.len(),
        "extracted pdf text"
    );
    if texts.is_empty() {
        return Err(Error::Parse {
            source_id: source_id.to_string(),
            reason: "no extractable text".to_string(),
        });
    }
    Ok(texts.join("\n"))
}

/// Reads UTF-8 text files as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path).map_err(|e| parse_error(path, e))?;
        String::from_utf8(bytes)
            .map_err(|_| parse_error(path, "not valid UTF-8"))
    }
}

/// Dispatches on file extension: PDFs, Markdown and plain text.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileExtractor {
    pdf: PdfExtractor,
    text: PlainTextExtractor,
}

impl TextExtractor for FileExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("pdf") => self.pdf.extract(path),
            Some("md" | "txt") => self.text.extract(path),
            _ => Err(parse_error(path, "unsupported file type")),
        }
    }
}
