//! Text extraction for uploaded documents.
//!
//! The format is chosen from the filename's extension:
//!
//! | Extension | Extractor |
//! |-----------|-----------|
//! | `pdf` | `pdf-extract` |
//! | `docx` | `word/document.xml` read through `zip` + `quick-xml` |
//! | `txt`, `md` | UTF-8 decode (a leading BOM is dropped) |
//!
//! DOCX paragraphs (`<w:p>`) are separated by a blank line so the chunker
//! sees the document's paragraph structure. Extraction never panics on bad
//! input; it returns an [`ExtractError`] and the pipeline records it.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("file is not valid UTF-8 text")]
    Encoding,
}

/// Document formats understood by [`extract_text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    PlainText,
}

impl DocumentKind {
    pub fn from_filename(filename: &str) -> Result<Self, ExtractError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "docx" => Ok(DocumentKind::Docx),
            "txt" | "md" | "markdown" => Ok(DocumentKind::PlainText),
            _ => Err(ExtractError::UnsupportedType(filename.to_string())),
        }
    }
}

/// Extract plain text from `bytes`, using `filename` to pick the format.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
    match DocumentKind::from_filename(filename)? {
        DocumentKind::Pdf => extract_pdf(bytes),
        DocumentKind::Docx => extract_docx(bytes),
        DocumentKind::PlainText => extract_plain(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_plain(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| ExtractError::Encoding)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_paragraphs(&doc_xml)
}

/// Collect `<w:t>` runs, one paragraph per `<w:p>`.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let paragraph = current.trim();
                    if !paragraph.is_empty() {
                        paragraphs.push(paragraph.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => current.push(' '),
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}
