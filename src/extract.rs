//! Text extraction for uploaded documents (PDF, DOCX, plain text).
//!
//! Ingestion hands over the raw bytes and the original filename; this
//! module picks an extractor from the extension and returns UTF-8 text
//! plus descriptive metadata. Extraction never panics: malformed input
//! comes back as an [`ExtractError`] and the file is skipped.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use serde::Serialize;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),

    #[error("no text could be extracted from {0}")]
    Empty(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
    Md,
}

impl FileType {
    /// Map a filename to its type by extension, case-insensitively.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Txt),
            "md" => Some(Self::Md),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Txt => "txt",
            Self::Md => "md",
        }
    }

    pub fn extraction_method(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf-extract",
            Self::Docx => "docx-xml",
            Self::Txt | Self::Md => "text",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractMetadata {
    pub file_name: String,
    pub file_size: usize,
    pub file_type: FileType,
    pub word_count: usize,
    pub char_count: usize,
    pub extraction_method: &'static str,
}

#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub metadata: ExtractMetadata,
}

/// Whether ingestion should even try this filename.
pub fn is_supported(filename: &str) -> bool {
    FileType::from_filename(filename).is_some()
}

/// Read and extract a file from disk.
pub fn parse(path: &Path) -> Result<Extracted, ExtractError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    // Reject before reading so huge unsupported files cost nothing.
    if !is_supported(&file_name) {
        return Err(ExtractError::UnsupportedFileType(file_name));
    }
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_bytes(&bytes, &file_name)
}

/// Extract text from in-memory bytes; the type comes from `filename`.
pub fn parse_bytes(bytes: &[u8], filename: &str) -> Result<Extracted, ExtractError> {
    let file_type = FileType::from_filename(filename)
        .ok_or_else(|| ExtractError::UnsupportedFileType(filename.to_string()))?;

    let raw = match file_type {
        FileType::Pdf => extract_pdf(bytes)?,
        FileType::Docx => extract_docx(bytes)?,
        FileType::Txt | FileType::Md => decode_text(bytes),
    };

    let text = raw.trim().to_string();
    if text.is_empty() {
        return Err(ExtractError::Empty(filename.to_string()));
    }

    let metadata = ExtractMetadata {
        file_name: filename.to_string(),
        file_size: bytes.len(),
        file_type,
        word_count: text.split_whitespace().count(),
        char_count: text.chars().count(),
        extraction_method: file_type.extraction_method(),
    };
    Ok(Extracted { text, metadata })
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs instead of returning Err.
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(result) => result.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("PDF parser aborted on malformed input".to_string())),
    }
}

/// UTF-8 with the BOM stripped; anything else is decoded as Latin-1.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_body_text(&xml)
}

/// Walk `word/document.xml`.
///
/// Body paragraphs become one line each. Tables are rendered after a
/// `[Table n]` marker, one row per line with cells joined by `" | "`.
fn docx_body_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut lines: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut table_depth = 0usize;
    let mut table_count = 0usize;
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        table_count += 1;
                        lines.push(format!("[Table {}]", table_count));
                    }
                }
                b"tr" => row.clear(),
                b"tc" => cell.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" => paragraph.push(' '),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = paragraph.trim().to_string();
                    paragraph.clear();
                    if text.is_empty() {
                        // empty paragraph
                    } else if table_depth > 0 {
                        if !cell.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(&text);
                    } else {
                        lines.push(text);
                    }
                }
                b"tc" => row.push(std::mem::take(&mut cell)),
                b"tr" => {
                    if row.iter().any(|c| !c.is_empty()) {
                        lines.push(row.join(" | "));
                    }
                    row.clear();
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        );
        let mut out = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut out));
            zip.start_file("word/document.xml", SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        out
    }

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_filename("Report.PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_filename("notes.md"), Some(FileType::Md));
        assert_eq!(FileType::from_filename("a.b.docx"), Some(FileType::Docx));
        assert_eq!(FileType::from_filename("archive.zip"), None);
        assert_eq!(FileType::from_filename("README"), None);
    }

    #[test]
    fn test_plain_text_with_metadata() {
        let out = parse_bytes(b"  hello brave new world \n", "greeting.txt").unwrap();
        assert_eq!(out.text, "hello brave new world");
        assert_eq!(out.metadata.word_count, 4);
        assert_eq!(out.metadata.char_count, 21);
        assert_eq!(out.metadata.file_size, 25);
        assert_eq!(out.metadata.extraction_method, "text");
        assert_eq!(out.metadata.file_type, FileType::Txt);
    }

    #[test]
    fn test_bom_stripped_and_latin1_fallback() {
        let mut bom = UTF8_BOM.to_vec();
        bom.extend_from_slice("café".as_bytes());
        assert_eq!(parse_bytes(&bom, "a.txt").unwrap().text, "café");

        // 0xE9 alone is not valid UTF-8; Latin-1 reads it as 'é'.
        let latin1 = [b'c', b'a', b'f', 0xE9];
        assert_eq!(parse_bytes(&latin1, "a.md").unwrap().text, "café");
    }

    #[test]
    fn test_unsupported_and_empty() {
        assert!(matches!(
            parse_bytes(b"data", "image.png").unwrap_err(),
            ExtractError::UnsupportedFileType(_)
        ));
        assert!(matches!(
            parse_bytes(b"   \n\t ", "blank.txt").unwrap_err(),
            ExtractError::Empty(_)
        ));
    }

    #[test]
    fn test_invalid_binaries_are_errors() {
        assert!(matches!(
            parse_bytes(b"not a pdf", "x.pdf").unwrap_err(),
            ExtractError::Pdf(_)
        ));
        assert!(matches!(
            parse_bytes(b"not a zip", "x.docx").unwrap_err(),
            ExtractError::Docx(_)
        ));
    }

    #[test]
    fn test_truncated_pdfs_are_errors() {
        let samples: [&[u8]; 4] = [
            b"%PDF-1.4\n",
            b"%PDF-1.7\ntrailer\n<< /Root 1 0 R >>\n%%EOF",
            b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF",
            b"%PDF-1.4\nxref\n0 1\n0000000000 65535 f \ntrailer\n<< /Size 1 >>\nstartxref\n9\n%%EOF",
        ];
        for bytes in samples {
            assert!(parse_bytes(bytes, "broken.pdf").is_err());
        }
    }

    #[test]
    fn test_docx_paragraphs_and_tables() {
        let body = concat!(
            "<w:p><w:r><w:t>Quarterly report</w:t></w:r></w:p>",
            "<w:p><w:r><w:t xml:space=\"preserve\">Revenue </w:t></w:r><w:r><w:t>grew.</w:t></w:r></w:p>",
            "<w:tbl>",
            "<w:tr><w:tc><w:p><w:r><w:t>Region</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>Sales</w:t></w:r></w:p></w:tc></w:tr>",
            "<w:tr><w:tc><w:p><w:r><w:t>EMEA</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>42</w:t></w:r></w:p></w:tc></w:tr>",
            "</w:tbl>",
            "<w:p><w:r><w:t>End &amp; notes</w:t></w:r></w:p>",
        );
        let out = parse_bytes(&docx_with_body(body), "report.docx").unwrap();
        assert_eq!(
            out.text,
            "Quarterly report\nRevenue grew.\n[Table 1]\nRegion | Sales\nEMEA | 42\nEnd & notes"
        );
        assert_eq!(out.metadata.extraction_method, "docx-xml");
    }

    #[test]
    fn test_docx_without_document_xml() {
        let mut out = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut out));
            zip.start_file("other.xml", SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = parse_bytes(&out, "broken.docx").unwrap_err();
        assert!(err.to_string().contains("word/document.xml"));
    }

    #[test]
    fn test_parse_from_disk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("notes.md");
        std::fs::write(&path, "# Title\n\nBody text").unwrap();
        let out = parse(&path).unwrap();
        assert_eq!(out.metadata.file_name, "notes.md");
        assert!(out.text.starts_with("# Title"));

        let missing = parse(&tmp.path().join("gone.txt")).unwrap_err();
        assert!(matches!(missing, ExtractError::Io { .. }));
    }
}
