//! Plain-text extraction from downloaded artifacts.
//!
//! The format is a tagged [`DocumentFormat`] chosen from the file extension.
//! An unknown extension fails when the tag is built, before any bytes are
//! read; there is no best-effort fallback decode.

use std::io::Read;
use std::path::Path;

use crate::artifact::LocalArtifact;
use crate::error::UnsupportedFormatError;

/// Maximum decompressed bytes to read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// `.txt`, `.md`, `.csv`, `.log`
    PlainText,
    Pdf,
    /// `.docx`
    WordDocument,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "md" | "csv" | "log" => Some(DocumentFormat::PlainText),
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::WordDocument),
            _ => None,
        }
    }

    /// Format for a file name, or the error naming the unsupported extension.
    pub fn for_name(name: &str) -> Result<Self, UnsupportedFormatError> {
        let ext = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_extension(&ext).ok_or_else(|| UnsupportedFormatError::Extension {
            name: name.to_string(),
            extension: if ext.is_empty() {
                "(none)".to_string()
            } else {
                ext
            },
        })
    }

    fn label(&self) -> &'static str {
        match self {
            DocumentFormat::PlainText => "plain text",
            DocumentFormat::Pdf => "PDF",
            DocumentFormat::WordDocument => "Word document",
        }
    }
}

/// Read the artifact and decode it according to its extension.
pub fn extract(artifact: &LocalArtifact) -> Result<String, UnsupportedFormatError> {
    let name = artifact.source_name();
    let format = DocumentFormat::for_name(name)?;
    let bytes = std::fs::read(artifact.path()).map_err(|e| UnsupportedFormatError::Decode {
        name: name.to_string(),
        format: format.label().to_string(),
        message: e.to_string(),
    })?;
    extract_text(&bytes, format).map_err(|message| UnsupportedFormatError::Decode {
        name: name.to_string(),
        format: format.label().to_string(),
        message,
    })
}

/// Decode `bytes` as `format`. Errors carry the decoder's message.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, String> {
    match format {
        DocumentFormat::PlainText => Ok(String::from_utf8_lossy(bytes).into_owned()),
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::WordDocument => extract_docx(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
}

fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| "word/document.xml not found".to_string())?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| e.to_string())?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }
    paragraphs_from_document_xml(&doc_xml)
}

/// Concatenate `<w:t>` runs, one line per `<w:p>` paragraph.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, String> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => current.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                b"p" => paragraphs.push(String::new()),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            let body: String = paragraphs
                .iter()
                .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
                .collect();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn format_dispatch_by_extension() {
        assert_eq!(
            DocumentFormat::for_name("notes.TXT").unwrap(),
            DocumentFormat::PlainText
        );
        assert_eq!(
            DocumentFormat::for_name("data.csv").unwrap(),
            DocumentFormat::PlainText
        );
        assert_eq!(
            DocumentFormat::for_name("report.pdf").unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::for_name("plan.docx").unwrap(),
            DocumentFormat::WordDocument
        );
    }

    #[test]
    fn unsupported_extension_fails_fast() {
        let err = DocumentFormat::for_name("slides.pptx").unwrap_err();
        assert_eq!(
            err,
            UnsupportedFormatError::Extension {
                name: "slides.pptx".to_string(),
                extension: "pptx".to_string()
            }
        );
        assert!(matches!(
            DocumentFormat::for_name("Makefile").unwrap_err(),
            UnsupportedFormatError::Extension { ref extension, .. } if extension == "(none)"
        ));
    }

    #[test]
    fn plain_text_is_lossy_utf8() {
        let text = extract_text(b"caf\xc3\xa9 \xff ok", DocumentFormat::PlainText).unwrap();
        assert!(text.starts_with("café"));
        assert!(text.ends_with("ok"));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let bytes = docx_with_paragraphs(&["First paragraph.", "Second &amp; last."]);
        let text = extract_text(&bytes, DocumentFormat::WordDocument).unwrap();
        assert_eq!(text, "First paragraph.\nSecond & last.");
    }

    #[test]
    fn invalid_inputs_return_errors() {
        assert!(extract_text(b"not a pdf", DocumentFormat::Pdf).is_err());
        assert!(extract_text(b"not a zip", DocumentFormat::WordDocument).is_err());
    }

    #[test]
    fn extract_reads_artifact() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (artifact, mut file) = LocalArtifact::create(tmp.path(), "minutes.md").unwrap();
        file.write_all(b"# Minutes\n\nShip it.").unwrap();
        drop(file);
        assert_eq!(extract(&artifact).unwrap(), "# Minutes\n\nShip it.");

        let (bad, mut file) = LocalArtifact::create(tmp.path(), "broken.docx").unwrap();
        file.write_all(b"garbage").unwrap();
        drop(file);
        assert!(matches!(
            extract(&bad).unwrap_err(),
            UnsupportedFormatError::Decode { .. }
        ));
    }
}
