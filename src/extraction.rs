//! Plain-text extraction from uploaded documents.

use std::{
    io::{Read, Seek},
    path::Path,
    sync::LazyLock,
};

use regex::Regex;

use crate::error::{Error, Result};

static PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:p(?:\s[^>]*)?>(.*?)</w:p>")
        .expect("paragraph regex should compile")
});

static RUN_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:tab/>")
        .expect("run regex should compile")
});

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-z]+);")
        .expect("entity regex should compile")
});

/// Supported input formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("pdf") => Self::Pdf,
            Some("docx") => Self::Docx,
            _ => Self::Text,
        }
    }
}

/// Extract the text of a document on disk.
///
/// PDFs are read page by page from their text layer; pages without a text
/// layer are skipped. DOCX files contribute one line per non-empty
/// paragraph. Anything else is read as UTF-8, replacing invalid bytes.
/// Text that is empty after trimming is an error.
pub fn extract_file(path: &Path) -> Result<String> {
    let text = match DocumentFormat::from_path(path) {
        DocumentFormat::Pdf => extract_pdf(path)?,
        DocumentFormat::Docx => {
            let file = std::fs::File::open(path)
                .map_err(|e| Error::extraction(path.display(), e))?;
            extract_docx(file)
                .map_err(|reason| Error::extraction(path.display(), reason))?
        }
        DocumentFormat::Text => {
            let bytes = std::fs::read(path)
                .map_err(|e| Error::extraction(path.display(), e))?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
    };

    if text.trim().is_empty() {
        return Err(Error::extraction(path.display(), "no text found"));
    }

    tracing::debug!(
        path = %path.display(),
        chars = text.chars().count(),
        "extracted document text"
    );
    Ok(text)
}

fn extract_pdf(path: &Path) -> Result<String> {
    let mut doc = pdf_oxide::PdfDocument::open(path)
        .map_err(|e| Error::extraction(path.display(), e))?;
    let pages = doc
        .page_count()
        .map_err(|e| Error::extraction(path.display(), e))?;

    let mut text = String::new();
    for page in 0..pages {
        match doc.extract_text(page) {
            Ok(page_text) if !page_text.trim().is_empty() => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&page_text);
            }
            Ok(_) => {
                tracing::warn!(
                    path = %path.display(),
                    page = page + 1,
                    "page has no extractable text, skipping"
                );
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    page = page + 1,
                    error = %e,
                    "failed to extract page text, skipping"
                );
            }
        }
    }

    Ok(text)
}

/// Read the paragraphs of a DOCX archive, one per line.
pub fn extract_docx<R: Read + Seek>(
    reader: R,
) -> std::result::Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| e.to_string())?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| format!("not a Word document: {e}"))?;

    let mut xml = String::new();
    entry.read_to_string(&mut xml).map_err(|e| e.to_string())?;
    Ok(docx_text_from_xml(&xml))
}

/// Paragraph text from a `word/document.xml` body. Empty paragraphs are
/// dropped.
pub fn docx_text_from_xml(xml: &str) -> String {
    PARAGRAPH
        .captures_iter(xml)
        .filter_map(|para| {
            let body = para.get(1)?.as_str();
            let text: String = RUN_TEXT
                .captures_iter(body)
                .map(|run| match run.get(1) {
                    Some(t) => decode_entities(t.as_str()),
                    None => "\t".to_string(),
                })
                .collect();
            (!text.trim().is_empty()).then_some(text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => name
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| name.strip_prefix('#')?.parse().ok())
                    .and_then(char::from_u32),
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
