//! Attachment → plain text.
//!
//! Dispatch is a lookup from declared content type to a [`DocumentKind`].
//! Adding a format means adding a table row and a match arm; anything not
//! in the table falls through to [`DocumentKind::Unsupported`].

mod ole;
mod pdf;
mod sheet;
mod word;
pub(crate) mod xml;

#[cfg(test)]
pub(crate) use pdf::fixtures;

use crate::channels::Attachment;
use crate::error::ExtractionError;

/// Document families the extractor knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    LegacyDoc,
    ModernDoc,
    Spreadsheet,
    PlainText,
    Unsupported,
}

const CONTENT_TYPES: &[(&str, DocumentKind)] = &[
    ("application/pdf", DocumentKind::Pdf),
    ("application/msword", DocumentKind::LegacyDoc),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        DocumentKind::ModernDoc,
    ),
    ("application/xlsx", DocumentKind::Spreadsheet),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        DocumentKind::Spreadsheet,
    ),
    ("text/plain", DocumentKind::PlainText),
    ("text/csv", DocumentKind::PlainText),
];

impl DocumentKind {
    /// Classify a declared content type. Parameters (`; charset=...`) and
    /// case are ignored.
    pub fn from_content_type(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        CONTENT_TYPES
            .iter()
            .find(|(ct, _)| *ct == essence)
            .map_or(DocumentKind::Unsupported, |(_, kind)| *kind)
    }
}

/// Result of running one attachment through the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    Skipped { reason: String },
}

impl Extraction {
    /// Extracted text, if any was produced.
    pub fn text(&self) -> Option<&str> {
        match self {
            Extraction::Text(text) if !text.trim().is_empty() => Some(text),
            _ => None,
        }
    }
}

/// Stateless attachment-to-text converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentExtractor;

impl DocumentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Convert one attachment. Unsupported types are skipped, not errors;
    /// a recognized type with unreadable bytes is an error for this
    /// attachment only.
    pub fn extract(&self, attachment: &Attachment) -> Result<Extraction, ExtractionError> {
        let kind = DocumentKind::from_content_type(&attachment.content_type);
        let bytes = attachment.bytes.as_slice();

        let text = match kind {
            DocumentKind::Pdf => pdf::extract_pdf(bytes)?,
            DocumentKind::LegacyDoc => word::extract_legacy_doc(bytes)?,
            DocumentKind::ModernDoc => word::extract_docx(bytes)?,
            DocumentKind::Spreadsheet => sheet::extract_workbook(bytes)?,
            DocumentKind::PlainText => String::from_utf8_lossy(bytes).into_owned(),
            DocumentKind::Unsupported => {
                return Ok(Extraction::Skipped {
                    reason: format!("unsupported type {}", attachment.content_type),
                });
            }
        };

        tracing::debug!(
            content_type = %attachment.content_type,
            filename = attachment.filename.as_deref().unwrap_or(""),
            chars = text.len(),
            "Extracted attachment text"
        );
        Ok(Extraction::Text(text))
    }
}
