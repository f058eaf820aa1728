//! PDF text extraction.

use std::panic::{self, AssertUnwindSafe};

use crate::error::ExtractionError;

/// Extract the text layer of a PDF.
///
/// The PDF parser panics on some malformed inputs; that is reported as an
/// ordinary extraction failure for this attachment.
pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    if !bytes.starts_with(b"%PDF") {
        return Err(ExtractionError::Pdf("missing %PDF header".into()));
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    }));

    match outcome {
        Ok(Ok(text)) => Ok(text.trim().to_string()),
        Ok(Err(e)) => Err(ExtractionError::Pdf(e.to_string())),
        Err(_) => Err(ExtractionError::Pdf("parser panicked".into())),
    }
}

#[cfg(test)]
#[path = "../../tests/common/pdf.rs"]
pub(crate) mod fixtures;
