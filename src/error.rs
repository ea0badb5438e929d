//! Error types for the edgequake-docextract library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`DocExtractError`] (**fatal**): extraction cannot start at all (bad
//!   input file, unknown layout, empty resolution ladder, backend not
//!   configured). Returned as `Err(DocExtractError)` from the top-level
//!   `extract*` functions.
//!
//! * [`PageError`] (**non-fatal**): a single page could not be rasterised.
//!   Stored inside [`crate::output::PageOutcome`] so one broken page does not
//!   cost the rest of the document.
//!
//! * [`crate::pipeline::inference::InferenceFailure`] (**recoverable**): a
//!   single model call failed. It never leaves the resolution ladder; it only
//!   shows up in the per-window attempt log.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-docextract library.
#[derive(Debug, Error)]
pub enum DocExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file is neither a PDF nor a supported raster image.
    #[error("Unsupported input '{path}': expected PDF, PNG or JPEG\nFirst bytes: {magic:?}")]
    UnsupportedInput { path: PathBuf, magic: [u8; 4] },

    /// A raster image could not be decoded.
    #[error("Failed to decode image '{path}': {detail}")]
    ImageDecodeFailed { path: PathBuf, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// Every selected page failed to rasterise; there is nothing to extract from.
    #[error("All {total} pages failed to render.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The inference backend could not be constructed (missing API key,
    /// bad container URL, ...).
    #[error("Inference backend '{backend}' is not configured.\n{hint}")]
    BackendNotConfigured { backend: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or call-site validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No prompt exists for a window the plan wants to process.
    #[error("No prompt configured for window '{window}' in layout '{layout}'")]
    MissingPrompt { layout: String, window: String },

    /// A settings or prompt file could not be read or parsed.
    #[error("Failed to load '{path}': {detail}")]
    ConfigFile { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide.\n\
Raster images (PNG/JPEG) do not need pdfium."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// The page still appears in the output with default field values so the
/// caller always receives one entry per selected page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prompt_display() {
        let e = DocExtractError::MissingPrompt {
            layout: "quadrant".into(),
            window: "top_left".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("top_left"), "got: {msg}");
        assert!(msg.contains("quadrant"), "got: {msg}");
    }

    #[test]
    fn unsupported_input_display() {
        let e = DocExtractError::UnsupportedInput {
            path: PathBuf::from("notes.txt"),
            magic: *b"abcd",
        };
        assert!(e.to_string().contains("notes.txt"));
    }

    #[test]
    fn page_error_display() {
        let e = PageError::RenderFailed {
            page: 3,
            detail: "bitmap allocation".into(),
        };
        assert!(e.to_string().contains("Page 3"));
        assert!(e.to_string().contains("bitmap allocation"));
    }

    #[test]
    fn all_pages_failed_display() {
        let e = DocExtractError::AllPagesFailed {
            total: 2,
            first_error: "boom".into(),
        };
        assert!(e.to_string().contains("All 2 pages"));
    }
}
