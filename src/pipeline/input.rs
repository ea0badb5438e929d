//! Input resolution: validate a local path and sniff what it contains.
//!
//! ## Why magic bytes?
//!
//! Scans arrive with arbitrary names (`scan0001`, `Lohn.PDF.jpg`, ...). The
//! first bytes decide whether pdfium or the image decoder gets the file, and
//! anything else is rejected up front with a meaningful error instead of a
//! decoder crash halfway through.

use crate::error::DocExtractError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What the input file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A PDF, rasterised page by page.
    Pdf,
    /// A single raster image (PNG or JPEG), treated as a one-page document.
    Image,
}

/// A validated local input.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub path: PathBuf,
    pub kind: InputKind,
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Classify the first four bytes of a file.
pub fn sniff(magic: &[u8; 4]) -> Option<InputKind> {
    match magic {
        b"%PDF" => Some(InputKind::Pdf),
        [0x89, b'P', b'N', b'G'] => Some(InputKind::Image),
        [0xFF, 0xD8, 0xFF, _] => Some(InputKind::Image),
        _ => None,
    }
}

/// Validate that `path` exists, is readable and is a PDF, PNG or JPEG.
pub fn resolve_input(path: impl AsRef<Path>) -> Result<ResolvedInput, DocExtractError> {
    let path = path.as_ref().to_path_buf();

    if !path.exists() {
        return Err(DocExtractError::FileNotFound { path });
    }

    let mut magic = [0u8; 4];
    match std::fs::File::open(&path) {
        Ok(mut f) => {
            if f.read_exact(&mut magic).is_err() {
                return Err(DocExtractError::UnsupportedInput { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DocExtractError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(DocExtractError::FileNotFound { path });
        }
    }

    let Some(kind) = sniff(&magic) else {
        return Err(DocExtractError::UnsupportedInput { path, magic });
    };

    debug!("Resolved {:?} input: {}", kind, path.display());
    Ok(ResolvedInput { path, kind })
}
