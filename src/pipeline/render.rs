//! Page rasterisation: PDF pages via pdfium, raster images via `image`.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! async workers never stall during CPU-heavy rendering or decoding.
//!
//! ## Why one page at a time?
//!
//! A payslip at 300 DPI is ~2500 × 3500 px. Pages are rendered on demand
//! just before their windows are extracted, so only one page image is alive
//! at any moment regardless of document length.

use crate::error::{DocExtractError, PageError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Longest edge of a rendered page, whatever the DPI.
pub const MAX_RENDERED_PIXELS: i32 = 8000;

/// Bind to a pdfium library: `PDFIUM_LIB_PATH`, then the working
/// directory, then the system library.
fn bind_pdfium() -> Result<Pdfium, DocExtractError> {
    if let Ok(dir) = std::env::var("PDFIUM_LIB_PATH") {
        if !dir.is_empty() {
            let lib = if Path::new(&dir).is_file() {
                PathBuf::from(&dir)
            } else {
                Pdfium::pdfium_platform_library_name_at_path(&dir)
            };
            return Pdfium::bind_to_library(&lib)
                .map(Pdfium::new)
                .map_err(|e| DocExtractError::PdfiumBindingFailed(format!("{}: {e:?}", lib.display())));
        }
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| DocExtractError::PdfiumBindingFailed(format!("{e:?}")))
}

fn load_error(path: &Path, password: Option<&str>, e: PdfiumError) -> DocExtractError {
    let err_str = format!("{e:?}");
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            DocExtractError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            DocExtractError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        DocExtractError::CorruptPdf {
            path: path.to_path_buf(),
            detail: err_str,
        }
    }
}

/// Open the PDF once to validate it and count its pages.
///
/// Corrupt or encrypted documents fail here, before any inference is spent.
pub async fn page_count(pdf_path: &Path, password: Option<&str>) -> Result<usize, DocExtractError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(str::to_string);

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(&path, pwd.as_deref())
            .map_err(|e| load_error(&path, pwd.as_deref(), e))?;
        let total = document.pages().len() as usize;
        info!("PDF loaded: {} pages", total);
        Ok(total)
    })
    .await
    .map_err(|e| DocExtractError::Internal(format!("Page-count task panicked: {e}")))?
}

/// Render one page (0-based `page_idx`) at `dpi`.
pub async fn render_page(
    pdf_path: &Path,
    password: Option<&str>,
    page_idx: usize,
    dpi: u32,
) -> Result<DynamicImage, PageError> {
    let path = pdf_path.to_path_buf();
    let pwd = password.map(str::to_string);

    tokio::task::spawn_blocking(move || render_page_blocking(&path, pwd.as_deref(), page_idx, dpi))
        .await
        .map_err(|e| PageError::RenderFailed {
            page: page_idx + 1,
            detail: format!("render task panicked: {e}"),
        })?
}

fn render_page_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    page_idx: usize,
    dpi: u32,
) -> Result<DynamicImage, PageError> {
    let fail = |detail: String| PageError::RenderFailed {
        page: page_idx + 1,
        detail,
    };

    let pdfium = bind_pdfium().map_err(|e| fail(e.to_string()))?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| fail(format!("{e:?}")))?;

    let index = u16::try_from(page_idx).map_err(|_| fail("page index exceeds u16".into()))?;
    let page = document.pages().get(index).map_err(|e| fail(format!("{e:?}")))?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(MAX_RENDERED_PIXELS)
        .set_maximum_height(MAX_RENDERED_PIXELS);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| fail(format!("{e:?}")))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} at {} DPI → {}x{} px",
        page_idx + 1,
        dpi,
        image.width(),
        image.height()
    );
    Ok(image)
}

/// Decode a PNG or JPEG file.
pub async fn load_image(path: &Path) -> Result<DynamicImage, DocExtractError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        image::open(&path).map_err(|e| DocExtractError::ImageDecodeFailed {
            path: path.clone(),
            detail: e.to_string(),
        })
    })
    .await
    .map_err(|e| DocExtractError::Internal(format!("Image decode task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[tokio::test]
    async fn load_image_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(12, 20, Rgba([1, 2, 3, 255])))
            .save(&path)
            .unwrap();

        let img = load_image(&path).await.unwrap();
        assert_eq!((img.width(), img.height()), (12, 20));
    }

    #[tokio::test]
    async fn load_image_reports_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G', 0, 0]).unwrap();

        assert!(matches!(
            load_image(&path).await,
            Err(DocExtractError::ImageDecodeFailed { .. })
        ));
    }
}
