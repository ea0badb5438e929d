//! Image encoding: one resized window → bytes ready for the model request.
//!
//! PNG is the default because it is lossless; JPEG artefacts around small
//! digits ("8" vs "6") are exactly the errors a payslip reader cannot afford.
//! JPEG stays available for the model container, whose upload path was
//! tuned for it and which decodes JPEG markedly faster on CPU.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// Wire format for window images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageEncoding {
    #[default]
    Png,
    Jpeg,
}

impl ImageEncoding {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageEncoding::Png => "image/png",
            ImageEncoding::Jpeg => "image/jpeg",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ImageEncoding::Png => "window.png",
            ImageEncoding::Jpeg => "window.jpg",
        }
    }
}

/// An encoded window image.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub encoding: ImageEncoding,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn mime_type(&self) -> &'static str {
        self.encoding.mime_type()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// Encode a window image in the requested format.
pub fn encode_window(img: &DynamicImage, encoding: ImageEncoding) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    match encoding {
        ImageEncoding::Png => {
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        }
        ImageEncoding::Jpeg => {
            // The JPEG encoder rejects alpha channels.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            rgb.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)?;
        }
    }

    debug!(
        "Encoded {}x{} window → {} bytes {}",
        img.width(),
        img.height(),
        buf.len(),
        encoding.mime_type()
    );

    Ok(EncodedImage {
        bytes: buf,
        encoding,
        width: img.width(),
        height: img.height(),
    })
}
