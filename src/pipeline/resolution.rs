//! Resolution ladder: progressively smaller variants of one window image.
//!
//! Large images are tried first because they read small print best, but
//! they are also what makes a GPU-backed model run out of memory or blow
//! its deadline. Each rung is resized from the *original* crop, never from
//! the previous rung, so quality loss does not compound down the ladder.

use crate::error::DocExtractError;
use image::imageops::FilterType;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Default long-edge targets, in pixels.
pub const DEFAULT_RESOLUTION_STEPS: [u32; 4] = [1500, 1200, 1000, 800];

/// Fixed enhancement pipeline applied to every rung after resizing.
///
/// Factors follow the usual image-enhancement convention: `1.0` leaves the
/// image unchanged, `> 1.0` strengthens the effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnhanceSettings {
    #[serde(default = "default_contrast")]
    pub contrast: f32,
    #[serde(default = "default_brightness")]
    pub brightness: f32,
    #[serde(default = "default_sharpen")]
    pub sharpen: f32,
}

fn default_contrast() -> f32 {
    1.8
}
fn default_brightness() -> f32 {
    1.1
}
fn default_sharpen() -> f32 {
    2.5
}

impl Default for EnhanceSettings {
    fn default() -> Self {
        Self {
            contrast: default_contrast(),
            brightness: default_brightness(),
            sharpen: default_sharpen(),
        }
    }
}

impl EnhanceSettings {
    /// Apply contrast, then brightness, then sharpening.
    pub fn apply(&self, img: &DynamicImage) -> DynamicImage {
        let mut out = if (self.contrast - 1.0).abs() > f32::EPSILON {
            img.adjust_contrast((self.contrast - 1.0) * 100.0)
        } else {
            img.clone()
        };

        if (self.brightness - 1.0).abs() > f32::EPSILON {
            out = out.brighten(((self.brightness - 1.0) * 128.0).round() as i32);
        }

        if self.sharpen > 1.0 {
            let k = (self.sharpen - 1.0) / 4.0;
            let kernel = [0.0, -k, 0.0, -k, 1.0 + 4.0 * k, -k, 0.0, -k, 0.0];
            out = out.filter3x3(&kernel);
        }

        out
    }
}

/// Resize `img` so its longer edge is `target` pixels, preserving aspect
/// ratio and rounding both dimensions to even numbers.
///
/// Images already smaller than `target` are not upscaled; only their
/// dimensions are evened.
pub fn resize_to_long_edge(img: &DynamicImage, target: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    let long = w.max(h);
    if long == 0 || target == 0 {
        return img.clone();
    }

    let scale = (target as f64 / long as f64).min(1.0);
    let new_w = round_even(w as f64 * scale);
    let new_h = round_even(h as f64 * scale);

    if new_w == w && new_h == h {
        return img.clone();
    }
    img.resize_exact(new_w, new_h, FilterType::Lanczos3)
}

/// Round to the nearest even integer, never below 2.
fn round_even(v: f64) -> u32 {
    let even = ((v / 2.0).round() as u32) * 2;
    even.max(2)
}

/// Lazily yields one resized variant per configured step.
pub struct ResolutionLadder<'a> {
    source: &'a DynamicImage,
    steps: &'a [u32],
    enhance: Option<&'a EnhanceSettings>,
}

impl<'a> ResolutionLadder<'a> {
    /// An empty ladder is a caller error and fails fast.
    pub fn new(
        source: &'a DynamicImage,
        steps: &'a [u32],
        enhance: Option<&'a EnhanceSettings>,
    ) -> Result<Self, DocExtractError> {
        if steps.is_empty() {
            return Err(DocExtractError::InvalidConfig(
                "resolution_steps must contain at least one size".into(),
            ));
        }
        Ok(Self {
            source,
            steps,
            enhance,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Produce the variant for one target size.
    pub fn variant(&self, target: u32) -> DynamicImage {
        let resized = resize_to_long_edge(self.source, target);
        match self.enhance {
            Some(settings) => settings.apply(&resized),
            None => resized,
        }
    }

    /// Iterate `(target, image)` pairs in configured order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, DynamicImage)> + '_ {
        self.steps.iter().map(move |&target| (target, self.variant(target)))
    }
}

/// Parse a comma-separated list such as `"1500,1200,1000"`.
pub fn parse_steps(s: &str) -> Result<Vec<u32>, DocExtractError> {
    let steps = s
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| DocExtractError::InvalidConfig(format!("invalid resolution step '{p}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if steps.is_empty() {
        return Err(DocExtractError::InvalidConfig(
            "resolution_steps must contain at least one size".into(),
        ));
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn gradient(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        }))
    }

    #[test]
    fn resize_preserves_aspect_and_evens_dimensions() {
        let img = gradient(1001, 2001);
        let out = resize_to_long_edge(&img, 1000);
        assert_eq!(out.height(), 1000);
        assert_eq!(out.width() % 2, 0);
        assert!((out.width() as i32 - 500).abs() <= 2);
    }

    #[test]
    fn resize_never_upscales() {
        let img = gradient(301, 201);
        let out = resize_to_long_edge(&img, 1500);
        assert_eq!((out.width(), out.height()), (302, 202));
    }

    #[test]
    fn ladder_resizes_from_original_each_time() {
        let img = gradient(1600, 800);
        let steps = [1200, 600, 1000];
        let ladder = ResolutionLadder::new(&img, &steps, None).unwrap();
        let sizes: Vec<(u32, u32, u32)> = ladder
            .iter()
            .map(|(t, v)| (t, v.width(), v.height()))
            .collect();
        // 1000 after 600 proves the third rung is not derived from the second
        assert_eq!(sizes, vec![(1200, 1200, 600), (600, 600, 300), (1000, 1000, 500)]);
    }

    #[test]
    fn empty_ladder_fails_fast() {
        let img = gradient(10, 10);
        let err = ResolutionLadder::new(&img, &[], None).err().expect("must fail");
        assert!(matches!(err, DocExtractError::InvalidConfig(_)));
    }

    #[test]
    fn enhancement_keeps_dimensions() {
        let img = gradient(64, 32);
        let out = EnhanceSettings::default().apply(&img);
        assert_eq!((out.width(), out.height()), (64, 32));
    }

    #[test]
    fn parse_steps_accepts_list_and_rejects_garbage() {
        assert_eq!(parse_steps("1500, 1200,800").unwrap(), vec![1500, 1200, 800]);
        assert!(parse_steps("1500,abc").is_err());
        assert!(parse_steps("0").is_err());
        assert!(parse_steps("").is_err());
    }
}
