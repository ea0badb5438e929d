//! Window splitting: partition a page image into named, overlapping crops.
//!
//! A VLM reading a whole A4 scan at 1 500 px sees 6–8 pt payslip text at
//! roughly three pixels per stroke. Cropping the page into halves or
//! quadrants doubles or quadruples the effective resolution of every field
//! without raising the per-call image size.
//!
//! ## Overlap
//!
//! A naive split cuts text lines that straddle the boundary in half, so
//! neither window can read them. Each window is therefore extended across
//! the split line:
//!
//! ```text
//!   0 ┌──────────────┐
//!     │     top      │
//!     │              │   H/2·(1+o)
//!     ├──────────────┤ ← H/2 − H·o/2
//!     │   overlap    │   band of height H·o, seen by both windows
//!     ├──────────────┤ ← H/2 + H·o/2
//!     │    bottom    │
//!   H └──────────────┘
//! ```
//!
//! Window order is fixed per layout (top before bottom, left before right)
//! because the reconciler's positional priorities rely on it.

use crate::error::DocExtractError;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest accepted overlap fraction; the valid range is `[0, 0.5)`.
pub const MAX_OVERLAP: f32 = 0.499;

/// Default overlap fraction between adjacent windows.
pub const DEFAULT_OVERLAP: f32 = 0.1;

const WHOLE: [&str; 1] = ["whole"];
const VERTICAL: [&str; 2] = ["top", "bottom"];
const HORIZONTAL: [&str; 2] = ["left", "right"];
const QUADRANT: [&str; 4] = ["top_left", "top_right", "bottom_left", "bottom_right"];

/// How a page is cut into windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WindowLayout {
    /// One window covering the full page.
    Whole,
    /// Two windows stacked top / bottom.
    Vertical { overlap: f32 },
    /// Two windows side by side, left / right.
    Horizontal { overlap: f32 },
    /// Four windows: top_left, top_right, bottom_left, bottom_right.
    Quadrant { overlap: f32 },
}

impl Default for WindowLayout {
    fn default() -> Self {
        WindowLayout::Vertical {
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl fmt::Display for WindowLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl WindowLayout {
    /// Parse a layout name (`whole`, `vertical`, `horizontal`, `quadrant`).
    ///
    /// Unknown names are a configuration error, never a silent fallback.
    pub fn from_name(name: &str, overlap: f32) -> Result<Self, DocExtractError> {
        let overlap = clamp_overlap(overlap);
        match name.trim().to_ascii_lowercase().as_str() {
            "whole" => Ok(WindowLayout::Whole),
            "vertical" => Ok(WindowLayout::Vertical { overlap }),
            "horizontal" => Ok(WindowLayout::Horizontal { overlap }),
            "quadrant" => Ok(WindowLayout::Quadrant { overlap }),
            other => Err(DocExtractError::InvalidConfig(format!(
                "unknown window layout '{other}' (expected whole, vertical, horizontal or quadrant)"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WindowLayout::Whole => "whole",
            WindowLayout::Vertical { .. } => "vertical",
            WindowLayout::Horizontal { .. } => "horizontal",
            WindowLayout::Quadrant { .. } => "quadrant",
        }
    }

    /// Window names in processing order.
    pub fn window_names(&self) -> &'static [&'static str] {
        match self {
            WindowLayout::Whole => &WHOLE,
            WindowLayout::Vertical { .. } => &VERTICAL,
            WindowLayout::Horizontal { .. } => &HORIZONTAL,
            WindowLayout::Quadrant { .. } => &QUADRANT,
        }
    }

    pub fn window_count(&self) -> usize {
        self.window_names().len()
    }

    /// Effective overlap fraction after clamping (0 for `Whole`).
    pub fn overlap(&self) -> f32 {
        match self {
            WindowLayout::Whole => 0.0,
            WindowLayout::Vertical { overlap }
            | WindowLayout::Horizontal { overlap }
            | WindowLayout::Quadrant { overlap } => clamp_overlap(*overlap),
        }
    }

    /// Same layout with a different overlap.
    pub fn with_overlap(self, overlap: f32) -> Self {
        let overlap = clamp_overlap(overlap);
        match self {
            WindowLayout::Whole => WindowLayout::Whole,
            WindowLayout::Vertical { .. } => WindowLayout::Vertical { overlap },
            WindowLayout::Horizontal { .. } => WindowLayout::Horizontal { overlap },
            WindowLayout::Quadrant { .. } => WindowLayout::Quadrant { overlap },
        }
    }

    /// Map a window name to its static form, if it belongs to this layout.
    pub fn window_name(&self, name: &str) -> Option<&'static str> {
        self.window_names().iter().copied().find(|n| *n == name)
    }
}

/// Clamp an overlap fraction into `[0, 0.5)`. Non-finite values become 0.
pub fn clamp_overlap(overlap: f32) -> f32 {
    if !overlap.is_finite() {
        return 0.0;
    }
    overlap.clamp(0.0, MAX_OVERLAP)
}

/// A rectangle in source-image pixel coordinates, half-open: `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

/// A named crop of a page image.
#[derive(Debug, Clone)]
pub struct Window {
    pub name: &'static str,
    pub image: DynamicImage,
    pub origin_rect: Rect,
}

impl Window {
    /// Crop `rect` out of `source`.
    pub fn crop(source: &DynamicImage, name: &'static str, rect: Rect) -> Self {
        let image = source.crop_imm(rect.x0, rect.y0, rect.width(), rect.height());
        Self {
            name,
            image,
            origin_rect: rect,
        }
    }
}

/// Split `image` into windows per `layout`, in the layout's fixed order.
pub fn split(image: &DynamicImage, layout: WindowLayout) -> Vec<Window> {
    window_rects(image.width(), image.height(), layout)
        .into_iter()
        .map(|(name, rect)| Window::crop(image, name, rect))
        .collect()
}

/// Compute the named window rectangles for a `width × height` page without
/// touching pixels.
pub fn window_rects(width: u32, height: u32, layout: WindowLayout) -> Vec<(&'static str, Rect)> {
    let overlap = layout.overlap();
    let full = Rect {
        x0: 0,
        y0: 0,
        x1: width,
        y1: height,
    };

    match layout {
        WindowLayout::Whole => vec![("whole", full)],
        WindowLayout::Vertical { .. } => {
            let (top, bottom) = split_axis(height, overlap);
            vec![
                ("top", Rect { y0: top.0, y1: top.1, ..full }),
                ("bottom", Rect { y0: bottom.0, y1: bottom.1, ..full }),
            ]
        }
        WindowLayout::Horizontal { .. } => {
            let (left, right) = split_axis(width, overlap);
            vec![
                ("left", Rect { x0: left.0, x1: left.1, ..full }),
                ("right", Rect { x0: right.0, x1: right.1, ..full }),
            ]
        }
        WindowLayout::Quadrant { .. } => {
            let (top, bottom) = split_axis(height, overlap);
            let (left, right) = split_axis(width, overlap);
            let quad = |rows: (u32, u32), cols: (u32, u32)| Rect {
                x0: cols.0,
                x1: cols.1,
                y0: rows.0,
                y1: rows.1,
            };
            vec![
                ("top_left", quad(top, left)),
                ("top_right", quad(top, right)),
                ("bottom_left", quad(bottom, left)),
                ("bottom_right", quad(bottom, right)),
            ]
        }
    }
}

/// Split one axis of length `len` into two spans that each extend
/// `len/2 · (1 + overlap)` from their outer edge.
fn split_axis(len: u32, overlap: f32) -> ((u32, u32), (u32, u32)) {
    let exact = (len as f64 / 2.0) * (1.0 + overlap as f64);
    // f32 → f64 widening leaves noise like 550.0000007; snap before ceil.
    let extent = ((exact * 1e4).round() / 1e4).ceil() as u32;
    let extent = extent.min(len);
    ((0, extent), (len - extent, len))
}
