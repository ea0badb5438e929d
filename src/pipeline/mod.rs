//! Pipeline stages for windowed field extraction.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable and lets us swap implementations (e.g. a
//! different inference backend) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ window ──▶ resolution ──▶ inference ──▶ parse ──▶ reconcile
//! (sniff)   (pdfium)   (crops)    (ladder)       (backend)     (3 tiers)  (priorities)
//!                                 └──────────── extract ─────────────┘
//! ```
//!
//! 1. [`input`]   - validate the path and sniff PDF / PNG / JPEG
//! 2. [`render`]  - rasterise one page at a time in `spawn_blocking`
//! 3. [`window`]  - split the page into named, overlapping windows
//! 4. [`resolution`] - resized and enhanced variants, largest first
//! 5. [`inference`] - encode ([`encode`]) and call the backend
//!    ([`llm`] or [`container`]) under a deadline from [`timeout`]
//! 6. [`parse`]   - strict JSON, tolerant repair, regex recovery
//! 7. [`extract`] - drive 4–6 down the ladder for one window
//! 8. [`reconcile`] - merge window records by field priority
//!
//! [`page`] ties 3–8 together for one page.

pub mod container;
pub mod encode;
pub mod extract;
pub mod inference;
pub mod input;
pub mod llm;
pub mod page;
pub mod parse;
pub mod reconcile;
pub mod render;
pub mod resolution;
pub mod timeout;
pub mod window;
