//! # edgequake-docextract
//!
//! Extract structured fields from scanned German payslips and property
//! listings using Vision Language Models (VLMs).
//!
//! ## Why windows?
//!
//! Small print (7–8 pt totals at the bottom of a payslip) is lost when a
//! whole page is downscaled to what a VLM accepts. This crate crops each
//! page into overlapping windows, sends every window at the largest
//! resolution the model survives, and reconciles the per-window answers
//! with field-specific rules (the name lives at the top, the totals at the
//! bottom).
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / PNG / JPEG
//!  │
//!  ├─ 1. Input      sniff magic bytes, validate path
//!  ├─ 2. Render     one page at a time via pdfium (spawn_blocking)
//!  ├─ 3. Split      whole / vertical / horizontal / quadrant windows
//!  ├─ 4. Ladder     1500 → 1200 → 1000 → 800 px until a record parses
//!  ├─ 5. Parse      strict JSON → tolerant repair → per-field regex
//!  ├─ 6. Reconcile  positional priorities + amount normalisation
//!  └─ 7. Output     {employee, payment, raw_output, processed_windows}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docextract::{extract, DocumentFields, ExtractionConfig, WindowLayout};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Backend auto-detected from DOCEXTRACT_CONTAINER_URL / OPENAI_API_KEY / ...
//!     let config = ExtractionConfig::builder()
//!         .layout(WindowLayout::Vertical { overlap: 0.1 })
//!         .build()?;
//!     let output = extract("payslip.pdf", &config).await?;
//!     if let Some(DocumentFields::Payslip(r)) = output.document() {
//!         println!("{}: gross {} / net {}", r.employee.name, r.payment.gross, r.payment.net);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docextract` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docextract = { version = "0.1", default-features = false }
//! ```
//!
//! ## Backends
//!
//! | Backend | Selected by | Notes |
//! |---------|-------------|-------|
//! | container | `DOCEXTRACT_CONTAINER_URL`, `--backend container` | self-hosted model, `/process/image`, memory cleanup per document |
//! | llm | `OPENAI_API_KEY`, `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` | any `edgequake-llm` vision provider |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod fields;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    BackendKind, ExtractionConfig, ExtractionConfigBuilder, PagePlan, PageSelection, SettingsFile,
};
pub use error::{DocExtractError, PageError};
pub use extract::{extract, extract_image, extract_sync, extract_to_file, resolve_backend, DocumentSession};
pub use fields::DocumentKind;
pub use output::{
    CanonicalResult, DocumentFields, ExtractionOutput, ExtractionStats, PageOutcome, PropertyResult,
};
pub use pipeline::container::ContainerBackend;
pub use pipeline::extract::{ExtractionAttempt, WindowOutcome};
pub use pipeline::inference::{
    FailureKind, GenerationParams, InferenceBackend, InferenceFailure, InferenceRequest,
};
pub use pipeline::llm::LlmBackend;
pub use pipeline::reconcile::PriorityTable;
pub use pipeline::timeout::TimeoutSettings;
pub use pipeline::window::WindowLayout;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::PromptCatalog;
pub use stream::{extract_stream, PageStream};
