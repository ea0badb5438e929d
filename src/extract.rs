//! Eager (full-document) extraction entry points.
//!
//! ## Why eager vs. streaming?
//!
//! This module provides the simpler API: wait for all pages, then return.
//! Use [`crate::stream::extract_stream`] instead when you want page
//! outcomes as they are reconciled, e.g. to update a UI on long documents.
//!
//! Both APIs share [`DocumentSession`]: the input is validated, the backend
//! resolved and every page's [`ExtractionRequest`] built before the first
//! model call.

use crate::config::{BackendKind, ExtractionConfig};
use crate::error::{DocExtractError, PageError};
use crate::output::{DocumentFields, ExtractionOutput, ExtractionStats, PageOutcome};
use crate::pipeline::container::{ContainerBackend, DEFAULT_CONTAINER_URL};
use crate::pipeline::inference::InferenceBackend;
use crate::pipeline::input::{self, InputKind, ResolvedInput};
use crate::pipeline::llm::LlmBackend;
use crate::pipeline::page::{self, ExtractionRequest};
use crate::pipeline::render;
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract fields from a PDF or raster image.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(ExtractionOutput)` with one [`PageOutcome`] per selected page, even
/// when some windows or pages failed (check `output.stats`).
///
/// # Errors
/// Returns `Err(DocExtractError)` only for fatal errors:
/// - File not found / unsupported / corrupt
/// - Backend not configured
/// - Every selected page failed to render
pub async fn extract(
    input_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, DocExtractError> {
    let total_start = Instant::now();
    info!("Starting extraction: {}", input_path.as_ref().display());

    let session = DocumentSession::open(input_path, config).await?;
    let result = session.run_all(config).await;
    session.release().await;

    let (pages, mut stats) = result?;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Extraction complete: {}/{} pages, {} model calls, {}ms total",
        stats.processed_pages, stats.selected_pages, stats.model_calls, stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        kind: config.kind,
        pages,
        stats,
    })
}

/// Extract fields from an in-memory page image. No rendering, no input
/// validation; the image is page 1.
pub async fn extract_image(
    image: &DynamicImage,
    config: &ExtractionConfig,
) -> Result<PageOutcome, DocExtractError> {
    let backend = resolve_backend(config)?;
    let is_cpu = config.timeouts.force_cpu || backend.is_cpu_only().await;
    let request = ExtractionRequest::for_page(config, 1, 1, is_cpu)?;

    let result = page::run_page(&request, image, &backend, config).await;
    release_backend(&backend).await;
    result
}

/// Extract and write the [`ExtractionOutput`] as pretty JSON to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionStats, DocExtractError> {
    let output = extract(input_path, config).await?;
    let path = output_path.as_ref();
    let write_err = |e: std::io::Error| DocExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| DocExtractError::Internal(format!("JSON serialisation failed: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    Ok(output.stats)
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, DocExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocExtractError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(extract(input_path, config))
}

// ── Session ──────────────────────────────────────────────────────────────

/// A validated document with its backend and per-page requests.
pub struct DocumentSession {
    input: ResolvedInput,
    backend: Arc<dyn InferenceBackend>,
    total_pages: usize,
    requests: Vec<ExtractionRequest>,
}

impl DocumentSession {
    /// Validate the input, resolve the backend and build every page request.
    pub async fn open(
        input_path: impl AsRef<Path>,
        config: &ExtractionConfig,
    ) -> Result<Self, DocExtractError> {
        let input = input::resolve_input(input_path)?;

        let total_pages = match input.kind {
            InputKind::Pdf => render::page_count(input.path(), config.password.as_deref()).await?,
            InputKind::Image => 1,
        };

        let page_indices = config.pages.to_indices(total_pages);
        if page_indices.is_empty() {
            return Err(DocExtractError::PageOutOfRange {
                page: 0,
                total: total_pages,
            });
        }
        debug!("Selected {} of {} pages", page_indices.len(), total_pages);

        let backend = resolve_backend(config)?;
        let is_cpu = config.timeouts.force_cpu || backend.is_cpu_only().await;
        info!(
            "Backend: {} ({})",
            backend.name(),
            if is_cpu { "cpu" } else { "accelerated" }
        );

        let requests = page_indices
            .iter()
            .map(|idx| ExtractionRequest::for_page(config, idx + 1, page_indices.len(), is_cpu))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            input,
            backend,
            total_pages,
            requests,
        })
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn requests(&self) -> &[ExtractionRequest] {
        &self.requests
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    /// Render (or decode) the page of `request`.
    async fn load_page(
        &self,
        request: &ExtractionRequest,
        config: &ExtractionConfig,
    ) -> Result<DynamicImage, PageError> {
        match self.input.kind {
            InputKind::Pdf => {
                render::render_page(
                    self.input.path(),
                    config.password.as_deref(),
                    request.page_num - 1,
                    config.dpi,
                )
                .await
            }
            InputKind::Image => render::load_image(self.input.path())
                .await
                .map_err(|e| PageError::RenderFailed {
                    page: request.page_num,
                    detail: e.to_string(),
                }),
        }
    }

    /// Render and extract one page. Render failures become a page outcome
    /// with default fields.
    pub async fn process(
        &self,
        request: &ExtractionRequest,
        config: &ExtractionConfig,
    ) -> Result<PageOutcome, DocExtractError> {
        let total = self.requests.len();
        let page_num = request.page_num;
        let cb = config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_page_start(page_num, total, request.windows.len());
        }

        let start = Instant::now();
        let image = match self.load_page(request, config).await {
            Ok(image) => image,
            Err(e) => {
                warn!("Page {} skipped: {}", page_num, e);
                if let Some(cb) = cb {
                    cb.on_page_error(page_num, total, &e.to_string());
                }
                return Ok(PageOutcome {
                    page_num,
                    layout: request.layout.name().to_string(),
                    fields: DocumentFields::defaults(config.kind),
                    sources: Default::default(),
                    windows: Vec::new(),
                    warnings: Vec::new(),
                    error: Some(e),
                    duration_ms: start.elapsed().as_millis() as u64,
                });
            }
        };

        let outcome = page::run_page(request, &image, &self.backend, config).await?;
        if let Some(cb) = cb {
            cb.on_page_complete(page_num, total, outcome.fields.processed_windows().len());
        }
        Ok(outcome)
    }

    /// Every page in order. Fails with `AllPagesFailed` when no page rendered.
    async fn run_all(
        &self,
        config: &ExtractionConfig,
    ) -> Result<(Vec<PageOutcome>, ExtractionStats), DocExtractError> {
        let cb = config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_extraction_start(self.requests.len());
        }

        let mut stats = ExtractionStats {
            total_pages: self.total_pages,
            selected_pages: self.requests.len(),
            ..Default::default()
        };
        let mut pages = Vec::with_capacity(self.requests.len());
        for request in &self.requests {
            let outcome = self.process(request, config).await?;
            stats.record(&outcome);
            pages.push(outcome);
        }

        if let Some(cb) = cb {
            cb.on_extraction_complete(self.requests.len(), stats.processed_pages);
        }

        if stats.processed_pages == 0 {
            let first_error = pages
                .iter()
                .find_map(|p| p.error.as_ref())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(DocExtractError::AllPagesFailed {
                total: pages.len(),
                first_error,
            });
        }
        Ok((pages, stats))
    }

    /// Ask the backend to free memory. Errors are logged, not returned.
    pub async fn release(&self) {
        release_backend(&self.backend).await;
    }
}

async fn release_backend(backend: &Arc<dyn InferenceBackend>) {
    match backend.release_memory().await {
        Ok(()) => debug!("{}: memory released", backend.name()),
        Err(e) => warn!("{}: memory cleanup failed: {}", backend.name(), e),
    }
}

// ── Backend resolution ───────────────────────────────────────────────────

/// Resolve the inference backend, from most-specific to least-specific:
///
/// 1. **Pre-built backend** (`config.backend`), used as-is. Tests inject
///    scripted backends this way.
/// 2. **Explicit kind** (`config.backend_kind`), or for `Auto` the
///    `DOCEXTRACT_BACKEND` variable.
/// 3. **Auto**: a configured or `DOCEXTRACT_CONTAINER_URL` container URL
///    selects the container; otherwise an LLM provider is detected from
///    the environment.
pub fn resolve_backend(config: &ExtractionConfig) -> Result<Arc<dyn InferenceBackend>, DocExtractError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    let env_url = non_empty_env("DOCEXTRACT_CONTAINER_URL");
    let kind = match config.backend_kind {
        BackendKind::Auto => match non_empty_env("DOCEXTRACT_BACKEND") {
            Some(name) => BackendKind::from_name(&name)?,
            None if config.container_url.is_some() || env_url.is_some() => BackendKind::Container,
            None => BackendKind::Llm,
        },
        explicit => explicit,
    };

    match kind {
        BackendKind::Container => {
            let url = config
                .container_url
                .clone()
                .or(env_url)
                .unwrap_or_else(|| DEFAULT_CONTAINER_URL.to_string());
            let backend = ContainerBackend::new(url)?.with_force_cpu(config.timeouts.force_cpu);
            Ok(Arc::new(backend))
        }
        BackendKind::Llm | BackendKind::Auto => {
            let model = config.model.as_deref();
            let backend = match config.provider_name.as_deref() {
                Some(name) => LlmBackend::from_name(name, model)?,
                None => LlmBackend::from_env(model)?,
            };
            Ok(Arc::new(backend))
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
