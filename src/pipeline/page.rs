//! Page orchestration: split → window ladder → reconcile.
//!
//! An [`ExtractionRequest`] pins down everything a page needs (layout,
//! windows, prompts, deadline) before the first model call is made, so the
//! request sequence of a run is fixed by the config alone. [`run_page`]
//! then works through the windows strictly one after another.

use crate::config::ExtractionConfig;
use crate::error::DocExtractError;
use crate::output::{DocumentFields, PageOutcome};
use crate::pipeline::extract::{WindowExtractor, WindowOutcome};
use crate::pipeline::inference::{InferenceBackend, InferenceInvoker};
use crate::pipeline::parse::ParsedRecord;
use crate::pipeline::reconcile::FieldReconciler;
use crate::pipeline::window::{window_rects, Window, WindowLayout};
use image::DynamicImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One window of a page request.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowTask {
    pub name: &'static str,
    pub prompt: String,
}

/// Immutable per-page request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    /// 1-indexed page number.
    pub page_num: usize,
    pub layout: WindowLayout,
    /// Windows to process, in layout order.
    pub windows: Vec<WindowTask>,
    /// Deadline applied to every model call of this page.
    pub deadline: Duration,
}

impl ExtractionRequest {
    /// Resolve the plan, prompts and deadline for `page_num`.
    ///
    /// `selected_pages` is the number of pages in the run and `is_cpu`
    /// whether the backend computes on CPU; both scale the deadline.
    pub fn for_page(
        config: &ExtractionConfig,
        page_num: usize,
        selected_pages: usize,
        is_cpu: bool,
    ) -> Result<Self, DocExtractError> {
        let plan = config.plan_for_page(page_num);
        plan.validate()?;

        let windows = plan
            .windows()
            .into_iter()
            .map(|name| {
                config.prompts.require(&plan.layout, name).map(|prompt| WindowTask {
                    name,
                    prompt: prompt.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let deadline = config.timeouts.deadline(selected_pages, windows.len(), is_cpu);
        Ok(Self {
            page_num,
            layout: plan.layout,
            windows,
            deadline,
        })
    }

    pub fn window_names(&self) -> Vec<&'static str> {
        self.windows.iter().map(|w| w.name).collect()
    }
}

/// Run every window of `request` against `image` and reconcile the records.
///
/// Inference failures never make this fail; only an invalid ladder does.
pub async fn run_page(
    request: &ExtractionRequest,
    image: &DynamicImage,
    backend: &Arc<dyn InferenceBackend>,
    config: &ExtractionConfig,
) -> Result<PageOutcome, DocExtractError> {
    let start = Instant::now();
    let page_num = request.page_num;

    let invoker = InferenceInvoker::new(
        Arc::clone(backend),
        config.generation,
        config.image_encoding,
        request.deadline,
    );
    let extractor = WindowExtractor::new(
        &invoker,
        &config.resolution_steps,
        config.enhance.as_ref(),
        config.kind.fields(),
    )?
    .with_progress(page_num, config.progress_callback.as_ref());

    debug!(
        "Page {}: {} layout, windows {:?}, deadline {:?}",
        page_num,
        request.layout,
        request.window_names(),
        request.deadline
    );

    let rects = window_rects(image.width(), image.height(), request.layout);
    let mut windows: Vec<WindowOutcome> = Vec::with_capacity(request.windows.len());
    for task in &request.windows {
        let Some(&(name, rect)) = rects.iter().find(|(n, _)| *n == task.name) else {
            return Err(DocExtractError::Internal(format!(
                "window '{}' missing from {} layout",
                task.name, request.layout
            )));
        };
        let window = Window::crop(image, name, rect);
        windows.push(extractor.extract(&window, &task.prompt).await);
    }

    let records: Vec<(&str, &ParsedRecord)> = windows
        .iter()
        .filter_map(|w| w.record.as_ref().map(|r| (w.window_name.as_str(), r)))
        .collect();
    let reconciled = FieldReconciler::new(config.kind, config.priorities.clone()).reconcile(&records);

    let raw_output = windows
        .iter()
        .filter_map(|w| w.accepted_text().map(|t| format!("[{}]\n{}", w.window_name, t)))
        .collect::<Vec<_>>()
        .join("\n\n");

    let fields = DocumentFields::from_reconciled(config.kind, &reconciled, raw_output);
    let warnings = fields.consistency_warnings();
    for w in &warnings {
        warn!("Page {}: {}", page_num, w);
    }

    info!(
        "Page {}: {}/{} windows produced a record",
        page_num,
        reconciled.processed_windows.len(),
        windows.len()
    );

    Ok(PageOutcome {
        page_num,
        layout: request.layout.name().to_string(),
        fields,
        sources: reconciled.sources,
        windows,
        warnings,
        error: None,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
