//! Window extraction: one window, one prompt, down the resolution ladder.
//!
//! Steps are tried strictly in configured order. The first attempt whose
//! response parses into a record wins; every failure (timeout, remote
//! error, out-of-memory, unparseable text) is logged on the outcome and the
//! next, smaller size is tried. A window that exhausts the ladder is marked
//! as failed and contributes nothing to reconciliation. Inference failures
//! never surface as errors here.

use crate::error::DocExtractError;
use crate::fields::FieldSpec;
use crate::pipeline::inference::{FailureKind, InferenceInvoker};
use crate::pipeline::parse::{self, ParsedRecord};
use crate::pipeline::resolution::{EnhanceSettings, ResolutionLadder};
use crate::pipeline::window::{Rect, Window};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One rung of the ladder for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub window_name: String,
    /// Target long edge in pixels.
    pub resolution: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
    pub duration_ms: u64,
}

impl ExtractionAttempt {
    pub fn succeeded(&self) -> bool {
        self.failure_kind.is_none() && self.parsed.is_some()
    }
}

/// Result of running the ladder for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub window_name: String,
    pub origin_rect: Rect,
    /// Every attempt made, in order. Never longer than the ladder.
    pub attempts: Vec<ExtractionAttempt>,
    /// The accepted record; `None` means extraction failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ParsedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_resolution: Option<u32>,
}

impl WindowOutcome {
    pub fn extraction_failed(&self) -> bool {
        self.record.is_none()
    }

    /// Raw model text of the accepted attempt.
    pub fn accepted_text(&self) -> Option<&str> {
        self.attempts
            .iter()
            .find(|a| a.succeeded())
            .and_then(|a| a.raw_text.as_deref())
    }
}

/// Runs the resolution ladder for windows of one page.
pub struct WindowExtractor<'a> {
    invoker: &'a InferenceInvoker,
    steps: &'a [u32],
    enhance: Option<&'a EnhanceSettings>,
    fields: &'static [FieldSpec],
    page_num: usize,
    progress: Option<&'a ProgressCallback>,
}

impl<'a> WindowExtractor<'a> {
    /// Fails fast on an empty ladder.
    pub fn new(
        invoker: &'a InferenceInvoker,
        steps: &'a [u32],
        enhance: Option<&'a EnhanceSettings>,
        fields: &'static [FieldSpec],
    ) -> Result<Self, DocExtractError> {
        if steps.is_empty() {
            return Err(DocExtractError::InvalidConfig(
                "resolution_steps must contain at least one size".into(),
            ));
        }
        Ok(Self {
            invoker,
            steps,
            enhance,
            fields,
            page_num: 1,
            progress: None,
        })
    }

    pub fn with_progress(mut self, page_num: usize, progress: Option<&'a ProgressCallback>) -> Self {
        self.page_num = page_num;
        self.progress = progress;
        self
    }

    /// Run the ladder for `window` with `prompt`.
    pub async fn extract(&self, window: &Window, prompt: &str) -> WindowOutcome {
        let mut outcome = WindowOutcome {
            window_name: window.name.to_string(),
            origin_rect: window.origin_rect,
            attempts: Vec::with_capacity(self.steps.len()),
            record: None,
            accepted_resolution: None,
        };

        // `new` rejects empty ladders, so this cannot fail.
        let Ok(ladder) = ResolutionLadder::new(&window.image, self.steps, self.enhance) else {
            return outcome;
        };

        for (resolution, variant) in ladder.iter() {
            let start = Instant::now();
            let result = self.invoker.invoke(&variant, prompt).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let mut attempt = ExtractionAttempt {
                window_name: window.name.to_string(),
                resolution,
                raw_text: None,
                parsed: None,
                failure_kind: None,
                failure_detail: None,
                duration_ms,
            };

            match result {
                Ok(text) => {
                    let record = parse::parse(&text, self.fields);
                    attempt.raw_text = Some(text);
                    if record.is_recovered() {
                        debug!(
                            "Page {} {}: parsed at {}px via {:?}",
                            self.page_num, window.name, resolution, record.tier
                        );
                        attempt.parsed = Some(record.clone());
                        outcome.attempts.push(attempt);
                        outcome.record = Some(record);
                        outcome.accepted_resolution = Some(resolution);
                        break;
                    }
                    attempt.failure_kind = Some(FailureKind::ParseFailure);
                    attempt.failure_detail = Some("no expected field recovered".into());
                }
                Err(failure) => {
                    attempt.failure_kind = Some(failure.kind());
                    attempt.failure_detail = Some(failure.to_string());
                }
            }

            let kind = attempt.failure_kind.unwrap_or(FailureKind::RemoteError);
            let detail = attempt.failure_detail.clone().unwrap_or_default();
            warn!(
                "Page {} {}: attempt at {}px failed ({:?}): {}",
                self.page_num, window.name, resolution, kind, detail
            );
            if let Some(cb) = self.progress {
                cb.on_attempt_failed(self.page_num, window.name, resolution, kind, &detail);
            }
            outcome.attempts.push(attempt);
        }

        if outcome.extraction_failed() {
            info!(
                "Page {} {}: all {} resolution steps failed",
                self.page_num,
                window.name,
                self.steps.len()
            );
        }
        if let Some(cb) = self.progress {
            cb.on_window_complete(self.page_num, window.name, outcome.accepted_resolution);
        }
        outcome
    }
}
