//! Self-hosted model container backend.
//!
//! The container wraps a local VLM behind a small HTTP API:
//!
//! * `POST /process/image`: multipart upload of one image plus form fields
//!   (window mode, prompt, generation parameters). Replies with JSON.
//! * `POST /cleanup/memory`: frees accelerator memory between documents.
//! * `GET /status`: reports whether the model runs on a GPU.
//!
//! Windows are already cropped and resized on this side, so every upload is
//! sent as `window_mode=whole` with a single resolution step equal to the
//! image's long edge; the container must not split or re-ladder it.

use crate::error::DocExtractError;
use crate::pipeline::inference::{InferenceBackend, InferenceFailure, InferenceRequest};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default container address.
pub const DEFAULT_CONTAINER_URL: &str = "http://localhost:27842";

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Reply of `GET /status`. Only the fields we act on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerStatus {
    #[serde(default)]
    pub gpu: Option<bool>,
    #[serde(default)]
    pub gpu_available: Option<bool>,
    #[serde(default)]
    pub device: Option<String>,
}

impl ContainerStatus {
    pub fn uses_gpu(&self) -> bool {
        if let Some(gpu) = self.gpu.or(self.gpu_available) {
            return gpu;
        }
        self.device
            .as_deref()
            .map(|d| {
                let d = d.to_ascii_lowercase();
                d.contains("cuda") || d.contains("gpu") || d.contains("mps")
            })
            .unwrap_or(false)
    }
}

/// [`InferenceBackend`] talking to the model container over HTTP.
pub struct ContainerBackend {
    base_url: String,
    client: reqwest::Client,
    force_cpu: bool,
}

impl ContainerBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DocExtractError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(DocExtractError::BackendNotConfigured {
                backend: "container".into(),
                hint: format!("container URL must start with http:// or https:// (got '{base_url}')"),
            });
        }
        // No client-wide timeout: every call carries its own deadline.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DocExtractError::BackendNotConfigured {
                backend: "container".into(),
                hint: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            base_url,
            client,
            force_cpu: false,
        })
    }

    /// Ask the container to run on CPU even when a GPU is present.
    pub fn with_force_cpu(mut self, force_cpu: bool) -> Self {
        self.force_cpu = force_cpu;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query `GET /status`.
    pub async fn status(&self) -> Result<ContainerStatus, InferenceFailure> {
        let response = self
            .client
            .get(format!("{}/status", self.base_url))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(InferenceFailure::Remote(format!(
                "status endpoint returned {}",
                response.status()
            )));
        }
        response
            .json::<ContainerStatus>()
            .await
            .map_err(|e| InferenceFailure::Remote(format!("unreadable status reply: {e}")))
    }

    fn build_form(&self, request: &InferenceRequest<'_>) -> Result<Form, InferenceFailure> {
        let part = Part::bytes(request.image.bytes.clone())
            .file_name(request.image.encoding.file_name())
            .mime_str(request.image.mime_type())
            .map_err(|e| InferenceFailure::Remote(format!("invalid mime type: {e}")))?;

        let long_edge = request.image.width.max(request.image.height);
        let generation = request.generation;

        Ok(Form::new()
            .part("file", part)
            .text("window_mode", "whole")
            .text("selected_windows", "whole")
            .text("prompt_whole", request.prompt.to_string())
            .text("override_global_settings", "true")
            .text("force_cpu", self.force_cpu.to_string())
            .text("image_resolution_steps", long_edge.to_string())
            .text("text_generation_max_new_tokens", generation.max_new_tokens.to_string())
            .text("text_generation_temperature", generation.temperature.to_string())
            .text("text_generation_top_p", generation.top_p.to_string())
            .text("text_generation_num_beams", generation.num_beams.to_string())
            .text(
                "text_generation_use_beam_search",
                (generation.num_beams > 1).to_string(),
            ))
    }
}

#[async_trait]
impl InferenceBackend for ContainerBackend {
    fn name(&self) -> &str {
        "container"
    }

    async fn generate(&self, request: &InferenceRequest<'_>) -> Result<String, InferenceFailure> {
        let form = self.build_form(request)?;
        let response = self
            .client
            .post(format!("{}/process/image", self.base_url))
            .multipart(form)
            .timeout(request.deadline)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;

        if status == StatusCode::INSUFFICIENT_STORAGE {
            return Err(InferenceFailure::OutOfMemory(body));
        }
        if !status.is_success() {
            return Err(InferenceFailure::from_message(format!(
                "container returned {status}: {body}"
            )));
        }

        debug!("container: {} bytes of response", body.len());
        Ok(response_text(&body))
    }

    async fn is_cpu_only(&self) -> bool {
        if self.force_cpu {
            return true;
        }
        match self.status().await {
            Ok(status) => {
                let gpu = status.uses_gpu();
                info!("Model container running on {}", if gpu { "GPU" } else { "CPU" });
                !gpu
            }
            Err(e) => {
                warn!("Could not query container status, assuming GPU: {e}");
                false
            }
        }
    }

    async fn release_memory(&self) -> Result<(), InferenceFailure> {
        let response = self
            .client
            .post(format!("{}/cleanup/memory", self.base_url))
            .timeout(CLEANUP_TIMEOUT)
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status().is_success() {
            debug!("container memory cleanup acknowledged");
            Ok(())
        } else {
            Err(InferenceFailure::Remote(format!(
                "memory cleanup returned {}",
                response.status()
            )))
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> InferenceFailure {
    if e.is_timeout() {
        InferenceFailure::Timeout { elapsed_ms: 0 }
    } else {
        InferenceFailure::from_message(e.to_string())
    }
}

/// Pick the model text out of a container reply.
///
/// The container answers either with its own parsed record under
/// `results[..]` (an object holding a `found_in_*` key), with the raw
/// generation under `raw_output` / `raw_text` / `response`, or with plain
/// text. The parser downstream accepts all three.
pub(crate) fn response_text(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };

    if let Some(results) = value.get("results").and_then(Value::as_array) {
        let wrapped = results.iter().find(|r| {
            r.as_object()
                .is_some_and(|o| o.keys().any(|k| k.starts_with("found_in_")))
        });
        if let Some(record) = wrapped {
            return record.to_string();
        }
    }

    for key in ["raw_output", "raw_text", "response"] {
        if let Some(text) = value.get(key).and_then(Value::as_str) {
            return text.to_string();
        }
    }

    body.to_string()
}
