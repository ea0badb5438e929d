//! Inference contract: one image + one prompt in, raw text or a failure out.
//!
//! The model itself lives outside this crate: a hosted VLM behind
//! [`crate::pipeline::llm::LlmBackend`] or the self-hosted model container
//! behind [`crate::pipeline::container::ContainerBackend`]. Both implement
//! [`InferenceBackend`]; the [`InferenceInvoker`] adds the parts that must
//! not differ between backends: image encoding and the hard deadline.
//!
//! Every failure is folded into three kinds the resolution ladder knows how
//! to react to: the call timed out, the accelerator ran out of memory, or
//! something else went wrong remotely. None of them is fatal.

use crate::pipeline::encode::{self, EncodedImage, ImageEncoding};
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Why a single extraction attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RemoteError,
    OutOfMemory,
    ParseFailure,
}

/// A failed model call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceFailure {
    #[error("inference timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("model ran out of memory: {0}")]
    OutOfMemory(String),

    #[error("remote inference error: {0}")]
    Remote(String),
}

impl InferenceFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            InferenceFailure::Timeout { .. } => FailureKind::Timeout,
            InferenceFailure::OutOfMemory(_) => FailureKind::OutOfMemory,
            InferenceFailure::Remote(_) => FailureKind::RemoteError,
        }
    }

    /// Classify a backend error message. Model servers report accelerator
    /// exhaustion only as text ("CUDA out of memory", "OOM", ...).
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_out_of_memory(&message) {
            InferenceFailure::OutOfMemory(message)
        } else {
            InferenceFailure::Remote(message)
        }
    }
}

fn is_out_of_memory(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("out of memory")
        || lower.contains("outofmemory")
        || lower.contains("cuda error: out")
        || lower.split(|c: char| !c.is_ascii_alphanumeric()).any(|w| w == "oom")
}

/// Sampling and length parameters sent with every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum tokens the model may generate. Default: 768.
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    /// Sampling temperature. Default: 0.1.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Nucleus sampling mass. Default: 0.95.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Beam count; 1 disables beam search. Default: 1.
    #[serde(default = "default_num_beams")]
    pub num_beams: u32,
}

fn default_max_new_tokens() -> usize {
    768
}
fn default_temperature() -> f32 {
    0.1
}
fn default_top_p() -> f32 {
    0.95
}
fn default_num_beams() -> u32 {
    1
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            num_beams: default_num_beams(),
        }
    }
}

/// Everything a backend needs for one call.
#[derive(Debug)]
pub struct InferenceRequest<'a> {
    pub image: &'a EncodedImage,
    pub prompt: &'a str,
    pub generation: &'a GenerationParams,
    pub deadline: Duration,
}

/// A remote model that turns (image, prompt) into free text.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run one generation. Implementations should honour
    /// `request.deadline` where their transport allows it; the invoker
    /// enforces it regardless.
    async fn generate(&self, request: &InferenceRequest<'_>) -> Result<String, InferenceFailure>;

    /// Whether the model runs without an accelerator. Used to stretch
    /// deadlines.
    async fn is_cpu_only(&self) -> bool {
        false
    }

    /// Ask the backend to free accelerator memory. Called once per document.
    async fn release_memory(&self) -> Result<(), InferenceFailure> {
        Ok(())
    }
}

/// Encodes a window image and calls the backend under a hard deadline.
#[derive(Clone)]
pub struct InferenceInvoker {
    backend: Arc<dyn InferenceBackend>,
    generation: GenerationParams,
    encoding: ImageEncoding,
    deadline: Duration,
}

impl InferenceInvoker {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        generation: GenerationParams,
        encoding: ImageEncoding,
        deadline: Duration,
    ) -> Self {
        Self {
            backend,
            generation,
            encoding,
            deadline,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// One model call. Expiry of the deadline is reported as
    /// [`InferenceFailure::Timeout`]; the remote computation is abandoned,
    /// not cancelled.
    pub async fn invoke(&self, image: &DynamicImage, prompt: &str) -> Result<String, InferenceFailure> {
        let encoded = encode::encode_window(image, self.encoding)
            .map_err(|e| InferenceFailure::Remote(format!("image encoding failed: {e}")))?;

        let request = InferenceRequest {
            image: &encoded,
            prompt,
            generation: &self.generation,
            deadline: self.deadline,
        };

        let start = Instant::now();
        let result = tokio::time::timeout(self.deadline, self.backend.generate(&request)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(text)) => {
                debug!(
                    "{}: {}x{} image → {} chars in {}ms",
                    self.backend.name(),
                    encoded.width,
                    encoded.height,
                    text.len(),
                    elapsed_ms
                );
                Ok(text)
            }
            Ok(Err(failure)) => Err(failure),
            Err(_) => Err(InferenceFailure::Timeout { elapsed_ms }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    struct SlowBackend {
        delay: Duration,
    }

    #[async_trait]
    impl InferenceBackend for SlowBackend {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, request: &InferenceRequest<'_>) -> Result<String, InferenceFailure> {
            tokio::time::sleep(self.delay).await;
            Ok(format!("{}x{}", request.image.width, request.image.height))
        }
    }

    fn tiny() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 4, Rgba([0, 0, 0, 255])))
    }

    #[test]
    fn classifies_out_of_memory_messages() {
        assert_eq!(
            InferenceFailure::from_message("CUDA out of memory. Tried to allocate 2.00 GiB").kind(),
            FailureKind::OutOfMemory
        );
        assert_eq!(
            InferenceFailure::from_message("worker killed: OOM").kind(),
            FailureKind::OutOfMemory
        );
        assert_eq!(
            InferenceFailure::from_message("502 Bad Gateway").kind(),
            FailureKind::RemoteError
        );
        // "room" must not trip the OOM heuristic
        assert_eq!(
            InferenceFailure::from_message("no room in queue").kind(),
            FailureKind::RemoteError
        );
    }

    #[tokio::test]
    async fn invoke_returns_backend_text() {
        let invoker = InferenceInvoker::new(
            Arc::new(SlowBackend {
                delay: Duration::from_millis(1),
            }),
            GenerationParams::default(),
            ImageEncoding::Png,
            Duration::from_secs(5),
        );
        let text = invoker.invoke(&tiny(), "read it").await.unwrap();
        assert_eq!(text, "8x4");
    }

    #[tokio::test]
    async fn invoke_enforces_deadline() {
        let invoker = InferenceInvoker::new(
            Arc::new(SlowBackend {
                delay: Duration::from_secs(10),
            }),
            GenerationParams::default(),
            ImageEncoding::Png,
            Duration::from_millis(20),
        );
        let err = invoker.invoke(&tiny(), "read it").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Timeout);
    }

    #[test]
    fn generation_defaults() {
        let g = GenerationParams::default();
        assert_eq!(g.max_new_tokens, 768);
        assert_eq!(g.num_beams, 1);
        assert!((g.temperature - 0.1).abs() < f32::EPSILON);
    }
}
