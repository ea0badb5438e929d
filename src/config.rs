//! Configuration types for document extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`],
//! built via its [`ExtractionConfigBuilder`]. The built config is immutable:
//! every page request derived from it is fixed before the first model call,
//! so two runs with the same config issue the same sequence of requests.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about, clamps numeric
//! knobs into their valid range, and validates cross-field constraints
//! (windows belong to their layout, every window has a prompt) in `build()`.
//!
//! # Settings files
//! The same knobs can be loaded from YAML via [`SettingsFile`], which is how
//! the `docextract` CLI consumes `--config settings.yml`.

use crate::error::DocExtractError;
use crate::fields::DocumentKind;
use crate::pipeline::encode::ImageEncoding;
use crate::pipeline::inference::{GenerationParams, InferenceBackend};
use crate::pipeline::reconcile::PriorityTable;
use crate::pipeline::resolution::{EnhanceSettings, DEFAULT_RESOLUTION_STEPS};
use crate::pipeline::timeout::TimeoutSettings;
use crate::pipeline::window::{WindowLayout, DEFAULT_OVERLAP};
use crate::progress::ProgressCallback;
use crate::prompts::PromptCatalog;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which inference backend to use when none is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// `DOCEXTRACT_BACKEND`, then a container URL if one is set, then an
    /// LLM provider from the environment. (default)
    #[default]
    Auto,
    /// Hosted VLM through `edgequake-llm`.
    Llm,
    /// Self-hosted model container over HTTP.
    Container,
}

impl BackendKind {
    pub fn from_name(name: &str) -> Result<Self, DocExtractError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "llm" => Ok(BackendKind::Llm),
            "container" | "docker" => Ok(BackendKind::Container),
            other => Err(DocExtractError::InvalidConfig(format!(
                "unknown backend '{other}' (expected auto, llm or container)"
            ))),
        }
    }
}

/// Layout plus optional window subset for a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagePlan {
    #[serde(flatten)]
    pub layout: WindowLayout,
    /// `None` processes every window of the layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_windows: Option<Vec<String>>,
}

impl Default for PagePlan {
    fn default() -> Self {
        Self::new(WindowLayout::default())
    }
}

impl PagePlan {
    pub fn new(layout: WindowLayout) -> Self {
        Self {
            layout,
            selected_windows: None,
        }
    }

    pub fn with_windows<I, S>(mut self, windows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_windows = Some(windows.into_iter().map(Into::into).collect());
        self
    }

    /// Windows to process, in the layout's fixed order.
    pub fn windows(&self) -> Vec<&'static str> {
        let all = self.layout.window_names();
        match &self.selected_windows {
            None => all.to_vec(),
            Some(selected) => all
                .iter()
                .copied()
                .filter(|w| selected.iter().any(|s| s.trim() == *w))
                .collect(),
        }
    }

    /// Every selected name must exist in the layout, and at least one must
    /// be selected.
    pub fn validate(&self) -> Result<(), DocExtractError> {
        if let Some(selected) = &self.selected_windows {
            if selected.is_empty() {
                return Err(DocExtractError::InvalidConfig(format!(
                    "selected_windows for layout '{}' is empty",
                    self.layout
                )));
            }
            for name in selected {
                if self.layout.window_name(name.trim()).is_none() {
                    return Err(DocExtractError::InvalidConfig(format!(
                        "window '{name}' does not exist in layout '{}' (expected one of {:?})",
                        self.layout,
                        self.layout.window_names()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Configuration for one extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_docextract::{ExtractionConfig, WindowLayout};
///
/// let config = ExtractionConfig::builder()
///     .layout(WindowLayout::Quadrant { overlap: 0.1 })
///     .selected_windows(["top_left", "bottom_right"])
///     .resolution_steps(vec![1200, 800])
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Which document template to extract. Default: payslip.
    pub kind: DocumentKind,

    /// Layout and window subset used for every page without an override.
    /// Default: vertical, 10 % overlap, both windows.
    pub plan: PagePlan,

    /// Page number (1-indexed) → plan for that page.
    pub page_overrides: BTreeMap<usize, PagePlan>,

    /// Long-edge sizes tried per window, in order. Default: 1500, 1200, 1000, 800.
    ///
    /// Large first because small print reads best at high resolution; the
    /// smaller sizes exist to survive out-of-memory and timeouts.
    pub resolution_steps: Vec<u32>,

    /// Contrast/brightness/sharpening applied to every variant. `None`
    /// sends the resized crop untouched. Default: enabled.
    pub enhance: Option<EnhanceSettings>,

    /// Generation parameters sent with every call.
    pub generation: GenerationParams,

    /// Deadline computation inputs.
    pub timeouts: TimeoutSettings,

    /// Wire format of window images. Default: PNG.
    pub image_encoding: ImageEncoding,

    /// Rendering DPI for PDF pages. Range: 72–600. Default: 300.
    ///
    /// Payslips use 7–8 pt type; 300 DPI keeps digits distinguishable after
    /// the page is cropped and downscaled to the ladder sizes.
    pub dpi: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Effective prompt table (built-ins for `kind` with overrides applied).
    pub prompts: Arc<PromptCatalog>,

    /// Window preference per field. Default: derived from `kind`.
    pub priorities: PriorityTable,

    /// Backend selection when `backend` is not injected.
    pub backend_kind: BackendKind,

    /// Pre-constructed backend. Takes precedence over `backend_kind`.
    pub backend: Option<Arc<dyn InferenceBackend>>,

    /// LLM provider name (e.g. "openai", "ollama") for the LLM backend.
    pub provider_name: Option<String>,

    /// LLM model identifier for the LLM backend.
    pub model: Option<String>,

    /// Base URL of the model container.
    pub container_url: Option<String>,

    /// Progress callback for real-time extraction events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let kind = DocumentKind::default();
        Self {
            kind,
            plan: PagePlan::default(),
            page_overrides: BTreeMap::new(),
            resolution_steps: DEFAULT_RESOLUTION_STEPS.to_vec(),
            enhance: Some(EnhanceSettings::default()),
            generation: GenerationParams::default(),
            timeouts: TimeoutSettings::default(),
            image_encoding: ImageEncoding::default(),
            dpi: 300,
            password: None,
            pages: PageSelection::default(),
            prompts: Arc::new(PromptCatalog::builtin(kind)),
            priorities: PriorityTable::for_kind(kind),
            backend_kind: BackendKind::default(),
            backend: None,
            provider_name: None,
            model: None,
            container_url: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("kind", &self.kind)
            .field("plan", &self.plan)
            .field("page_overrides", &self.page_overrides)
            .field("resolution_steps", &self.resolution_steps)
            .field("enhance", &self.enhance)
            .field("generation", &self.generation)
            .field("timeouts", &self.timeouts)
            .field("image_encoding", &self.image_encoding)
            .field("dpi", &self.dpi)
            .field("pages", &self.pages)
            .field("prompts", &self.prompts.len())
            .field("priorities", &self.priorities)
            .field("backend_kind", &self.backend_kind)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("container_url", &self.container_url)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
            prompt_overrides: PromptCatalog::empty(),
            priorities: None,
        }
    }

    /// The plan for a 1-indexed page.
    pub fn plan_for_page(&self, page_num: usize) -> &PagePlan {
        self.page_overrides.get(&page_num).unwrap_or(&self.plan)
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
    prompt_overrides: PromptCatalog,
    priorities: Option<PriorityTable>,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .field("prompt_overrides", &self.prompt_overrides.len())
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn kind(mut self, kind: DocumentKind) -> Self {
        self.config.kind = kind;
        self
    }

    pub fn layout(mut self, layout: WindowLayout) -> Self {
        self.config.plan.layout = layout;
        self
    }

    /// Switch to the layout called `name`. Without an explicit `overlap` the
    /// one already configured is kept (the default when the current layout
    /// is `whole`).
    pub fn layout_by_name(self, name: &str, overlap: Option<f32>) -> Result<Self, DocExtractError> {
        let overlap = overlap.unwrap_or(match self.config.plan.layout {
            WindowLayout::Whole => DEFAULT_OVERLAP,
            current => current.overlap(),
        });
        Ok(self.layout(WindowLayout::from_name(name, overlap)?))
    }

    /// Keep the current layout but change its overlap (clamped into `[0, 0.5)`).
    pub fn overlap(mut self, overlap: f32) -> Self {
        self.config.plan.layout = self.config.plan.layout.with_overlap(overlap);
        self
    }

    pub fn selected_windows<I, S>(mut self, windows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.plan = self.config.plan.with_windows(windows);
        self
    }

    pub fn page_override(mut self, page_num: usize, plan: PagePlan) -> Self {
        self.config.page_overrides.insert(page_num, plan);
        self
    }

    pub fn resolution_steps(mut self, steps: Vec<u32>) -> Self {
        self.config.resolution_steps = steps;
        self
    }

    pub fn enhance(mut self, settings: Option<EnhanceSettings>) -> Self {
        self.config.enhance = settings;
        self
    }

    pub fn max_new_tokens(mut self, n: usize) -> Self {
        self.config.generation.max_new_tokens = n.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.generation.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.generation.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn num_beams(mut self, n: u32) -> Self {
        self.config.generation.num_beams = n.max(1);
        self
    }

    pub fn timeouts(mut self, settings: TimeoutSettings) -> Self {
        self.config.timeouts = settings;
        self
    }

    pub fn force_cpu(mut self, v: bool) -> Self {
        self.config.timeouts.force_cpu = v;
        self
    }

    pub fn image_encoding(mut self, encoding: ImageEncoding) -> Self {
        self.config.image_encoding = encoding;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    /// Prompts that replace the built-in ones entry by entry.
    pub fn prompts(mut self, overrides: PromptCatalog) -> Self {
        self.prompt_overrides = self.prompt_overrides.overlay(overrides);
        self
    }

    pub fn priorities(mut self, table: PriorityTable) -> Self {
        self.priorities = Some(table);
        self
    }

    pub fn backend_kind(mut self, kind: BackendKind) -> Self {
        self.config.backend_kind = kind;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn container_url(mut self, url: impl Into<String>) -> Self {
        self.config.container_url = Some(url.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, DocExtractError> {
        let mut config = self.config;

        if config.resolution_steps.is_empty() {
            return Err(DocExtractError::InvalidConfig(
                "resolution_steps must contain at least one size".into(),
            ));
        }
        if config.resolution_steps.contains(&0) {
            return Err(DocExtractError::InvalidConfig(
                "resolution_steps must be positive pixel sizes".into(),
            ));
        }
        if config.dpi < 72 || config.dpi > 600 {
            return Err(DocExtractError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                config.dpi
            )));
        }
        config.timeouts.validate()?;
        if config.page_overrides.contains_key(&0) {
            return Err(DocExtractError::InvalidConfig(
                "page overrides are 1-indexed, got page 0".into(),
            ));
        }

        let catalog = PromptCatalog::builtin(config.kind).overlay(self.prompt_overrides);
        for plan in std::iter::once(&config.plan).chain(config.page_overrides.values()) {
            plan.validate()?;
            for window in plan.windows() {
                catalog.require(&plan.layout, window)?;
            }
        }
        config.prompts = Arc::new(catalog);
        config.priorities = self
            .priorities
            .unwrap_or_else(|| PriorityTable::for_kind(config.kind));

        Ok(config)
    }
}

// ── Page selection ───────────────────────────────────────────────────────

/// Specifies which pages of the document to process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Process all pages (default).
    #[default]
    All,
    /// Process a single page (1-indexed).
    Single(usize),
    /// Process a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Process specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Parse `all`, `5`, `3-15` or `1,3,5`.
    pub fn parse(s: &str) -> Result<Self, DocExtractError> {
        let s = s.trim().to_lowercase();
        let page = |p: &str| -> Result<usize, DocExtractError> {
            match p.trim().parse::<usize>() {
                Ok(n) if n >= 1 => Ok(n),
                _ => Err(DocExtractError::InvalidConfig(format!(
                    "invalid page number '{}' (pages are 1-indexed)",
                    p.trim()
                ))),
            }
        };

        if s == "all" {
            return Ok(PageSelection::All);
        }
        if let Some((start, end)) = s.split_once('-') {
            let (start, end) = (page(start)?, page(end)?);
            if start > end {
                return Err(DocExtractError::InvalidConfig(format!(
                    "invalid page range '{start}-{end}': start must be <= end"
                )));
            }
            return Ok(PageSelection::Range(start, end));
        }
        if s.contains(',') {
            let pages = s.split(',').map(page).collect::<Result<Vec<_>, _>>()?;
            return Ok(PageSelection::Set(pages));
        }
        Ok(PageSelection::Single(page(&s)?))
    }
}

// ── Settings file ────────────────────────────────────────────────────────

/// `window:` section of a settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowSettings {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub overlap: Option<f32>,
    #[serde(default)]
    pub selected_windows: Option<Vec<String>>,
}

/// `image:` section of a settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageSettings {
    #[serde(default)]
    pub resolution_steps: Option<Vec<u32>>,
    /// `false` disables enhancement entirely.
    #[serde(default)]
    pub enhance: Option<bool>,
    #[serde(default)]
    pub contrast: Option<f32>,
    #[serde(default)]
    pub brightness: Option<f32>,
    #[serde(default)]
    pub sharpen: Option<f32>,
    #[serde(default)]
    pub encoding: Option<ImageEncoding>,
    #[serde(default)]
    pub dpi: Option<u32>,
}

/// `backend:` section of a settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub kind: Option<BackendKind>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// YAML settings file mirroring the builder.
///
/// ```yaml
/// document_kind: payslip
/// window:
///   mode: quadrant
///   overlap: 0.1
///   selected_windows: [top_left, bottom_right]
/// pages:
///   2: { mode: vertical, selected_windows: [bottom] }
/// image:
///   resolution_steps: [1500, 1200, 1000, 800]
/// text_generation:
///   max_new_tokens: 768
/// timeout:
///   force_cpu: true
/// backend:
///   kind: container
///   url: http://localhost:27842
/// prompts_file: prompts.yml
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub document_kind: Option<DocumentKind>,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub pages: BTreeMap<usize, WindowSettings>,
    #[serde(default)]
    pub image: ImageSettings,
    #[serde(default)]
    pub text_generation: Option<GenerationParams>,
    #[serde(default)]
    pub timeout: Option<TimeoutSettings>,
    #[serde(default)]
    pub backend: BackendSettings,
    /// Relative paths resolve against the settings file's directory.
    #[serde(default)]
    pub prompts_file: Option<PathBuf>,
    #[serde(default)]
    pub priorities: Option<PriorityTable>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl SettingsFile {
    pub fn from_yaml_str(text: &str) -> Result<Self, DocExtractError> {
        serde_yaml::from_str(text).map_err(|e| DocExtractError::InvalidConfig(format!("settings: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self, DocExtractError> {
        let text = std::fs::read_to_string(path).map_err(|e| DocExtractError::ConfigFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let mut settings = Self::from_yaml_str(&text).map_err(|e| DocExtractError::ConfigFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        Ok(settings)
    }

    fn plan(section: &WindowSettings, fallback: &PagePlan) -> Result<PagePlan, DocExtractError> {
        let overlap = section.overlap.unwrap_or_else(|| fallback.layout.overlap());
        let layout = match &section.mode {
            Some(mode) => WindowLayout::from_name(mode, overlap)?,
            None => fallback.layout.with_overlap(overlap),
        };
        let mut plan = PagePlan::new(layout);
        plan.selected_windows = section.selected_windows.clone();
        Ok(plan)
    }

    /// Apply every set value onto `builder`. Unset values keep the
    /// builder's current value.
    pub fn apply(self, mut builder: ExtractionConfigBuilder) -> Result<ExtractionConfigBuilder, DocExtractError> {
        if let Some(kind) = self.document_kind {
            builder = builder.kind(kind);
        }

        let global = Self::plan(&self.window, &builder.config.plan)?;
        builder.config.plan = global.clone();
        for (page_num, section) in &self.pages {
            builder = builder.page_override(*page_num, Self::plan(section, &global)?);
        }

        let image = self.image;
        if let Some(steps) = image.resolution_steps {
            builder = builder.resolution_steps(steps);
        }
        if image.enhance == Some(false) {
            builder = builder.enhance(None);
        } else if image.contrast.is_some() || image.brightness.is_some() || image.sharpen.is_some() {
            let mut enhance = builder.config.enhance.unwrap_or_default();
            enhance.contrast = image.contrast.unwrap_or(enhance.contrast);
            enhance.brightness = image.brightness.unwrap_or(enhance.brightness);
            enhance.sharpen = image.sharpen.unwrap_or(enhance.sharpen);
            builder = builder.enhance(Some(enhance));
        } else if image.enhance == Some(true) && builder.config.enhance.is_none() {
            builder = builder.enhance(Some(EnhanceSettings::default()));
        }
        if let Some(encoding) = image.encoding {
            builder = builder.image_encoding(encoding);
        }
        if let Some(dpi) = image.dpi {
            builder = builder.dpi(dpi);
        }

        if let Some(g) = self.text_generation {
            builder = builder
                .max_new_tokens(g.max_new_tokens)
                .temperature(g.temperature)
                .top_p(g.top_p)
                .num_beams(g.num_beams);
        }
        if let Some(t) = self.timeout {
            builder = builder.timeouts(t);
        }

        if let Some(kind) = self.backend.kind {
            builder = builder.backend_kind(kind);
        }
        if let Some(url) = self.backend.url {
            builder = builder.container_url(url);
        }
        if let Some(provider) = self.backend.provider {
            builder = builder.provider_name(provider);
        }
        if let Some(model) = self.backend.model {
            builder = builder.model(model);
        }

        if let Some(path) = self.prompts_file {
            let path = match (&self.base_dir, path.is_relative()) {
                (Some(dir), true) => dir.join(path),
                _ => path,
            };
            builder = builder.prompts(PromptCatalog::from_file(&path)?);
        }
        if let Some(table) = self.priorities {
            builder = builder.priorities(table);
        }

        Ok(builder)
    }
}
