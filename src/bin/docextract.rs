//! CLI binary for edgequake-docextract.
//!
//! A thin shim over the library crate that maps CLI flags (and an optional
//! YAML settings file) to `ExtractionConfig` and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docextract::pipeline::resolution::parse_steps;
use edgequake_docextract::{
    extract, extract_to_file, BackendKind, DocumentFields, DocumentKind, ExtractionConfig,
    ExtractionOutput, ExtractionProgressCallback, FailureKind, PageSelection, ProgressCallback,
    PromptCatalog, SettingsFile,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar counting windows plus one log
/// line per page and per failed attempt.
struct CliProgressCallback {
    bar: ProgressBar,
    page_started: Mutex<HashMap<usize, Instant>>,
    failed_attempts: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_started: Mutex::new(HashMap::new()),
            failed_attempts: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn page_elapsed(&self, page_num: usize) -> f64 {
        self.page_started
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting fields from {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize, windows: usize) {
        if let Ok(mut m) = self.page_started.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}, {windows} window(s)"));
    }

    fn on_attempt_failed(&self, page_num: usize, window: &str, resolution: u32, kind: FailureKind, _detail: &str) {
        self.failed_attempts.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "    {} page {page_num} {window} @ {resolution}px: {}",
            yellow("↓"),
            dim(&format!("{kind:?}")),
        ));
    }

    fn on_window_complete(&self, page_num: usize, window: &str, accepted: Option<u32>) {
        self.bar.set_message(match accepted {
            Some(px) => format!("page {page_num} {window} ✓ {px}px"),
            None => format!("page {page_num} {window} ✗"),
        });
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, processed_windows: usize) {
        let secs = self.page_elapsed(page_num);
        let mark = if processed_windows > 0 { green("✓") } else { yellow("○") };
        self.bar.println(format!(
            "  {mark} Page {page_num:>3}/{total_pages:<3}  {}  {}",
            dim(&format!("{processed_windows} window(s) with data")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let secs = self.page_elapsed(page_num);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {page_num:>3}/{total_pages:<3}  {}  {}",
            red("✗"),
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total_pages.saturating_sub(success_count);
        let retries = self.failed_attempts.load(Ordering::SeqCst);
        let mark = if failed == 0 {
            green("✔")
        } else if failed == total_pages {
            red("✘")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{mark} {}/{total_pages} pages extracted  {}",
            bold(&success_count.to_string()),
            dim(&format!("({retries} fallback attempt(s))")),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Payslip, default vertical split (top/bottom), human-readable output
  docextract payslip.pdf

  # Quadrant split with 15 % overlap, only two windows, JSON to stdout
  docextract --layout quadrant --overlap 0.15 --windows top_left,bottom_right --json scan.jpg

  # Smaller ladder for a small GPU
  docextract --resolutions 1000,800,600 payslip.pdf

  # Property listing, pages 1-3, result written to a file
  docextract --kind property --pages 1-3 expose.pdf -o expose.json

  # Self-hosted model container on CPU
  docextract --backend container --container-url http://localhost:27842 --force-cpu payslip.pdf

  # Everything from a settings file, custom prompts on top
  docextract --config settings.yml --prompts prompts.yml payslip.pdf

LAYOUTS:
  whole        one window
  vertical     top, bottom                      (default, 10 % overlap)
  horizontal   left, right
  quadrant     top_left, top_right, bottom_left, bottom_right

ENVIRONMENT VARIABLES:
  DOCEXTRACT_BACKEND        auto, llm or container
  DOCEXTRACT_CONTAINER_URL  Model container base URL (selects the container backend)
  OPENAI_API_KEY            OpenAI API key (LLM backend)
  EDGEQUAKE_LLM_PROVIDER    Provider for the LLM backend (openai, ollama, ...)
  EDGEQUAKE_MODEL           Model for the LLM backend
  PDFIUM_LIB_PATH           Path to libpdfium (PDF input only)
  RUST_LOG                  Log filter, e.g. edgequake_docextract=debug
"#;

/// Extract payslip and listing fields from scans using windowed VLM calls.
#[derive(Parser, Debug)]
#[command(
    name = "docextract",
    version,
    about = "Extract fields from scanned payslips and property listings with Vision LLMs",
    long_about = "Split each page into overlapping windows, query a vision model per window \
with a resolution-fallback ladder, and reconcile the answers into one result per page. \
Works with a self-hosted model container or any edgequake-llm vision provider.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF, PNG or JPEG file.
    input: PathBuf,

    /// Write the JSON result to this file instead of printing it.
    #[arg(short, long, env = "DOCEXTRACT_OUTPUT")]
    output: Option<PathBuf>,

    /// YAML settings file; flags given on the command line win.
    #[arg(long, env = "DOCEXTRACT_CONFIG")]
    config: Option<PathBuf>,

    /// YAML/JSON prompt overrides: layout → window → prompt.
    #[arg(long, env = "DOCEXTRACT_PROMPTS")]
    prompts: Option<PathBuf>,

    /// Document kind: payslip or property.
    #[arg(long, env = "DOCEXTRACT_KIND")]
    kind: Option<String>,

    /// Window layout: whole, vertical, horizontal, quadrant.
    #[arg(long, env = "DOCEXTRACT_LAYOUT")]
    layout: Option<String>,

    /// Window overlap fraction, clamped to [0, 0.5).
    #[arg(long, env = "DOCEXTRACT_OVERLAP")]
    overlap: Option<f32>,

    /// Comma-separated subset of the layout's windows.
    #[arg(long, env = "DOCEXTRACT_WINDOWS")]
    windows: Option<String>,

    /// Comma-separated long-edge sizes, tried in order.
    #[arg(long, env = "DOCEXTRACT_RESOLUTIONS")]
    resolutions: Option<String>,

    /// Disable contrast/brightness/sharpening of window images.
    #[arg(long)]
    no_enhance: bool,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "DOCEXTRACT_PAGES")]
    pages: Option<String>,

    /// Rendering DPI for PDF pages (72–600).
    #[arg(long, env = "DOCEXTRACT_DPI",
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: Option<u32>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DOCEXTRACT_PASSWORD")]
    password: Option<String>,

    /// Inference backend: auto, llm, container.
    #[arg(long, env = "DOCEXTRACT_BACKEND")]
    backend: Option<String>,

    /// Model container base URL.
    #[arg(long, env = "DOCEXTRACT_CONTAINER_URL")]
    container_url: Option<String>,

    /// LLM provider for the llm backend (openai, ollama, ...).
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID for the llm backend.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Treat the backend as CPU-only (longer deadlines; the container is told to use CPU).
    #[arg(long, env = "DOCEXTRACT_FORCE_CPU")]
    force_cpu: bool,

    /// Max new tokens per model call.
    #[arg(long, env = "DOCEXTRACT_MAX_TOKENS")]
    max_tokens: Option<usize>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "DOCEXTRACT_TEMPERATURE")]
    temperature: Option<f32>,

    /// Print the full JSON output instead of a summary.
    #[arg(long, env = "DOCEXTRACT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCEXTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCEXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCEXTRACT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Run extraction ───────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let stats = extract_to_file(&cli.input, output_path, &config)
            .await
            .context("Extraction failed")?;

        if !cli.quiet {
            eprintln!(
                "{}  {}/{} pages  {} model calls  {}ms  →  {}",
                if stats.failed_pages == 0 { green("✔") } else { cyan("⚠") },
                stats.processed_pages,
                stats.selected_pages,
                stats.model_calls,
                stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else {
        let output = extract(&cli.input, &config)
            .await
            .context("Extraction failed")?;

        if cli.json {
            let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            println!("{json}");
        } else {
            print_summary(&output);
        }

        if !cli.quiet && !show_progress && !cli.json {
            eprintln!(
                "Extracted {}/{} pages, {} model calls in {}ms",
                output.stats.processed_pages,
                output.stats.selected_pages,
                output.stats.model_calls,
                output.stats.total_duration_ms
            );
        }
    }

    Ok(())
}

/// Human-readable per-page fields.
fn print_summary(output: &ExtractionOutput) {
    for page in &output.pages {
        println!("{}", bold(&format!("Page {} ({})", page.page_num, page.layout)));
        if let Some(ref e) = page.error {
            println!("  {}", red(&e.to_string()));
            continue;
        }
        match &page.fields {
            DocumentFields::Payslip(r) => {
                println!("  Name:   {}", r.employee.name);
                println!("  Gross:  {}", r.payment.gross);
                println!("  Net:    {}", r.payment.net);
            }
            DocumentFields::Property(r) => {
                println!("  Living space:    {}", r.living_space);
                println!("  Purchase price:  {}", r.purchase_price);
            }
        }
        println!(
            "  {}",
            dim(&format!("windows with data: {}", page.fields.processed_windows().join(", ")))
        );
        for w in &page.warnings {
            println!("  {} {}", yellow("⚠"), w);
        }
    }
}

/// Map settings file + CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder();

    if let Some(ref path) = cli.config {
        let settings = SettingsFile::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        builder = settings.apply(builder).context("Invalid settings file")?;
    }

    if let Some(ref kind) = cli.kind {
        builder = builder.kind(DocumentKind::from_name(kind)?);
    }
    if let Some(ref layout) = cli.layout {
        builder = builder.layout_by_name(layout, cli.overlap)?;
    } else if let Some(overlap) = cli.overlap {
        builder = builder.overlap(overlap);
    }
    if let Some(ref windows) = cli.windows {
        builder = builder.selected_windows(windows.split(',').map(str::trim).filter(|w| !w.is_empty()));
    }
    if let Some(ref steps) = cli.resolutions {
        builder = builder.resolution_steps(parse_steps(steps)?);
    }
    if cli.no_enhance {
        builder = builder.enhance(None);
    }
    if let Some(ref pages) = cli.pages {
        builder = builder.pages(PageSelection::parse(pages)?);
    }
    if let Some(dpi) = cli.dpi {
        builder = builder.dpi(dpi);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(ref backend) = cli.backend {
        builder = builder.backend_kind(BackendKind::from_name(backend)?);
    }
    if let Some(ref url) = cli.container_url {
        builder = builder.container_url(url.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if cli.force_cpu {
        builder = builder.force_cpu(true);
    }
    if let Some(n) = cli.max_tokens {
        builder = builder.max_new_tokens(n);
    }
    if let Some(t) = cli.temperature {
        builder = builder.temperature(t);
    }
    if let Some(ref path) = cli.prompts {
        let catalog = PromptCatalog::from_file(path)
            .with_context(|| format!("Failed to load prompts from {}", path.display()))?;
        builder = builder.prompts(catalog);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
