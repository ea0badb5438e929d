//! End-to-end tests for edgequake-docextract.
//!
//! Every test drives the public API with a scripted in-memory backend, so
//! no model, network or pdfium library is needed. Inputs are raster images
//! written to a temp directory.
//!
//! The live test at the bottom is gated behind `E2E_ENABLED` and talks to a
//! real backend:
//!   E2E_ENABLED=1 DOCEXTRACT_TEST_FILE=payslip.pdf cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use edgequake_docextract::{
    extract, extract_image, extract_stream, extract_to_file, DocExtractError, DocumentFields,
    DocumentKind, ExtractionConfig, ExtractionProgressCallback, FailureKind, InferenceBackend,
    InferenceFailure, InferenceRequest, TimeoutSettings, WindowLayout,
};
use futures::StreamExt;
use image::{DynamicImage, Rgba, RgbaImage};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

type Reply = Result<String, InferenceFailure>;
type Script = dyn Fn(&str, usize) -> Reply + Send + Sync;

/// Backend that answers from a script keyed by window name and attempt
/// number (0-based), recording every call.
struct ScriptedBackend {
    script: Box<Script>,
    delay: Option<(String, Duration)>,
    attempts: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<(String, u32)>>,
    releases: AtomicUsize,
}

impl ScriptedBackend {
    fn new(script: impl Fn(&str, usize) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            delay: None,
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
        })
    }

    /// Like `new`, but calls for `window` sleep for `delay` first.
    fn slow(
        window: &str,
        delay: Duration,
        script: impl Fn(&str, usize) -> Reply + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            delay: Some((window.to_string(), delay)),
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, window: &str) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter(|(w, _)| w == window)
            .map(|(_, px)| px)
            .collect()
    }
}

/// Window name from the `found_in_<window>` key of the built-in prompts.
fn window_of(prompt: &str) -> String {
    prompt
        .split("found_in_")
        .nth(1)
        .map(|rest| {
            rest.chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &InferenceRequest<'_>) -> Result<String, InferenceFailure> {
        let window = window_of(request.prompt);
        let long_edge = request.image.width.max(request.image.height);
        self.calls.lock().unwrap().push((window.clone(), long_edge));
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(window.clone()).or_insert(0);
            *n += 1;
            *n - 1
        };

        if let Some((slow_window, delay)) = &self.delay {
            if *slow_window == window {
                tokio::time::sleep(*delay).await;
            }
        }
        (self.script)(&window, attempt)
    }

    async fn release_memory(&self) -> Result<(), InferenceFailure> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn payslip_json(window: &str, name: &str, gross: &str, net: &str) -> String {
    format!(
        r#"{{"found_in_{window}": {{"employee_name": "{name}", "gross_amount": "{gross}", "net_amount": "{net}"}}}}"#
    )
}

/// Write a white PNG "scan" and return its path (the dir must outlive it).
fn write_scan(dir: &tempfile::TempDir, width: u32, height: u32) -> PathBuf {
    let path = dir.path().join("scan.png");
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])))
        .save(&path)
        .unwrap();
    path
}

fn config_with(backend: Arc<ScriptedBackend>, steps: Vec<u32>) -> ExtractionConfig {
    ExtractionConfig::builder()
        .backend(backend)
        .resolution_steps(steps)
        .build()
        .unwrap()
}

fn payslip(fields: &DocumentFields) -> &edgequake_docextract::CanonicalResult {
    match fields {
        DocumentFields::Payslip(r) => r,
        other => panic!("expected payslip result, got {other:?}"),
    }
}

// ── Ladder and reconciliation ────────────────────────────────────────────────

#[tokio::test]
async fn test_top_times_out_bottom_recovers_on_second_step() {
    let backend = ScriptedBackend::new(|window, attempt| match (window, attempt) {
        ("top", _) => Err(InferenceFailure::Timeout { elapsed_ms: 10 }),
        ("bottom", 0) => Err(InferenceFailure::from_message("CUDA out of memory. Tried to allocate 2.00 GiB")),
        ("bottom", _) => Ok(payslip_json("bottom", "unknown", "3.450,00", "2.210,50")),
        _ => Err(InferenceFailure::Remote("unexpected window".into())),
    });
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(&dir, 600, 800);
    let config = config_with(backend.clone(), vec![500, 400, 300, 200]);

    let output = extract(&scan, &config).await.unwrap();

    assert_eq!(output.pages.len(), 1);
    let page = &output.pages[0];
    let result = payslip(&page.fields);
    assert_eq!(result.processed_windows, vec!["bottom"]);
    assert_eq!(result.employee.name, "unknown");
    assert_eq!(result.payment.gross, "3450.00");
    assert_eq!(result.payment.net, "2210.50");
    assert!(result.raw_output.starts_with("[bottom]\n"));

    assert_eq!(backend.calls_for("top"), vec![500, 400, 300, 200]);
    assert_eq!(backend.calls_for("bottom"), vec![500, 400]);

    let top = &page.windows[0];
    assert!(top.extraction_failed());
    assert!(top.attempts.iter().all(|a| a.failure_kind == Some(FailureKind::Timeout)));
    let bottom = &page.windows[1];
    assert_eq!(bottom.accepted_resolution, Some(400));
    assert_eq!(bottom.attempts[0].failure_kind, Some(FailureKind::OutOfMemory));

    assert_eq!(output.stats.model_calls, 6);
    assert_eq!(output.stats.windows_failed, 1);
    assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_attempts_never_exceed_ladder_length() {
    let backend = ScriptedBackend::new(|_, _| Ok("Ich kann das Dokument leider nicht lesen.".into()));
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(&dir, 400, 400);
    let config = ExtractionConfig::builder()
        .backend(backend.clone())
        .layout(WindowLayout::Quadrant { overlap: 0.1 })
        .resolution_steps(vec![400, 300, 200])
        .build()
        .unwrap();

    let output = extract(&scan, &config).await.unwrap();

    assert_eq!(backend.calls().len(), 4 * 3);
    let page = &output.pages[0];
    for w in &page.windows {
        assert_eq!(w.attempts.len(), 3);
        assert!(w.attempts.iter().all(|a| a.failure_kind == Some(FailureKind::ParseFailure)));
    }
    let result = payslip(&page.fields);
    assert!(result.processed_windows.is_empty());
    assert_eq!(result.employee.name, "unknown");
    assert_eq!(result.payment.gross, "0");
    assert_eq!(result.payment.net, "0");
}

#[tokio::test]
async fn test_real_deadline_expiry_advances_ladder() {
    let backend = ScriptedBackend::slow("top", Duration::from_secs(5), |window, _| {
        Ok(payslip_json(window, "Alice Beispiel", "0", "0"))
    });
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(&dir, 300, 400);
    let config = ExtractionConfig::builder()
        .backend(backend.clone())
        .resolution_steps(vec![400, 200])
        .timeouts(TimeoutSettings {
            base_secs: 0.05,
            max_secs: 0.2,
            ..TimeoutSettings::default()
        })
        .build()
        .unwrap();

    let output = extract(&scan, &config).await.unwrap();

    let page = &output.pages[0];
    let top = &page.windows[0];
    assert!(top.extraction_failed());
    assert_eq!(top.attempts.len(), 2);
    assert!(top.attempts.iter().all(|a| a.failure_kind == Some(FailureKind::Timeout)));
    assert_eq!(payslip(&page.fields).processed_windows, vec!["bottom"]);
}

#[tokio::test]
async fn test_malformed_json_is_repaired() {
    let backend = ScriptedBackend::new(|window, _| match window {
        "top" => Ok("```json\n{\"found_in_top\": {\"employee_name\": \"Anna Schmidt\", \"gross_amount\": \"0\",}}\n```".into()),
        _ => Ok("Gesamt-Brutto: \"gross_amount\": \"4.100,00\" und \"net_amount\": \"2.650,75\"".into()),
    });
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(&dir, 400, 600);
    let config = config_with(backend, vec![600]);

    let output = extract(&scan, &config).await.unwrap();

    let result = payslip(&output.pages[0].fields);
    assert_eq!(result.employee.name, "Anna Schmidt");
    assert_eq!(result.payment.gross, "4100.00");
    assert_eq!(result.payment.net, "2650.75");
    assert_eq!(result.processed_windows, vec!["top", "bottom"]);
}

#[tokio::test]
async fn test_property_listing_takes_first_found_value() {
    let backend = ScriptedBackend::new(|window, _| match window {
        "left" => Ok(format!(
            r#"{{"found_in_left": {{"living_space": "120 m²", "purchase_price": "nicht gefunden"}}}}"#
        )),
        _ => Ok(format!(
            r#"{{"found_in_right": {{"living_space": "95 m²", "purchase_price": "450.000 €"}}}}"#
        )),
    });
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(&dir, 800, 600);
    let config = ExtractionConfig::builder()
        .kind(DocumentKind::Property)
        .layout(WindowLayout::Horizontal { overlap: 0.1 })
        .backend(backend)
        .resolution_steps(vec![800])
        .build()
        .unwrap();

    let output = extract(&scan, &config).await.unwrap();

    match &output.pages[0].fields {
        DocumentFields::Property(r) => {
            assert_eq!(r.living_space, "120 m²");
            assert_eq!(r.purchase_price, "450.000 €");
            assert_eq!(r.processed_windows, vec!["left", "right"]);
        }
        other => panic!("expected property result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_net_above_gross_is_flagged_but_kept() {
    let backend = ScriptedBackend::new(|window, _| Ok(payslip_json(window, "Bob", "2.000,00", "2.500,00")));
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(&dir, 300, 300);
    let config = ExtractionConfig::builder()
        .backend(backend)
        .layout(WindowLayout::Whole)
        .resolution_steps(vec![300])
        .build()
        .unwrap();

    let output = extract(&scan, &config).await.unwrap();

    let page = &output.pages[0];
    assert_eq!(payslip(&page.fields).payment.net, "2500.00");
    assert_eq!(page.warnings.len(), 1);
    assert_eq!(output.warnings(), vec![format!("page 1: {}", page.warnings[0])]);
}

// ── Entry points ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_extract_image_in_memory() {
    let backend = ScriptedBackend::new(|window, _| Ok(payslip_json(window, "Clara", "1.000,00", "800,00")));
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(200, 200, Rgba([255, 255, 255, 255])));
    let config = config_with(backend.clone(), vec![200]);

    let page = extract_image(&image, &config).await.unwrap();

    assert_eq!(page.page_num, 1);
    assert_eq!(payslip(&page.fields).employee.name, "Clara");
    assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stream_yields_pages_and_releases_memory_once() {
    let backend = ScriptedBackend::new(|window, _| Ok(payslip_json(window, "Dora", "1.500,00", "1.100,00")));
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(&dir, 300, 300);
    let config = config_with(backend.clone(), vec![300]);

    let mut pages = extract_stream(&scan, &config).await.unwrap();
    let mut seen = Vec::new();
    while let Some(page) = pages.next().await {
        seen.push(page.unwrap().page_num);
    }

    assert_eq!(seen, vec![1]);
    assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_extract_to_file_writes_json_atomically() {
    let backend = ScriptedBackend::new(|window, _| Ok(payslip_json(window, "Emil", "3.000,00", "2.000,00")));
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(&dir, 300, 300);
    let out = dir.path().join("results/payslip.json");
    let config = config_with(backend, vec![300]);

    let stats = extract_to_file(&scan, &out, &config).await.unwrap();

    assert_eq!(stats.processed_pages, 1);
    assert!(!out.with_extension("json.tmp").exists());
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(json["pages"][0]["fields"]["employee"]["name"], "Emil");
    assert_eq!(json["pages"][0]["fields"]["payment"]["gross"], "3000.00");
}

#[tokio::test]
async fn test_unsupported_input_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "not a scan").unwrap();
    let config = config_with(ScriptedBackend::new(|_, _| Ok(String::new())), vec![300]);

    assert!(matches!(
        extract(&path, &config).await,
        Err(DocExtractError::UnsupportedInput { .. })
    ));
}

#[tokio::test]
async fn test_page_selection_beyond_image_is_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(&dir, 100, 100);
    let config = ExtractionConfig::builder()
        .backend(ScriptedBackend::new(|_, _| Ok(String::new())))
        .pages(edgequake_docextract::PageSelection::Single(2))
        .build()
        .unwrap();

    assert!(matches!(
        extract(&scan, &config).await,
        Err(DocExtractError::PageOutOfRange { total: 1, .. })
    ));
}

// ── Progress callback ────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl ExtractionProgressCallback for Recorder {
    fn on_extraction_start(&self, total_pages: usize) {
        self.events.lock().unwrap().push(format!("start {total_pages}"));
    }
    fn on_page_start(&self, page_num: usize, _total: usize, windows: usize) {
        self.events.lock().unwrap().push(format!("page {page_num} windows {windows}"));
    }
    fn on_attempt_failed(&self, _page: usize, window: &str, resolution: u32, kind: FailureKind, _detail: &str) {
        self.events.lock().unwrap().push(format!("fail {window}@{resolution} {kind:?}"));
    }
    fn on_window_complete(&self, _page: usize, window: &str, accepted: Option<u32>) {
        self.events.lock().unwrap().push(format!("done {window} {accepted:?}"));
    }
    fn on_page_complete(&self, page_num: usize, _total: usize, processed: usize) {
        self.events.lock().unwrap().push(format!("page {page_num} complete {processed}"));
    }
    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        self.events.lock().unwrap().push(format!("end {success_count}/{total_pages}"));
    }
}

#[tokio::test]
async fn test_progress_events_arrive_in_order() {
    let backend = ScriptedBackend::new(|window, attempt| match (window, attempt) {
        ("top", 0) => Err(InferenceFailure::Remote("502 Bad Gateway".into())),
        _ => Ok(payslip_json(window, "Fritz", "1.000,00", "700,00")),
    });
    let dir = tempfile::tempdir().unwrap();
    let scan = write_scan(&dir, 300, 300);
    let recorder = Arc::new(Recorder::default());
    let config = ExtractionConfig::builder()
        .backend(backend)
        .resolution_steps(vec![300, 200])
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    extract(&scan, &config).await.unwrap();

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "start 1",
            "page 1 windows 2",
            "fail top@300 RemoteError",
            "done top Some(200)",
            "done bottom Some(300)",
            "page 1 complete 2",
            "end 1/1",
        ]
    );
}

// ── Live backend (gated) ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_live_backend_extracts_document() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run live tests");
        return;
    }
    let Ok(file) = std::env::var("DOCEXTRACT_TEST_FILE") else {
        println!("SKIP: set DOCEXTRACT_TEST_FILE to a payslip scan");
        return;
    };

    let output = extract(&file, &ExtractionConfig::default()).await.unwrap();
    let json = serde_json::to_string_pretty(&output).unwrap();
    println!("{json}");
    assert!(!output.pages.is_empty());
}
