//! Progress-callback trait for extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to follow a
//! document through its pages, windows and resolution attempts.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events wherever they like (a terminal progress bar,
//! a channel, a job table) without the library knowing how the host
//! application communicates. Extraction is sequential, so events always
//! arrive in order from a single task.
//!
//! # Example
//!
//! ```rust
//! use edgequake_docextract::{ExtractionConfig, ExtractionProgressCallback, FailureKind};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailureCounter {
//!     failures: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for FailureCounter {
//!     fn on_attempt_failed(&self, page: usize, window: &str, resolution: u32, kind: FailureKind, _detail: &str) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page} {window}@{resolution}px failed: {kind:?}");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(FailureCounter { failures: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::inference::FailureKind;
use std::sync::Arc;

/// Called by the pipeline as it works through a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first page is rendered.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before a page is split into windows.
    ///
    /// # Arguments
    /// * `page_num`    - 1-indexed page number
    /// * `total_pages` - number of selected pages
    /// * `windows`     - number of windows that will be processed
    fn on_page_start(&self, page_num: usize, total_pages: usize, windows: usize) {
        let _ = (page_num, total_pages, windows);
    }

    /// Called when one resolution attempt for a window fails. The ladder
    /// moves on to the next size afterwards (if any).
    fn on_attempt_failed(&self, page_num: usize, window: &str, resolution: u32, kind: FailureKind, detail: &str) {
        let _ = (page_num, window, resolution, kind, detail);
    }

    /// Called when a window is done, either with a record (`accepted` holds
    /// the resolution that produced it) or with every step exhausted.
    fn on_window_complete(&self, page_num: usize, window: &str, accepted: Option<u32>) {
        let _ = (page_num, window, accepted);
    }

    /// Called when a page has been reconciled.
    ///
    /// # Arguments
    /// * `processed_windows` - windows that contributed a record
    fn on_page_complete(&self, page_num: usize, total_pages: usize, processed_windows: usize) {
        let _ = (page_num, total_pages, processed_windows);
    }

    /// Called when a page could not be rendered.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all pages have been attempted.
    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        pages: AtomicUsize,
        failures: Mutex<Vec<(String, u32, FailureKind)>>,
        accepted: Mutex<Vec<Option<u32>>>,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_page_start(&self, _page_num: usize, _total_pages: usize, _windows: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_attempt_failed(&self, _page: usize, window: &str, resolution: u32, kind: FailureKind, _detail: &str) {
            self.failures.lock().unwrap().push((window.to_string(), resolution, kind));
        }

        fn on_window_complete(&self, _page_num: usize, _window: &str, accepted: Option<u32>) {
            self.accepted.lock().unwrap().push(accepted);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_extraction_start(2);
        cb.on_page_start(1, 2, 2);
        cb.on_attempt_failed(1, "top", 1500, FailureKind::OutOfMemory, "CUDA out of memory");
        cb.on_window_complete(1, "top", Some(1200));
        cb.on_page_complete(1, 2, 1);
        cb.on_page_error(2, 2, "render failed");
        cb.on_extraction_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_page_start(1, 1, 2);
        tracker.on_attempt_failed(1, "bottom", 1500, FailureKind::Timeout, "");
        tracker.on_window_complete(1, "top", None);
        tracker.on_window_complete(1, "bottom", Some(1200));

        assert_eq!(tracker.pages.load(Ordering::SeqCst), 1);
        assert_eq!(
            *tracker.failures.lock().unwrap(),
            vec![("bottom".to_string(), 1500, FailureKind::Timeout)]
        );
        assert_eq!(*tracker.accepted.lock().unwrap(), vec![None, Some(1200)]);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_extraction_start(10);
        cb.on_page_start(1, 10, 4);
    }
}
