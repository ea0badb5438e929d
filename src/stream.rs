//! Streaming extraction API: emit pages as they are reconciled.
//!
//! ## Why stream?
//!
//! A CPU-only model can spend many minutes on one page. A stream lets
//! callers show each page's fields as soon as they exist instead of waiting
//! for the whole document.
//!
//! Unlike the eager [`crate::extract::extract`] which returns only after all
//! pages finish, [`extract_stream`] yields one [`PageOutcome`] per selected
//! page. Pages are still processed strictly one after another, so they
//! arrive in page order.
//!
//! The backend's memory is released after the last page. Dropping the
//! stream early skips that cleanup; call
//! [`crate::pipeline::inference::InferenceBackend::release_memory`] yourself
//! in that case.

use crate::config::ExtractionConfig;
use crate::error::DocExtractError;
use crate::extract::DocumentSession;
use crate::output::PageOutcome;
use futures::stream;
use std::path::Path;
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::{info, warn};

/// A boxed stream of page outcomes.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<PageOutcome, DocExtractError>> + Send>>;

/// Extract fields, streaming one outcome per page in page order.
///
/// # Returns
/// - `Ok(PageStream)`: a stream of `Result<PageOutcome, DocExtractError>`.
///   Pages that fail to render arrive as `Ok` with `error` set; an `Err`
///   item ends the stream.
/// - `Err(DocExtractError)`: fatal error before the first page (file not
///   found, not a PDF, backend not configured, ...).
///
/// # Example
/// ```rust,no_run
/// use edgequake_docextract::{extract_stream, ExtractionConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::default();
/// let mut pages = extract_stream("payslip.pdf", &config).await?;
/// while let Some(page) = pages.next().await {
///     let page = page?;
///     println!("page {}: {:?}", page.page_num, page.fields.processed_windows());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_stream(
    input_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<PageStream, DocExtractError> {
    info!("Starting streaming extraction: {}", input_path.as_ref().display());

    let session = DocumentSession::open(input_path, config).await?;
    let total = session.requests().len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(total);
    }

    struct State {
        session: DocumentSession,
        config: ExtractionConfig,
        next: usize,
        succeeded: usize,
        done: bool,
    }

    let state = State {
        session,
        config: config.clone(),
        next: 0,
        succeeded: 0,
        done: false,
    };

    let s = stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        let item = match st.session.requests().get(st.next).cloned() {
            Some(request) => {
                st.next += 1;
                let result = st.session.process(&request, &st.config).await;
                match &result {
                    Ok(page) if page.error.is_none() => st.succeeded += 1,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Streaming extraction aborted: {}", e);
                        st.done = true;
                    }
                }
                Some(result)
            }
            None => None,
        };

        if item.is_none() || st.done {
            st.done = true;
            st.session.release().await;
            if let Some(ref cb) = st.config.progress_callback {
                cb.on_extraction_complete(st.session.requests().len(), st.succeeded);
            }
        }

        item.map(|result| (result, st))
    });

    Ok(Box::pin(s))
}
