//! Result types returned by the extraction entry points.
//!
//! [`DocumentFields`] is the document-level JSON answer (one per page);
//! [`PageOutcome`] wraps it with the per-window attempt log and diagnostics;
//! [`ExtractionOutput`] collects every page plus run statistics.

use crate::error::PageError;
use crate::fields::{
    DocumentKind, EMPLOYEE_NAME, GROSS_AMOUNT, LIVING_SPACE, NET_AMOUNT, PURCHASE_PRICE,
};
use crate::pipeline::extract::WindowOutcome;
use crate::pipeline::reconcile::ReconciledFields;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Amounts above this are flagged as implausible for a monthly payslip.
pub const MAX_PLAUSIBLE_AMOUNT: f64 = 50_000.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub gross: String,
    pub net: String,
}

/// Reconciled payslip fields.
///
/// ```json
/// {
///   "employee": {"name": "Anna Schmidt"},
///   "payment": {"gross": "3450.00", "net": "2210.50"},
///   "raw_output": "[top]\n{...}",
///   "processed_windows": ["top", "bottom"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalResult {
    pub employee: Employee,
    pub payment: Payment,
    pub raw_output: String,
    pub processed_windows: Vec<String>,
}

/// Reconciled property-listing fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyResult {
    pub living_space: String,
    pub purchase_price: String,
    pub raw_output: String,
    pub processed_windows: Vec<String>,
}

/// The result for one page, shaped by document kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentFields {
    Payslip(CanonicalResult),
    Property(PropertyResult),
}

impl DocumentFields {
    /// Assemble the result from reconciled values and the accepted raw texts.
    pub fn from_reconciled(kind: DocumentKind, reconciled: &ReconciledFields, raw_output: String) -> Self {
        let processed_windows = reconciled.processed_windows.clone();
        match kind {
            DocumentKind::Payslip => DocumentFields::Payslip(CanonicalResult {
                employee: Employee {
                    name: reconciled.get(EMPLOYEE_NAME).to_string(),
                },
                payment: Payment {
                    gross: reconciled.get(GROSS_AMOUNT).to_string(),
                    net: reconciled.get(NET_AMOUNT).to_string(),
                },
                raw_output,
                processed_windows,
            }),
            DocumentKind::Property => DocumentFields::Property(PropertyResult {
                living_space: reconciled.get(LIVING_SPACE).to_string(),
                purchase_price: reconciled.get(PURCHASE_PRICE).to_string(),
                raw_output,
                processed_windows,
            }),
        }
    }

    /// Every field at its default; used for pages that could not be rendered.
    pub fn defaults(kind: DocumentKind) -> Self {
        let field = |name: &str| {
            kind.field(name)
                .map(|f| f.default.to_string())
                .unwrap_or_default()
        };
        match kind {
            DocumentKind::Payslip => DocumentFields::Payslip(CanonicalResult {
                employee: Employee {
                    name: field(EMPLOYEE_NAME),
                },
                payment: Payment {
                    gross: field(GROSS_AMOUNT),
                    net: field(NET_AMOUNT),
                },
                raw_output: String::new(),
                processed_windows: Vec::new(),
            }),
            DocumentKind::Property => DocumentFields::Property(PropertyResult {
                living_space: field(LIVING_SPACE),
                purchase_price: field(PURCHASE_PRICE),
                raw_output: String::new(),
                processed_windows: Vec::new(),
            }),
        }
    }

    pub fn processed_windows(&self) -> &[String] {
        match self {
            DocumentFields::Payslip(r) => &r.processed_windows,
            DocumentFields::Property(r) => &r.processed_windows,
        }
    }

    pub fn raw_output(&self) -> &str {
        match self {
            DocumentFields::Payslip(r) => &r.raw_output,
            DocumentFields::Property(r) => &r.raw_output,
        }
    }

    /// Plausibility warnings for payslip amounts. Informational only: the
    /// values are returned unchanged.
    ///
    /// Amounts still at `"0"` were not found and are not checked.
    pub fn consistency_warnings(&self) -> Vec<String> {
        let DocumentFields::Payslip(r) = self else {
            return Vec::new();
        };
        let amount = |s: &str| s.parse::<f64>().ok().filter(|v| *v != 0.0);
        let gross = amount(&r.payment.gross);
        let net = amount(&r.payment.net);

        let mut warnings = Vec::new();
        for (label, value) in [("gross", gross), ("net", net)] {
            if let Some(v) = value {
                if v < 0.0 || v > MAX_PLAUSIBLE_AMOUNT {
                    warnings.push(format!(
                        "{label} amount {v:.2} is outside the plausible range (0, {MAX_PLAUSIBLE_AMOUNT:.0}]"
                    ));
                }
            }
        }
        if let (Some(g), Some(n)) = (gross, net) {
            if n > g {
                warnings.push(format!("net amount {n:.2} exceeds gross amount {g:.2}"));
            }
        }
        warnings
    }
}

/// Outcome for one selected page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Layout the page was split with.
    pub layout: String,
    pub fields: DocumentFields,
    /// Field name → window the value came from. Absent for defaulted fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, String>,
    /// Per-window attempt log, in processing order.
    #[serde(default)]
    pub windows: Vec<WindowOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Set when the page could not be rendered; `fields` then holds defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
    pub duration_ms: u64,
}

impl PageOutcome {
    /// Model calls made for this page.
    pub fn model_calls(&self) -> usize {
        self.windows.iter().map(|w| w.attempts.len()).sum()
    }

    pub fn failed_windows(&self) -> impl Iterator<Item = &WindowOutcome> + '_ {
        self.windows.iter().filter(|w| w.extraction_failed())
    }
}

/// Statistics for one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages in the document (1 for a raster image).
    pub total_pages: usize,
    /// Pages selected for extraction.
    pub selected_pages: usize,
    /// Pages rendered and run through the windows.
    pub processed_pages: usize,
    /// Pages that failed to render.
    pub failed_pages: usize,
    pub windows_processed: usize,
    pub windows_failed: usize,
    pub model_calls: usize,
    pub total_duration_ms: u64,
}

impl ExtractionStats {
    /// Fold one page outcome into the counters (durations excluded).
    pub fn record(&mut self, page: &PageOutcome) {
        if page.error.is_some() {
            self.failed_pages += 1;
        } else {
            self.processed_pages += 1;
        }
        self.windows_processed += page.windows.len() - page.failed_windows().count();
        self.windows_failed += page.failed_windows().count();
        self.model_calls += page.model_calls();
    }
}

/// Complete output of an eager extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub kind: DocumentKind,
    pub pages: Vec<PageOutcome>,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// The document-level answer: the first page where any window produced
    /// a record, else the first page.
    pub fn document(&self) -> Option<&DocumentFields> {
        self.pages
            .iter()
            .find(|p| !p.fields.processed_windows().is_empty())
            .or_else(|| self.pages.first())
            .map(|p| &p.fields)
    }

    /// Warnings of every page, prefixed with the page number.
    pub fn warnings(&self) -> Vec<String> {
        self.pages
            .iter()
            .flat_map(|p| p.warnings.iter().map(move |w| format!("page {}: {w}", p.page_num)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payslip(gross: &str, net: &str) -> DocumentFields {
        DocumentFields::Payslip(CanonicalResult {
            employee: Employee { name: "Anna".into() },
            payment: Payment {
                gross: gross.into(),
                net: net.into(),
            },
            raw_output: String::new(),
            processed_windows: vec!["bottom".into()],
        })
    }

    #[test]
    fn payslip_serialises_to_document_schema() {
        let json = serde_json::to_value(payslip("3450.00", "2210.50")).unwrap();
        assert_eq!(json["employee"]["name"], "Anna");
        assert_eq!(json["payment"]["gross"], "3450.00");
        assert_eq!(json["payment"]["net"], "2210.50");
        assert_eq!(json["processed_windows"][0], "bottom");
        assert!(json.get("raw_output").is_some());
    }

    #[test]
    fn defaults_use_field_sentinels() {
        match DocumentFields::defaults(DocumentKind::Payslip) {
            DocumentFields::Payslip(r) => {
                assert_eq!(r.employee.name, "unknown");
                assert_eq!(r.payment.gross, "0");
            }
            other => panic!("unexpected {other:?}"),
        }
        match DocumentFields::defaults(DocumentKind::Property) {
            DocumentFields::Property(r) => assert_eq!(r.living_space, "nicht gefunden"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn consistency_warnings() {
        assert!(payslip("3450.00", "2210.50").consistency_warnings().is_empty());
        assert!(payslip("0", "0").consistency_warnings().is_empty());

        let w = payslip("2000.00", "2500.00").consistency_warnings();
        assert_eq!(w.len(), 1);
        assert!(w[0].contains("exceeds"));

        let w = payslip("75000.00", "0").consistency_warnings();
        assert_eq!(w.len(), 1);
        assert!(w[0].contains("plausible range"));
    }

    #[test]
    fn document_prefers_page_with_records() {
        let page = |n: usize, fields: DocumentFields| PageOutcome {
            page_num: n,
            layout: "vertical".into(),
            fields,
            sources: BTreeMap::new(),
            windows: Vec::new(),
            warnings: Vec::new(),
            error: None,
            duration_ms: 0,
        };
        let out = ExtractionOutput {
            kind: DocumentKind::Payslip,
            pages: vec![
                page(1, DocumentFields::defaults(DocumentKind::Payslip)),
                page(2, payslip("1.00", "1.00")),
            ],
            stats: ExtractionStats::default(),
        };
        assert_eq!(out.document().unwrap().processed_windows(), ["bottom".to_string()]);
    }
}
