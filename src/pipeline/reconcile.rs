//! Field reconciliation: per-window records → one value per field.
//!
//! Windows overlap, so the same field is often reported more than once, and
//! often inconsistently: the header of a payslip lives in the top half, the
//! totals in the bottom half, and a model looking at the wrong half tends to
//! hallucinate or answer with the sentinel. A [`PriorityTable`] says which
//! window to trust first for each field; sentinels never win.

use crate::fields::{DocumentKind, FieldKind, FieldSpec, EMPLOYEE_NAME, GROSS_AMOUNT, NET_AMOUNT, NOT_FOUND_DE};
use crate::pipeline::parse::ParsedRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One value one window proposed for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub field_name: String,
    pub value: String,
    pub source_window: String,
}

/// Per-field window preference.
///
/// Each entry is an ordered list of window-name parts; a window matches a
/// part when one of its `_`-separated components equals it, so `"top"`
/// matches `top`, `top_left` and `top_right`. Windows matching no listed
/// part are still used, after all listed ones, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityTable {
    rules: BTreeMap<String, Vec<String>>,
}

impl PriorityTable {
    /// No preferences: first non-sentinel value in processing order.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Name from the top, amounts from the bottom.
    pub fn payslip() -> Self {
        Self::empty()
            .with_rule(EMPLOYEE_NAME, ["top", "bottom"])
            .with_rule(GROSS_AMOUNT, ["bottom", "top"])
            .with_rule(NET_AMOUNT, ["bottom", "top"])
    }

    pub fn for_kind(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Payslip => Self::payslip(),
            DocumentKind::Property => Self::empty(),
        }
    }

    pub fn with_rule<I, S>(mut self, field: &str, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules
            .insert(field.to_string(), order.into_iter().map(Into::into).collect());
        self
    }

    pub fn order(&self, field: &str) -> &[String] {
        self.rules.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn window_matches(window: &str, part: &str) -> bool {
    window == part || window.split('_').any(|p| p == part)
}

/// Normalise a locale-formatted amount to a plain decimal string.
///
/// Everything except digits, `,` and `.` is dropped and commas become dots.
/// When several dots remain only the last one is kept as the decimal point:
/// `"1.234,56 €"` → `"1234.56"`. Without a comma, repeated dots are all
/// thousands separators: `"12.345.678"` → `"12345678"`. Unparseable or zero
/// amounts yield `"0"`.
pub fn normalize_amount(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    let had_comma = raw.contains(',');
    let merged = match cleaned.rfind('.') {
        Some(_) if !had_comma && cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        Some(last) if cleaned[..last].contains('.') => {
            let (int_part, frac_part) = cleaned.split_at(last);
            format!("{}{}", int_part.replace('.', ""), frac_part)
        }
        _ => cleaned,
    };

    let merged = merged.trim_end_matches('.');
    match merged.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => {
            let trimmed = merged.trim_start_matches('0');
            if trimmed.starts_with('.') {
                format!("0{trimmed}")
            } else {
                trimmed.to_string()
            }
        }
        _ => "0".to_string(),
    }
}

/// Whether `value` means "not found" for `field`.
pub fn is_sentinel(field: &FieldSpec, value: &str) -> bool {
    let v = value.trim();
    if v.is_empty()
        || v.eq_ignore_ascii_case(field.default)
        || v.eq_ignore_ascii_case("unknown")
        || v.eq_ignore_ascii_case(NOT_FOUND_DE)
        || v == "0"
    {
        return true;
    }
    field.kind == FieldKind::Amount && normalize_amount(v) == "0"
}

/// The reconciled values of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledFields {
    /// Field name → chosen value (or the field's default).
    pub values: BTreeMap<String, String>,
    /// Field name → window the value came from; absent when defaulted.
    pub sources: BTreeMap<String, String>,
    /// Every accepted candidate, in processing order.
    pub candidates: Vec<FieldCandidate>,
    /// Windows that produced a parsed record, in processing order.
    pub processed_windows: Vec<String>,
}

impl ReconciledFields {
    pub fn get(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or_default()
    }
}

/// Merges window records using a [`PriorityTable`].
#[derive(Debug, Clone)]
pub struct FieldReconciler {
    kind: DocumentKind,
    priorities: PriorityTable,
}

impl FieldReconciler {
    pub fn new(kind: DocumentKind, priorities: PriorityTable) -> Self {
        Self { kind, priorities }
    }

    /// `records` are `(window name, record)` pairs in processing order;
    /// windows whose extraction failed are simply absent.
    pub fn reconcile(&self, records: &[(&str, &ParsedRecord)]) -> ReconciledFields {
        let processed_windows: Vec<String> = records
            .iter()
            .filter(|(_, r)| r.is_recovered())
            .map(|(w, _)| w.to_string())
            .collect();

        let candidates: Vec<FieldCandidate> = records
            .iter()
            .filter(|(_, r)| r.is_recovered())
            .flat_map(|(window, record)| {
                self.kind.fields().iter().filter_map(move |field| {
                    let raw = record.get(field.name)?;
                    let value = match field.kind {
                        FieldKind::Amount => normalize_amount(raw),
                        FieldKind::Text => raw.trim().to_string(),
                    };
                    (!is_sentinel(field, &value)).then(|| FieldCandidate {
                        field_name: field.name.to_string(),
                        value,
                        source_window: window.to_string(),
                    })
                })
            })
            .collect();

        let mut values = BTreeMap::new();
        let mut sources = BTreeMap::new();
        for field in self.kind.fields() {
            match self.pick(field.name, &candidates) {
                Some(c) => {
                    values.insert(field.name.to_string(), c.value.clone());
                    sources.insert(field.name.to_string(), c.source_window.clone());
                }
                None => {
                    values.insert(field.name.to_string(), field.default.to_string());
                }
            }
        }

        ReconciledFields {
            values,
            sources,
            candidates,
            processed_windows,
        }
    }

    fn pick<'c>(&self, field: &str, candidates: &'c [FieldCandidate]) -> Option<&'c FieldCandidate> {
        let for_field = || candidates.iter().filter(move |c| c.field_name == field);
        self.priorities
            .order(field)
            .iter()
            .find_map(|part| for_field().find(|c| window_matches(&c.source_window, part)))
            .or_else(|| for_field().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{LIVING_SPACE, PURCHASE_PRICE};
    use crate::pipeline::parse::ParseTier;

    fn record(pairs: &[(&str, &str)]) -> ParsedRecord {
        ParsedRecord {
            tier: Some(ParseTier::Strict),
            fields: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn normalize_amount_examples() {
        assert_eq!(normalize_amount("1.234,56"), "1234.56");
        assert_eq!(normalize_amount("0"), "0");
        assert_eq!(normalize_amount("unknown"), "0");
        assert_eq!(normalize_amount("3.450,00 €"), "3450.00");
        assert_eq!(normalize_amount("1234,00"), "1234.00");
        assert_eq!(normalize_amount("0,50"), "0.50");
        assert_eq!(normalize_amount("0,00"), "0");
        assert_eq!(normalize_amount("12.345.678"), "12345678");
        assert_eq!(normalize_amount("1.234.567,89"), "1234567.89");
        assert_eq!(normalize_amount("EUR 2.500.000"), "2500000");
        assert_eq!(normalize_amount(""), "0");
    }

    #[test]
    fn name_from_top_amounts_from_bottom() {
        let top = record(&[(EMPLOYEE_NAME, "Alice"), (GROSS_AMOUNT, "0"), (NET_AMOUNT, "0")]);
        let bottom = record(&[(EMPLOYEE_NAME, "unknown"), (GROSS_AMOUNT, "1234,00"), (NET_AMOUNT, "0")]);
        let out = FieldReconciler::new(DocumentKind::Payslip, PriorityTable::payslip())
            .reconcile(&[("top", &top), ("bottom", &bottom)]);

        assert_eq!(out.get(EMPLOYEE_NAME), "Alice");
        assert_eq!(out.get(GROSS_AMOUNT), "1234.00");
        assert_eq!(out.get(NET_AMOUNT), "0");
        assert_eq!(out.sources.get(GROSS_AMOUNT).map(String::as_str), Some("bottom"));
        assert!(!out.sources.contains_key(NET_AMOUNT));
        assert_eq!(out.processed_windows, vec!["top", "bottom"]);
    }

    #[test]
    fn bottom_wins_amount_conflicts() {
        let top = record(&[(GROSS_AMOUNT, "999,00")]);
        let bottom = record(&[(GROSS_AMOUNT, "3.000,00")]);
        let out = FieldReconciler::new(DocumentKind::Payslip, PriorityTable::payslip())
            .reconcile(&[("top", &top), ("bottom", &bottom)]);
        assert_eq!(out.get(GROSS_AMOUNT), "3000.00");
    }

    #[test]
    fn quadrant_windows_match_by_component() {
        let tl = record(&[(EMPLOYEE_NAME, "unknown")]);
        let tr = record(&[(EMPLOYEE_NAME, "Bob")]);
        let bl = record(&[(EMPLOYEE_NAME, "Mallory")]);
        let out = FieldReconciler::new(DocumentKind::Payslip, PriorityTable::payslip())
            .reconcile(&[("bottom_left", &bl), ("top_left", &tl), ("top_right", &tr)]);
        assert_eq!(out.get(EMPLOYEE_NAME), "Bob");
    }

    #[test]
    fn unlisted_windows_fall_back_to_processing_order() {
        let left = record(&[(GROSS_AMOUNT, "10,00")]);
        let right = record(&[(GROSS_AMOUNT, "20,00")]);
        let out = FieldReconciler::new(DocumentKind::Payslip, PriorityTable::payslip())
            .reconcile(&[("left", &left), ("right", &right)]);
        assert_eq!(out.get(GROSS_AMOUNT), "10.00");
    }

    #[test]
    fn priority_is_configurable() {
        let top = record(&[(GROSS_AMOUNT, "1,00")]);
        let bottom = record(&[(GROSS_AMOUNT, "2,00")]);
        let table = PriorityTable::payslip().with_rule(GROSS_AMOUNT, ["top"]);
        let out = FieldReconciler::new(DocumentKind::Payslip, table).reconcile(&[("top", &top), ("bottom", &bottom)]);
        assert_eq!(out.get(GROSS_AMOUNT), "1.00");
    }

    #[test]
    fn property_takes_first_non_sentinel() {
        let a = record(&[(LIVING_SPACE, "nicht gefunden"), (PURCHASE_PRICE, "450.000 €")]);
        let b = record(&[(LIVING_SPACE, "120 m²"), (PURCHASE_PRICE, "460.000 €")]);
        let out = FieldReconciler::new(DocumentKind::Property, PriorityTable::empty())
            .reconcile(&[("top", &a), ("bottom", &b)]);
        assert_eq!(out.get(LIVING_SPACE), "120 m²");
        assert_eq!(out.get(PURCHASE_PRICE), "450.000 €");
    }

    #[test]
    fn unrecovered_records_are_ignored() {
        let empty = ParsedRecord {
            tier: None,
            fields: BTreeMap::from([(EMPLOYEE_NAME.to_string(), "Ghost".to_string())]),
        };
        let out = FieldReconciler::new(DocumentKind::Payslip, PriorityTable::payslip()).reconcile(&[("top", &empty)]);
        assert_eq!(out.get(EMPLOYEE_NAME), "unknown");
        assert!(out.processed_windows.is_empty());
    }
}
