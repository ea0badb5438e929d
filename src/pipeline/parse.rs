//! Response parser: free-form model text → field record.
//!
//! Models are asked for `{"found_in_<window>": {...}}` and mostly comply,
//! but they also wrap it in prose or code fences, leave trailing commas,
//! emit bare numeric ids, or stop mid-object when they hit the token limit.
//! Three tiers, tried in order, each usable on its own:
//!
//! 1. [`parse_strict`]: the first balanced `{...}` block, parsed verbatim.
//! 2. [`parse_tolerant`]: the outermost brace span after two textual
//!    repairs (trailing commas, unquoted numeric `id`).
//! 3. [`parse_regex`]: one `"field": value` pattern per expected field over
//!    the raw text.
//!
//! A tier only counts when it recovers at least one expected field. The
//! parser never fails: when all tiers come up empty the record holds every
//! field's default and [`ParsedRecord::tier`] is `None`.

use crate::fields::FieldSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Which parser tier produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseTier {
    Strict,
    Tolerant,
    Regex,
}

/// Field values recovered from one model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRecord {
    /// `None` when nothing was recovered.
    pub tier: Option<ParseTier>,
    /// One entry per expected field; missing fields hold their default.
    pub fields: BTreeMap<String, String>,
}

impl ParsedRecord {
    fn defaults(expected: &[FieldSpec]) -> Self {
        Self {
            tier: None,
            fields: expected
                .iter()
                .map(|f| (f.name.to_string(), f.default.to_string()))
                .collect(),
        }
    }

    pub fn is_recovered(&self) -> bool {
        self.tier.is_some()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));
static BARE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"("id"\s*:\s*)(-?\d+)(\s*[,}])"#).expect("valid regex"));

/// Parse `raw` into a record for `expected`. Total: never panics, never errors.
pub fn parse(raw: &str, expected: &[FieldSpec]) -> ParsedRecord {
    parse_strict(raw, expected)
        .or_else(|| parse_tolerant(raw, expected))
        .or_else(|| parse_regex(raw, expected))
        .unwrap_or_else(|| ParsedRecord::defaults(expected))
}

/// Tier 1: first balanced object, verbatim.
pub fn parse_strict(raw: &str, expected: &[FieldSpec]) -> Option<ParsedRecord> {
    let block = first_balanced_object(raw)?;
    let value: Value = serde_json::from_str(block).ok()?;
    record_from_value(&value, expected, ParseTier::Strict)
}

/// Tier 2: repaired outermost span.
pub fn parse_tolerant(raw: &str, expected: &[FieldSpec]) -> Option<ParsedRecord> {
    let start = raw.find('{')?;
    let end = raw.rfind('}').filter(|&e| e > start).map_or(raw.len(), |e| e + 1);
    let repaired = repair(&raw[start..end]);
    let value: Value = serde_json::from_str(&repaired).ok()?;
    record_from_value(&value, expected, ParseTier::Tolerant)
}

/// Tier 3: per-field patterns over the raw text.
pub fn parse_regex(raw: &str, expected: &[FieldSpec]) -> Option<ParsedRecord> {
    let mut record = ParsedRecord::defaults(expected);
    let mut found = 0usize;

    for field in expected {
        let pattern = format!(
            r#""{}"\s*:\s*(?:"((?:[^"\\]|\\.)*)"|([^,}}\s\]]+))"#,
            regex::escape(field.name)
        );
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        let Some(caps) = re.captures(raw) else {
            continue;
        };
        let value = if let Some(quoted) = caps.get(1) {
            unescape(quoted.as_str())
        } else if let Some(bare) = caps.get(2) {
            match bare.as_str() {
                "null" => continue,
                other => other.to_string(),
            }
        } else {
            continue;
        };
        record.fields.insert(field.name.to_string(), value);
        found += 1;
    }

    (found > 0).then(|| ParsedRecord {
        tier: Some(ParseTier::Regex),
        ..record
    })
}

/// Apply the two textual repairs.
pub(crate) fn repair(text: &str) -> String {
    let without_trailing = TRAILING_COMMA.replace_all(text, "$1");
    BARE_ID.replace_all(&without_trailing, r#"$1"$2"$3"#).into_owned()
}

/// First `{...}` span whose braces balance, skipping braces inside strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn record_from_value(value: &Value, expected: &[FieldSpec], tier: ParseTier) -> Option<ParsedRecord> {
    let object = unwrap_found_in(value.as_object()?);
    let mut record = ParsedRecord::defaults(expected);
    let mut found = 0usize;

    for field in expected {
        let Some(v) = object.get(field.name) else {
            continue;
        };
        let text = match v {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        record.fields.insert(field.name.to_string(), text);
        found += 1;
    }

    (found > 0).then(|| ParsedRecord {
        tier: Some(tier),
        ..record
    })
}

/// `{"found_in_top": {...}}` → the inner object.
fn unwrap_found_in(object: &Map<String, Value>) -> &Map<String, Value> {
    object
        .iter()
        .find(|(k, v)| k.starts_with("found_in_") && v.is_object())
        .and_then(|(_, v)| v.as_object())
        .unwrap_or(object)
}

fn unescape(s: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{s}\"")).unwrap_or_else(|_| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{DocumentKind, EMPLOYEE_NAME, GROSS_AMOUNT, NET_AMOUNT};

    const ID_NAME: [FieldSpec; 2] = [FieldSpec::text("id", "unknown"), FieldSpec::text("name", "unknown")];

    fn payslip() -> &'static [FieldSpec] {
        DocumentKind::Payslip.fields()
    }

    #[test]
    fn strict_unwraps_found_in_and_ignores_prose() {
        let raw = "Here you go:\n```json\n{\"found_in_top\": {\"employee_name\": \"Anna Schmidt\", \"gross_amount\": \"3.450,00\", \"net_amount\": 0}}\n```";
        let rec = parse(raw, payslip());
        assert_eq!(rec.tier, Some(ParseTier::Strict));
        assert_eq!(rec.get(EMPLOYEE_NAME), Some("Anna Schmidt"));
        assert_eq!(rec.get(GROSS_AMOUNT), Some("3.450,00"));
        assert_eq!(rec.get(NET_AMOUNT), Some("0"));
    }

    #[test]
    fn strict_handles_braces_inside_strings() {
        let raw = r#"{"found_in_whole": {"employee_name": "A {weird} name"}}"#;
        let rec = parse_strict(raw, payslip()).expect("strict should succeed");
        assert_eq!(rec.get(EMPLOYEE_NAME), Some("A {weird} name"));
    }

    #[test]
    fn tolerant_repairs_trailing_comma_and_bare_id() {
        let raw = r#"{"id": 12345, "name": "X",}"#;
        assert!(parse_strict(raw, &ID_NAME).is_none());
        let rec = parse_tolerant(raw, &ID_NAME).expect("tolerant should succeed");
        assert_eq!(rec.tier, Some(ParseTier::Tolerant));
        assert_eq!(rec.get("id"), Some("12345"));
        assert_eq!(rec.get("name"), Some("X"));
    }

    #[test]
    fn truncated_object_falls_through_to_regex() {
        let raw = r#"{"id": 12345, "name": "X""#;
        let rec = parse(raw, &ID_NAME);
        assert_eq!(rec.tier, Some(ParseTier::Regex));
        assert_eq!(rec.get("id"), Some("12345"));
        assert_eq!(rec.get("name"), Some("X"));
    }

    #[test]
    fn regex_fills_missing_fields_with_defaults() {
        let raw = r#"found_in_bottom: { "gross_amount": "1234,00", "net_amount": 987,50 ... "#;
        let rec = parse(raw, payslip());
        assert_eq!(rec.tier, Some(ParseTier::Regex));
        assert_eq!(rec.get(EMPLOYEE_NAME), Some("unknown"));
        assert_eq!(rec.get(GROSS_AMOUNT), Some("1234,00"));
        // a bare value stops at the first comma
        assert_eq!(rec.get(NET_AMOUNT), Some("987"));
    }

    #[test]
    fn garbage_yields_defaults_without_tier() {
        for raw in ["", "I cannot read this image.", "{{{{", "}{", "\"\\", "{\"employee_name\": null}"] {
            let rec = parse(raw, payslip());
            assert_eq!(rec.tier, None, "input: {raw:?}");
            assert_eq!(rec.get(EMPLOYEE_NAME), Some("unknown"));
            assert_eq!(rec.get(GROSS_AMOUNT), Some("0"));
        }
    }

    #[test]
    fn object_without_expected_fields_is_not_a_record() {
        let rec = parse(r#"{"page": 1, "note": "blank"}"#, payslip());
        assert!(!rec.is_recovered());
    }

    #[test]
    fn repair_only_quotes_id_key() {
        assert_eq!(repair(r#"{"id": 7, "x": 8,}"#), r#"{"id": "7", "x": 8}"#);
        assert_eq!(repair("[1, 2, ]"), "[1, 2]");
    }
}
