//! Document kinds and the fields extracted from each.
//!
//! Every field carries its sentinel default: the value the model is told to
//! emit when it cannot find the field, and the value the result falls back
//! to when no window supplies a real one.

use crate::error::DocExtractError;
use serde::{Deserialize, Serialize};

/// How a field's value is interpreted during recovery and reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text, e.g. a person's name.
    Text,
    /// A monetary amount, normalised to a canonical decimal string.
    Amount,
}

/// One field the model is asked to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Sentinel meaning "not found".
    pub default: &'static str,
}

impl FieldSpec {
    pub const fn text(name: &'static str, default: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
            default,
        }
    }

    pub const fn amount(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Amount,
            default: "0",
        }
    }
}

pub const EMPLOYEE_NAME: &str = "employee_name";
pub const GROSS_AMOUNT: &str = "gross_amount";
pub const NET_AMOUNT: &str = "net_amount";
pub const LIVING_SPACE: &str = "living_space";
pub const PURCHASE_PRICE: &str = "purchase_price";

/// Sentinel used by the German listing prompts.
pub const NOT_FOUND_DE: &str = "nicht gefunden";

static PAYSLIP_FIELDS: [FieldSpec; 3] = [
    FieldSpec::text(EMPLOYEE_NAME, "unknown"),
    FieldSpec::amount(GROSS_AMOUNT),
    FieldSpec::amount(NET_AMOUNT),
];

static PROPERTY_FIELDS: [FieldSpec; 2] = [
    FieldSpec::text(LIVING_SPACE, NOT_FOUND_DE),
    FieldSpec::text(PURCHASE_PRICE, NOT_FOUND_DE),
];

/// The document template being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// German payslip: employee name, gross and net pay. (default)
    #[default]
    Payslip,
    /// Real-estate listing: living space and purchase price.
    Property,
}

impl DocumentKind {
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            DocumentKind::Payslip => &PAYSLIP_FIELDS,
            DocumentKind::Property => &PROPERTY_FIELDS,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DocumentKind::Payslip => "payslip",
            DocumentKind::Property => "property",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, DocExtractError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "payslip" => Ok(DocumentKind::Payslip),
            "property" => Ok(DocumentKind::Property),
            other => Err(DocExtractError::InvalidConfig(format!(
                "unknown document kind '{other}' (expected payslip or property)"
            ))),
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }
}
