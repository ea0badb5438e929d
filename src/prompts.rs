//! Window prompts: (layout, window) → extraction instruction.
//!
//! Centralising prompts serves two purposes:
//!
//! 1. **Single source of truth**: the wording the model sees for every
//!    window lives in one table, loaded once and only read afterwards.
//!
//! 2. **Testability**: unit tests inspect prompts directly without a model,
//!    so a prompt that forgets its `found_in_<window>` wrapper or a field is
//!    caught before it reaches production.
//!
//! Built-in prompts are German (the documents are) and ask for
//! `{"found_in_<window>": {<field>: <value>, ...}}`. Callers can override any
//! subset from a YAML or JSON file:
//!
//! ```yaml
//! vertical:
//!   top: "Du siehst die obere Hälfte ..."
//! quadrant:
//!   bottom_right: "..."
//! ```

use crate::error::DocExtractError;
use crate::fields::{DocumentKind, FieldSpec, EMPLOYEE_NAME, GROSS_AMOUNT, LIVING_SPACE, NET_AMOUNT, PURCHASE_PRICE};
use crate::pipeline::window::WindowLayout;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const ALL_LAYOUTS: [&str; 4] = ["whole", "vertical", "horizontal", "quadrant"];

/// Read-only prompt table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptCatalog {
    layouts: BTreeMap<String, BTreeMap<String, String>>,
}

impl PromptCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in prompts for every window of every layout.
    pub fn builtin(kind: DocumentKind) -> Self {
        let mut catalog = Self::empty();
        for layout_name in ALL_LAYOUTS {
            let Ok(layout) = WindowLayout::from_name(layout_name, 0.0) else {
                continue;
            };
            for &window in layout.window_names() {
                let prompt = match kind {
                    DocumentKind::Payslip => payslip_prompt(window),
                    DocumentKind::Property => property_prompt(window),
                };
                catalog.insert(layout_name, window, prompt);
            }
        }
        catalog
    }

    /// Parse a YAML (or JSON) catalog. Layout and window names are checked.
    pub fn from_yaml_str(text: &str) -> Result<Self, DocExtractError> {
        let layouts: BTreeMap<String, BTreeMap<String, String>> = serde_yaml::from_str(text)
            .map_err(|e| DocExtractError::InvalidConfig(format!("prompt catalog: {e}")))?;

        let mut catalog = Self::empty();
        for (layout_name, windows) in layouts {
            let layout = WindowLayout::from_name(&layout_name, 0.0)?;
            for (window, prompt) in windows {
                let Some(canonical) = layout.window_name(&window) else {
                    return Err(DocExtractError::InvalidConfig(format!(
                        "prompt catalog: window '{window}' does not exist in layout '{layout_name}' \
                         (expected one of {:?})",
                        layout.window_names()
                    )));
                };
                catalog.insert(layout.name(), canonical, prompt);
            }
        }
        Ok(catalog)
    }

    /// Load a catalog file.
    pub fn from_file(path: &Path) -> Result<Self, DocExtractError> {
        let text = std::fs::read_to_string(path).map_err(|e| DocExtractError::ConfigFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let catalog = Self::from_yaml_str(&text).map_err(|e| DocExtractError::ConfigFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        debug!("Loaded {} prompts from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn insert(&mut self, layout: &str, window: &str, prompt: impl Into<String>) {
        self.layouts
            .entry(layout.to_string())
            .or_default()
            .insert(window.to_string(), prompt.into());
    }

    /// Entries of `overrides` replace entries of `self`.
    pub fn overlay(mut self, overrides: PromptCatalog) -> Self {
        for (layout, windows) in overrides.layouts {
            for (window, prompt) in windows {
                self.insert(&layout, &window, prompt);
            }
        }
        self
    }

    pub fn prompt_for(&self, layout: &WindowLayout, window: &str) -> Option<&str> {
        self.layouts
            .get(layout.name())
            .and_then(|w| w.get(window))
            .map(String::as_str)
    }

    /// Like [`prompt_for`](Self::prompt_for) but a missing entry is an error.
    pub fn require(&self, layout: &WindowLayout, window: &str) -> Result<&str, DocExtractError> {
        self.prompt_for(layout, window)
            .ok_or_else(|| DocExtractError::MissingPrompt {
                layout: layout.name().to_string(),
                window: window.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.layouts.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Built-in prompt text ────────────────────────────────────────────────────

fn region(window: &str) -> &'static str {
    match window {
        "top" => "die obere Hälfte",
        "bottom" => "die untere Hälfte",
        "left" => "die linke Hälfte",
        "right" => "die rechte Hälfte",
        "top_left" => "das obere linke Viertel",
        "top_right" => "das obere rechte Viertel",
        "bottom_left" => "das untere linke Viertel",
        "bottom_right" => "das untere rechte Viertel",
        _ => "die gesamte Seite",
    }
}

fn is_upper(window: &str) -> bool {
    window.split('_').any(|p| p == "top")
}

fn is_lower(window: &str) -> bool {
    window.split('_').any(|p| p == "bottom")
}

/// JSON answer template; fields not searched in this window are pinned to
/// their sentinel.
fn answer_template(window: &str, fields: &[FieldSpec], searched: impl Fn(&str) -> bool) -> String {
    let body = fields
        .iter()
        .map(|f| {
            let value = if searched(f.name) {
                format!("<Wert oder '{}'>", f.default)
            } else {
                f.default.to_string()
            };
            format!("    \"{}\": \"{}\"", f.name, value)
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!("{{\n  \"found_in_{window}\": {{\n{body}\n  }}\n}}")
}

fn payslip_prompt(window: &str) -> String {
    // Header (name) sits in the upper half, totals in the lower half.
    let wants_name = !is_lower(window);
    let wants_amounts = !is_upper(window);

    let mut tasks = Vec::new();
    if wants_name {
        tasks.push(
            "- Den Namen des Angestellten. Er steht meist oben links unter \"Herrn/Frau\", \
             einige Zeilen unter der Personalnummer. KEINE Firmen- oder Krankenkassennamen. \
             Wenn du keinen Namen findest, gib \"unknown\" zurück.",
        );
    }
    if wants_amounts {
        tasks.push(
            "- Das Bruttogehalt (\"Gesamt-Brutto\"). Nimm den Wert oben rechts, NICHT die \
             Summen unter \"Verdienstbescheinigung\".",
        );
        tasks.push(
            "- Das Nettogehalt (\"Auszahlungsbetrag\"), meist die letzte Zahl unten im Dokument. \
             Es ist kleiner als das Bruttogehalt.",
        );
        tasks.push(
            "- Beträge im Format #.###,## angeben. Gib \"0\" zurück, wenn du einen Wert nicht \
             sicher identifizieren kannst.",
        );
    }

    let template = answer_template(window, DocumentKind::Payslip.fields(), |name| match name {
        EMPLOYEE_NAME => wants_name,
        GROSS_AMOUNT | NET_AMOUNT => wants_amounts,
        _ => false,
    });

    format!(
        "Du siehst {} einer deutschen Gehaltsabrechnung.\n\n\
         SUCHE PRÄZISE NACH:\n{}\n\n\
         Antworte NUR mit diesem JSON, ohne weitere Erklärung:\n{}",
        region(window),
        tasks.join("\n"),
        template
    )
}

fn property_prompt(window: &str) -> String {
    let template = answer_template(window, DocumentKind::Property.fields(), |name| {
        matches!(name, LIVING_SPACE | PURCHASE_PRICE)
    });
    format!(
        "Du siehst {} eines deutschen Immobilienexposés.\n\n\
         SUCHE PRÄZISE NACH:\n\
         - Der Wohnfläche (z.B. \"120 m²\").\n\
         - Dem Kaufpreis (z.B. \"450.000 €\").\n\
         Gib \"nicht gefunden\" zurück, wenn ein Wert in diesem Bereich nicht sichtbar ist.\n\n\
         Antworte NUR mit diesem JSON, ohne weitere Erklärung:\n{}",
        region(window),
        template
    )
}
