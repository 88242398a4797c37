//! Product lines of a batch and translation of their attribute values.
//!
//! Attribute values that point at a reference type (a colour palette, a
//! size chart) are translated by the translator registered for that type.
//! Lookup is by key; unknown references fall back to the raw value.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Listings longer than this are truncated with a notice.
pub const MAX_RENDERED_LINES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub value: String,
    /// Reference type the value belongs to, if it is a coded value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl Attribute {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            reference: None,
        }
    }

    pub fn referenced(value: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            reference: Some(reference.into()),
        }
    }
}

/// One product line of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub article: String,
    #[serde(default)]
    pub offer: Option<Attribute>,
    #[serde(default)]
    pub variation: Option<Attribute>,
    #[serde(default)]
    pub modification: Option<Attribute>,
    pub total: u32,
}

pub type Translator = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Clone, Default)]
pub struct TranslatorRegistry {
    by_reference: HashMap<String, Translator>,
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        reference: impl Into<String>,
        translator: impl Fn(&str) -> String + Send + Sync + 'static,
    ) {
        self.by_reference
            .insert(reference.into(), Arc::new(translator));
    }

    /// Registers a fixed dictionary for a reference type.
    pub fn register_table(&mut self, reference: impl Into<String>, table: HashMap<String, String>) {
        self.register(reference, move |value| {
            table
                .get(value)
                .cloned()
                .unwrap_or_else(|| value.to_string())
        });
    }

    pub fn translate(&self, attribute: &Attribute) -> String {
        match attribute
            .reference
            .as_deref()
            .and_then(|reference| self.by_reference.get(reference))
        {
            Some(translator) => translator(&attribute.value),
            None => attribute.value.clone(),
        }
    }
}

impl std::fmt::Debug for TranslatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslatorRegistry")
            .field("references", &self.by_reference.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Renders a numbered plain-text listing, one line per product.
pub fn render_line_items(items: &[LineItem], translators: &TranslatorRegistry) -> String {
    let mut out = String::new();
    for (index, item) in items.iter().enumerate() {
        if index >= MAX_RENDERED_LINES {
            let _ = writeln!(
                out,
                "Only the first {MAX_RENDERED_LINES} lines are listed here; see the full batch in the back office."
            );
            break;
        }

        let _ = write!(out, "{}. {}", index + 1, item.article);
        for attribute in [&item.offer, &item.variation, &item.modification]
            .into_iter()
            .flatten()
        {
            let value = translators.translate(attribute);
            if !value.is_empty() {
                let _ = write!(out, " {value}");
            }
        }
        let _ = writeln!(out, " | {} pcs.", item.total);
    }
    out
}
