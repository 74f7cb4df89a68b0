//! Section prompt table and the layered lookup used to pick a prompt.
//!
//! Prompt records come from an external store, one record per case type, with
//! one field per report section. [`PromptTable::from_records`] flattens them
//! into the key space [`resolve_prompt`] searches: `"{section}_{case_type}"`
//! for the record matching the requested case type, the bare section name, and
//! a space-separated twin of every underscored key.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Record fields that never hold a section prompt.
const METADATA_FIELDS: &[&str] = &["_id", "id", "prompt_id", "case_type", "description"];

#[derive(Debug, Error)]
pub enum PromptLoadError {
    #[error("Failed to read prompt file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse prompts: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported prompt document: {0}")]
    Format(String),
}

/// One prompt document: a case type plus one field per section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptRecord {
    #[serde(default)]
    pub case_type: Option<String>,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

impl PromptRecord {
    pub fn new(case_type: Option<&str>) -> Self {
        Self {
            case_type: case_type.map(str::to_string),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_section(mut self, section: &str, prompt: &str) -> Self {
        self.fields
            .insert(section.to_string(), Value::String(prompt.to_string()));
        self
    }

    /// Section name and prompt pairs, skipping metadata and non-text values.
    pub fn sections(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().filter_map(|(key, value)| {
            if METADATA_FIELDS.contains(&key.as_str()) {
                return None;
            }
            value.as_str().map(|prompt| (key.as_str(), prompt))
        })
    }
}

/// Flat section-prompt lookup table. Keys iterate in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptTable {
    entries: BTreeMap<String, String>,
}

impl PromptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a prompt. Blank prompts are ignored.
    pub fn insert(&mut self, key: impl Into<String>, prompt: impl Into<String>) {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return;
        }
        self.entries.insert(key.into(), prompt);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Build the lookup table for a request of `case_type` from raw records.
    pub fn from_records(records: &[PromptRecord], case_type: Option<&str>) -> Self {
        let best_match = case_type.and_then(|requested| best_case_type_match(records, requested));
        match (&best_match, case_type) {
            (Some(found), Some(requested)) => {
                info!("Case type '{}' matched prompt records for '{}'", requested, found)
            }
            (None, Some(requested)) => {
                warn!("No prompt records match case type '{}'", requested)
            }
            _ => {}
        }

        let is_match = |record: &PromptRecord| {
            matches!(
                (&record.case_type, &best_match),
                (Some(own), Some(best)) if own == best
            )
        };

        // Matching records go last so their prompts own the generic keys.
        let (matching, others): (Vec<&PromptRecord>, Vec<&PromptRecord>) =
            records.iter().partition(|&record| is_match(record));

        let mut table = Self::new();
        for record in others.into_iter().chain(matching) {
            let record_matches = is_match(record);

            for (section, prompt) in record.sections() {
                if let (true, Some(requested)) = (record_matches, case_type) {
                    table.insert(format!("{section}_{requested}"), prompt);
                }
                table.insert(section, prompt);
                if section.contains('_') {
                    table.insert(section.replace('_', " "), prompt);
                }
            }
        }

        debug!("Loaded {} prompt keys", table.len());
        table
    }

    /// Parse either an array of records or a `{ case_type: { section: prompt } }` object.
    pub fn from_json(json: &str, case_type: Option<&str>) -> Result<Self, PromptLoadError> {
        let value: Value = serde_json::from_str(json)?;
        let records = match value {
            Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value::<PromptRecord>)
                .collect::<Result<Vec<_>, _>>()?,
            Value::Object(map) => {
                let mut records = Vec::with_capacity(map.len());
                let mut generic = PromptRecord::new(None);
                for (key, value) in map {
                    match value {
                        Value::Object(sections) => {
                            let mut record = PromptRecord::new(Some(&key));
                            record.fields.extend(sections);
                            records.push(record);
                        }
                        Value::String(prompt) => {
                            generic = generic.with_section(&key, &prompt);
                        }
                        other => {
                            return Err(PromptLoadError::Format(format!(
                                "value for '{key}' must be an object or a string, got {other}"
                            )));
                        }
                    }
                }
                records.push(generic);
                records
            }
            other => {
                return Err(PromptLoadError::Format(format!(
                    "expected an array or an object, got {other}"
                )));
            }
        };
        Ok(Self::from_records(&records, case_type))
    }

    pub fn from_json_file(
        path: impl AsRef<Path>,
        case_type: Option<&str>,
    ) -> Result<Self, PromptLoadError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| PromptLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json, case_type)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PromptTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (key, prompt) in iter {
            table.insert(key, prompt);
        }
        table
    }
}

/// Exact (case-insensitive) case type match first, then containment either way.
fn best_case_type_match(records: &[PromptRecord], requested: &str) -> Option<String> {
    let requested = requested.to_lowercase();
    let known: Vec<&str> = records
        .iter()
        .filter_map(|r| r.case_type.as_deref())
        .filter(|c| !c.is_empty())
        .collect();

    known
        .iter()
        .find(|c| c.to_lowercase() == requested)
        .or_else(|| {
            known.iter().find(|c| {
                let lower = c.to_lowercase();
                lower.contains(&requested) || requested.contains(&lower)
            })
        })
        .map(|c| c.to_string())
}

/// Which lookup step produced a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTier {
    CaseSpecific,
    Exact,
    Fuzzy,
    Variant,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrompt {
    pub text: String,
    /// Table key that supplied the prompt; `None` for the synthesized default.
    pub key: Option<String>,
    pub tier: PromptTier,
}

pub fn default_prompt(section: &str) -> String {
    format!(
        "Analyze the provided documents and extract information for the '{section}' section of the report."
    )
}

/// Pick the prompt for `section`. Always returns a non-empty prompt.
///
/// An empty table resolves to the default prompt here; callers that must
/// distinguish "nothing configured" check [`PromptTable::is_empty`] first.
pub fn resolve_prompt(section: &str, case_type: Option<&str>, table: &PromptTable) -> ResolvedPrompt {
    let variants = section_variants(section);

    let hit = |key: String, tier: PromptTier| {
        table.get(&key).map(|text| ResolvedPrompt {
            text: text.to_string(),
            key: Some(key),
            tier,
        })
    };

    let resolved = case_type
        .filter(|c| !c.trim().is_empty())
        .and_then(|case_type| {
            variants
                .iter()
                .find_map(|v| hit(format!("{v}_{case_type}"), PromptTier::CaseSpecific))
        })
        .or_else(|| {
            variants
                .iter()
                .find_map(|v| hit(v.clone(), PromptTier::Exact))
        })
        .or_else(|| fuzzy_match(section, case_type, table))
        .or_else(|| variant_match(section, case_type, table))
        .unwrap_or_else(|| ResolvedPrompt {
            text: default_prompt(section),
            key: None,
            tier: PromptTier::Default,
        });

    match resolved.tier {
        PromptTier::Default => warn!(
            "No prompt found for section '{}' among {} keys; using default prompt",
            section,
            table.len()
        ),
        tier => info!(
            "Using {:?} prompt '{}' for section '{}'",
            tier,
            resolved.key.as_deref().unwrap_or_default(),
            section
        ),
    }

    resolved
}

fn section_variants(section: &str) -> Vec<String> {
    let mut variants = vec![section.to_string()];
    for candidate in [section.replace(' ', "_"), section.replace('_', " ")] {
        if !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

/// Table entries with the keys suffixed `_{case_type}` first, each group in
/// key order.
fn case_type_first<'a>(
    table: &'a PromptTable,
    case_type: Option<&str>,
) -> Vec<(&'a str, &'a str)> {
    let suffix = case_type
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| format!("_{}", c.to_lowercase()));
    let Some(suffix) = suffix else {
        return table.iter().collect();
    };
    let (mut own, others): (Vec<_>, Vec<_>) = table
        .iter()
        .partition(|(key, _)| key.to_lowercase().ends_with(&suffix));
    own.extend(others);
    own
}

fn fuzzy_match(
    section: &str,
    case_type: Option<&str>,
    table: &PromptTable,
) -> Option<ResolvedPrompt> {
    let needle = section.to_lowercase();
    if needle.is_empty() {
        return None;
    }
    case_type_first(table, case_type)
        .into_iter()
        .find(|(key, _)| {
            let key = key.to_lowercase();
            key.contains(&needle) || needle.contains(&key)
        })
        .map(|(key, text)| ResolvedPrompt {
            text: text.to_string(),
            key: Some(key.to_string()),
            tier: PromptTier::Fuzzy,
        })
}

fn normalize_key(key: &str) -> String {
    key.to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn variant_match(
    section: &str,
    case_type: Option<&str>,
    table: &PromptTable,
) -> Option<ResolvedPrompt> {
    let needle = normalize_key(section);
    if needle.is_empty() {
        return None;
    }
    let candidates: Vec<(&str, &str, String)> = case_type_first(table, case_type)
        .into_iter()
        .map(|(key, text)| (key, text, normalize_key(key)))
        .collect();

    candidates
        .iter()
        .find(|(_, _, normalized)| *normalized == needle)
        .or_else(|| {
            candidates.iter().find(|(_, _, normalized)| {
                !normalized.is_empty() && (normalized.contains(&needle) || needle.contains(normalized))
            })
        })
        .map(|(key, text, _)| ResolvedPrompt {
            text: text.to_string(),
            key: Some(key.to_string()),
            tier: PromptTier::Variant,
        })
}
