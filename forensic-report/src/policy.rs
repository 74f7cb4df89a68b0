use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::SplitResult;
use crate::splitter::{parse_background_response, split};

pub const EXHIBITS_SECTION: &str = "Exhibits";
pub const BACKGROUND_SECTION: &str = "Background Information";
pub const FINDINGS_SECTION: &str = "1.4 Findings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionHandling {
    /// Batch, query and synthesize with the model.
    #[default]
    Analyze,
    /// Never sent to the model; handled by whoever lists the case files.
    Bypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Propagate,
    /// Report an empty section instead of failing. The section is always rendered.
    EmptyReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitterKind {
    #[default]
    General,
    /// Split at the literal `**Background Information**` marker first.
    BackgroundMarker,
}

impl SplitterKind {
    pub fn split(self, narrative: &str) -> SplitResult {
        match self {
            SplitterKind::General => split(narrative),
            SplitterKind::BackgroundMarker => parse_background_response(narrative),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionPolicy {
    #[serde(default)]
    pub handling: SectionHandling,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub splitter: SplitterKind,
}

impl SectionPolicy {
    pub fn bypass() -> Self {
        Self {
            handling: SectionHandling::Bypass,
            ..Default::default()
        }
    }
}

/// Per-section policies. Section names are compared case-insensitively with
/// underscores and spaces treated alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    #[serde(default)]
    default: SectionPolicy,
    #[serde(default)]
    sections: HashMap<String, SectionPolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::empty()
            .with(EXHIBITS_SECTION, SectionPolicy::bypass())
            .with(
                BACKGROUND_SECTION,
                SectionPolicy {
                    handling: SectionHandling::Analyze,
                    on_failure: FailurePolicy::EmptyReport,
                    splitter: SplitterKind::BackgroundMarker,
                },
            )
    }
}

impl PolicyTable {
    /// No per-section entries; every section gets the default policy.
    pub fn empty() -> Self {
        Self {
            default: SectionPolicy::default(),
            sections: HashMap::new(),
        }
    }

    pub fn with(mut self, section: &str, policy: SectionPolicy) -> Self {
        self.sections.insert(section_key(section), policy);
        self
    }

    pub fn with_default(mut self, policy: SectionPolicy) -> Self {
        self.default = policy;
        self
    }

    pub fn policy_for(&self, section: &str) -> SectionPolicy {
        self.sections
            .get(&section_key(section))
            .or_else(|| {
                // Entries loaded through serde keep their original spelling.
                self.sections
                    .iter()
                    .find(|(key, _)| section_key(key) == section_key(section))
                    .map(|(_, policy)| policy)
            })
            .copied()
            .unwrap_or(self.default)
    }
}

fn section_key(section: &str) -> String {
    section.trim().to_lowercase().replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let table = PolicyTable::default();
        assert_eq!(table.policy_for("Exhibits").handling, SectionHandling::Bypass);

        let background = table.policy_for("background_information");
        assert_eq!(background.on_failure, FailurePolicy::EmptyReport);
        assert_eq!(background.splitter, SplitterKind::BackgroundMarker);

        assert_eq!(table.policy_for("1.4 Findings"), SectionPolicy::default());
    }

    #[test]
    fn deserialized_tables_match_loosely() {
        let table: PolicyTable = serde_json::from_str(
            r#"{"sections": {"Damages_Summary": {"on_failure": "empty_report"}}}"#,
        )
        .unwrap();
        let policy = table.policy_for("damages summary");
        assert_eq!(policy.on_failure, FailurePolicy::EmptyReport);
        assert_eq!(policy.handling, SectionHandling::Analyze);
        assert_eq!(table.policy_for("Exhibits"), SectionPolicy::default());
    }

    #[test]
    fn default_policy_is_replaceable() {
        let table = PolicyTable::default().with_default(SectionPolicy {
            on_failure: FailurePolicy::EmptyReport,
            ..Default::default()
        });
        assert_eq!(
            table.policy_for("1.4 Findings").on_failure,
            FailurePolicy::EmptyReport
        );
        assert_eq!(table.policy_for("Exhibits").handling, SectionHandling::Bypass);
    }

    #[test]
    fn splitter_choice() {
        let text = "pre\n**Background Information**\npost";
        assert_eq!(SplitterKind::BackgroundMarker.split(text).findings, "pre");
        assert_eq!(
            SplitterKind::General.split(text).findings,
            "**1.4 Findings**\npre"
        );
    }
}
