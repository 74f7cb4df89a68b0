//! Splits a synthesized narrative into its findings and background parts.
//!
//! Models do not emit headers consistently, so each part is recognised by a
//! table of header spellings matched case-insensitively. The findings header
//! that was found is rewritten to [`CANONICAL_FINDINGS_HEADER`].

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

use crate::models::SplitResult;

pub const CANONICAL_FINDINGS_HEADER: &str = "**1.4 Findings**";

/// The one marker the Background Information synthesis prompt asks for.
pub const BACKGROUND_MARKER: &str = "**Background Information**";

pub const FINDINGS_HEADERS: &[&str] = &[
    "**1.4 Findings**",
    "**Findings**",
    "**1.4. Findings**",
    "**1.4 FINDINGS**",
    "**FINDINGS**",
];

pub const BACKGROUND_HEADERS: &[&str] = &[
    "**2. Background Information**",
    "**2.0 Background Information**",
    "**Background Information**",
    "**BACKGROUND INFORMATION**",
    "**2. BACKGROUND INFORMATION**",
    "**2.0 BACKGROUND INFORMATION**",
];

static DEFAULT_SPLITTER: LazyLock<SectionSplitter> = LazyLock::new(SectionSplitter::default);

/// Header table plus the matchers compiled from it.
#[derive(Debug, Clone)]
pub struct SectionSplitter {
    findings_headers: Vec<String>,
    background_headers: Vec<String>,
    findings: Regex,
    background: Regex,
}

impl Default for SectionSplitter {
    fn default() -> Self {
        Self::new(FINDINGS_HEADERS, BACKGROUND_HEADERS)
    }
}

impl SectionSplitter {
    pub fn new<S: AsRef<str>>(findings_headers: &[S], background_headers: &[S]) -> Self {
        let findings_headers: Vec<String> =
            findings_headers.iter().map(|h| h.as_ref().to_string()).collect();
        let background_headers: Vec<String> =
            background_headers.iter().map(|h| h.as_ref().to_string()).collect();
        Self {
            findings: header_matcher(&findings_headers),
            background: header_matcher(&background_headers),
            findings_headers,
            background_headers,
        }
    }

    /// Recognise one more findings header spelling.
    pub fn with_findings_header(mut self, header: impl Into<String>) -> Self {
        self.findings_headers.push(header.into());
        self.findings = header_matcher(&self.findings_headers);
        self
    }

    /// Recognise one more background header spelling.
    pub fn with_background_header(mut self, header: impl Into<String>) -> Self {
        self.background_headers.push(header.into());
        self.background = header_matcher(&self.background_headers);
        self
    }

    pub fn findings_headers(&self) -> &[String] {
        &self.findings_headers
    }

    pub fn background_headers(&self) -> &[String] {
        &self.background_headers
    }

    pub fn split(&self, text: &str) -> SplitResult {
        if text.trim().is_empty() {
            return SplitResult::default();
        }

        let findings = self.findings.find(text).map(|m| (m.start(), m.end()));
        let background = self.background.find(text).map(|m| m.start());

        match (findings, background) {
            (Some((f_start, f_end)), Some(b_start)) if f_start < b_start => SplitResult::new(
                canonical_findings(&text[f_end..b_start]),
                text[b_start..].trim(),
            ),
            (Some((f_start, f_end)), Some(b_start)) => SplitResult::new(
                canonical_findings(&text[f_end..]),
                text[b_start..f_start].trim(),
            ),
            (Some((_, f_end)), None) => SplitResult::new(canonical_findings(&text[f_end..]), ""),
            (None, Some(b_start)) => {
                let before = text[..b_start].trim();
                let findings = if before.is_empty() {
                    String::new()
                } else {
                    canonical_findings(before)
                };
                SplitResult::new(findings, text[b_start..].trim())
            }
            (None, None) if text.to_lowercase().contains("finding") => {
                SplitResult::new(canonical_findings(text), "")
            }
            (None, None) => SplitResult::new("", text.trim()),
        }
    }
}

fn header_matcher(headers: &[String]) -> Regex {
    let alternatives: Vec<String> = headers.iter().map(|h| regex::escape(h)).collect();
    RegexBuilder::new(&alternatives.join("|"))
        .case_insensitive(true)
        .build()
        .expect("escaped header literals always compile")
}

/// Findings body under the canonical header.
fn canonical_findings(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        CANONICAL_FINDINGS_HEADER.to_string()
    } else {
        format!("{CANONICAL_FINDINGS_HEADER}\n{body}")
    }
}

/// Split with the default header table.
pub fn split(text: &str) -> SplitResult {
    DEFAULT_SPLITTER.split(text)
}

/// Split a Background Information narrative at the first literal
/// [`BACKGROUND_MARKER`]. Without the marker this is [`split`].
pub fn parse_background_response(text: &str) -> SplitResult {
    match text.find(BACKGROUND_MARKER) {
        Some(at) => SplitResult::new(text[..at].trim(), text[at..].trim()),
        None => split(text),
    }
}
