//! Field label recognition.
//!
//! A label line names a field and may carry inline content after its colon:
//! `Strengths:`, `**Score:** 8`, `## Concerns`, `- Recommendation: Accept`.

use std::sync::LazyLock;

use regex::Regex;
use researchflow_shared::Field;

/// Label words per field. The first word of each list is the primary label.
const LABELS: &[(Field, &[&str])] = &[
    (Field::Score, &["score", "overall score", "rating", "overall rating"]),
    (Field::Strengths, &["strengths", "pros", "positives"]),
    (Field::Concerns, &["concerns", "weaknesses", "cons", "issues", "risks"]),
    (Field::Recommendation, &["recommendation", "decision", "verdict"]),
    (Field::Summary, &["summary"]),
];

/// `Label: rest` with optional heading, bullet and emphasis decoration.
/// At most one space on either side of the colon; a closing emphasis marker
/// may take one more.
static LABEL_COLON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:#{1,6}\s*)?(?:[-*•+]\s+)?(?:\*\*|__)?\s*(overall\s+(?:score|rating)|score|rating|strengths|pros|positives|concerns|weaknesses|cons|issues|risks|recommendation|decision|verdict|summary)(?:\*\*|__)? ?: ?(?:(?:\*\*|__) ?)?(?:(\S.*)|\s*)$",
    )
    .expect("label colon regex")
});

/// `## Label` or `**Label**` alone on its line.
static LABEL_BARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:#{1,6}\s*|\*\*|__)(overall\s+(?:score|rating)|score|rating|strengths|pros|positives|concerns|weaknesses|cons|issues|risks|recommendation|decision|verdict|summary)\s*(?:\*\*|__)?\s*$",
    )
    .expect("label bare regex")
});

/// A recognized label line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LabelMatch<'a> {
    pub field: Field,
    /// Label word as written, lowercased.
    pub word: String,
    /// Inline content after the label, trimmed.
    pub rest: &'a str,
}

impl LabelMatch<'_> {
    /// Whether the label is the field's primary word rather than an alias.
    pub fn is_primary(&self) -> bool {
        LABELS
            .iter()
            .find(|(f, _)| *f == self.field)
            .is_some_and(|(_, words)| words[0] == self.word)
    }
}

/// Recognize a label line.
pub(crate) fn parse_label(line: &str) -> Option<LabelMatch<'_>> {
    if let Some(caps) = LABEL_COLON_RE.captures(line) {
        let word = normalize_word(&caps[1]);
        let rest = caps.get(2).map_or("", |m| m.as_str()).trim();
        return field_for(&word).map(|field| LabelMatch { field, word, rest });
    }
    if let Some(caps) = LABEL_BARE_RE.captures(line) {
        let word = normalize_word(&caps[1]);
        return field_for(&word).map(|field| LabelMatch {
            field,
            word,
            rest: "",
        });
    }
    None
}

/// Whether `line` starts a new recognized field.
pub(crate) fn is_label(line: &str) -> bool {
    parse_label(line).is_some()
}

fn normalize_word(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn field_for(word: &str) -> Option<Field> {
    LABELS
        .iter()
        .find(|(_, words)| words.contains(&word))
        .map(|(field, _)| *field)
}
