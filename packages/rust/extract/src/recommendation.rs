//! Recommendation extraction.
//!
//! The verdict word is read from the label's inline content, or from the next
//! non-empty line when the label stands alone. `major`/`minor` prefixes and
//! light punctuation are ignored.

use std::sync::LazyLock;

use regex::Regex;
use researchflow_shared::{Field, Recommendation};

use crate::labels::parse_label;
use crate::strategy::Strategy;

/// First word of a verdict, skipping emphasis, quotes and a major/minor prefix.
static VERDICT_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^[\s*_"'`\[(:-]*(?:(?:major|minor)[\s-]+)?([a-z]+)"#)
        .expect("verdict word regex")
});

/// Recommendation strategies in priority order.
///
/// A label with an unrecognized word yields `Some(Unknown)`; the caller
/// reports that as malformed rather than missing.
pub static RECOMMENDATION_STRATEGIES: [Strategy<Recommendation>; 2] = [
    Strategy {
        name: "recommendation_label",
        run: |text| labeled_verdict(text, true),
    },
    Strategy {
        name: "verdict_label",
        run: |text| labeled_verdict(text, false),
    },
];

fn labeled_verdict(text: &str, primary: bool) -> Option<Recommendation> {
    let mut lines = text.lines();
    let rest = loop {
        let line = lines.next()?;
        if let Some(label) = parse_label(line) {
            if label.field == Field::Recommendation && label.is_primary() == primary {
                break label.rest;
            }
        }
    };

    let content = if rest.is_empty() {
        lines.map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
    } else {
        rest
    };
    Some(classify(content))
}

/// Map the leading word of `content` onto the closed verdict set.
pub fn classify(content: &str) -> Recommendation {
    let Some(caps) = VERDICT_WORD_RE.captures(content) else {
        return Recommendation::Unknown;
    };
    match caps[1].to_lowercase().as_str() {
        "accept" | "accepted" | "acceptance" | "approve" | "approved" => Recommendation::Accept,
        "reject" | "rejected" | "rejection" => Recommendation::Reject,
        "revise" | "revised" | "revision" | "revisions" | "resubmit" => Recommendation::Revise,
        _ => Recommendation::Unknown,
    }
}
