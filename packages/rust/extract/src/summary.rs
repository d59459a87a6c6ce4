//! Summary extraction.

use researchflow_shared::Field;

use crate::labels::{is_label, parse_label};
use crate::strategy::Strategy;

/// Summary strategies in priority order. Only `summary_labeled` counts as a
/// labeled match.
pub static SUMMARY_STRATEGIES: [Strategy<String>; 2] = [
    Strategy {
        name: "summary_labeled",
        run: summary_labeled,
    },
    Strategy {
        name: "summary_last_paragraph",
        run: summary_last_paragraph,
    },
];

/// Inline text after `Summary:`, else the first non-empty line after it.
/// A label followed by nothing usable does not match.
fn summary_labeled(text: &str) -> Option<String> {
    let mut lines = text.lines();
    let rest = loop {
        let line = lines.next()?;
        if let Some(label) = parse_label(line) {
            if label.field == Field::Summary {
                break label.rest;
            }
        }
    };

    if !rest.is_empty() {
        return Some(rest.to_string());
    }
    lines
        .map(str::trim)
        .find(|l| !l.is_empty())
        .filter(|l| !is_label(l))
        .map(str::to_string)
}

/// Last blank-line separated paragraph, joined onto one line.
fn summary_last_paragraph(text: &str) -> Option<String> {
    let mut current: Vec<&str> = Vec::new();
    let mut last: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                last = std::mem::take(&mut current);
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        last = current;
    }

    (!last.is_empty()).then(|| last.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::first_match;

    #[test]
    fn inline_summary() {
        let hit = first_match(&SUMMARY_STRATEGIES, "Score: 0.9\nSummary: Strong study.").unwrap();
        assert_eq!(hit.value, "Strong study.");
        assert_eq!(hit.strategy, "summary_labeled");
    }

    #[test]
    fn summary_on_next_line() {
        let text = "## Summary\n\n  The proposal is well scoped.  \nMore detail.";
        let hit = first_match(&SUMMARY_STRATEGIES, text).unwrap();
        assert_eq!(hit.value, "The proposal is well scoped.");
        assert_eq!(hit.strategy, "summary_labeled");
    }

    #[test]
    fn empty_label_falls_through() {
        let text = "Summary:\nConcerns:\n- thin evaluation\n\nOverall a reasonable start.";
        let hit = first_match(&SUMMARY_STRATEGIES, text).unwrap();
        assert_eq!(hit.strategy, "summary_last_paragraph");
        assert_eq!(hit.value, "Overall a reasonable start.");
    }

    #[test]
    fn last_paragraph_joins_lines() {
        let text = "Intro paragraph.\n\nFinal thoughts span\ntwo lines.\n\n\n";
        let hit = first_match(&SUMMARY_STRATEGIES, text).unwrap();
        assert_eq!(hit.value, "Final thoughts span two lines.");
    }

    #[test]
    fn blank_text() {
        assert!(first_match(&SUMMARY_STRATEGIES, "  \n\n ").is_none());
    }
}
