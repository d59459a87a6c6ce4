//! Bullet-list extraction for strengths and concerns.
//!
//! Inline text on the label line is the first item. After the label line,
//! contiguous bullet lines are collected until a blank line, a non-bullet
//! line or another field label. A label with no items yields an empty list,
//! which is a valid result.

use std::sync::LazyLock;

use regex::Regex;
use researchflow_shared::Field;

use crate::labels::{is_label, parse_label};
use crate::strategy::Strategy;

/// `-`, `*`, `•`, `+`, `1.` or `1)` followed by whitespace.
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•+]|\d+[.)])\s+(.*)$").expect("bullet regex")
});

/// Strength list strategies in priority order.
pub static STRENGTHS_STRATEGIES: [Strategy<Vec<String>>; 2] = [
    Strategy {
        name: "strengths_label",
        run: |text| labeled_list(text, Field::Strengths, true),
    },
    Strategy {
        name: "strengths_alias",
        run: |text| labeled_list(text, Field::Strengths, false),
    },
];

/// Concern list strategies in priority order.
pub static CONCERNS_STRATEGIES: [Strategy<Vec<String>>; 2] = [
    Strategy {
        name: "concerns_label",
        run: |text| labeled_list(text, Field::Concerns, true),
    },
    Strategy {
        name: "concerns_alias",
        run: |text| labeled_list(text, Field::Concerns, false),
    },
];

/// Items following the first label for `field` whose primary-ness matches.
fn labeled_list(text: &str, field: Field, primary: bool) -> Option<Vec<String>> {
    let mut lines = text.lines();

    let inline = loop {
        let line = lines.next()?;
        if let Some(label) = parse_label(line) {
            if label.field == field && label.is_primary() == primary {
                break label.rest;
            }
        }
    };

    let mut items = Vec::new();
    let inline = BULLET_RE
        .captures(inline)
        .and_then(|caps| caps.get(1))
        .map_or(inline, |m| m.as_str())
        .trim();
    if !inline.is_empty() {
        items.push(inline.to_string());
    }
    for line in lines {
        if line.trim().is_empty() || is_label(line) {
            break;
        }
        let Some(caps) = BULLET_RE.captures(line) else {
            break;
        };
        let item = caps[1].trim();
        if !item.is_empty() {
            items.push(item.to_string());
        }
    }
    Some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::first_match;

    #[test]
    fn stops_at_blank_line() {
        let text = "Strengths:\n- Clear methodology\n- Novel approach\n\nConcerns:\n- Small sample";
        let hit = first_match(&STRENGTHS_STRATEGIES, text).unwrap();
        assert_eq!(hit.value, vec!["Clear methodology", "Novel approach"]);
        assert_eq!(hit.strategy, "strengths_label");

        let concerns = first_match(&CONCERNS_STRATEGIES, text).unwrap();
        assert_eq!(concerns.value, vec!["Small sample"]);
    }

    #[test]
    fn stops_at_next_label_without_blank_line() {
        let text = "Concerns:\n* Overfitting risk\n* No ablation\nRecommendation: Revise";
        let hit = first_match(&CONCERNS_STRATEGIES, text).unwrap();
        assert_eq!(hit.value, vec!["Overfitting risk", "No ablation"]);
    }

    #[test]
    fn all_bullet_markers() {
        let text = "Strengths:\n- dash\n* star\n• dot\n+ plus\n1. numbered\n2) paren";
        let hit = first_match(&STRENGTHS_STRATEGIES, text).unwrap();
        assert_eq!(
            hit.value,
            vec!["dash", "star", "dot", "plus", "numbered", "paren"]
        );
    }

    #[test]
    fn items_are_trimmed() {
        let text = "Strengths:\n   -    padded item   \n-\ttabbed";
        let hit = first_match(&STRENGTHS_STRATEGIES, text).unwrap();
        assert_eq!(hit.value, vec!["padded item", "tabbed"]);
    }

    #[test]
    fn inline_text_is_the_first_item() {
        let hit = first_match(&STRENGTHS_STRATEGIES, "Strengths: Clear methodology").unwrap();
        assert_eq!(hit.value, vec!["Clear methodology"]);

        let text = "Concerns: - No ablation\n- Small sample\n\nSummary: ok";
        let hit = first_match(&CONCERNS_STRATEGIES, text).unwrap();
        assert_eq!(hit.value, vec!["No ablation", "Small sample"]);
    }

    #[test]
    fn label_without_bullets_is_empty_not_absent() {
        let text = "Strengths:\n\nConcerns:\n- something";
        let hit = first_match(&STRENGTHS_STRATEGIES, text).unwrap();
        assert!(hit.value.is_empty());
    }

    #[test]
    fn prose_line_ends_the_list() {
        let text = "Concerns:\n- first\nThat said, the work is strong.\n- not collected";
        let hit = first_match(&CONCERNS_STRATEGIES, text).unwrap();
        assert_eq!(hit.value, vec!["first"]);
    }

    #[test]
    fn alias_used_when_primary_missing() {
        let text = "## Weaknesses\n- Limited baselines";
        let hit = first_match(&CONCERNS_STRATEGIES, text).unwrap();
        assert_eq!(hit.strategy, "concerns_alias");
        assert_eq!(hit.value, vec!["Limited baselines"]);
    }

    #[test]
    fn primary_label_wins_over_earlier_alias() {
        let text = "Pros:\n- fast\n\nStrengths:\n- rigorous";
        let hit = first_match(&STRENGTHS_STRATEGIES, text).unwrap();
        assert_eq!(hit.value, vec!["rigorous"]);
    }

    #[test]
    fn absent_label() {
        assert!(first_match(&STRENGTHS_STRATEGIES, "- orphan bullet").is_none());
    }
}
