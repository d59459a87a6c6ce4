//! Structured-field extraction from free-form model answers.
//!
//! Each field is recovered by an ordered list of named strategies (see
//! [`strategy`]); the first one that matches wins. Extraction never fails:
//! fields that cannot be recovered are `None` and listed in
//! [`Extraction::issues`] as either missing or malformed.

mod labels;
pub mod list;
pub mod recommendation;
pub mod score;
pub mod strategy;
pub mod summary;

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use researchflow_shared::{
    Confidence, Field, FieldIssue, IssueKind, Recommendation, RescalePolicy, ReviewOutcome,
    Summary, TaskType,
};

use crate::strategy::first_match;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for an extraction pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// How bare score numbers are mapped into `[0, 1]`.
    pub rescale: RescalePolicy,
}

/// Everything recovered from one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub outcome: ReviewOutcome,
    /// Fields that were looked for and not recovered.
    pub issues: Vec<FieldIssue>,
    /// Winning strategy name per located field.
    pub matched_by: BTreeMap<Field, &'static str>,
    /// `Heuristic` when any fallback strategy supplied a value.
    pub confidence: Confidence,
}

impl Extraction {
    /// Issue recorded for `field`, if any.
    pub fn issue(&self, field: Field) -> Option<IssueKind> {
        self.issues
            .iter()
            .find(|issue| issue.field == field)
            .map(|issue| issue.kind)
    }
}

/// Strategies that guess rather than read a label.
const FALLBACK_STRATEGIES: &[&str] = &["summary_last_paragraph"];

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Extract the fields `task_type` looks for.
pub fn extract(text: &str, task_type: TaskType, options: &ExtractOptions) -> Extraction {
    extract_fields(text, task_type.spec().fields, options)
}

/// Extract an explicit set of fields.
#[instrument(skip_all, fields(len = text.len(), field_count = fields.len()))]
pub fn extract_fields(text: &str, fields: &[Field], options: &ExtractOptions) -> Extraction {
    let mut outcome = ReviewOutcome::default();
    let mut issues = Vec::new();
    let mut matched_by = BTreeMap::new();

    for &field in fields {
        match field {
            Field::Score => match first_match(&score::SCORE_STRATEGIES, text) {
                Some(hit) => {
                    matched_by.insert(field, hit.strategy);
                    outcome.score = score::normalize(hit.value, options.rescale);
                    if outcome.score.is_none() {
                        issues.push(issue(field, IssueKind::Malformed));
                    }
                }
                None => issues.push(issue(field, IssueKind::Missing)),
            },
            Field::Strengths | Field::Concerns => {
                let strategies = if field == Field::Strengths {
                    &list::STRENGTHS_STRATEGIES
                } else {
                    &list::CONCERNS_STRATEGIES
                };
                match first_match(strategies, text) {
                    Some(hit) => {
                        matched_by.insert(field, hit.strategy);
                        let slot = if field == Field::Strengths {
                            &mut outcome.strengths
                        } else {
                            &mut outcome.concerns
                        };
                        *slot = Some(hit.value);
                    }
                    None => issues.push(issue(field, IssueKind::Missing)),
                }
            }
            Field::Recommendation => {
                match first_match(&recommendation::RECOMMENDATION_STRATEGIES, text) {
                    Some(hit) => {
                        matched_by.insert(field, hit.strategy);
                        outcome.recommendation = hit.value;
                        if hit.value == Recommendation::Unknown {
                            issues.push(issue(field, IssueKind::Malformed));
                        }
                    }
                    None => issues.push(issue(field, IssueKind::Missing)),
                }
            }
            Field::Summary => match first_match(&summary::SUMMARY_STRATEGIES, text) {
                Some(hit) => {
                    matched_by.insert(field, hit.strategy);
                    let source = if FALLBACK_STRATEGIES.contains(&hit.strategy) {
                        Confidence::Heuristic
                    } else {
                        Confidence::Labeled
                    };
                    outcome.summary = Some(Summary {
                        text: hit.value,
                        source,
                    });
                }
                None => issues.push(issue(field, IssueKind::Missing)),
            },
        }
    }

    let confidence = if matched_by
        .values()
        .any(|name| FALLBACK_STRATEGIES.contains(name))
    {
        Confidence::Heuristic
    } else {
        Confidence::Labeled
    };

    debug!(
        located = matched_by.len(),
        issues = issues.len(),
        ?confidence,
        "extraction complete"
    );

    Extraction {
        outcome,
        issues,
        matched_by,
        confidence,
    }
}

fn issue(field: Field, kind: IssueKind) -> FieldIssue {
    FieldIssue { field, kind }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REVIEW: &str = "\
**Score:** 8.5/10

Strengths:
- Clear methodology
- Novel approach

Concerns:
- Small sample size

Recommendation: Accept

Summary: A well-motivated proposal with a sound plan.";

    fn opts() -> ExtractOptions {
        ExtractOptions::default()
    }

    #[test]
    fn full_review() {
        let ex = extract(REVIEW, TaskType::ReviewProposal, &opts());
        assert!(ex.issues.is_empty(), "{:?}", ex.issues);
        assert!((ex.outcome.score.unwrap() - 0.85).abs() < 1e-9);
        assert_eq!(
            ex.outcome.strengths.as_deref(),
            Some(&["Clear methodology".to_string(), "Novel approach".to_string()][..])
        );
        assert_eq!(
            ex.outcome.concerns.as_deref(),
            Some(&["Small sample size".to_string()][..])
        );
        assert_eq!(ex.outcome.recommendation, Recommendation::Accept);
        assert_eq!(ex.confidence, Confidence::Labeled);
        assert_eq!(ex.matched_by[&Field::Score], "score_fraction");
        assert_eq!(ex.matched_by[&Field::Summary], "summary_labeled");
    }

    #[test]
    fn plain_and_unit_scores() {
        let fields = [Field::Score];
        let ex = extract_fields("Score: 8.5", &fields, &opts());
        assert!((ex.outcome.score.unwrap() - 0.85).abs() < 1e-9);
        let ex = extract_fields("Score: 0.85", &fields, &opts());
        assert!((ex.outcome.score.unwrap() - 0.85).abs() < 1e-9);
    }

    #[test]
    fn missing_versus_malformed() {
        let fields = [Field::Score, Field::Recommendation, Field::Strengths];
        let ex = extract_fields("Score: 420\nRecommendation: Looks good", &fields, &opts());
        assert_eq!(ex.outcome.score, None);
        assert_eq!(ex.issue(Field::Score), Some(IssueKind::Malformed));
        assert_eq!(ex.outcome.recommendation, Recommendation::Unknown);
        assert_eq!(ex.issue(Field::Recommendation), Some(IssueKind::Malformed));
        assert_eq!(ex.issue(Field::Strengths), Some(IssueKind::Missing));

        let ex = extract_fields("nothing structured here", &fields, &opts());
        assert_eq!(ex.issue(Field::Score), Some(IssueKind::Missing));
        assert_eq!(ex.issue(Field::Recommendation), Some(IssueKind::Missing));
    }

    #[test]
    fn strict_rescale_marks_ten_point_score_malformed() {
        let strict = ExtractOptions {
            rescale: RescalePolicy::Strict,
        };
        let ex = extract_fields("Score: 8.5", &[Field::Score], &strict);
        assert_eq!(ex.issue(Field::Score), Some(IssueKind::Malformed));
    }

    #[test]
    fn fallback_summary_lowers_confidence() {
        let text = "Some preamble.\n\nThe plan covers data collection and analysis.";
        let ex = extract(text, TaskType::DraftProposal, &opts());
        let summary = ex.outcome.summary.unwrap();
        assert_eq!(summary.text, "The plan covers data collection and analysis.");
        assert_eq!(summary.source, Confidence::Heuristic);
        assert_eq!(ex.confidence, Confidence::Heuristic);
    }

    #[test]
    fn only_requested_fields_are_examined() {
        let ex = extract("Score: 0.4\nSummary: ok", TaskType::DraftProposal, &opts());
        assert_eq!(ex.outcome.score, None);
        assert!(!ex.matched_by.contains_key(&Field::Score));
        assert!(ex.issue(Field::Score).is_none());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn extraction_never_panics_and_scores_stay_in_range(text in "(?s).{0,200}") {
                let ex = extract(&text, TaskType::ValidateResults, &opts());
                if let Some(score) = ex.outcome.score {
                    prop_assert!((0.0..=1.0).contains(&score));
                }
            }

            #[test]
            fn labeled_scores_up_to_one_hundred_normalize(value in 0u32..=100) {
                let text = format!("Score: {value}");
                let ex = extract_fields(&text, &[Field::Score], &opts());
                prop_assert!(ex.outcome.score.is_some_and(|s| (0.0..=1.0).contains(&s)));
            }
        }
    }
}
