//! Extraction payloads and task results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::task::{Field, TaskType};

// ---------------------------------------------------------------------------
// ReviewOutcome
// ---------------------------------------------------------------------------

/// Closed set of verdicts a model can give.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Reject,
    Revise,
    #[default]
    Unknown,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Revise => "revise",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much an extracted value can be trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Found through a fallback heuristic.
    Heuristic,
    /// Found next to its label.
    #[default]
    Labeled,
}

/// A summary and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub source: Confidence,
}

/// Structured fields recovered from a model answer.
///
/// Every field is optional: `None` means the field was not recovered. The
/// accompanying [`FieldIssue`] list says whether it was absent or malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    /// Score normalized to `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strengths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concerns: Option<Vec<String>>,
    #[serde(default)]
    pub recommendation: Recommendation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
}

impl ReviewOutcome {
    /// Flat field → value mapping for bookkeeping consumers.
    pub fn fields(&self) -> BTreeMap<Field, serde_json::Value> {
        let mut map = BTreeMap::new();
        if let Some(score) = self.score {
            map.insert(Field::Score, serde_json::json!(score));
        }
        if let Some(strengths) = &self.strengths {
            map.insert(Field::Strengths, serde_json::json!(strengths));
        }
        if let Some(concerns) = &self.concerns {
            map.insert(Field::Concerns, serde_json::json!(concerns));
        }
        map.insert(
            Field::Recommendation,
            serde_json::json!(self.recommendation.as_str()),
        );
        if let Some(summary) = &self.summary {
            map.insert(Field::Summary, serde_json::json!(summary.text));
        }
        map
    }
}

/// Why a field was not recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// No label for the field was found.
    Missing,
    /// A label was found but its value could not be used.
    Malformed,
}

/// A field the extractor could not recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: Field,
    pub kind: IssueKind,
}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// Why a task result is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "field", rename_all = "snake_case")]
pub enum FailureReason {
    /// Model load or inference failure, including empty output.
    ProviderError,
    /// A required field was not found.
    MissingField(Field),
    /// A required field was found but broke its constraint.
    ConstraintViolation(Field),
    /// The run budget ran out before the task finished.
    Timeout,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProviderError => f.write_str("provider error"),
            Self::MissingField(field) => write!(f, "missing field '{field}'"),
            Self::ConstraintViolation(field) => write!(f, "constraint violated on '{field}'"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

/// Outcome of executing one task. Immutable once built.
///
/// `valid` is true exactly when `failure_reason` is `None`; the constructors
/// are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    task_type: TaskType,
    raw_text: String,
    structured: Option<ReviewOutcome>,
    valid: bool,
    failure_reason: Option<FailureReason>,
    confidence: Confidence,
    model_id: Option<String>,
}

impl TaskResult {
    /// Result built from an extraction; `failure` is the first violated rule.
    pub fn extracted(
        task_type: TaskType,
        raw_text: String,
        outcome: ReviewOutcome,
        confidence: Confidence,
        failure: Option<FailureReason>,
        model_id: Option<String>,
    ) -> Self {
        Self {
            task_type,
            raw_text,
            structured: Some(outcome),
            valid: failure.is_none(),
            failure_reason: failure,
            confidence,
            model_id,
        }
    }

    /// Result for a task whose provider call failed.
    pub fn provider_failure(
        task_type: TaskType,
        raw_text: String,
        model_id: Option<String>,
    ) -> Self {
        Self::failed(task_type, raw_text, FailureReason::ProviderError, model_id)
    }

    /// Result for a task abandoned because the run budget ran out.
    pub fn timed_out(task_type: TaskType, model_id: Option<String>) -> Self {
        Self::failed(task_type, String::new(), FailureReason::Timeout, model_id)
    }

    fn failed(
        task_type: TaskType,
        raw_text: String,
        reason: FailureReason,
        model_id: Option<String>,
    ) -> Self {
        Self {
            task_type,
            raw_text,
            structured: None,
            valid: false,
            failure_reason: Some(reason),
            confidence: Confidence::Heuristic,
            model_id,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn structured(&self) -> Option<&ReviewOutcome> {
        self.structured.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.failure_reason
    }

    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    /// Recommendation of a valid result, if it carries one.
    pub fn recommendation(&self) -> Option<Recommendation> {
        if !self.valid {
            return None;
        }
        self.structured.as_ref().map(|s| s.recommendation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_tracks_failure_reason() {
        let ok = TaskResult::extracted(
            TaskType::ReviewProposal,
            "Score: 0.9".into(),
            ReviewOutcome::default(),
            Confidence::Labeled,
            None,
            None,
        );
        assert!(ok.is_valid());
        assert!(ok.failure_reason().is_none());

        let bad = TaskResult::extracted(
            TaskType::ReviewProposal,
            "nothing".into(),
            ReviewOutcome::default(),
            Confidence::Labeled,
            Some(FailureReason::MissingField(Field::Score)),
            None,
        );
        assert!(!bad.is_valid());
        assert_eq!(
            bad.failure_reason(),
            Some(FailureReason::MissingField(Field::Score))
        );
    }

    #[test]
    fn failures_carry_reasons() {
        let timeout = TaskResult::timed_out(TaskType::ValidateResults, None);
        assert!(!timeout.is_valid());
        assert_eq!(timeout.failure_reason(), Some(FailureReason::Timeout));
        assert!(timeout.structured().is_none());

        let provider = TaskResult::provider_failure(TaskType::DraftProposal, String::new(), None);
        assert_eq!(provider.failure_reason(), Some(FailureReason::ProviderError));
        assert_eq!(provider.recommendation(), None);
    }

    #[test]
    fn outcome_field_mapping() {
        let outcome = ReviewOutcome {
            score: Some(0.85),
            strengths: Some(vec!["Clear methodology".into()]),
            concerns: None,
            recommendation: Recommendation::Accept,
            summary: Some(Summary {
                text: "Solid work".into(),
                source: Confidence::Labeled,
            }),
        };
        let fields = outcome.fields();
        assert_eq!(fields[&Field::Score], serde_json::json!(0.85));
        assert_eq!(fields[&Field::Recommendation], serde_json::json!("accept"));
        assert!(!fields.contains_key(&Field::Concerns));
    }

    #[test]
    fn failure_reason_serializes_with_field() {
        let json =
            serde_json::to_string(&FailureReason::ConstraintViolation(Field::Score)).unwrap();
        assert_eq!(json, r#"{"reason":"constraint_violation","field":"score"}"#);
        let json = serde_json::to_string(&FailureReason::Timeout).unwrap();
        assert_eq!(json, r#"{"reason":"timeout"}"#);
    }
}
