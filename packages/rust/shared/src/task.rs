//! Task types and the per-variant task table.
//!
//! Every [`TaskType`] has exactly one [`TaskSpec`] describing which fields
//! are extracted from the model's answer, which of them must validate, the
//! prompt template it renders, and what counts as a success signal.

use serde::{Deserialize, Serialize};

use crate::error::{ResearchFlowError, Result};
use crate::types::ProjectId;

// ---------------------------------------------------------------------------
// TaskType
// ---------------------------------------------------------------------------

/// Model-driven work item kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    DraftProposal,
    DesignExperiment,
    ReviewProposal,
    RequestRevision,
    PlanImplementation,
    ValidateResults,
}

impl TaskType {
    /// Every task type, in declaration order.
    pub const ALL: [TaskType; 6] = [
        TaskType::DraftProposal,
        TaskType::DesignExperiment,
        TaskType::ReviewProposal,
        TaskType::RequestRevision,
        TaskType::PlanImplementation,
        TaskType::ValidateResults,
    ];

    /// Config / storage label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DraftProposal => "draft_proposal",
            Self::DesignExperiment => "design_experiment",
            Self::ReviewProposal => "review_proposal",
            Self::RequestRevision => "request_revision",
            Self::PlanImplementation => "plan_implementation",
            Self::ValidateResults => "validate_results",
        }
    }

    /// The table entry for this task type.
    pub fn spec(&self) -> &'static TaskSpec {
        match self {
            Self::DraftProposal => &DRAFT_PROPOSAL,
            Self::DesignExperiment => &DESIGN_EXPERIMENT,
            Self::ReviewProposal => &REVIEW_PROPOSAL,
            Self::RequestRevision => &REQUEST_REVISION,
            Self::PlanImplementation => &PLAN_IMPLEMENTATION,
            Self::ValidateResults => &VALIDATE_RESULTS,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = ResearchFlowError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('-', "_");
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| ResearchFlowError::configuration(format!("unknown task type '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Fields and rules
// ---------------------------------------------------------------------------

/// Structured fields recoverable from a model answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Score,
    Strengths,
    Concerns,
    Recommendation,
    Summary,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Score => "score",
            Self::Strengths => "strengths",
            Self::Concerns => "concerns",
            Self::Recommendation => "recommendation",
            Self::Summary => "summary",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constraint a required field must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// The field was located.
    Present,
    /// A score inside `[0, 1]` after rescaling.
    UnitRange,
    /// A recommendation other than `Unknown`.
    KnownVerdict,
    /// A list or summary with at least one non-blank entry.
    NonEmpty,
}

/// One declarative validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub field: Field,
    pub constraint: Constraint,
}

const fn rule(field: Field, constraint: Constraint) -> FieldRule {
    FieldRule { field, constraint }
}

/// What a valid result of this task type must carry to move the project on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceSignal {
    /// Validity alone is success (generative tasks).
    OnValid,
    /// Only an `Accept` recommendation is success.
    OnAccept,
    /// The task never advances the stage on its own.
    Never,
}

/// Table entry for a [`TaskType`].
#[derive(Debug)]
pub struct TaskSpec {
    /// Key into the prompt template table.
    pub template_key: &'static str,
    /// Fields the extractor looks for.
    pub fields: &'static [Field],
    /// Rules that decide validity.
    pub rules: &'static [FieldRule],
    pub advance: AdvanceSignal,
    /// Lower runs first.
    pub priority: u32,
}

const ALL_FIELDS: &[Field] = &[
    Field::Score,
    Field::Strengths,
    Field::Concerns,
    Field::Recommendation,
    Field::Summary,
];

static DRAFT_PROPOSAL: TaskSpec = TaskSpec {
    template_key: "draft_proposal",
    fields: &[Field::Strengths, Field::Concerns, Field::Summary],
    rules: &[rule(Field::Summary, Constraint::NonEmpty)],
    advance: AdvanceSignal::OnValid,
    priority: 10,
};

static DESIGN_EXPERIMENT: TaskSpec = TaskSpec {
    template_key: "design_experiment",
    fields: &[Field::Strengths, Field::Concerns, Field::Summary],
    rules: &[
        rule(Field::Summary, Constraint::NonEmpty),
        rule(Field::Concerns, Constraint::Present),
    ],
    advance: AdvanceSignal::OnValid,
    priority: 10,
};

static REVIEW_PROPOSAL: TaskSpec = TaskSpec {
    template_key: "review_proposal",
    fields: ALL_FIELDS,
    rules: &[
        rule(Field::Score, Constraint::UnitRange),
        rule(Field::Recommendation, Constraint::KnownVerdict),
    ],
    advance: AdvanceSignal::OnAccept,
    priority: 10,
};

static REQUEST_REVISION: TaskSpec = TaskSpec {
    template_key: "request_revision",
    fields: ALL_FIELDS,
    rules: &[
        rule(Field::Concerns, Constraint::Present),
        rule(Field::Summary, Constraint::NonEmpty),
    ],
    advance: AdvanceSignal::Never,
    priority: 20,
};

static PLAN_IMPLEMENTATION: TaskSpec = TaskSpec {
    template_key: "plan_implementation",
    fields: &[
        Field::Strengths,
        Field::Concerns,
        Field::Recommendation,
        Field::Summary,
    ],
    rules: &[rule(Field::Summary, Constraint::NonEmpty)],
    advance: AdvanceSignal::OnValid,
    priority: 10,
};

static VALIDATE_RESULTS: TaskSpec = TaskSpec {
    template_key: "validate_results",
    fields: ALL_FIELDS,
    rules: &[
        rule(Field::Score, Constraint::UnitRange),
        rule(Field::Recommendation, Constraint::KnownVerdict),
    ],
    advance: AdvanceSignal::OnAccept,
    priority: 10,
};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One unit of model-driven work tied to a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_type: TaskType,
    pub project_ref: ProjectId,
    pub prompt: String,
    pub priority: u32,
}
