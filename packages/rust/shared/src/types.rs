//! Core domain types for research projects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ResearchFlowError, Result};

// ---------------------------------------------------------------------------
// ProjectId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for project identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    /// Generate a new time-sortable project identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ProjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// A project's position in its lifecycle.
///
/// Variant order is the lifecycle order; stages only move forward one step
/// at a time, except for a one-step regression on rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Backlog,
    Design,
    Review,
    Implementation,
    Validation,
    Complete,
}

impl Stage {
    /// Every stage, in lifecycle order.
    pub const ALL: [Stage; 6] = [
        Stage::Backlog,
        Stage::Design,
        Stage::Review,
        Stage::Implementation,
        Stage::Validation,
        Stage::Complete,
    ];

    /// Storage / config label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Design => "design",
            Self::Review => "review",
            Self::Implementation => "implementation",
            Self::Validation => "validation",
            Self::Complete => "complete",
        }
    }

    /// The following stage; `Complete` stays `Complete`.
    pub fn next(self) -> Stage {
        match self {
            Self::Backlog => Self::Design,
            Self::Design => Self::Review,
            Self::Review => Self::Implementation,
            Self::Implementation => Self::Validation,
            Self::Validation | Self::Complete => Self::Complete,
        }
    }

    /// The preceding stage; `Backlog` stays `Backlog`.
    pub fn previous(self) -> Stage {
        match self {
            Self::Backlog | Self::Design => Self::Backlog,
            Self::Review => Self::Design,
            Self::Implementation => Self::Review,
            Self::Validation => Self::Implementation,
            Self::Complete => Self::Validation,
        }
    }

    /// Whether no further work is scheduled for this stage.
    pub fn is_terminal(self) -> bool {
        self == Self::Complete
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = ResearchFlowError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ResearchFlowError::configuration(format!("unknown stage '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Retry bookkeeping carried alongside a project's stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    /// Runs in a row that produced no valid result.
    pub consecutive_failures: u32,
    /// Set once `consecutive_failures` reaches the stall threshold.
    pub stalled: bool,
}

/// A research project as seen by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    pub description: String,
    pub stage: Stage,
    #[serde(default)]
    pub retry: RetryState,
    /// Digest of the last result set applied by `advance`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_digest: Option<String>,
    /// Most recent history entries, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// A fresh project in the given stage.
    pub fn new(title: impl Into<String>, description: impl Into<String>, stage: Stage) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            title: title.into(),
            description: description.into(),
            stage,
            retry: RetryState::default(),
            applied_digest: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// What a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Created,
    StageChanged,
    TaskRecorded,
    RunFailed,
    Stalled,
}

impl HistoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StageChanged => "stage_changed",
            Self::TaskRecorded => "task_recorded",
            Self::RunFailed => "run_failed",
            Self::Stalled => "stalled",
        }
    }
}

impl std::str::FromStr for HistoryKind {
    type Err = ResearchFlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "stage_changed" => Ok(Self::StageChanged),
            "task_recorded" => Ok(Self::TaskRecorded),
            "run_failed" => Ok(Self::RunFailed),
            "stalled" => Ok(Self::Stalled),
            other => Err(ResearchFlowError::Storage(format!(
                "unknown history kind '{other}'"
            ))),
        }
    }
}

/// One append-only entry in a project's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Run that produced the entry (`None` for manual edits).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub kind: HistoryKind,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(run_id: Option<&str>, kind: HistoryKind, detail: impl Into<String>) -> Self {
        Self {
            run_id: run_id.map(String::from),
            kind,
            detail: detail.into(),
            from_stage: None,
            to_stage: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a stage transition to the entry.
    pub fn with_transition(mut self, from: Stage, to: Stage) -> Self {
        self.from_stage = Some(from);
        self.to_stage = Some(to);
        self
    }
}

// ---------------------------------------------------------------------------
// StageUpdate
// ---------------------------------------------------------------------------

/// The single atomic write that closes a project's run.
#[derive(Debug, Clone, PartialEq)]
pub struct StageUpdate {
    /// Stage the orchestrator last read; the write fails if it changed.
    pub expected: Stage,
    /// Stage to store.
    pub stage: Stage,
    pub retry: RetryState,
    /// Digest of the result set that produced this update.
    pub applied_digest: Option<String>,
}
