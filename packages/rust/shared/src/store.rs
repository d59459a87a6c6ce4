//! Persistence seams consumed by the orchestrator.
//!
//! The orchestrator only ever talks to the project store and the
//! contribution ledger through these traits. `researchflow-storage` provides
//! the libSQL implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::task::TaskType;
use crate::types::{HistoryRecord, Project, ProjectId, Stage, StageUpdate};

/// Persistent record of projects, their stages and history.
#[allow(async_fn_in_trait)]
pub trait ProjectStore {
    /// Projects that are not `Complete` and not leased by a live run.
    async fn list_eligible(&self) -> Result<Vec<Project>>;

    /// Full project view, including recent history.
    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>>;

    /// Current stored stage.
    async fn get_stage(&self, id: &ProjectId) -> Result<Stage>;

    /// Compare-and-set write of stage and retry bookkeeping.
    ///
    /// Fails with `ConcurrentModification` when the stored stage no longer
    /// matches `update.expected`.
    async fn set_stage(&self, id: &ProjectId, update: &StageUpdate) -> Result<()>;

    /// Append an entry to the project's history.
    async fn append_history(&self, id: &ProjectId, record: &HistoryRecord) -> Result<()>;

    /// Claim the project for `run_id`. Returns `false` if another live run
    /// holds it.
    async fn acquire_lease(&self, id: &ProjectId, run_id: &str) -> Result<bool>;

    /// Drop the claim taken by `run_id`. A no-op if it no longer holds it.
    async fn release_lease(&self, id: &ProjectId, run_id: &str) -> Result<()>;
}

/// One attribution entry in the contribution ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub model_id: String,
    pub task_type: TaskType,
    pub reference: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only record of which model produced which contribution.
#[allow(async_fn_in_trait)]
pub trait ContributionLedger {
    /// Record a contribution. Duplicate `(model_id, task_type, reference)`
    /// keys are ignored.
    async fn record_contribution(
        &self,
        model_id: &str,
        task_type: TaskType,
        reference: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;
}
