//! Shared types, error model, and configuration for researchflow.
//!
//! This crate is the foundation depended on by all other researchflow crates.
//! It provides:
//! - [`ResearchFlowError`] and [`ProviderError`], the error model
//! - Domain types ([`Project`], [`Stage`], [`Task`], [`TaskResult`], [`ReviewOutcome`])
//! - The per-task-type table ([`TaskType::spec`])
//! - Persistence seams ([`ProjectStore`], [`ContributionLedger`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod outcome;
pub mod store;
pub mod task;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, ExtractionConfig, ModelCandidate, PipelineConfig, ProviderConfig,
    RescalePolicy, RetryConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, resolve_db_path,
};
pub use error::{ProviderError, ResearchFlowError, Result};
pub use outcome::{
    Confidence, FailureReason, FieldIssue, IssueKind, Recommendation, ReviewOutcome, Summary,
    TaskResult,
};
pub use store::{Contribution, ContributionLedger, ProjectStore};
pub use task::{AdvanceSignal, Constraint, Field, FieldRule, Task, TaskSpec, TaskType};
pub use types::{
    HistoryKind, HistoryRecord, Project, ProjectId, RetryState, Stage, StageUpdate,
};
