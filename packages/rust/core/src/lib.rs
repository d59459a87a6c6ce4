//! Core pipeline logic for researchflow.
//!
//! This crate ties the extractor, the model provider and the persistence
//! seams together:
//! - [`queue`] turns a project's stage into an ordered list of prompts
//! - [`driver`] runs prompts through a loaded model and validates answers
//! - [`orchestrator`] selects projects, executes their queues and commits
//!   stage decisions

pub mod driver;
pub mod orchestrator;
pub mod queue;

pub use driver::{ConversationDriver, classify, strip_echo, validate};
pub use orchestrator::{
    Decision, Orchestrator, ProjectReport, RunAborted, RunProgress, RunReport, SilentProgress,
    TaskFailure, Verdict, advance, backoff_delay, contribution_reference, order_candidates,
    results_digest, select_project,
};
pub use queue::{PromptTemplates, TaskQueueBuilder, build_task_queue, builtin_template, render};
