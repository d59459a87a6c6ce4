//! Application configuration for researchflow.
//!
//! User config lives at `~/.researchflow/researchflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ResearchFlowError, Result};
use crate::task::TaskType;
use crate::types::Stage;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "researchflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".researchflow";

// ---------------------------------------------------------------------------
// Config structs (matching researchflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Retry and stall policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Model bridge settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Extraction policy.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Stage label → task type labels.
    #[serde(default = "default_stages")]
    pub stages: BTreeMap<String, Vec<String>>,

    /// Template key → prompt template overriding the built-in one.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            retry: RetryConfig::default(),
            provider: ProviderConfig::default(),
            extraction: ExtractionConfig::default(),
            stages: default_stages(),
            templates: BTreeMap::new(),
        }
    }
}

fn default_stages() -> BTreeMap<String, Vec<String>> {
    let entries: [(Stage, &[TaskType]); 6] = [
        (Stage::Backlog, &[TaskType::DraftProposal]),
        (Stage::Design, &[TaskType::DesignExperiment]),
        (
            Stage::Review,
            &[TaskType::ReviewProposal, TaskType::RequestRevision],
        ),
        (Stage::Implementation, &[TaskType::PlanImplementation]),
        (Stage::Validation, &[TaskType::ValidateResults]),
        (Stage::Complete, &[]),
    ];
    entries
        .into_iter()
        .map(|(stage, tasks)| {
            (
                stage.as_str().to_string(),
                tasks.iter().map(|t| t.as_str().to_string()).collect(),
            )
        })
        .collect()
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Project database path (`~/` is expanded).
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Maximum tasks queued per project per run.
    #[serde(default = "default_max_tasks")]
    pub max_tasks_per_project: usize,

    /// Maximum projects processed per run.
    #[serde(default = "default_max_projects")]
    pub max_projects_per_run: usize,

    /// Wall-clock budget for one run, in seconds.
    #[serde(default = "default_run_budget")]
    pub run_budget_secs: u64,

    /// Seconds after which a project lease held by a dead run expires.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_tasks_per_project: default_max_tasks(),
            max_projects_per_run: default_max_projects(),
            run_budget_secs: default_run_budget(),
            lease_ttl_secs: default_lease_ttl(),
        }
    }
}

fn default_db_path() -> String {
    "~/.researchflow/researchflow.db".into()
}
fn default_max_tasks() -> usize {
    4
}
fn default_max_projects() -> usize {
    1
}
fn default_run_budget() -> u64 {
    1800
}
fn default_lease_ttl() -> u64 {
    3600
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Consecutive failing runs before a project is flagged stalled.
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,

    /// Attempts for the closing stage write.
    #[serde(default = "default_write_attempts")]
    pub store_write_attempts: u32,

    /// First backoff delay in milliseconds; doubles per attempt.
    #[serde(default = "default_backoff_base")]
    pub store_backoff_base_ms: u64,

    /// Upper bound on a single backoff delay.
    #[serde(default = "default_backoff_max")]
    pub store_backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            stall_threshold: default_stall_threshold(),
            store_write_attempts: default_write_attempts(),
            store_backoff_base_ms: default_backoff_base(),
            store_backoff_max_ms: default_backoff_max(),
        }
    }
}

fn default_stall_threshold() -> u32 {
    3
}
fn default_write_attempts() -> u32 {
    4
}
fn default_backoff_base() -> u64 {
    100
}
fn default_backoff_max() -> u64 {
    5_000
}

/// `[provider]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Command that runs the model bridge.
    #[serde(default = "default_bridge_cmd")]
    pub bridge_cmd: String,

    /// Arguments passed before `--model <id>`.
    #[serde(default = "default_bridge_args")]
    pub bridge_args: Vec<String>,

    /// Working directory for the bridge (defaults to the current directory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Memory budget the loaded model must fit in.
    #[serde(default = "default_max_memory")]
    pub max_memory_mb: u64,

    /// Generation length limit.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Candidate models, any order; the largest that fits is loaded.
    #[serde(default = "default_models")]
    pub models: Vec<ModelCandidate>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            bridge_cmd: default_bridge_cmd(),
            bridge_args: default_bridge_args(),
            working_dir: None,
            max_memory_mb: default_max_memory(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            models: default_models(),
        }
    }
}

fn default_bridge_cmd() -> String {
    "python3".into()
}
fn default_bridge_args() -> Vec<String> {
    vec!["bridge/model_bridge.py".into()]
}
fn default_max_memory() -> u64 {
    16_384
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.2
}
fn default_models() -> Vec<ModelCandidate> {
    vec![
        ModelCandidate {
            id: "local-13b-q4".into(),
            size_mb: 9_000,
        },
        ModelCandidate {
            id: "local-7b-q4".into(),
            size_mb: 4_500,
        },
    ]
}

/// `[[provider.models]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCandidate {
    /// Identifier passed to the bridge and written to the ledger.
    pub id: String,
    /// Approximate resident size once loaded.
    pub size_mb: u64,
}

/// How out-of-range scores are mapped back into `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RescalePolicy {
    /// `(1, 10]` is divided by 10, `(10, 100]` by 100; the smaller scale wins.
    #[default]
    SmallestFit,
    /// Only values already in `[0, 1]` are accepted.
    Strict,
}

/// `[extraction]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub score_rescale: RescalePolicy,
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration: the validated view of [`AppConfig`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_tasks_per_project: usize,
    pub max_projects_per_run: usize,
    pub run_budget: Duration,
    pub stall_threshold: u32,
    pub store_write_attempts: u32,
    pub store_backoff_base: Duration,
    pub store_backoff_max: Duration,
    /// Task types per stage; every stage has an entry.
    pub stage_tasks: BTreeMap<Stage, Vec<TaskType>>,
    /// Template overrides keyed by task type.
    pub templates: BTreeMap<TaskType, String>,
    pub rescale: RescalePolicy,
}

impl TryFrom<&AppConfig> for PipelineConfig {
    type Error = ResearchFlowError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let mut stage_tasks: BTreeMap<Stage, Vec<TaskType>> =
            Stage::ALL.into_iter().map(|s| (s, Vec::new())).collect();

        for (label, tasks) in &config.stages {
            let stage: Stage = label.parse()?;
            let parsed = tasks
                .iter()
                .map(|t| t.parse::<TaskType>())
                .collect::<Result<Vec<_>>>()?;
            stage_tasks.insert(stage, parsed);
        }

        let mut templates = BTreeMap::new();
        for (key, template) in &config.templates {
            let task_type = TaskType::ALL
                .into_iter()
                .find(|t| t.spec().template_key == key)
                .ok_or_else(|| {
                    ResearchFlowError::configuration(format!("unknown template key '{key}'"))
                })?;
            templates.insert(task_type, template.clone());
        }

        if config.retry.stall_threshold == 0 {
            return Err(ResearchFlowError::configuration(
                "retry.stall_threshold must be at least 1",
            ));
        }
        if config.retry.store_write_attempts == 0 {
            return Err(ResearchFlowError::configuration(
                "retry.store_write_attempts must be at least 1",
            ));
        }

        Ok(Self {
            max_tasks_per_project: config.defaults.max_tasks_per_project,
            max_projects_per_run: config.defaults.max_projects_per_run,
            run_budget: Duration::from_secs(config.defaults.run_budget_secs),
            stall_threshold: config.retry.stall_threshold,
            store_write_attempts: config.retry.store_write_attempts,
            store_backoff_base: Duration::from_millis(config.retry.store_backoff_base_ms),
            store_backoff_max: Duration::from_millis(config.retry.store_backoff_max_ms),
            stage_tasks,
            templates,
            rescale: config.extraction.score_rescale,
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.researchflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ResearchFlowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.researchflow/researchflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ResearchFlowError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ResearchFlowError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ResearchFlowError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ResearchFlowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ResearchFlowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the database path, expanding a leading `~/`.
pub fn resolve_db_path(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ResearchFlowError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}
