//! CLI command definitions, routing, and tracing setup.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use researchflow_core::{Orchestrator, ProjectReport, RunProgress, RunReport, validate};
use researchflow_extract::{ExtractOptions, extract};
use researchflow_provider::BridgeProvider;
use researchflow_shared::{
    AppConfig, PipelineConfig, Project, ProjectId, ProjectStore, ResearchFlowError, Stage,
    TaskResult, TaskType, init_config, load_config, resolve_db_path,
};
use researchflow_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// researchflow: move research projects through their pipeline.
#[derive(Parser)]
#[command(
    name = "researchflow",
    version,
    about = "Move research projects from backlog to validation with a local model.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Database path (defaults to `defaults.db_path` from the config file).
    #[arg(long, env = "RESEARCHFLOW_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one pipeline tick.
    Run {
        /// Projects to process in this run.
        #[arg(long)]
        max_projects: Option<usize>,

        /// Tasks to execute per project.
        #[arg(long)]
        max_tasks: Option<usize>,

        /// Wall-clock budget for the whole run, in seconds.
        #[arg(long)]
        budget_secs: Option<u64>,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage research projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Extract structured fields from a saved model answer.
    Extract {
        /// Task type the answer was written for (e.g. review_proposal).
        #[arg(long)]
        task: String,

        /// File holding the answer; `-` or nothing reads stdin.
        input: Option<PathBuf>,

        /// Print the extraction as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect the contribution ledger.
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Project subcommands.
#[derive(Subcommand)]
pub(crate) enum ProjectAction {
    /// Register a new project.
    Add {
        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Starting stage.
        #[arg(long, default_value = "backlog")]
        stage: String,
    },
    /// List all projects.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one project with its recent history.
    Show {
        /// Project id.
        id: String,

        /// History entries to show.
        #[arg(long, default_value_t = 10)]
        history: usize,
    },
}

/// Ledger subcommands.
#[derive(Subcommand)]
pub(crate) enum LedgerAction {
    /// List recorded contributions, newest first.
    List {
        /// Only this model's contributions.
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        json: bool,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "researchflow=info",
        1 => "researchflow=debug",
        _ => "researchflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let db = cli.db.as_deref();
    match cli.command {
        Command::Run {
            max_projects,
            max_tasks,
            budget_secs,
            json,
        } => cmd_run(db, max_projects, max_tasks, budget_secs, json).await,
        Command::Project { action } => match action {
            ProjectAction::Add {
                title,
                description,
                stage,
            } => cmd_project_add(db, &title, &description, &stage).await,
            ProjectAction::List { json } => cmd_project_list(db, json).await,
            ProjectAction::Show { id, history } => cmd_project_show(db, &id, history).await,
        },
        Command::Extract { task, input, json } => cmd_extract(&task, input.as_deref(), json),
        Command::Ledger { action } => match action {
            LedgerAction::List { model, json } => cmd_ledger_list(db, model.as_deref(), json).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

/// The database named by `--db` or the config file.
fn db_path(db: Option<&Path>, config: &AppConfig) -> Result<PathBuf> {
    match db {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(resolve_db_path(&config.defaults.db_path)?),
    }
}

/// Open (and migrate) the database for commands that write.
async fn open_storage(db: Option<&Path>, config: &AppConfig) -> Result<Storage> {
    let path = db_path(db, config)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| eyre!("cannot create {}: {e}", parent.display()))?;
    }

    let storage = Storage::open(&path).await?;
    Ok(storage.with_lease_ttl(Duration::from_secs(config.defaults.lease_ttl_secs)))
}

/// Open an existing database for inspection commands.
async fn open_storage_readonly(db: Option<&Path>, config: &AppConfig) -> Result<Storage> {
    let path = db_path(db, config)?;
    match Storage::open_readonly(&path).await {
        Ok(storage) => Ok(storage),
        Err(ResearchFlowError::NotFound(_)) => Err(eyre!(
            "no database at {}; add a project with `researchflow project add` first",
            path.display()
        )),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(
    db: Option<&Path>,
    max_projects: Option<usize>,
    max_tasks: Option<usize>,
    budget_secs: Option<u64>,
    json: bool,
) -> Result<()> {
    let mut config = load_config()?;
    if let Some(n) = max_projects {
        config.defaults.max_projects_per_run = n;
    }
    if let Some(n) = max_tasks {
        config.defaults.max_tasks_per_project = n;
    }
    if let Some(secs) = budget_secs {
        config.defaults.run_budget_secs = secs;
    }
    let pipeline = PipelineConfig::try_from(&config)?;

    let storage = open_storage(db, &config).await?;
    let provider = BridgeProvider::new(config.provider.clone());
    let orchestrator = Orchestrator::new(&storage, &storage, &provider, pipeline, &config.provider);

    info!(
        max_projects = config.defaults.max_projects_per_run,
        max_tasks = config.defaults.max_tasks_per_project,
        budget_secs = config.defaults.run_budget_secs,
        "starting pipeline tick"
    );

    let progress = CliProgress::new();
    let outcome = orchestrator.run(&progress).await;
    progress.finish();
    let (report, error) = match outcome {
        Ok(report) => (report, None),
        Err(aborted) => (*aborted.report, Some(aborted.source)),
    };

    // Committed projects are reported even when a later one failed.
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run_report(&report);
    }
    match error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn print_run_report(report: &RunReport) {
    let elapsed = (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0;

    println!();
    if report.is_idle() && report.failed.is_none() {
        println!("  Nothing to do: no eligible project.");
        println!();
        return;
    }
    println!("  Run {}  ({elapsed:.1}s)", report.run_id);
    println!(
        "  Tasks: {} attempted, {} succeeded, {} failed",
        report.tasks_attempted(),
        report.tasks_succeeded(),
        report.tasks_failed()
    );
    for project in &report.projects {
        let stalled = if project.stalled { "  STALLED" } else { "" };
        println!(
            "  - {} ({}): {} -> {} [{}]{stalled}",
            project.title, project.project_id, project.from, project.to, project.verdict
        );
        for failure in &project.failures {
            println!("      {} failed: {}", failure.task_type, failure.reason);
        }
    }
    if report.budget_exhausted {
        println!("  Run budget exhausted; remaining work was deferred.");
    }
    if let Some(error) = &report.failed {
        println!("  Run aborted: {error}");
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_message("Selecting project");
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl RunProgress for CliProgress {
    fn project_started(&self, project: &Project, tasks: usize) {
        self.spinner.set_message(format!(
            "{} [{}]: {tasks} task(s)",
            project.title, project.stage
        ));
    }

    fn task_finished(&self, project: &Project, result: &TaskResult) {
        let status = match result.failure_reason() {
            None => "ok".to_string(),
            Some(reason) => reason.to_string(),
        };
        self.spinner
            .set_message(format!("{}: {} {status}", project.title, result.task_type()));
    }

    fn project_finished(&self, report: &ProjectReport) {
        self.spinner.println(format!(
            "  {}: {} -> {} ({})",
            report.title, report.from, report.to, report.verdict
        ));
    }
}

// ---------------------------------------------------------------------------
// project
// ---------------------------------------------------------------------------

async fn cmd_project_add(
    db: Option<&Path>,
    title: &str,
    description: &str,
    stage: &str,
) -> Result<()> {
    let stage: Stage = stage.parse()?;
    if title.trim().is_empty() {
        return Err(eyre!("project title must not be empty"));
    }

    let config = load_config()?;
    let storage = open_storage(db, &config).await?;
    let project = Project::new(title.trim(), description, stage);
    storage.create_project(&project).await?;

    info!(id = %project.id, %stage, "project added");
    println!("{}", project.id);
    Ok(())
}

async fn cmd_project_list(db: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage_readonly(db, &config).await?;
    let projects = storage.list_projects().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }
    if projects.is_empty() {
        println!("No projects yet. Add one with `researchflow project add --title ...`.");
        return Ok(());
    }

    println!("{:<36}  {:<14}  {:>8}  TITLE", "ID", "STAGE", "FAILURES");
    for p in &projects {
        let stage = if p.retry.stalled {
            format!("{} (stalled)", p.stage)
        } else {
            p.stage.to_string()
        };
        println!(
            "{:<36}  {:<14}  {:>8}  {}",
            p.id, stage, p.retry.consecutive_failures, p.title
        );
    }
    Ok(())
}

async fn cmd_project_show(db: Option<&Path>, id: &str, history: usize) -> Result<()> {
    let id: ProjectId = id
        .parse()
        .map_err(|e| eyre!("invalid project id '{id}': {e}"))?;

    let config = load_config()?;
    let storage = open_storage_readonly(db, &config).await?;
    let project = storage
        .get_project(&id)
        .await?
        .ok_or_else(|| eyre!("no project with id {id}"))?;
    let entries = storage.list_history(&id, Some(history)).await?;

    println!();
    println!("  {}", project.title);
    println!("  ID:       {}", project.id);
    println!("  Stage:    {}", project.stage);
    println!(
        "  Retry:    {} consecutive failure(s){}",
        project.retry.consecutive_failures,
        if project.retry.stalled { ", stalled" } else { "" }
    );
    println!("  Updated:  {}", project.updated_at.to_rfc3339());
    if !project.description.is_empty() {
        println!();
        println!("  {}", project.description);
    }
    println!();
    println!("  History:");
    for entry in &entries {
        println!(
            "    {}  {:<14} {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.kind.as_str(),
            entry.detail
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// extract
// ---------------------------------------------------------------------------

fn read_input(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read {}: {e}", path.display())),
        _ => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn cmd_extract(task: &str, input: Option<&Path>, json: bool) -> Result<()> {
    let task_type: TaskType = task.parse()?;
    let text = read_input(input)?;
    let config = load_config()?;
    let options = ExtractOptions {
        rescale: config.extraction.score_rescale,
    };

    let extraction = extract(&text, task_type, &options);
    let failure = validate(task_type.spec().rules, &extraction);

    if json {
        let value = serde_json::json!({
            "task_type": task_type,
            "valid": failure.is_none(),
            "failure_reason": failure.map(|f| f.to_string()),
            "confidence": extraction.confidence,
            "fields": extraction.outcome.fields(),
            "matched_by": extraction.matched_by,
            "issues": extraction.issues,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    println!("  Task:       {task_type}");
    match failure {
        None => println!("  Valid:      yes ({:?})", extraction.confidence),
        Some(reason) => println!("  Valid:      no ({reason})"),
    }
    for (field, value) in extraction.outcome.fields() {
        let strategy = extraction.matched_by.get(&field).copied().unwrap_or("-");
        println!("  {:<15} {value}  [{strategy}]", format!("{field}:"));
    }
    for issue in &extraction.issues {
        println!("  {:<15} {:?}", format!("{}:", issue.field), issue.kind);
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// ledger
// ---------------------------------------------------------------------------

async fn cmd_ledger_list(db: Option<&Path>, model: Option<&str>, json: bool) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage_readonly(db, &config).await?;
    let contributions = storage.list_contributions(model).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&contributions)?);
        return Ok(());
    }
    if contributions.is_empty() {
        println!("No contributions recorded.");
        return Ok(());
    }

    println!("{:<20}  {:<20}  {:<20}  REFERENCE", "RECORDED", "MODEL", "TASK");
    for c in &contributions {
        println!(
            "{:<20}  {:<20}  {:<20}  {}",
            c.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            c.model_id,
            c.task_type,
            c.reference
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    // Validate the stage and template tables along the way.
    PipelineConfig::try_from(&config)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
