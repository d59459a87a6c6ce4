//! Task queue builder.
//!
//! Maps a project's stage to its ordered task types and renders each task's
//! prompt from a template. Output depends only on the project and the
//! configuration.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, instrument};

use researchflow_shared::{PipelineConfig, Project, Stage, Task, TaskType};

/// History entries rendered into `{history}`.
pub const PROMPT_HISTORY_ENTRIES: usize = 5;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder regex"));

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

const PROJECT_CONTEXT: &str = "\
Project: {title} ({project_id})
Stage: {stage}

Description:
{description}

Recent history:
{history}
";

/// Built-in prompt template for a task type.
pub fn builtin_template(task_type: TaskType) -> String {
    let instructions = match task_type {
        TaskType::DraftProposal => {
            "Draft a research proposal for this project.\n\n\
             Answer with these sections:\n\
             Strengths:\n- <what makes the idea worth pursuing>\n\
             Concerns:\n- <open risks>\n\
             Summary: <the proposal in one paragraph>"
        }
        TaskType::DesignExperiment => {
            "Design the experiment that would test this project's hypothesis.\n\n\
             Answer with these sections:\n\
             Concerns:\n- <threats to validity, one per line>\n\
             Summary: <the experimental design in one paragraph>"
        }
        TaskType::ReviewProposal => {
            "Review this research proposal as a critical referee.\n\n\
             Answer with these sections:\n\
             Score: <0-10>\n\
             Strengths:\n- <one per line>\n\
             Concerns:\n- <one per line>\n\
             Recommendation: <Accept | Revise | Reject>\n\
             Summary: <one paragraph>"
        }
        TaskType::RequestRevision => {
            "List the revisions this proposal needs before it can proceed.\n\n\
             Answer with these sections:\n\
             Concerns:\n- <one revision per line>\n\
             Summary: <what must change, in one paragraph>"
        }
        TaskType::PlanImplementation => {
            "Write an implementation plan for this project.\n\n\
             Answer with these sections:\n\
             Concerns:\n- <implementation risks>\n\
             Summary: <the plan in one paragraph>"
        }
        TaskType::ValidateResults => {
            "Assess whether the results support the project's claims.\n\n\
             Answer with these sections:\n\
             Score: <0-10>\n\
             Strengths:\n- <one per line>\n\
             Concerns:\n- <one per line>\n\
             Recommendation: <Accept | Revise | Reject>\n\
             Summary: <one paragraph>"
        }
    };
    format!("{PROJECT_CONTEXT}\n{instructions}\n")
}

/// Prompt templates per task type: built-ins with configured overrides.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: BTreeMap<TaskType, String>,
}

impl PromptTemplates {
    pub fn new(overrides: &BTreeMap<TaskType, String>) -> Self {
        let templates = TaskType::ALL
            .into_iter()
            .map(|t| {
                let template = overrides
                    .get(&t)
                    .cloned()
                    .unwrap_or_else(|| builtin_template(t));
                (t, template)
            })
            .collect();
        Self { templates }
    }

    pub fn get(&self, task_type: TaskType) -> &str {
        self.templates
            .get(&task_type)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Render the prompt for `task_type` against `project`.
    pub fn render(&self, task_type: TaskType, project: &Project) -> String {
        render(self.get(task_type), project)
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

/// Substitute `{project_id}`, `{title}`, `{description}`, `{stage}` and
/// `{history}`. Unknown placeholders are kept verbatim and substituted text
/// is never expanded again.
pub fn render(template: &str, project: &Project) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "project_id" => project.id.to_string(),
            "title" => project.title.clone(),
            "description" => project.description.clone(),
            "stage" => project.stage.to_string(),
            "history" => render_history(project),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

fn render_history(project: &Project) -> String {
    let skip = project.history.len().saturating_sub(PROMPT_HISTORY_ENTRIES);
    let lines: Vec<String> = project
        .history
        .iter()
        .skip(skip)
        .map(|r| {
            format!(
                "- {} {}: {}",
                r.created_at.format("%Y-%m-%d"),
                r.kind.as_str(),
                r.detail
            )
        })
        .collect();

    if lines.is_empty() {
        "(none)".into()
    } else {
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Queue builder
// ---------------------------------------------------------------------------

/// Stage → task mapping plus templates.
#[derive(Debug, Clone)]
pub struct TaskQueueBuilder {
    stage_tasks: BTreeMap<Stage, Vec<TaskType>>,
    templates: PromptTemplates,
}

impl TaskQueueBuilder {
    pub fn new(stage_tasks: BTreeMap<Stage, Vec<TaskType>>, templates: PromptTemplates) -> Self {
        Self {
            stage_tasks,
            templates,
        }
    }

    /// Task types configured for `stage`; empty when none are.
    pub fn task_types(&self, stage: Stage) -> &[TaskType] {
        self.stage_tasks
            .get(&stage)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Tasks for the project's current stage, ordered by priority then
    /// configured position, at most `max_tasks` of them.
    #[instrument(skip_all, fields(project = %project.id, stage = %project.stage, max_tasks = max_tasks))]
    pub fn build(&self, project: &Project, max_tasks: usize) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .task_types(project.stage)
            .iter()
            .map(|&task_type| Task {
                task_type,
                project_ref: project.id,
                prompt: self.templates.render(task_type, project),
                priority: task_type.spec().priority,
            })
            .collect();

        // Stable: equal priorities keep their configured order.
        tasks.sort_by_key(|t| t.priority);
        tasks.truncate(max_tasks);

        debug!(count = tasks.len(), "task queue built");
        tasks
    }
}

impl From<&PipelineConfig> for TaskQueueBuilder {
    fn from(config: &PipelineConfig) -> Self {
        Self::new(
            config.stage_tasks.clone(),
            PromptTemplates::new(&config.templates),
        )
    }
}

/// Build the task queue for `project` under `config`.
pub fn build_task_queue(project: &Project, config: &PipelineConfig, max_tasks: usize) -> Vec<Task> {
    TaskQueueBuilder::from(config).build(project, max_tasks)
}
