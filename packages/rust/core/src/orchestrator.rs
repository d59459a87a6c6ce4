//! Pipeline orchestrator.
//!
//! One run: pick leased projects in a fixed order, execute each project's
//! task queue through a single [`ConversationDriver`], reduce the results to
//! a stage decision and commit it with a compare-and-set write.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use researchflow_extract::ExtractOptions;
use researchflow_provider::{GenerateOptions, LoadConstraints, ModelProvider};
use researchflow_shared::{
    AdvanceSignal, Confidence, ContributionLedger, FailureReason, HistoryKind, HistoryRecord,
    PipelineConfig, Project, ProjectId, ProjectStore, ProviderConfig, Recommendation,
    ResearchFlowError, Result, RetryState, Stage, StageUpdate, TaskResult, TaskType,
};

use crate::driver::ConversationDriver;
use crate::queue::TaskQueueBuilder;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// How `advance` resolved a project's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// A decisive success moved the project one stage forward.
    Advance,
    /// A valid `Reject` moved the project one stage back.
    Regress,
    /// Valid results without a decisive signal, or nothing to run.
    Hold,
    /// No valid result; the retry counter went up.
    Retry,
    /// The same result set was already applied.
    AlreadyApplied,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::Regress => "regress",
            Self::Hold => "hold",
            Self::Retry => "retry",
            Self::AlreadyApplied => "already_applied",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of [`advance`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub from: Stage,
    pub to: Stage,
    pub retry: RetryState,
    /// Digest of the result set; `None` when there were no results.
    pub digest: Option<String>,
    pub verdict: Verdict,
}

impl Decision {
    /// Whether committing the decision writes anything.
    pub fn needs_write(&self) -> bool {
        self.digest.is_some() && self.verdict != Verdict::AlreadyApplied
    }
}

/// One failed task in a project report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub task_type: TaskType,
    pub reason: FailureReason,
}

/// What one run did to one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectReport {
    pub project_id: ProjectId,
    pub title: String,
    pub from: Stage,
    pub to: Stage,
    pub stalled: bool,
    pub verdict: Verdict,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<TaskFailure>,
}

impl ProjectReport {
    fn timed_out(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.reason == FailureReason::Timeout)
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub projects: Vec<ProjectReport>,
    pub budget_exhausted: bool,
    /// Store error that stopped the run early, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
}

impl RunReport {
    pub fn tasks_attempted(&self) -> usize {
        self.projects.iter().map(|p| p.attempted).sum()
    }

    pub fn tasks_succeeded(&self) -> usize {
        self.projects.iter().map(|p| p.succeeded).sum()
    }

    pub fn tasks_failed(&self) -> usize {
        self.projects.iter().map(|p| p.failed).sum()
    }

    /// Whether the run found nothing to do.
    pub fn is_idle(&self) -> bool {
        self.projects.is_empty()
    }
}

/// A run stopped by a store failure. `report` holds every project the run
/// finished before the failure.
#[derive(Debug, thiserror::Error)]
#[error("run {} aborted: {source}", .report.run_id)]
pub struct RunAborted {
    pub report: Box<RunReport>,
    pub source: ResearchFlowError,
}

/// Progress callbacks for a run.
pub trait RunProgress: Send + Sync {
    /// A project was selected and its queue built.
    fn project_started(&self, project: &Project, tasks: usize);
    /// A task produced a result (including timeouts).
    fn task_finished(&self, project: &Project, result: &TaskResult);
    /// The project's decision was committed.
    fn project_finished(&self, report: &ProjectReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl RunProgress for SilentProgress {
    fn project_started(&self, _project: &Project, _tasks: usize) {}
    fn task_finished(&self, _project: &Project, _result: &TaskResult) {}
    fn project_finished(&self, _report: &ProjectReport) {}
}

// ---------------------------------------------------------------------------
// Pure steps
// ---------------------------------------------------------------------------

/// Order candidates: non-stalled first, then earliest stage, then oldest
/// `updated_at`, then id.
pub fn order_candidates(mut projects: Vec<Project>) -> Vec<Project> {
    projects.sort_by(|a, b| {
        (a.retry.stalled, a.stage, a.updated_at, a.id).cmp(&(
            b.retry.stalled,
            b.stage,
            b.updated_at,
            b.id,
        ))
    });
    projects
}

/// The project the ordering rule picks, ignoring leases. `None` is the
/// normal idle outcome.
pub fn select_project(eligible: Vec<Project>) -> Option<Project> {
    order_candidates(eligible)
        .into_iter()
        .find(|p| !p.stage.is_terminal())
}

/// SHA-256 over the run id, then task type, raw text and validity of every
/// result, in order.
pub fn results_digest(run_id: &str, results: &[TaskResult]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update([0x1e]);
    for result in results {
        hasher.update(result.task_type().as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(result.raw_text().as_bytes());
        hasher.update([0x1f]);
        hasher.update([u8::from(result.is_valid())]);
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

/// Reduce a project's results from run `run_id` to a stage decision.
pub fn advance(
    project: &Project,
    run_id: &str,
    results: &[TaskResult],
    stall_threshold: u32,
) -> Decision {
    let from = project.stage;
    if results.is_empty() {
        return Decision {
            from,
            to: from,
            retry: project.retry,
            digest: None,
            verdict: Verdict::Hold,
        };
    }

    let digest = results_digest(run_id, results);
    if project.applied_digest.as_deref() == Some(digest.as_str()) {
        return Decision {
            from,
            to: from,
            retry: project.retry,
            digest: Some(digest),
            verdict: Verdict::AlreadyApplied,
        };
    }

    let valid: Vec<&TaskResult> = results.iter().filter(|r| r.is_valid()).collect();
    if valid.is_empty() {
        let consecutive_failures = project.retry.consecutive_failures.saturating_add(1);
        return Decision {
            from,
            to: from,
            retry: RetryState {
                consecutive_failures,
                stalled: consecutive_failures >= stall_threshold.max(1),
            },
            digest: Some(digest),
            verdict: Verdict::Retry,
        };
    }

    let (to, verdict) = if valid
        .iter()
        .any(|r| r.recommendation() == Some(Recommendation::Reject))
    {
        (from.previous(), Verdict::Regress)
    } else if valid.iter().any(|r| signals_advance(r)) {
        (from.next(), Verdict::Advance)
    } else {
        (from, Verdict::Hold)
    };

    Decision {
        from,
        to,
        retry: RetryState::default(),
        digest: Some(digest),
        verdict,
    }
}

/// Generative answers only count when their fields were found under a
/// label; a heuristic summary keeps the project where it is.
fn signals_advance(result: &TaskResult) -> bool {
    match result.task_type().spec().advance {
        AdvanceSignal::OnValid => {
            result.is_valid() && result.confidence() == Confidence::Labeled
        }
        AdvanceSignal::OnAccept => result.recommendation() == Some(Recommendation::Accept),
        AdvanceSignal::Never => false,
    }
}

/// Delay before retry `attempt` (0-based): `base * 2^attempt`, capped.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}

/// Ledger reference for a contribution: `<project_id>#<sha256(raw)[..16]>`.
pub fn contribution_reference(project_id: &ProjectId, raw_text: &str) -> String {
    let hash = format!("{:x}", Sha256::digest(raw_text.as_bytes()));
    format!("{project_id}#{}", &hash[..16])
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs the pipeline against a store, a ledger and a model provider.
pub struct Orchestrator<'a, S, L, P> {
    store: &'a S,
    ledger: &'a L,
    provider: &'a P,
    config: PipelineConfig,
    queue: TaskQueueBuilder,
    constraints: LoadConstraints,
    options: GenerateOptions,
}

impl<'a, S, L, P> Orchestrator<'a, S, L, P>
where
    S: ProjectStore,
    L: ContributionLedger,
    P: ModelProvider,
{
    pub fn new(
        store: &'a S,
        ledger: &'a L,
        provider: &'a P,
        config: PipelineConfig,
        provider_config: &ProviderConfig,
    ) -> Self {
        let queue = TaskQueueBuilder::from(&config);
        Self {
            store,
            ledger,
            provider,
            config,
            queue,
            constraints: LoadConstraints::from(provider_config),
            options: GenerateOptions::from(provider_config),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run.
    ///
    /// Only store failures abort the run; the model is released and the
    /// current project's lease dropped on every path. An aborted run still
    /// reports the projects it finished.
    #[instrument(skip_all, fields(max_projects = self.config.max_projects_per_run))]
    pub async fn run(
        &self,
        progress: &dyn RunProgress,
    ) -> std::result::Result<RunReport, RunAborted> {
        let run_id = Uuid::now_v7().to_string();
        let started_at = Utc::now();
        let deadline = Instant::now() + self.config.run_budget;
        info!(%run_id, budget_secs = self.config.run_budget.as_secs(), "starting run");

        let mut driver = ConversationDriver::new(
            self.provider,
            self.constraints,
            self.options,
            ExtractOptions {
                rescale: self.config.rescale,
            },
        );
        let mut projects = Vec::new();
        let outcome = self
            .run_projects(&run_id, deadline, &mut driver, progress, &mut projects)
            .await;
        driver.release().await;

        let (budget_exhausted, error) = match outcome {
            Ok(exhausted) => (exhausted, None),
            Err(e) => (false, Some(e)),
        };
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            projects,
            budget_exhausted,
            failed: error.as_ref().map(ToString::to_string),
        };
        info!(
            run_id = %report.run_id,
            projects = report.projects.len(),
            attempted = report.tasks_attempted(),
            succeeded = report.tasks_succeeded(),
            budget_exhausted = report.budget_exhausted,
            failed = report.failed.is_some(),
            "run finished"
        );
        match error {
            None => Ok(report),
            Some(source) => Err(RunAborted {
                report: Box::new(report),
                source,
            }),
        }
    }

    /// Process projects until the cap, the budget or the queue runs out.
    /// Returns whether the budget was exhausted; finished projects land in
    /// `reports` even when a later one fails.
    async fn run_projects(
        &self,
        run_id: &str,
        deadline: Instant,
        driver: &mut ConversationDriver<'_, P>,
        progress: &dyn RunProgress,
        reports: &mut Vec<ProjectReport>,
    ) -> Result<bool> {
        let mut processed = HashSet::new();

        while reports.len() < self.config.max_projects_per_run {
            if Instant::now() >= deadline {
                return Ok(true);
            }
            let Some(project) = self.acquire_next(run_id, &processed).await? else {
                debug!("no eligible project");
                break;
            };
            processed.insert(project.id);

            let id = project.id;
            let outcome = self
                .process_project(run_id, project, deadline, driver, progress)
                .await;
            self.release_lease(&id, run_id).await;

            let report = outcome?;
            progress.project_finished(&report);
            let timed_out = report.timed_out();
            reports.push(report);
            if timed_out {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Lease the best eligible project not yet handled in this run. A lost
    /// lease race re-reads the store and moves on to the next pick.
    async fn acquire_next(
        &self,
        run_id: &str,
        processed: &HashSet<ProjectId>,
    ) -> Result<Option<Project>> {
        let mut skipped = processed.clone();
        loop {
            let eligible: Vec<Project> = self
                .store
                .list_eligible()
                .await?
                .into_iter()
                .filter(|p| !skipped.contains(&p.id))
                .collect();
            let Some(candidate) = select_project(eligible) else {
                return Ok(None);
            };
            skipped.insert(candidate.id);

            if !self.store.acquire_lease(&candidate.id, run_id).await? {
                debug!(project = %candidate.id, "lease held by another run");
                continue;
            }
            match self.store.get_project(&candidate.id).await {
                Ok(Some(project)) if !project.stage.is_terminal() => return Ok(Some(project)),
                Ok(_) => self.release_lease(&candidate.id, run_id).await,
                Err(e) => {
                    self.release_lease(&candidate.id, run_id).await;
                    return Err(e);
                }
            }
        }
    }

    #[instrument(skip_all, fields(project = %project.id, stage = %project.stage))]
    async fn process_project(
        &self,
        run_id: &str,
        project: Project,
        deadline: Instant,
        driver: &mut ConversationDriver<'_, P>,
        progress: &dyn RunProgress,
    ) -> Result<ProjectReport> {
        let tasks = self
            .queue
            .build(&project, self.config.max_tasks_per_project);
        info!(title = %project.title, tasks = tasks.len(), "processing project");
        progress.project_started(&project, tasks.len());

        let mut results = Vec::with_capacity(tasks.len());
        let mut pending = tasks.into_iter();
        while let Some(task) = pending.next() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let finished = if remaining.is_zero() {
                None
            } else {
                tokio::time::timeout(remaining, driver.query(&task.prompt, task.task_type))
                    .await
                    .ok()
            };

            match finished {
                Some(result) => {
                    progress.task_finished(&project, &result);
                    results.push(result);
                }
                None => {
                    warn!(task = task.task_type.as_str(), "run budget exhausted");
                    let model_id = driver.model_id().map(String::from);
                    for task_type in std::iter::once(task.task_type)
                        .chain(pending.by_ref().map(|t| t.task_type))
                    {
                        let result = TaskResult::timed_out(task_type, model_id.clone());
                        progress.task_finished(&project, &result);
                        results.push(result);
                    }
                }
            }
        }

        self.record_contributions(&project.id, &results).await;

        let decision = advance(&project, run_id, &results, self.config.stall_threshold);
        debug!(
            verdict = %decision.verdict,
            from = %decision.from,
            to = %decision.to,
            "decision reached"
        );

        if decision.needs_write() {
            if let Err(e) = self.commit(run_id, &project, &results, &decision).await {
                self.append(
                    &project.id,
                    HistoryRecord::new(Some(run_id), HistoryKind::RunFailed, e.to_string()),
                )
                .await;
                return Err(e);
            }
        }

        Ok(project_report(&project, &results, &decision))
    }

    async fn record_contributions(&self, project_id: &ProjectId, results: &[TaskResult]) {
        let now = Utc::now();
        for result in results.iter().filter(|r| r.is_valid()) {
            let Some(model_id) = result.model_id() else {
                continue;
            };
            let reference = contribution_reference(project_id, result.raw_text());
            if let Err(e) = self
                .ledger
                .record_contribution(model_id, result.task_type(), &reference, now)
                .await
            {
                warn!(%reference, error = %e, "failed to record contribution");
            }
        }
    }

    /// Task history, then the stage write, then the transition entries.
    async fn commit(
        &self,
        run_id: &str,
        project: &Project,
        results: &[TaskResult],
        decision: &Decision,
    ) -> Result<()> {
        for result in results {
            let detail = match result.failure_reason() {
                None => format!("{} valid", result.task_type()),
                Some(reason) => format!("{} failed: {reason}", result.task_type()),
            };
            self.append(
                &project.id,
                HistoryRecord::new(Some(run_id), HistoryKind::TaskRecorded, detail),
            )
            .await;
        }

        let update = StageUpdate {
            expected: decision.from,
            stage: decision.to,
            retry: decision.retry,
            applied_digest: decision.digest.clone(),
        };
        self.write_stage(&project.id, &update).await?;

        if decision.from != decision.to {
            info!(from = %decision.from, to = %decision.to, verdict = %decision.verdict, "stage changed");
            self.append(
                &project.id,
                HistoryRecord::new(
                    Some(run_id),
                    HistoryKind::StageChanged,
                    format!("{}: {} -> {}", decision.verdict, decision.from, decision.to),
                )
                .with_transition(decision.from, decision.to),
            )
            .await;
        }
        if decision.retry.stalled && !project.retry.stalled {
            warn!(
                failures = decision.retry.consecutive_failures,
                "project stalled"
            );
            self.append(
                &project.id,
                HistoryRecord::new(
                    Some(run_id),
                    HistoryKind::Stalled,
                    format!(
                        "no valid result in {} consecutive runs",
                        decision.retry.consecutive_failures
                    ),
                ),
            )
            .await;
        }
        Ok(())
    }

    /// Compare-and-set with exponential backoff on retryable failures.
    async fn write_stage(&self, id: &ProjectId, update: &StageUpdate) -> Result<()> {
        let attempts = self.config.store_write_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.store.set_stage(id, update).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable_write() => {
                    warn!(attempt = attempt + 1, attempts, error = %e, "stage write failed");
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        tokio::time::sleep(backoff_delay(
                            attempt,
                            self.config.store_backoff_base,
                            self.config.store_backoff_max,
                        ))
                        .await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(ResearchFlowError::StoreWriteExhausted {
            project_id: id.to_string(),
            attempts,
            last_error,
        })
    }

    async fn append(&self, id: &ProjectId, record: HistoryRecord) {
        if let Err(e) = self.store.append_history(id, &record).await {
            warn!(project = %id, kind = record.kind.as_str(), error = %e, "failed to append history");
        }
    }

    async fn release_lease(&self, id: &ProjectId, run_id: &str) {
        if let Err(e) = self.store.release_lease(id, run_id).await {
            warn!(project = %id, error = %e, "failed to release lease");
        }
    }
}

fn project_report(project: &Project, results: &[TaskResult], decision: &Decision) -> ProjectReport {
    let failures: Vec<TaskFailure> = results
        .iter()
        .filter_map(|r| {
            r.failure_reason().map(|reason| TaskFailure {
                task_type: r.task_type(),
                reason,
            })
        })
        .collect();
    ProjectReport {
        project_id: project.id,
        title: project.title.clone(),
        from: decision.from,
        to: decision.to,
        stalled: decision.retry.stalled,
        verdict: decision.verdict,
        attempted: results.len(),
        succeeded: results.len() - failures.len(),
        failed: failures.len(),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use researchflow_shared::ReviewOutcome;

    const RUN: &str = "run-1";

    fn project(stage: Stage) -> Project {
        Project::new("Sparse attention", "", stage)
    }

    fn review(recommendation: Recommendation) -> TaskResult {
        TaskResult::extracted(
            TaskType::ReviewProposal,
            format!("Recommendation: {}", recommendation.as_str()),
            ReviewOutcome {
                score: Some(0.85),
                recommendation,
                ..ReviewOutcome::default()
            },
            Confidence::Labeled,
            None,
            Some("m1".into()),
        )
    }

    fn generated(task_type: TaskType, text: &str) -> TaskResult {
        TaskResult::extracted(
            task_type,
            text.into(),
            ReviewOutcome::default(),
            Confidence::Labeled,
            None,
            Some("m1".into()),
        )
    }

    fn invalid(task_type: TaskType) -> TaskResult {
        TaskResult::provider_failure(task_type, String::new(), None)
    }

    #[test]
    fn accept_advances_reject_regresses() {
        let p = project(Stage::Review);

        let accepted = advance(&p, RUN, &[review(Recommendation::Accept)], 3);
        assert_eq!(accepted.verdict, Verdict::Advance);
        assert_eq!(accepted.to, Stage::Implementation);

        let rejected = advance(&p, RUN, &[review(Recommendation::Reject)], 3);
        assert_eq!(rejected.verdict, Verdict::Regress);
        assert_eq!(rejected.to, Stage::Design);
    }

    #[test]
    fn reject_wins_over_accept() {
        let p = project(Stage::Validation);
        let results = [
            review(Recommendation::Accept),
            review(Recommendation::Reject),
        ];
        assert_eq!(advance(&p, RUN, &results, 3).to, Stage::Implementation);
    }

    #[test]
    fn regression_saturates_at_backlog() {
        let p = project(Stage::Backlog);
        let decision = advance(&p, RUN, &[review(Recommendation::Reject)], 3);
        assert_eq!(decision.verdict, Verdict::Regress);
        assert_eq!(decision.to, Stage::Backlog);
    }

    #[test]
    fn revise_holds_and_resets_retry() {
        let mut p = project(Stage::Review);
        p.retry = RetryState {
            consecutive_failures: 2,
            stalled: true,
        };
        let decision = advance(&p, RUN, &[review(Recommendation::Revise)], 3);
        assert_eq!(decision.verdict, Verdict::Hold);
        assert_eq!(decision.to, Stage::Review);
        assert_eq!(decision.retry, RetryState::default());
    }

    #[test]
    fn generative_tasks_advance_on_validity() {
        let p = project(Stage::Backlog);
        let draft = [generated(TaskType::DraftProposal, "Summary: x")];
        let decision = advance(&p, RUN, &draft, 3);
        assert_eq!(decision.to, Stage::Design);

        // A revision request never advances on its own.
        let p = project(Stage::Review);
        let decision = advance(&p, RUN, &[generated(TaskType::RequestRevision, "Concerns:")], 3);
        assert_eq!(decision.verdict, Verdict::Hold);
    }

    #[test]
    fn unlabeled_generative_answer_holds() {
        let p = project(Stage::Backlog);
        let answer = crate::driver::classify(
            TaskType::DraftProposal,
            "I'm sorry, I cannot help with that.",
            &ExtractOptions::default(),
            Some("m1".into()),
        );
        assert!(answer.is_valid());
        assert_eq!(answer.confidence(), Confidence::Heuristic);

        let decision = advance(&p, RUN, &[answer], 3);
        assert_eq!(decision.verdict, Verdict::Hold);
        assert_eq!(decision.to, Stage::Backlog);
    }

    #[test]
    fn invalid_results_count_toward_stall() {
        let mut p = project(Stage::Design);
        let results = [invalid(TaskType::DesignExperiment)];

        let first = advance(&p, RUN, &results, 2);
        assert_eq!(first.verdict, Verdict::Retry);
        assert_eq!(first.to, Stage::Design);
        assert_eq!(first.retry.consecutive_failures, 1);
        assert!(!first.retry.stalled);

        p.retry = first.retry;
        let again = [
            invalid(TaskType::DesignExperiment),
            invalid(TaskType::DesignExperiment),
        ];
        let second = advance(&p, RUN, &again, 2);
        assert_eq!(second.retry.consecutive_failures, 2);
        assert!(second.retry.stalled);
    }

    #[test]
    fn empty_queue_holds_without_write() {
        let p = project(Stage::Complete);
        let decision = advance(&p, RUN, &[], 3);
        assert_eq!(decision.verdict, Verdict::Hold);
        assert!(!decision.needs_write());
    }

    #[test]
    fn same_results_apply_once() {
        let mut p = project(Stage::Review);
        let results = [review(Recommendation::Accept)];
        let first = advance(&p, RUN, &results, 3);
        assert!(first.needs_write());

        p.applied_digest = first.digest.clone();
        let again = advance(&p, RUN, &results, 3);
        assert_eq!(again.verdict, Verdict::AlreadyApplied);
        assert_eq!(again.to, Stage::Review);
        assert!(!again.needs_write());
    }

    #[test]
    fn digest_covers_text_type_and_validity() {
        let a = results_digest(RUN, &[generated(TaskType::DraftProposal, "x")]);
        assert_eq!(a, results_digest(RUN, &[generated(TaskType::DraftProposal, "x")]));
        assert_ne!(a, results_digest(RUN, &[generated(TaskType::DraftProposal, "y")]));
        assert_ne!(a, results_digest(RUN, &[generated(TaskType::PlanImplementation, "x")]));
        assert_ne!(
            a,
            results_digest(RUN, &[TaskResult::provider_failure(
                TaskType::DraftProposal,
                "x".into(),
                None
            )])
        );
        // Identical output from a later run is a new result set.
        assert_ne!(a, results_digest("run-2", &[generated(TaskType::DraftProposal, "x")]));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn ordering_prefers_unstalled_then_stage_then_age() {
        let now = Utc::now();
        let mut stalled = project(Stage::Backlog);
        stalled.retry.stalled = true;
        let mut old_review = project(Stage::Review);
        old_review.updated_at = now - ChronoDuration::hours(2);
        let mut new_review = project(Stage::Review);
        new_review.updated_at = now;
        let design = project(Stage::Design);

        let ordered = order_candidates(vec![
            stalled.clone(),
            new_review.clone(),
            design.clone(),
            old_review.clone(),
        ]);
        let ids: Vec<_> = ordered.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![design.id, old_review.id, new_review.id, stalled.id]);

        assert_eq!(select_project(ordered).map(|p| p.id), Some(design.id));
        assert!(select_project(Vec::new()).is_none());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        assert_eq!(backoff_delay(0, base, max), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, base, max), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, base, max), Duration::from_millis(400));
        assert_eq!(backoff_delay(3, base, max), max);
        assert_eq!(backoff_delay(40, base, max), max);
    }

    #[test]
    fn contribution_reference_format() {
        let id = ProjectId::new();
        let reference = contribution_reference(&id, "Summary: x");
        let (prefix, hash) = reference.split_once('#').unwrap();
        assert_eq!(prefix, id.to_string());
        assert_eq!(hash.len(), 16);
        assert_eq!(reference, contribution_reference(&id, "Summary: x"));
    }

    #[test]
    fn report_counts_failures() {
        let p = project(Stage::Review);
        let results = [
            review(Recommendation::Accept),
            TaskResult::timed_out(TaskType::RequestRevision, None),
        ];
        let decision = advance(&p, RUN, &results, 3);
        let report = project_report(&p, &results, &decision);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(report.timed_out());
        assert_eq!(report.to, Stage::Implementation);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn result() -> impl Strategy<Value = TaskResult> {
            prop_oneof![
                Just(review(Recommendation::Accept)),
                Just(review(Recommendation::Reject)),
                Just(review(Recommendation::Revise)),
                Just(generated(TaskType::DraftProposal, "Summary: a")),
                Just(generated(TaskType::RequestRevision, "Concerns:")),
                Just(invalid(TaskType::ReviewProposal)),
                Just(TaskResult::timed_out(TaskType::RequestRevision, None)),
            ]
        }

        fn stage() -> impl Strategy<Value = Stage> {
            prop::sample::select(Stage::ALL.to_vec())
        }

        proptest! {
            #[test]
            fn advance_is_idempotent(
                stage in stage(),
                results in prop::collection::vec(result(), 0..5),
                threshold in 1u32..5,
            ) {
                let mut p = project(stage);
                let first = advance(&p, RUN, &results, threshold);
                prop_assert!(first.to == first.from
                    || first.to == first.from.next()
                    || first.to == first.from.previous());

                p.stage = first.to;
                p.retry = first.retry;
                p.applied_digest = first.digest.clone().or(p.applied_digest.clone());
                let second = advance(&p, RUN, &results, threshold);
                prop_assert_eq!(second.to, first.to);
                prop_assert_eq!(second.retry, first.retry);
                prop_assert!(!second.needs_write());
            }

            #[test]
            fn all_invalid_never_moves(
                stage in stage(),
                n in 1usize..5,
            ) {
                let p = project(stage);
                let results: Vec<_> = (0..n).map(|_| invalid(TaskType::ReviewProposal)).collect();
                let decision = advance(&p, RUN, &results, 3);
                prop_assert_eq!(decision.to, stage);
                prop_assert_eq!(decision.verdict, Verdict::Retry);
            }
        }
    }
}
