//! Conversation driver.
//!
//! Owns the loaded model for one run, sends prompts, strips an echoed prompt
//! and turns the answer into a validated [`TaskResult`].

use tracing::{debug, info, warn};

use researchflow_extract::{ExtractOptions, Extraction, extract};
use researchflow_provider::{GenerateOptions, LoadConstraints, ModelHandle, ModelProvider};
use researchflow_shared::{
    Constraint, FailureReason, Field, FieldRule, IssueKind, ProviderError, TaskResult, TaskType,
};

enum ModelState<H> {
    Unloaded,
    Loaded(H),
    Failed(ProviderError),
}

/// Drives one model through the prompts of a run.
///
/// The model is loaded on the first query. A failed load is remembered and
/// every later query fails fast with a provider error.
pub struct ConversationDriver<'p, P: ModelProvider> {
    provider: &'p P,
    constraints: LoadConstraints,
    options: GenerateOptions,
    extract: ExtractOptions,
    state: ModelState<P::Handle>,
}

impl<'p, P: ModelProvider> ConversationDriver<'p, P> {
    pub fn new(
        provider: &'p P,
        constraints: LoadConstraints,
        options: GenerateOptions,
        extract: ExtractOptions,
    ) -> Self {
        Self {
            provider,
            constraints,
            options,
            extract,
            state: ModelState::Unloaded,
        }
    }

    /// Identifier of the loaded model, if any.
    pub fn model_id(&self) -> Option<&str> {
        match &self.state {
            ModelState::Loaded(handle) => Some(handle.model_id()),
            _ => None,
        }
    }

    /// Send `prompt` and classify the answer for `task_type`.
    ///
    /// Provider failures and empty answers become invalid results carrying
    /// [`FailureReason::ProviderError`]; this never returns an error.
    pub async fn query(&mut self, prompt: &str, task_type: TaskType) -> TaskResult {
        let handle = match ensure_loaded(self.provider, &self.constraints, &mut self.state).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(task = task_type.as_str(), error = %e, "model unavailable");
                return TaskResult::provider_failure(task_type, String::new(), None);
            }
        };
        let model_id = handle.model_id().to_string();

        let raw = match self.provider.generate(handle, prompt, &self.options).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(task = task_type.as_str(), model = %model_id, error = %e, "generation failed");
                return TaskResult::provider_failure(task_type, String::new(), Some(model_id));
            }
        };

        let answer = strip_echo(&raw, prompt);
        if answer.trim().is_empty() {
            warn!(task = task_type.as_str(), model = %model_id, "empty model output");
            return TaskResult::provider_failure(task_type, raw, Some(model_id));
        }

        classify(task_type, answer, &self.extract, Some(model_id))
    }

    /// Unload the model if one was loaded.
    pub async fn release(self) {
        if let ModelState::Loaded(handle) = self.state {
            info!(model = handle.model_id(), "releasing model");
            self.provider.release(handle).await;
        }
    }
}

async fn ensure_loaded<'s, P: ModelProvider>(
    provider: &P,
    constraints: &LoadConstraints,
    state: &'s mut ModelState<P::Handle>,
) -> Result<&'s mut P::Handle, ProviderError> {
    if matches!(state, ModelState::Unloaded) {
        *state = match provider.load(constraints).await {
            Ok(handle) => {
                info!(model = handle.model_id(), "model loaded");
                ModelState::Loaded(handle)
            }
            Err(e) => ModelState::Failed(e),
        };
    }
    match state {
        ModelState::Loaded(handle) => Ok(handle),
        ModelState::Failed(e) => Err(e.clone()),
        ModelState::Unloaded => Err(ProviderError::LoadFailure("model not loaded".into())),
    }
}

/// Remove an exact verbatim copy of `prompt` from the start of `raw`.
pub fn strip_echo<'a>(raw: &'a str, prompt: &str) -> &'a str {
    if prompt.is_empty() {
        return raw;
    }
    raw.strip_prefix(prompt).unwrap_or(raw)
}

/// Extract and validate an answer for `task_type`.
pub fn classify(
    task_type: TaskType,
    answer: &str,
    options: &ExtractOptions,
    model_id: Option<String>,
) -> TaskResult {
    let extraction = extract(answer, task_type, options);
    let failure = validate(task_type.spec().rules, &extraction);
    debug!(
        task = task_type.as_str(),
        valid = failure.is_none(),
        confidence = ?extraction.confidence,
        "answer classified"
    );
    TaskResult::extracted(
        task_type,
        answer.to_string(),
        extraction.outcome,
        extraction.confidence,
        failure,
        model_id,
    )
}

/// First violated rule, or `None` when every rule holds.
pub fn validate(rules: &[FieldRule], extraction: &Extraction) -> Option<FailureReason> {
    rules.iter().find_map(|rule| check(rule, extraction))
}

fn check(rule: &FieldRule, extraction: &Extraction) -> Option<FailureReason> {
    let field = rule.field;
    match extraction.issue(field) {
        Some(IssueKind::Missing) => return Some(FailureReason::MissingField(field)),
        Some(IssueKind::Malformed) => return Some(FailureReason::ConstraintViolation(field)),
        None => {}
    }

    let outcome = &extraction.outcome;
    let present = match field {
        Field::Score => outcome.score.is_some(),
        Field::Strengths => outcome.strengths.is_some(),
        Field::Concerns => outcome.concerns.is_some(),
        Field::Recommendation => extraction.matched_by.contains_key(&field),
        Field::Summary => outcome.summary.is_some(),
    };
    if !present {
        return Some(FailureReason::MissingField(field));
    }

    let holds = match rule.constraint {
        Constraint::Present => true,
        Constraint::UnitRange => outcome.score.is_some_and(|s| (0.0..=1.0).contains(&s)),
        Constraint::KnownVerdict => {
            outcome.recommendation != researchflow_shared::Recommendation::Unknown
        }
        Constraint::NonEmpty => match field {
            Field::Strengths => non_blank(outcome.strengths.as_deref()),
            Field::Concerns => non_blank(outcome.concerns.as_deref()),
            Field::Summary => outcome
                .summary
                .as_ref()
                .is_some_and(|s| !s.text.trim().is_empty()),
            _ => true,
        },
    };
    (!holds).then_some(FailureReason::ConstraintViolation(field))
}

fn non_blank(items: Option<&[String]>) -> bool {
    items.is_some_and(|items| items.iter().any(|i| !i.trim().is_empty()))
}
