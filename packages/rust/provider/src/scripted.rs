//! Provider that replays a fixed script of answers.
//!
//! Useful for offline runs and for exercising the pipeline without a model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use researchflow_shared::ProviderError;

use crate::{GenerateOptions, LoadConstraints, ModelHandle, ModelProvider};

#[derive(Debug, Clone)]
enum Step {
    Answer { text: String, delay: Duration },
    Fail(ProviderError),
}

/// Handle returned by [`ScriptedProvider::load`].
#[derive(Debug)]
pub struct ScriptedHandle {
    model_id: String,
}

impl ModelHandle for ScriptedHandle {
    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// [`ModelProvider`] answering prompts from a queue, in order.
///
/// Once the queue is empty every prompt gets the fallback answer, or an
/// inference error when there is none.
#[derive(Debug)]
pub struct ScriptedProvider {
    model_id: String,
    load_error: Option<ProviderError>,
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
    loads: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            load_error: None,
            steps: Mutex::new(VecDeque::new()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    /// Queue an answer.
    pub fn answer(self, text: impl Into<String>) -> Self {
        self.answer_after(Duration::ZERO, text)
    }

    /// Queue an answer that takes `delay` to arrive.
    pub fn answer_after(self, delay: Duration, text: impl Into<String>) -> Self {
        self.push(Step::Answer {
            text: text.into(),
            delay,
        })
    }

    /// Queue a generation failure.
    pub fn fail(self, error: ProviderError) -> Self {
        self.push(Step::Fail(error))
    }

    /// Make every `load` fail.
    pub fn fail_load(mut self, error: ProviderError) -> Self {
        self.load_error = Some(error);
        self
    }

    /// Answer given once the queue runs dry.
    pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
        self.fallback = Some(text.into());
        self
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn push(self, step: Step) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(step);
        self
    }
}

impl ModelProvider for ScriptedProvider {
    type Handle = ScriptedHandle;

    async fn load(&self, _constraints: &LoadConstraints) -> Result<ScriptedHandle, ProviderError> {
        if let Some(error) = &self.load_error {
            return Err(error.clone());
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedHandle {
            model_id: self.model_id.clone(),
        })
    }

    async fn generate(
        &self,
        _handle: &mut ScriptedHandle,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.to_string());

        let step = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match step {
            Some(Step::Answer { text, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(text)
            }
            Some(Step::Fail(error)) => Err(error),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ProviderError::InferenceError("script exhausted".into())),
        }
    }

    async fn release(&self, _handle: ScriptedHandle) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_falls_back() {
        let provider = ScriptedProvider::new("scripted")
            .answer("first")
            .fail(ProviderError::InferenceError("boom".into()))
            .with_fallback("later");
        let constraints = LoadConstraints { max_memory_mb: 1 };
        let options = GenerateOptions::default();

        let mut handle = provider.load(&constraints).await.unwrap();
        assert_eq!(handle.model_id(), "scripted");
        assert_eq!(
            provider.generate(&mut handle, "a", &options).await.unwrap(),
            "first"
        );
        assert!(provider.generate(&mut handle, "b", &options).await.is_err());
        assert_eq!(
            provider.generate(&mut handle, "c", &options).await.unwrap(),
            "later"
        );
        provider.release(handle).await;

        assert_eq!(provider.prompts(), vec!["a", "b", "c"]);
        assert_eq!(provider.load_count(), 1);
        assert_eq!(provider.release_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_script_without_fallback_errors() {
        let provider = ScriptedProvider::new("scripted");
        let mut handle = provider
            .load(&LoadConstraints { max_memory_mb: 1 })
            .await
            .unwrap();
        let err = provider
            .generate(&mut handle, "x", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InferenceError(_)));
    }

    #[tokio::test]
    async fn load_failure() {
        let provider = ScriptedProvider::new("scripted")
            .fail_load(ProviderError::ResourceExceeded("too big".into()));
        assert!(provider.load(&LoadConstraints { max_memory_mb: 1 }).await.is_err());
        assert_eq!(provider.load_count(), 0);
    }
}
