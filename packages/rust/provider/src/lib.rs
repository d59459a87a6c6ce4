//! Model provider seam.
//!
//! [`ModelProvider`] loads one model per run and generates text from it. The
//! handle it returns is passed by `&mut`, so a loaded model never serves two
//! prompts at once. [`BridgeProvider`] drives a local model through a
//! JSON-lines subprocess; [`ScriptedProvider`] replays canned answers.

mod bridge;
mod scripted;

pub use bridge::{BridgeHandle, BridgeProvider};
pub use scripted::{ScriptedHandle, ScriptedProvider};

use researchflow_shared::{ModelCandidate, ProviderConfig, ProviderError};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Limits a model must satisfy to be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConstraints {
    pub max_memory_mb: u64,
}

impl From<&ProviderConfig> for LoadConstraints {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            max_memory_mb: config.max_memory_mb,
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&ProviderConfig> for GenerateOptions {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::from(&ProviderConfig::default())
    }
}

/// A loaded model.
pub trait ModelHandle {
    /// Identifier recorded with every contribution the model makes.
    fn model_id(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Source of generated text.
#[allow(async_fn_in_trait)]
pub trait ModelProvider {
    type Handle: ModelHandle;

    /// Load a model that fits `constraints`.
    ///
    /// Fails with [`ProviderError::ResourceExceeded`] when nothing fits and
    /// [`ProviderError::LoadFailure`] when the model cannot be started.
    async fn load(&self, constraints: &LoadConstraints) -> Result<Self::Handle, ProviderError>;

    /// Generate a completion for `prompt`. Degenerate output is an empty
    /// string, not an error.
    async fn generate(
        &self,
        handle: &mut Self::Handle,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, ProviderError>;

    /// Unload the model. Never fails; problems are logged.
    async fn release(&self, handle: Self::Handle);
}

/// Largest candidate whose size fits the memory budget.
pub fn select_model(
    candidates: &[ModelCandidate],
    constraints: &LoadConstraints,
) -> Result<ModelCandidate, ProviderError> {
    candidates
        .iter()
        .filter(|c| c.size_mb <= constraints.max_memory_mb)
        .max_by(|a, b| a.size_mb.cmp(&b.size_mb).then_with(|| b.id.cmp(&a.id)))
        .cloned()
        .ok_or_else(|| {
            let smallest = candidates.iter().map(|c| c.size_mb).min();
            ProviderError::ResourceExceeded(match smallest {
                Some(size) => format!(
                    "smallest candidate needs {size} MB, budget is {} MB",
                    constraints.max_memory_mb
                ),
                None => "no candidate models configured".into(),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<ModelCandidate> {
        vec![
            ModelCandidate {
                id: "small".into(),
                size_mb: 2_000,
            },
            ModelCandidate {
                id: "large".into(),
                size_mb: 12_000,
            },
            ModelCandidate {
                id: "medium".into(),
                size_mb: 6_000,
            },
        ]
    }

    #[test]
    fn picks_largest_that_fits() {
        let budget = LoadConstraints { max_memory_mb: 8_000 };
        let picked = select_model(&candidates(), &budget).unwrap();
        assert_eq!(picked.id, "medium");

        let picked =
            select_model(&candidates(), &LoadConstraints { max_memory_mb: 12_000 }).unwrap();
        assert_eq!(picked.id, "large");
    }

    #[test]
    fn nothing_fits() {
        let budget = LoadConstraints { max_memory_mb: 1_000 };
        let err = select_model(&candidates(), &budget).unwrap_err();
        assert!(matches!(err, ProviderError::ResourceExceeded(ref m) if m.contains("2000 MB")));

        let err = select_model(&[], &LoadConstraints { max_memory_mb: 1_000 }).unwrap_err();
        assert!(matches!(err, ProviderError::ResourceExceeded(_)));
    }

    #[test]
    fn equal_sizes_break_ties_by_id() {
        let tied = vec![
            ModelCandidate {
                id: "b".into(),
                size_mb: 4_000,
            },
            ModelCandidate {
                id: "a".into(),
                size_mb: 4_000,
            },
        ];
        let picked = select_model(&tied, &LoadConstraints { max_memory_mb: 4_000 }).unwrap();
        assert_eq!(picked.id, "a");
    }

    #[test]
    fn options_follow_config() {
        let config = ProviderConfig {
            max_tokens: 64,
            temperature: 0.7,
            max_memory_mb: 512,
            ..Default::default()
        };
        assert_eq!(GenerateOptions::from(&config).max_tokens, 64);
        assert_eq!(LoadConstraints::from(&config).max_memory_mb, 512);
    }
}
