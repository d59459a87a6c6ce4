//! Subprocess model bridge.
//!
//! Spawns `<bridge_cmd> <bridge_args..> --model <id>` and talks JSON lines
//! over stdin/stdout: the bridge announces `ready`, then answers each
//! `generate` request with a `result` or `error`, and exits on `shutdown`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, instrument, warn};

use researchflow_shared::{ProviderConfig, ProviderError};

use crate::{GenerateOptions, LoadConstraints, ModelHandle, ModelProvider, select_model};

/// How long a freshly spawned bridge has to announce itself.
const READY_TIMEOUT: Duration = Duration::from_secs(120);
/// How long a bridge has to exit after `shutdown` before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// Request message sent to the bridge.
#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Generate {
        id: String,
        prompt: &'a str,
        max_tokens: u32,
        temperature: f32,
    },
    Shutdown,
}

/// Response message received from the bridge.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready {
        #[serde(default)]
        model: Option<String>,
    },
    Result {
        id: String,
        result: GenerateResult,
    },
    Error {
        #[serde(default)]
        id: Option<String>,
        error: String,
    },
}

/// Completion payload from the bridge.
#[derive(Debug, Clone, serde::Deserialize)]
struct GenerateResult {
    text: String,
    #[serde(default)]
    tokens_in: u64,
    #[serde(default)]
    tokens_out: u64,
    #[serde(default)]
    latency_ms: u64,
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

/// A running bridge process with one model loaded.
#[derive(Debug)]
pub struct BridgeHandle {
    model_id: String,
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
}

impl ModelHandle for BridgeHandle {
    fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl BridgeHandle {
    async fn write_message(&mut self, msg: &RequestMessage<'_>) -> std::io::Result<()> {
        let mut json = serde_json::to_string(msg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        json.push('\n');
        self.stdin.write_all(json.as_bytes()).await?;
        self.stdin.flush().await
    }

    /// Next protocol message; `None` on end of stream.
    ///
    /// Lines that are not protocol messages (library banners, progress
    /// output) are logged and skipped.
    async fn read_message(&mut self) -> Result<Option<ResponseMessage>, String> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| format!("bridge read error: {e}"))?;
            if read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => debug!(
                    error = %e,
                    line = truncate(trimmed, 200),
                    "skipping non-protocol bridge output"
                ),
            }
        }
    }

    async fn wait_for_ready(&mut self) -> Result<(), ProviderError> {
        match self.read_message().await.map_err(ProviderError::LoadFailure)? {
            Some(ResponseMessage::Ready { model }) => {
                info!(model = model.as_deref().unwrap_or(&self.model_id), "bridge is ready");
                Ok(())
            }
            Some(ResponseMessage::Error { error, .. }) => Err(ProviderError::LoadFailure(error)),
            Some(other) => Err(ProviderError::LoadFailure(format!(
                "expected ready message, got {other:?}"
            ))),
            None => Err(ProviderError::LoadFailure(
                "bridge exited before becoming ready".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// [`ModelProvider`] backed by a bridge subprocess.
#[derive(Debug, Clone)]
pub struct BridgeProvider {
    config: ProviderConfig,
}

impl BridgeProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    fn command(&self, model_id: &str) -> Command {
        let mut cmd = Command::new(&self.config.bridge_cmd);
        cmd.args(&self.config.bridge_args)
            .arg("--model")
            .arg(model_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // Bridge logs go to our stderr.
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(PathBuf::from(dir));
        }
        cmd
    }
}

impl ModelProvider for BridgeProvider {
    type Handle = BridgeHandle;

    #[instrument(skip_all, fields(budget_mb = constraints.max_memory_mb))]
    async fn load(&self, constraints: &LoadConstraints) -> Result<BridgeHandle, ProviderError> {
        let model = select_model(&self.config.models, constraints)?;
        info!(
            cmd = %self.config.bridge_cmd,
            model = %model.id,
            size_mb = model.size_mb,
            "spawning model bridge"
        );

        let mut child = self.command(&model.id).spawn().map_err(|e| {
            ProviderError::LoadFailure(format!(
                "failed to spawn bridge: {e}. Is `{}` installed?",
                self.config.bridge_cmd
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::LoadFailure("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::LoadFailure("failed to capture bridge stdout".into()))?;

        let mut handle = BridgeHandle {
            model_id: model.id,
            child,
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
        };

        match tokio::time::timeout(READY_TIMEOUT, handle.wait_for_ready()).await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                let _ = handle.child.kill().await;
                Err(e)
            }
            Err(_) => {
                let _ = handle.child.kill().await;
                Err(ProviderError::LoadFailure(format!(
                    "bridge not ready after {}s",
                    READY_TIMEOUT.as_secs()
                )))
            }
        }
    }

    async fn generate(
        &self,
        handle: &mut BridgeHandle,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        handle.request_counter += 1;
        let id = format!("req-{}", handle.request_counter);

        let request = RequestMessage::Generate {
            id: id.clone(),
            prompt,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };
        handle.write_message(&request).await.map_err(|e| {
            ProviderError::InferenceError(format!("failed to write to bridge stdin: {e}"))
        })?;

        loop {
            let msg = handle
                .read_message()
                .await
                .map_err(ProviderError::InferenceError)?;
            match msg {
                Some(ResponseMessage::Result {
                    id: resp_id,
                    result,
                }) if resp_id == id => {
                    debug!(
                        id = %id,
                        tokens_in = result.tokens_in,
                        tokens_out = result.tokens_out,
                        latency_ms = result.latency_ms,
                        "generation complete"
                    );
                    return Ok(result.text);
                }
                Some(ResponseMessage::Error {
                    id: Some(resp_id),
                    error,
                }) if resp_id == id => return Err(ProviderError::InferenceError(error)),
                Some(ResponseMessage::Error { id: None, error }) => {
                    return Err(ProviderError::InferenceError(error));
                }
                // Answers to earlier requests that were given up on.
                Some(ResponseMessage::Error {
                    id: Some(resp_id), ..
                })
                | Some(ResponseMessage::Result { id: resp_id, .. }) => {
                    warn!(expected = %id, got = %resp_id, "skipping stale bridge response");
                }
                Some(ResponseMessage::Ready { .. }) => {
                    warn!("skipping unexpected ready message during generation");
                }
                None => {
                    return Err(ProviderError::InferenceError(
                        "bridge closed stdout unexpectedly".into(),
                    ));
                }
            }
        }
    }

    async fn release(&self, mut handle: BridgeHandle) {
        if let Err(e) = handle.write_message(&RequestMessage::Shutdown).await {
            debug!("bridge shutdown write failed: {e}");
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, handle.child.wait()).await {
            Ok(Ok(status)) => info!(?status, model = %handle.model_id, "bridge exited"),
            Ok(Err(e)) => warn!("bridge wait error: {e}"),
            Err(_) => {
                warn!(model = %handle.model_id, "bridge ignored shutdown, killing");
                if let Err(e) = handle.child.kill().await {
                    warn!("bridge kill failed: {e}");
                }
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
