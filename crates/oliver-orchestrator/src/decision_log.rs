use chrono::{DateTime, Utc};
use oliver_core::{preview, Metadata};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Characters kept from prompts and responses in a decision entry.
pub const PREVIEW_CHARS: usize = 200;

/// What produced a decision entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// One agent execution.
    AgentSpawn,
    /// One workflow step, after its retries.
    WorkflowStep,
    /// One whole workflow run.
    WorkflowExecution,
}

/// One decision handed to the style-learning sink.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEntry {
    /// When the entry was created.
    pub timestamp: DateTime<Utc>,
    /// Source of the entry.
    pub decision_type: DecisionType,
    /// `"provider/model"` that served the call; empty when none did.
    pub provider: String,
    /// First [`PREVIEW_CHARS`] characters of the prompt.
    pub prompt_preview: String,
    /// First [`PREVIEW_CHARS`] characters of the response.
    pub response_preview: String,
    /// Request metadata plus ids and status.
    pub metadata: Metadata,
}

impl DecisionEntry {
    /// Entry stamped now, with the prompt and response truncated to previews.
    pub fn new(
        decision_type: DecisionType,
        provider: impl Into<String>,
        prompt: &str,
        response: &str,
        metadata: Metadata,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            decision_type,
            provider: provider.into(),
            prompt_preview: preview(prompt, PREVIEW_CHARS),
            response_preview: preview(response, PREVIEW_CHARS),
            metadata,
        }
    }
}

/// Fire-and-forget receiver of decisions. Implementations must never fail the caller.
pub trait DecisionSink: Send + Sync {
    /// Accept one entry without blocking.
    fn record(&self, entry: DecisionEntry);
}

/// Discards every entry.
pub struct NoopDecisionSink;

impl DecisionSink for NoopDecisionSink {
    fn record(&self, _entry: DecisionEntry) {}
}

enum LogMessage {
    Entry(DecisionEntry),
    Flush(oneshot::Sender<()>),
}

/// Appends decisions as JSON lines to `<dir>/decisions.jsonl` from a background task.
///
/// Must be created inside a Tokio runtime.
pub struct JsonlDecisionLog {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl JsonlDecisionLog {
    /// Start the writer task; the directory is created on first use.
    pub fn new(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(dir = %log_dir.display(), error = %e, "Cannot create decision log directory");
            }
            let log_file = log_dir.join("decisions.jsonl");

            while let Some(message) = rx.recv().await {
                let entry = match message {
                    LogMessage::Entry(entry) => entry,
                    LogMessage::Flush(ack) => {
                        let _ = ack.send(());
                        continue;
                    }
                };
                let line = match serde_json::to_string(&entry) {
                    Ok(line) => format!("{line}\n"),
                    Err(e) => {
                        warn!(error = %e, "Cannot serialize decision entry");
                        continue;
                    }
                };
                let written = async {
                    let mut file = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&log_file)
                        .await?;
                    file.write_all(line.as_bytes()).await?;
                    file.flush().await
                }
                .await;
                if let Err(e) = written {
                    warn!(file = %log_file.display(), error = %e, "Failed to write decision entry");
                }
            }
        });

        Self { tx }
    }

    /// Wait until every entry recorded so far has been written.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(LogMessage::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

impl DecisionSink for JsonlDecisionLog {
    fn record(&self, entry: DecisionEntry) {
        debug!(
            decision_type = ?entry.decision_type,
            provider = %entry.provider,
            "decision"
        );
        if self.tx.send(LogMessage::Entry(entry)).is_err() {
            warn!("Decision log writer has stopped");
        }
    }
}
