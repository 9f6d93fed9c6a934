use async_trait::async_trait;

use crate::{state::RunLog, Result};

/// One agent invocation: the combined prompt plus the session token to
/// resume, if any. The raw event log is owned by the run.
#[derive(Debug)]
pub struct AgentRunRequest {
    pub prompt: String,
    pub resume: Option<String>,
    pub log: RunLog,
}

/// What one completed run produced.
#[derive(Clone, Debug, Default)]
pub struct RunOutcome {
    /// Session token to persist and resume next turn. Falls back to the
    /// token passed in when the run surfaced none of its own.
    pub session: Option<String>,
    /// Whether any assistant text was flushed to the sink during the run.
    pub surfaced_text: bool,
    /// Synthesized failure message (stderr tail or exit code) when the
    /// process exited non-zero without surfacing any text.
    pub failure: Option<String>,
}

/// Receives assistant text as it streams out of the agent. The relay's
/// sink drains drop-folders and sends chat messages from inside each call,
/// so flushes happen synchronously with the read loop.
#[async_trait]
pub trait EventSink: Send {
    async fn on_text(&mut self, text: &str) -> Result<()>;
}

/// Agent subprocess port. `run` blocks until the process exits (or the
/// caller's timeout cancels it via `cancel`).
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn run(&self, req: AgentRunRequest, sink: &mut dyn EventSink) -> Result<RunOutcome>;

    /// Forcibly terminate the current run's subprocess, if any.
    async fn cancel(&self) -> Result<()>;
}
