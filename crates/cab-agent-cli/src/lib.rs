//! cursor-agent CLI adapter.
//!
//! Spawns one `cursor-agent --print --output-format stream-json` process
//! per turn and streams its NDJSON events into the relay's sink.

use std::{collections::VecDeque, path::PathBuf, process::Stdio, sync::Arc};

use async_trait::async_trait;

use cab_core::{
    agent::{AgentClient, AgentRunRequest, EventSink, RunOutcome},
    errors::Error,
    event::{parse_line, AgentEvent},
    Result,
};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::Mutex,
};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;

#[derive(Clone, Debug)]
pub struct CursorAgentConfig {
    pub program: PathBuf,
    pub model: String,
    pub workspace: PathBuf,
}

/// A concrete CLI invocation for one run.
#[derive(Clone, Debug)]
pub struct CliInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// Build the `cursor-agent` argument list: fixed non-interactive flags,
/// the resume token when present, the prompt as the final positional.
pub fn build_invocation(cfg: &CursorAgentConfig, req: &AgentRunRequest) -> CliInvocation {
    let mut args: Vec<String> = vec![
        "--print".to_string(),
        "--trust".to_string(),
        "--force".to_string(),
        "--workspace".to_string(),
        cfg.workspace.display().to_string(),
        "--model".to_string(),
        cfg.model.clone(),
        "--output-format".to_string(),
        "stream-json".to_string(),
    ];
    if let Some(session) = &req.resume {
        args.push("--resume".to_string());
        args.push(session.clone());
    }
    args.push(req.prompt.clone());

    CliInvocation {
        program: cfg.program.clone(),
        args,
        cwd: cfg.workspace.clone(),
    }
}

#[derive(Clone, Debug)]
pub struct CursorAgentClient {
    cfg: CursorAgentConfig,
    child: Arc<Mutex<Option<tokio::process::Child>>>,
}

#[derive(Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            if let Some(front) = self.lines.pop_front() {
                self.bytes = self.bytes.saturating_sub(front.len() + 1);
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

impl CursorAgentClient {
    pub fn new(cfg: CursorAgentConfig) -> Self {
        Self {
            cfg,
            child: Arc::new(Mutex::new(None)),
        }
    }

    async fn kill_child(&self) -> Result<()> {
        let child = {
            let mut guard = self.child.lock().await;
            guard.take()
        };

        let Some(mut child) = child else {
            return Ok(());
        };

        // If it's already exited, `try_wait` reaps it.
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        match child.kill().await {
            Ok(()) => {
                let _ = child.wait().await?;
            }
            Err(e) => {
                // If it exited between `try_wait` and `kill`, `wait` reaps it.
                if child.try_wait()?.is_none() {
                    let mut guard = self.child.lock().await;
                    *guard = Some(child);
                    return Err(Error::Io(e));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl AgentClient for CursorAgentClient {
    async fn run(&self, mut req: AgentRunRequest, sink: &mut dyn EventSink) -> Result<RunOutcome> {
        // A stale child from a previous (timed-out) run must not linger.
        self.cancel().await?;

        let inv = build_invocation(&self.cfg, &req);
        tracing::debug!("spawning {} ({} args)", inv.program.display(), inv.args.len());

        let mut cmd = Command::new(&inv.program);
        cmd.args(&inv.args)
            .current_dir(&inv.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Agent("agent stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();
        let stderr_tail: Arc<Mutex<StderrTail>> = Arc::new(Mutex::new(StderrTail::default()));

        // Store the child so `cancel()` can kill it on timeout.
        {
            let mut guard = self.child.lock().await;
            *guard = Some(child);
        }

        // Drain stderr in the background to avoid blocking on a full pipe.
        if let Some(stderr) = stderr {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    tail.lock().await.push_line(line);
                }
            });
        }

        let mut session: Option<String> = None;
        let mut surfaced_text = false;

        let mut reader = BufReader::new(stdout).lines();
        loop {
            let line = match reader.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    if let Err(kill_e) = self.kill_child().await {
                        return Err(Error::Agent(format!(
                            "agent stdout read failed: {e} (also failed to kill agent process: {kill_e})"
                        )));
                    }
                    return Err(Error::Io(e));
                }
            };

            // Every raw line lands in the run log, parseable or not.
            req.log.append(&line);

            // Malformed lines are skipped, never fatal.
            let Some(parsed) = parse_line(&line) else {
                continue;
            };

            // Last session-bearing event wins, display text or not.
            if parsed.session.is_some() {
                session = parsed.session;
            }

            match parsed.event {
                AgentEvent::Text(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        if let Err(e) = sink.on_text(text).await {
                            if let Err(kill_e) = self.kill_child().await {
                                return Err(Error::Agent(format!(
                                    "{e} (also failed to kill agent process: {kill_e})"
                                )));
                            }
                            return Err(e);
                        }
                        surfaced_text = true;
                    }
                }
                AgentEvent::Thinking | AgentEvent::Result | AgentEvent::Unknown => {}
            }
        }

        let status = {
            let mut guard = self.child.lock().await;
            match guard.take() {
                Some(mut child) => child.wait().await?,
                // Killed out from under us (timeout path).
                None => return Err(Error::Agent("agent process was cancelled".to_string())),
            }
        };

        let failure = if !status.success() && !surfaced_text {
            let stderr = stderr_tail.lock().await.snapshot();
            if stderr.trim().is_empty() {
                Some(format!(
                    "Agent exited with code {}.",
                    status.code().unwrap_or(-1)
                ))
            } else {
                Some(stderr.trim().to_string())
            }
        } else {
            None
        };

        Ok(RunOutcome {
            session: session.or(req.resume),
            surfaced_text,
            failure,
        })
    }

    async fn cancel(&self) -> Result<()> {
        self.kill_child().await
    }
}
