//! The relay loop: long-poll, batch, run the agent, stream replies back.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::{task::JoinHandle, time::sleep};

use crate::{
    agent::{AgentClient, AgentRunRequest, EventSink},
    attachments::AttachmentRelay,
    batch::build_batch,
    config::Config,
    domain::{ChatId, InboundUpdate, UserId},
    formatting::{collapse_blank_lines, extract_image_directives},
    ports::ChatPort,
    sender::send_chunked,
    state::{RunLog, StateStore},
    Result,
};

pub struct Relay {
    cfg: Arc<Config>,
    state: StateStore,
    port: Arc<dyn ChatPort>,
    agent: Arc<dyn AgentClient>,
    attachments: AttachmentRelay,
    session: Option<String>,
}

impl Relay {
    pub fn new(
        cfg: Arc<Config>,
        state: StateStore,
        port: Arc<dyn ChatPort>,
        agent: Arc<dyn AgentClient>,
    ) -> Self {
        let session = state.load_session();
        let attachments = AttachmentRelay::new(
            state.pending_images_dir(),
            state.pending_attachments_dir(),
        );
        Self {
            cfg,
            state,
            port,
            agent,
            attachments,
            session,
        }
    }

    /// The top-level poll loop. Single-threaded by design: no further
    /// updates are requested until the current turn has fully finished.
    pub async fn run(&mut self) -> Result<()> {
        let mut offset = self.state.load_offset();

        if let Some(session) = &self.session {
            let prefix: String = session.chars().take(20).collect();
            tracing::info!("resuming session {prefix}...");
        }
        tracing::info!(
            "agent relay running; only user_id={} accepted, others dropped",
            self.cfg.allowed_user_id
        );

        loop {
            let updates = match self.port.get_updates(offset, self.cfg.poll_timeout).await {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!("getUpdates failed: {e}");
                    sleep(self.cfg.poll_retry_delay).await;
                    continue;
                }
            };
            if updates.is_empty() {
                continue;
            }
            self.process_updates(&mut offset, &updates).await;
        }
    }

    /// Batch one poll response, persist the cursor, and run the agent turn
    /// if anything was accepted.
    pub async fn process_updates(&mut self, offset: &mut i64, updates: &[InboundUpdate]) {
        let batch = build_batch(
            updates,
            *offset,
            UserId(self.cfg.allowed_user_id),
            &self.state.downloads_dir(),
            self.port.as_ref(),
        )
        .await;

        // Cursor moves before the run: a crash mid-turn loses the batch
        // rather than invoking the agent twice for it.
        *offset = batch.next_offset;
        if let Err(e) = self.state.save_offset(*offset) {
            tracing::warn!("could not persist offset: {e}");
        }

        let (Some(prompt), Some(chat_id)) = (batch.prompt, batch.chat_id) else {
            return;
        };

        if let Err(e) = self.state.save_chat_id(chat_id.0) {
            tracing::warn!("could not persist chat id: {e}");
        }

        if let Err(e) = self.run_turn(chat_id, prompt).await {
            tracing::error!("turn failed: {e}");
        }
    }

    /// One complete agent turn: spawn, stream, flush, persist the session.
    pub async fn run_turn(&mut self, chat_id: ChatId, prompt: String) -> Result<()> {
        let preview: String = prompt.chars().take(60).collect();
        tracing::info!("running agent for prompt: {preview}...");

        let log = self.state.create_run_log().unwrap_or_else(|e| {
            tracing::warn!("could not open run log: {e}");
            RunLog::discard()
        });
        let req = AgentRunRequest {
            prompt,
            resume: self.session.clone(),
            log,
        };

        let done = Arc::new(AtomicBool::new(false));
        let heartbeat = spawn_heartbeat(
            self.port.clone(),
            chat_id,
            self.cfg.typing_interval,
            done.clone(),
        );

        let limit = self.cfg.telegram_message_limit;
        let mut sink = TurnSink {
            port: self.port.as_ref(),
            attachments: &self.attachments,
            chat_id,
            limit,
        };

        let run = self.agent.run(req, &mut sink);
        let outcome = if self.cfg.run_timeout.is_zero() {
            run.await
        } else {
            match tokio::time::timeout(self.cfg.run_timeout, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // Timed out: kill the subprocess, notify once, and keep
                    // the session token for the next resume attempt.
                    if let Err(e) = self.agent.cancel().await {
                        tracing::warn!("could not kill agent process: {e}");
                    }
                    finish_heartbeat(&done, heartbeat).await;

                    let notice = format!(
                        "Agent timed out after {} seconds.",
                        self.cfg.run_timeout.as_secs()
                    );
                    send_chunked(self.port.as_ref(), chat_id, &notice, limit).await?;
                    return Ok(());
                }
            }
        };
        finish_heartbeat(&done, heartbeat).await;

        match outcome {
            Ok(outcome) => {
                if let Some(failure) = &outcome.failure {
                    send_chunked(self.port.as_ref(), chat_id, failure, limit).await?;
                }
                if let Some(session) = outcome.session {
                    if let Err(e) = self.state.save_session(&session) {
                        tracing::warn!("could not persist session: {e}");
                    }
                    self.session = Some(session);
                }
            }
            Err(e) => {
                tracing::error!("agent run failed: {e}");
                let msg = format!("Error running agent: {e}");
                if let Err(send_err) =
                    send_chunked(self.port.as_ref(), chat_id, &msg, limit).await
                {
                    tracing::warn!("could not report agent failure: {send_err}");
                }
            }
        }

        Ok(())
    }
}

/// Periodic best-effort typing signal; Telegram's own indicator expires
/// after ~5s, so the tick is shorter. Stops on its own tick once `done`
/// is set; the turn always joins it before finishing.
fn spawn_heartbeat(
    port: Arc<dyn ChatPort>,
    chat_id: ChatId,
    every: std::time::Duration,
    done: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tick.tick().await;
            if done.load(Ordering::SeqCst) {
                break;
            }
            let _ = port.send_typing(chat_id).await;
        }
    })
}

async fn finish_heartbeat(done: &AtomicBool, heartbeat: JoinHandle<()>) {
    done.store(true, Ordering::SeqCst);
    let _ = heartbeat.await;
}

/// Flushes one piece of surfaced agent text: drop-folders first, then any
/// `attach-image:` directives, then the cleaned text itself.
struct TurnSink<'a> {
    port: &'a dyn ChatPort,
    attachments: &'a AttachmentRelay,
    chat_id: ChatId,
    limit: usize,
}

#[async_trait]
impl EventSink for TurnSink<'_> {
    async fn on_text(&mut self, text: &str) -> Result<()> {
        self.attachments.drain(self.port, self.chat_id).await?;

        let (display, images) = extract_image_directives(text);
        for image in images {
            if !image.exists() {
                continue;
            }
            if let Err(e) = self.port.send_photo(self.chat_id, &image).await {
                tracing::warn!("could not send directive photo {}: {e}", image.display());
            }
        }

        let display = collapse_blank_lines(&display);
        let display = display.trim();
        if !display.is_empty() {
            send_chunked(self.port, self.chat_id, display, self.limit).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RunOutcome;
    use crate::errors::Error;
    use std::{
        fs,
        path::{Path, PathBuf},
        sync::Mutex,
        time::Duration,
    };

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Sent {
        Text(String),
        Photo(PathBuf),
        Document(PathBuf),
    }

    #[derive(Default)]
    struct FakePort {
        sent: Mutex<Vec<Sent>>,
        typing: Mutex<usize>,
    }

    #[async_trait]
    impl ChatPort for FakePort {
        async fn get_updates(
            &self,
            _offset: i64,
            _long_poll: Duration,
        ) -> Result<Vec<InboundUpdate>> {
            Ok(Vec::new())
        }

        async fn send_text(&self, _chat_id: ChatId, text: &str, _markdown: bool) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
            Ok(())
        }

        async fn send_typing(&self, _chat_id: ChatId) -> Result<()> {
            *self.typing.lock().unwrap() += 1;
            Ok(())
        }

        async fn send_photo(&self, _chat_id: ChatId, path: &Path) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Photo(path.to_path_buf()));
            Ok(())
        }

        async fn send_document(&self, _chat_id: ChatId, path: &Path) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Document(path.to_path_buf()));
            Ok(())
        }

        async fn download_file(&self, _file_id: &str, _dest: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeAgent {
        resumes: Mutex<Vec<Option<String>>>,
        cancels: Mutex<usize>,
        session: Option<String>,
        failure: Option<String>,
        emit: Vec<String>,
        delay: Option<Duration>,
        hang: bool,
    }

    #[async_trait]
    impl AgentClient for FakeAgent {
        async fn run(
            &self,
            req: AgentRunRequest,
            sink: &mut dyn EventSink,
        ) -> Result<RunOutcome> {
            self.resumes.lock().unwrap().push(req.resume.clone());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Err(Error::Agent("unreachable".to_string()));
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            for text in &self.emit {
                sink.on_text(text).await?;
            }
            Ok(RunOutcome {
                session: self.session.clone().or(req.resume),
                surfaced_text: !self.emit.is_empty(),
                failure: self.failure.clone(),
            })
        }

        async fn cancel(&self) -> Result<()> {
            *self.cancels.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn test_config(timeout: Duration) -> Arc<Config> {
        Arc::new(Config {
            telegram_bot_token: "x".to_string(),
            allowed_user_id: 7,
            agent_cli_path: "/usr/bin/true".into(),
            agent_model: "Auto".to_string(),
            agent_workspace: "/tmp".into(),
            run_timeout: timeout,
            state_dir: "/tmp".into(),
            telegram_message_limit: 4096,
            poll_timeout: Duration::from_secs(30),
            poll_retry_delay: Duration::from_secs(5),
            typing_interval: Duration::from_secs(4),
        })
    }

    fn tmp_state(prefix: &str) -> StateStore {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        StateStore::open(format!("/tmp/{prefix}-{}-{ts}", std::process::id())).unwrap()
    }

    fn make_relay(agent: FakeAgent, timeout: Duration) -> (Relay, Arc<FakePort>) {
        let port = Arc::new(FakePort::default());
        let relay = Relay::new(
            test_config(timeout),
            tmp_state("cab-relay"),
            port.clone(),
            Arc::new(agent),
        );
        (relay, port)
    }

    #[tokio::test]
    async fn session_from_one_run_resumes_the_next() {
        let agent = FakeAgent {
            session: Some("S9".to_string()),
            emit: vec!["ok".to_string()],
            ..Default::default()
        };
        let port = Arc::new(FakePort::default());
        let agent = Arc::new(agent);
        let mut relay = Relay::new(
            test_config(Duration::ZERO),
            tmp_state("cab-relay-resume"),
            port,
            agent.clone(),
        );

        relay.run_turn(ChatId(1), "first".to_string()).await.unwrap();
        relay.run_turn(ChatId(1), "second".to_string()).await.unwrap();

        let resumes = agent.resumes.lock().unwrap();
        assert_eq!(resumes.as_slice(), &[None, Some("S9".to_string())]);
        assert_eq!(relay.state.load_session(), Some("S9".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_kills_notifies_once_and_preserves_session() {
        let agent = FakeAgent {
            hang: true,
            ..Default::default()
        };
        let port = Arc::new(FakePort::default());
        let agent = Arc::new(agent);
        let state = tmp_state("cab-relay-timeout");
        state.save_session("before").unwrap();
        let mut relay = Relay::new(
            test_config(Duration::from_secs(1)),
            state,
            port.clone(),
            agent.clone(),
        );

        relay.run_turn(ChatId(1), "hang".to_string()).await.unwrap();

        assert_eq!(*agent.cancels.lock().unwrap(), 1);
        let sent = port.sent.lock().unwrap();
        let notices: Vec<_> = sent
            .iter()
            .filter(|s| matches!(s, Sent::Text(t) if t.contains("timed out")))
            .collect();
        assert_eq!(notices.len(), 1);
        assert_eq!(relay.session, Some("before".to_string()));
        assert_eq!(relay.state.load_session(), Some("before".to_string()));
    }

    #[tokio::test]
    async fn failure_message_is_forwarded() {
        let agent = FakeAgent {
            failure: Some("Agent exited with code 2".to_string()),
            ..Default::default()
        };
        let (mut relay, port) = make_relay(agent, Duration::ZERO);
        relay.run_turn(ChatId(1), "boom".to_string()).await.unwrap();

        let sent = port.sent.lock().unwrap();
        assert_eq!(
            sent.as_slice(),
            &[Sent::Text("Agent exited with code 2".to_string())]
        );
    }

    #[tokio::test]
    async fn flush_drains_drop_folders_before_text() {
        let agent = FakeAgent {
            emit: vec!["reply".to_string()],
            ..Default::default()
        };
        let port = Arc::new(FakePort::default());
        let state = tmp_state("cab-relay-drain");
        fs::write(state.pending_attachments_dir().join("report.txt"), b"r").unwrap();
        let mut relay = Relay::new(
            test_config(Duration::ZERO),
            state,
            port.clone(),
            Arc::new(agent),
        );

        relay.run_turn(ChatId(1), "go".to_string()).await.unwrap();

        let sent = port.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Sent::Document(p) if p.ends_with("report.txt")));
        assert_eq!(sent[1], Sent::Text("reply".to_string()));
    }

    #[tokio::test]
    async fn image_directive_sends_photo_and_is_removed() {
        let state = tmp_state("cab-relay-directive");
        let shot = state.downloads_dir().join("shot.png");
        fs::write(&shot, b"png").unwrap();

        let agent = FakeAgent {
            emit: vec![format!(
                "here you go\nattach-image: {}\nattach-image: /nonexistent/x.png\ndone",
                shot.display()
            )],
            ..Default::default()
        };
        let port = Arc::new(FakePort::default());
        let mut relay = Relay::new(
            test_config(Duration::ZERO),
            state,
            port.clone(),
            Arc::new(agent),
        );

        relay.run_turn(ChatId(1), "go".to_string()).await.unwrap();

        let sent = port.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], Sent::Photo(shot));
        assert_eq!(sent[1], Sent::Text("here you go\ndone".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_ticks_while_the_agent_runs() {
        let agent = FakeAgent {
            delay: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let (mut relay, port) = make_relay(agent, Duration::ZERO);
        relay.run_turn(ChatId(1), "slow".to_string()).await.unwrap();

        // Immediate first tick plus one per 4s interval over a 10s run.
        assert!(*port.typing.lock().unwrap() >= 3);
    }
}
