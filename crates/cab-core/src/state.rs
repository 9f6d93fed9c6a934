use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Local;

use crate::Result;

/// Durable relay state: update offset, agent session token, recipient chat
/// id, and per-run raw event logs, each its own flat file under the state
/// directory.
///
/// Writes go through a temp file plus rename so a crash mid-write never
/// leaves a torn value behind. Loads tolerate missing or garbled files by
/// falling back to "absent"; nothing is ever repaired in place.
#[derive(Clone, Debug)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open (and create) the state directory layout.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        fs::create_dir_all(dir.join("downloads"))?;
        fs::create_dir_all(dir.join("pending_images"))?;
        fs::create_dir_all(dir.join("pending_attachments"))?;
        fs::create_dir_all(dir.join("logs"))?;
        Ok(Self { dir })
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.dir.join("downloads")
    }

    pub fn pending_images_dir(&self) -> PathBuf {
        self.dir.join("pending_images")
    }

    pub fn pending_attachments_dir(&self) -> PathBuf {
        self.dir.join("pending_attachments")
    }

    pub fn load_offset(&self) -> i64 {
        read_trimmed(&self.dir.join("offset"))
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0)
    }

    pub fn save_offset(&self, offset: i64) -> Result<()> {
        write_atomic(&self.dir.join("offset"), offset.to_string().as_bytes())
    }

    pub fn load_session(&self) -> Option<String> {
        read_trimmed(&self.dir.join("session")).filter(|s| !s.is_empty())
    }

    pub fn save_session(&self, session: &str) -> Result<()> {
        write_atomic(&self.dir.join("session"), session.as_bytes())
    }

    pub fn load_chat_id(&self) -> Option<i64> {
        read_trimmed(&self.dir.join("chat_id")).and_then(|s| s.parse::<i64>().ok())
    }

    pub fn save_chat_id(&self, chat_id: i64) -> Result<()> {
        write_atomic(&self.dir.join("chat_id"), chat_id.to_string().as_bytes())
    }

    /// Open the append-only raw event log for one run, named by its start
    /// timestamp.
    pub fn create_run_log(&self) -> Result<RunLog> {
        let stamp = Local::now().format("%Y-%m-%dT%H-%M-%S");
        let path = self.dir.join("logs").join(format!("agent_run_{stamp}.jsonl"));
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(RunLog { file: Some(file) })
    }
}

/// Append-only sink for raw agent event lines. Write-only from the relay's
/// perspective; used for audit, never read back.
#[derive(Debug)]
pub struct RunLog {
    file: Option<fs::File>,
}

impl RunLog {
    /// A log that drops everything (used by tests).
    pub fn discard() -> Self {
        Self { file: None }
    }

    /// Best-effort append; log writes must never fail the run.
    pub fn append(&mut self, line: &str) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                tracing::warn!("could not append to run log: {e}");
                self.file = None;
            }
        }
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
