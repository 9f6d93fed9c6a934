use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the relay.
///
/// Everything comes from the environment (a `.env` file is honored but
/// never overrides variables already set). Missing credentials are the
/// only fatal startup path.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub allowed_user_id: i64,

    // Agent CLI
    pub agent_cli_path: PathBuf,
    pub agent_model: String,
    pub agent_workspace: PathBuf,

    /// Wall-clock budget for one agent run. Zero means unlimited.
    pub run_timeout: Duration,

    // Durable state
    pub state_dir: PathBuf,

    // Telegram limits / cadence
    pub telegram_message_limit: usize,
    pub poll_timeout: Duration,
    pub poll_retry_delay: Duration,
    pub typing_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let allowed_user_id = env_str("TELEGRAM_ALLOWED_USER_ID")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                Error::Config(
                    "TELEGRAM_ALLOWED_USER_ID environment variable is required".to_string(),
                )
            })?;

        let home = home_dir().ok_or_else(|| Error::Config("HOME is not set".to_string()))?;

        let agent_cli_path = env_path("AGENT_CLI_PATH")
            .or_else(|| which_in_path("cursor-agent"))
            .unwrap_or_else(|| PathBuf::from("cursor-agent"));
        let agent_model = env_str("AGENT_MODEL").unwrap_or_else(|| "Auto".to_string());
        let agent_workspace = env_path("AGENT_WORKSPACE").unwrap_or_else(|| home.clone());

        let run_timeout = Duration::from_secs(env_u64("RUN_TIMEOUT_SECS").unwrap_or(300));

        let state_dir = env_path("STATE_DIR").unwrap_or_else(|| home.join(".cursor-agent-bot"));

        let telegram_message_limit = env_usize("TELEGRAM_MESSAGE_LIMIT").unwrap_or(4096);

        Ok(Self {
            telegram_bot_token,
            allowed_user_id,
            agent_cli_path,
            agent_model,
            agent_workspace,
            run_timeout,
            state_dir,
            telegram_message_limit,
            poll_timeout: Duration::from_secs(30),
            poll_retry_delay: Duration::from_secs(5),
            typing_interval: Duration::from_secs(4),
        })
    }
}

/// State directory used by the relay and by the attach helpers, without
/// requiring the full (credentialed) config.
pub fn default_state_dir() -> Result<PathBuf> {
    if let Some(dir) = env_path("STATE_DIR") {
        return Ok(dir);
    }
    let home = home_dir().ok_or_else(|| Error::Config("HOME is not set".to_string()))?;
    Ok(home.join(".cursor-agent-bot"))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn which_in_path(binary: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    for dir in env::split_paths(&path) {
        let candidate = dir.join(binary);
        if is_executable_file(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable_file(p: &Path) -> bool {
    if !p.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(md) = fs::metadata(p) {
            return (md.permissions().mode() & 0o111) != 0;
        }
    }
    true
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}
