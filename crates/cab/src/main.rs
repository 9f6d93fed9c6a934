use std::sync::Arc;

use cab_agent_cli::{CursorAgentClient, CursorAgentConfig};
use cab_core::{config::Config, relay::Relay, state::StateStore};
use cab_telegram::TelegramMessenger;

#[tokio::main]
async fn main() -> Result<(), cab_core::Error> {
    cab_core::logging::init("agent-bot")?;

    let cfg = Arc::new(Config::load()?);
    let state = StateStore::open(cfg.state_dir.clone())?;

    let port = Arc::new(TelegramMessenger::new(&cfg.telegram_bot_token));
    let agent = Arc::new(CursorAgentClient::new(CursorAgentConfig {
        program: cfg.agent_cli_path.clone(),
        model: cfg.agent_model.clone(),
        workspace: cfg.agent_workspace.clone(),
    }));

    let mut relay = Relay::new(cfg, state, port, agent);
    relay.run().await
}
