use std::{path::Path, time::Duration};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, InboundUpdate},
    Result,
};

/// Chat platform port. Telegram is the only implementation today; the
/// relay core depends on this trait so tests can run against a fake.
#[async_trait]
pub trait ChatPort: Send + Sync {
    /// One long-poll request for updates at or after `offset`.
    async fn get_updates(&self, offset: i64, long_poll: Duration) -> Result<Vec<InboundUpdate>>;

    /// Send one message chunk. `markdown` selects rich formatting; a
    /// formatting-specific rejection surfaces as `Error::Formatting`.
    async fn send_text(&self, chat_id: ChatId, text: &str, markdown: bool) -> Result<()>;

    /// Best-effort typing indicator.
    async fn send_typing(&self, chat_id: ChatId) -> Result<()>;

    async fn send_photo(&self, chat_id: ChatId, path: &Path) -> Result<()>;

    async fn send_document(&self, chat_id: ChatId, path: &Path) -> Result<()>;

    /// Download a platform file (by file id) to `dest`.
    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<()>;
}
