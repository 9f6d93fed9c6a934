//! Telegram adapter (teloxide).
//!
//! Implements the core `ChatPort` over the Telegram Bot API. The relay
//! owns the long-poll loop and the durable offset, so this adapter issues
//! manual `getUpdates` requests instead of using teloxide's Dispatcher.

use std::{path::Path, time::Duration};

use async_trait::async_trait;

use teloxide::{
    net::Download,
    payloads::GetUpdatesSetters,
    prelude::*,
    types::{InputFile, ParseMode, UpdateKind},
    ApiError, RequestError,
};

use tokio::time::sleep;

use cab_core::{
    domain::{ChatId, InboundUpdate, PhotoRef, UserId},
    errors::Error,
    ports::ChatPort,
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: RequestError) -> Error {
        match e {
            RequestError::Api(ApiError::CantParseEntities) => {
                Error::Formatting("can't parse entities".to_string())
            }
            // The API appends the offending byte offset to the description,
            // which makes teloxide fall back to `Unknown` instead of
            // deserializing `CantParseEntities`.
            RequestError::Api(ApiError::Unknown(detail))
                if detail.to_ascii_lowercase().contains("can't parse entities") =>
            {
                Error::Formatting(detail)
            }
            other => Error::Telegram(other.to_string()),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

/// Flatten one platform update. Non-message updates keep their id (the
/// offset must advance over them) but carry nothing else.
fn map_update(update: teloxide::types::Update) -> InboundUpdate {
    let mut out = InboundUpdate {
        update_id: update.id as i64,
        ..Default::default()
    };

    let msg = match &update.kind {
        UpdateKind::Message(m) | UpdateKind::EditedMessage(m) => m,
        _ => return out,
    };

    out.sender_id = msg.from().map(|u| UserId(u.id.0 as i64));
    out.chat_id = Some(ChatId(msg.chat.id.0));
    out.text = msg.text().map(str::to_string);
    out.caption = msg.caption().map(str::to_string);
    out.photos = msg
        .photo()
        .map(|sizes| {
            sizes
                .iter()
                .map(|p| PhotoRef {
                    file_id: p.file.id.clone(),
                    width: p.width,
                    height: p.height,
                })
                .collect()
        })
        .unwrap_or_default();

    out
}

#[async_trait]
impl ChatPort for TelegramMessenger {
    async fn get_updates(&self, offset: i64, long_poll: Duration) -> Result<Vec<InboundUpdate>> {
        let updates = self
            .bot
            .get_updates()
            .offset(offset as i32)
            .timeout(long_poll.as_secs() as u32)
            .await
            .map_err(Self::map_err)?;

        Ok(updates.into_iter().map(map_update).collect())
    }

    async fn send_text(&self, chat_id: ChatId, text: &str, markdown: bool) -> Result<()> {
        self.with_retry(|| {
            let req = self.bot.send_message(Self::tg_chat(chat_id), text.to_string());
            if markdown {
                req.parse_mode(ParseMode::Markdown)
            } else {
                req
            }
        })
        .await?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: ChatId) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_chat_action(Self::tg_chat(chat_id), teloxide::types::ChatAction::Typing)
        })
        .await?;
        Ok(())
    }

    async fn send_photo(&self, chat_id: ChatId, path: &Path) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_photo(Self::tg_chat(chat_id), InputFile::file(path.to_path_buf()))
        })
        .await?;
        Ok(())
    }

    async fn send_document(&self, chat_id: ChatId, path: &Path) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_document(Self::tg_chat(chat_id), InputFile::file(path.to_path_buf()))
        })
        .await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<()> {
        let file = self
            .bot
            .get_file(file_id.to_string())
            .await
            .map_err(Self::map_err)?;

        let mut dst = tokio::fs::File::create(dest).await?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| Error::Telegram(format!("file download failed: {e}")))?;
        Ok(())
    }
}
