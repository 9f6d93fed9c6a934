//! Folds one poll response into a single agent prompt.

use std::path::Path;

use crate::{
    domain::{ChatId, InboundUpdate, UserId},
    ports::ChatPort,
};

/// The result of batching one poll response.
#[derive(Clone, Debug)]
pub struct Batch {
    /// Combined prompt, or `None` when nothing was accepted (no agent
    /// invocation, no recipient persistence).
    pub prompt: Option<String>,
    /// Chat to reply to, learned from the accepted messages.
    pub chat_id: Option<ChatId>,
    /// Cursor to persist: (last update id in the response) + 1, regardless
    /// of whether anything was accepted. Never less than `current_offset`.
    pub next_offset: i64,
}

/// Build a batch from one poll response.
///
/// Updates from any sender other than `allowed` are dropped. Photos use
/// the largest variant and are downloaded into `downloads_dir` under a
/// namespaced name so the agent can reference them by path. The cursor
/// only ever moves forward: an empty response leaves it at
/// `current_offset`.
pub async fn build_batch(
    updates: &[InboundUpdate],
    current_offset: i64,
    allowed: UserId,
    downloads_dir: &Path,
    port: &dyn ChatPort,
) -> Batch {
    let next_offset = updates
        .iter()
        .map(|u| u.update_id + 1)
        .max()
        .unwrap_or(current_offset)
        .max(current_offset);

    let mut texts: Vec<String> = Vec::new();
    let mut images: Vec<String> = Vec::new();
    let mut chat_id: Option<ChatId> = None;

    for update in updates {
        if update.sender_id != Some(allowed) {
            continue;
        }
        if chat_id.is_none() {
            chat_id = update.chat_id;
        }

        if let Some(text) = update.text.as_deref() {
            let text = text.trim();
            if !text.is_empty() {
                texts.push(text.to_string());
            }
        }

        // Photo variants are ordered small to large; take the largest.
        if let Some(photo) = update.photos.last() {
            let name = format!("photo_{}_{}.jpg", update.update_id, images.len());
            let dest = downloads_dir.join(&name);
            match port.download_file(&photo.file_id, &dest).await {
                Ok(()) => images.push(dest.to_string_lossy().to_string()),
                Err(e) => {
                    tracing::warn!("could not download photo {}: {e}", photo.file_id);
                }
            }
        }

        if let Some(caption) = update.caption.as_deref() {
            let caption = caption.trim();
            if !caption.is_empty() {
                texts.push(caption.to_string());
            }
        }
    }

    if !images.is_empty() {
        texts.push(format!("[Attached images: {}]", images.join(", ")));
    }

    let prompt = if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n\n"))
    };

    Batch {
        prompt,
        chat_id,
        next_offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PhotoRef;
    use crate::Result;
    use async_trait::async_trait;
    use std::{sync::Mutex, time::Duration};

    #[derive(Default)]
    struct FakePort {
        downloads: Mutex<Vec<(String, String)>>,
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

        async fn send_text(&self, _chat_id: ChatId, _text: &str, _markdown: bool) -> Result<()> {
            Ok(())
        }

        async fn send_typing(&self, _chat_id: ChatId) -> Result<()> {
            Ok(())
        }

        async fn send_photo(&self, _chat_id: ChatId, _path: &Path) -> Result<()> {
            Ok(())
        }

        async fn send_document(&self, _chat_id: ChatId, _path: &Path) -> Result<()> {
            Ok(())
        }

        async fn download_file(&self, file_id: &str, dest: &Path) -> Result<()> {
            self.downloads
                .lock()
                .unwrap()
                .push((file_id.to_string(), dest.to_string_lossy().to_string()));
            Ok(())
        }
    }

    fn text_update(id: i64, sender: i64, text: &str) -> InboundUpdate {
        InboundUpdate {
            update_id: id,
            sender_id: Some(UserId(sender)),
            chat_id: Some(ChatId(100)),
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn joins_texts_with_blank_lines() {
        let updates = vec![
            text_update(1, 7, "a"),
            text_update(2, 7, "b"),
            text_update(3, 7, "c"),
        ];
        let port = FakePort::default();
        let batch = build_batch(&updates, 0, UserId(7), Path::new("/tmp"), &port).await;
        assert_eq!(batch.prompt.as_deref(), Some("a\n\nb\n\nc"));
        assert_eq!(batch.chat_id, Some(ChatId(100)));
        assert_eq!(batch.next_offset, 4);
    }

    #[tokio::test]
    async fn disallowed_senders_never_contribute() {
        let updates = vec![
            text_update(10, 999, "ignore me"),
            text_update(11, 7, "keep"),
            text_update(12, 888, "and me"),
        ];
        let port = FakePort::default();
        let batch = build_batch(&updates, 0, UserId(7), Path::new("/tmp"), &port).await;
        assert_eq!(batch.prompt.as_deref(), Some("keep"));
    }

    #[tokio::test]
    async fn offset_advances_even_when_nothing_accepted() {
        let updates = vec![text_update(50, 999, "stranger")];
        let port = FakePort::default();
        let batch = build_batch(&updates, 0, UserId(7), Path::new("/tmp"), &port).await;
        assert_eq!(batch.prompt, None);
        assert_eq!(batch.chat_id, None);
        assert_eq!(batch.next_offset, 51);
    }

    #[tokio::test]
    async fn offset_never_moves_backwards() {
        let port = FakePort::default();

        let batch = build_batch(&[], 42, UserId(7), Path::new("/tmp"), &port).await;
        assert_eq!(batch.next_offset, 42);

        // A stale update id below the cursor must not regress it either.
        let updates = vec![text_update(10, 7, "late")];
        let batch = build_batch(&updates, 42, UserId(7), Path::new("/tmp"), &port).await;
        assert_eq!(batch.next_offset, 42);
    }

    #[tokio::test]
    async fn photos_use_largest_variant_and_caption() {
        let updates = vec![InboundUpdate {
            update_id: 5,
            sender_id: Some(UserId(7)),
            chat_id: Some(ChatId(100)),
            text: None,
            caption: Some("what is this?".to_string()),
            photos: vec![
                PhotoRef {
                    file_id: "small".to_string(),
                    width: 90,
                    height: 90,
                },
                PhotoRef {
                    file_id: "large".to_string(),
                    width: 1280,
                    height: 1280,
                },
            ],
        }];
        let port = FakePort::default();
        let batch = build_batch(&updates, 0, UserId(7), Path::new("/tmp/dl"), &port).await;

        let downloads = port.downloads.lock().unwrap();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].0, "large");
        assert_eq!(downloads[0].1, "/tmp/dl/photo_5_0.jpg");

        let prompt = batch.prompt.unwrap();
        assert!(prompt.starts_with("what is this?\n\n[Attached images: "));
        assert!(prompt.contains("photo_5_0.jpg"));
    }

    #[tokio::test]
    async fn empty_texts_are_dropped() {
        let updates = vec![text_update(1, 7, "   "), text_update(2, 7, "real")];
        let port = FakePort::default();
        let batch = build_batch(&updates, 0, UserId(7), Path::new("/tmp"), &port).await;
        assert_eq!(batch.prompt.as_deref(), Some("real"));
    }
}
