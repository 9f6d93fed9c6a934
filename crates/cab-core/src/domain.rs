/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// One inbound update from the chat platform, already flattened from the
/// platform's shape. Photo variants keep the platform order (small to
/// large). Non-message updates still carry their id so the offset advances
/// over them.
#[derive(Clone, Debug, Default)]
pub struct InboundUpdate {
    pub update_id: i64,
    pub sender_id: Option<UserId>,
    pub chat_id: Option<ChatId>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photos: Vec<PhotoRef>,
}

/// Reference to one photo variant, resolvable via the platform's file API.
#[derive(Clone, Debug)]
pub struct PhotoRef {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}
