/// Core error type for the relay.
///
/// Adapter crates map their library errors into this type so the relay loop
/// can tell retryable transport failures from the one formatting rejection
/// it handles specially.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The platform rejected a message specifically because of its
    /// formatting (Telegram "can't parse entities"). The sender retries the
    /// same chunk once as plain text.
    #[error("formatting rejected: {0}")]
    Formatting(String),

    #[error("telegram error: {0}")]
    Telegram(String),

    #[error("agent error: {0}")]
    Agent(String),
}

pub type Result<T> = std::result::Result<T, Error>;
