//! Chunked outbound sending with a plain-text fallback.

use crate::{domain::ChatId, errors::Error, ports::ChatPort, Result};

/// Send `text` in chunks no larger than `limit` characters, in order, so
/// that concatenating the chunks reconstructs the original exactly.
///
/// Each chunk goes out with Markdown formatting first; if the platform
/// rejects a chunk specifically for its formatting, the same chunk is
/// resent once as plain text. Any other error propagates.
pub async fn send_chunked(
    port: &dyn ChatPort,
    chat_id: ChatId,
    text: &str,
    limit: usize,
) -> Result<()> {
    for chunk in split_chunks(text, limit) {
        match port.send_text(chat_id, &chunk, true).await {
            Ok(()) => {}
            Err(Error::Formatting(_)) => port.send_text(chat_id, &chunk, false).await?,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn split_chunks(s: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut count = 0usize;

    for ch in s.chars() {
        if count >= max_chars {
            out.push(std::mem::take(&mut cur));
            count = 0;
        }
        cur.push(ch);
        count += 1;
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}
