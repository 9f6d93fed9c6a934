//! Drains the drop-folders that helper processes fill with files destined
//! for the user.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{domain::ChatId, ports::ChatPort, Result};

/// Extensions routed to photo delivery; everything else goes out as a
/// generic document.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// The two drop-folders: one populated by `attach-image` (images only),
/// one by `attach-file` (any file type).
#[derive(Clone, Debug)]
pub struct AttachmentRelay {
    images_dir: PathBuf,
    files_dir: PathBuf,
}

impl AttachmentRelay {
    pub fn new(images_dir: PathBuf, files_dir: PathBuf) -> Self {
        Self {
            images_dir,
            files_dir,
        }
    }

    /// One drain pass over both folders, in deterministic (sorted) order.
    ///
    /// Each entry is delivered at most once: the file is deleted whether or
    /// not its send succeeded, so a failing attachment can never wedge the
    /// queue. Send failures are logged and swallowed.
    pub async fn drain(&self, port: &dyn ChatPort, chat_id: ChatId) -> Result<()> {
        for dir in [&self.images_dir, &self.files_dir] {
            for path in sorted_entries(dir) {
                if is_image_path(&path) {
                    if let Err(e) = port.send_photo(chat_id, &path).await {
                        tracing::warn!("could not send photo {}: {e}", path.display());
                    }
                } else if let Err(e) = port.send_document(chat_id, &path).await {
                    tracing::warn!("could not send document {}: {e}", path.display());
                }

                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!("could not remove {}: {e}", path.display());
                }
            }
        }
        Ok(())
    }
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    paths
}
