//! Queue files into the relay's drop-folders.
//!
//! The next time the bot flushes an assistant reply it drains these
//! folders, sends the contents on Telegram (images as photos, the rest as
//! documents) and deletes them.

use std::{
    fs,
    path::{Path, PathBuf},
};

use cab_core::{attachments::is_image_path, Result};

/// Copy `sources` into `dir`, renaming each with `stamp` (and an index for
/// all but the first) to avoid collisions. Non-files are skipped with a
/// stderr note, as are non-images when `images_only` is set. Returns the
/// destination paths.
pub fn queue_files(
    sources: &[PathBuf],
    dir: &Path,
    stamp: &str,
    images_only: bool,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let mut queued = Vec::new();
    for (i, src) in sources.iter().enumerate() {
        if !src.is_file() {
            eprintln!("not a file: {}", src.display());
            continue;
        }
        if images_only && !is_image_path(src) {
            eprintln!("skipping non-image: {}", src.display());
            continue;
        }

        let stem = src
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("attachment");
        let ext = src
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();

        let name = if i == 0 {
            format!("{stem}_{stamp}{ext}")
        } else {
            format!("{stem}_{stamp}_{i}{ext}")
        };

        let dest = dir.join(name);
        fs::copy(src, &dest)?;
        queued.push(dest);
    }

    Ok(queued)
}

pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H-%M-%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = PathBuf::from(format!("/tmp/{prefix}-{}-{ts}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn copies_with_stamp_and_index() {
        let src_dir = tmp_dir("cab-attach-src");
        let drop_dir = tmp_dir("cab-attach-drop");
        let a = src_dir.join("a.png");
        let b = src_dir.join("b.png");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let queued = queue_files(&[a, b], &drop_dir, "2026-01-02T03-04-05", true).unwrap();
        assert_eq!(queued.len(), 2);
        assert!(queued[0].ends_with("a_2026-01-02T03-04-05.png"));
        assert!(queued[1].ends_with("b_2026-01-02T03-04-05_1.png"));
        assert!(queued.iter().all(|p| p.is_file()));
    }

    #[test]
    fn images_only_filters_other_extensions() {
        let src_dir = tmp_dir("cab-attach-filter-src");
        let drop_dir = tmp_dir("cab-attach-filter-drop");
        let doc = src_dir.join("report.pdf");
        fs::write(&doc, b"pdf").unwrap();

        let queued = queue_files(&[doc.clone()], &drop_dir, "s", true).unwrap();
        assert!(queued.is_empty());

        let queued = queue_files(&[doc], &drop_dir, "s", false).unwrap();
        assert_eq!(queued.len(), 1);
    }

    #[test]
    fn missing_sources_are_skipped() {
        let drop_dir = tmp_dir("cab-attach-missing");
        let queued = queue_files(
            &[PathBuf::from("/nonexistent/x.png")],
            &drop_dir,
            "s",
            false,
        )
        .unwrap();
        assert!(queued.is_empty());
    }
}
