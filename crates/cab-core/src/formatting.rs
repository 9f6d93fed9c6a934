//! Text post-processing applied to each flushed piece of agent output.

use std::path::PathBuf;

const ATTACH_IMAGE_PREFIX: &str = "attach-image:";

/// Pull `attach-image: <path>` directive lines out of `text`.
///
/// Directive lines are removed from the displayed text whether or not the
/// referenced path exists; the caller decides per path whether a photo can
/// actually be sent.
pub fn extract_image_directives(text: &str) -> (String, Vec<PathBuf>) {
    let mut kept: Vec<&str> = Vec::new();
    let mut images: Vec<PathBuf> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix(ATTACH_IMAGE_PREFIX) {
            let path = rest.trim();
            if !path.is_empty() {
                images.push(PathBuf::from(path));
            }
            continue;
        }
        kept.push(line);
    }

    (kept.join("\n"), images)
}

/// Collapse runs of blank lines down to a single blank line.
pub fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut prev_blank = false;

    for line in text.lines() {
        let blank = line.trim().is_empty();
        if blank && prev_blank {
            continue;
        }
        out.push(if blank { "" } else { line });
        prev_blank = blank;
    }

    out.join("\n")
}
