//! Queue image file(s) for delivery with the bot's next reply.
//!
//! Usage: attach-image <image> [image ...]

use std::{path::PathBuf, process::ExitCode};

use cab_attach::{queue_files, timestamp};
use cab_core::config::default_state_dir;

fn main() -> ExitCode {
    let sources: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if sources.is_empty() {
        eprintln!("Usage: attach-image <image> [image ...]");
        return ExitCode::FAILURE;
    }

    let dir = match default_state_dir() {
        Ok(dir) => dir.join("pending_images"),
        Err(e) => {
            eprintln!("attach-image: {e}");
            return ExitCode::FAILURE;
        }
    };

    match queue_files(&sources, &dir, &timestamp(), true) {
        Ok(queued) => {
            for dest in queued {
                println!("{}", dest.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("attach-image: {e}");
            ExitCode::FAILURE
        }
    }
}
