//! Queue file(s) of any type for delivery with the bot's next reply.
//! Images go out as photos, everything else as documents.
//!
//! Usage: attach-file <file> [file ...]

use std::{path::PathBuf, process::ExitCode};

use cab_attach::{queue_files, timestamp};
use cab_core::config::default_state_dir;

fn main() -> ExitCode {
    let sources: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if sources.is_empty() {
        eprintln!("Usage: attach-file <file> [file ...]");
        return ExitCode::FAILURE;
    }

    let dir = match default_state_dir() {
        Ok(dir) => dir.join("pending_attachments"),
        Err(e) => {
            eprintln!("attach-file: {e}");
            return ExitCode::FAILURE;
        }
    };

    match queue_files(&sources, &dir, &timestamp(), false) {
        Ok(queued) => {
            for dest in queued {
                println!("{}", dest.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("attach-file: {e}");
            ExitCode::FAILURE
        }
    }
}
