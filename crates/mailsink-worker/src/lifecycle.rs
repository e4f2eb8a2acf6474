//! File lifecycle management
//!
//! A staged mail file lives in exactly one of three directories (waiting,
//! run for claimed in-flight work, or buggy for quarantine) and is deleted
//! on terminal success. The filesystem itself is the only persistence for this
//! state machine; after an unclean shutdown, [`recover_startup`] moves
//! leftover run files back to waiting before the dispatch loop starts.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

/// Move a file, falling back to copy+remove when a plain rename fails
/// (e.g. across filesystems).
pub fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dest)?;
            std::fs::remove_file(src)
        },
    }
}

/// Best-effort move of a set of files into `dest_dir`.
///
/// A file whose move fails (e.g. concurrently removed) is logged and
/// skipped; the rest of the set still moves. Returns the new paths of the
/// files that did move.
pub fn stage_files(files: &[PathBuf], dest_dir: &Path) -> Vec<PathBuf> {
    let mut moved = Vec::with_capacity(files.len());
    for src in files {
        let Some(name) = src.file_name() else {
            warn!(path = %src.display(), "Skipping file without a name");
            continue;
        };
        let dest = dest_dir.join(name);
        match move_file(src, &dest) {
            Ok(()) => moved.push(dest),
            Err(e) => {
                error!(src = %src.display(), dest = %dest.display(), error = %e,
                       "Failed moving file");
            },
        }
    }
    moved
}

/// Move a file into the quarantine directory under its original filename.
pub fn quarantine(file: &Path, buggy_dir: &Path) -> io::Result<()> {
    let name = file.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "file has no name")
    })?;
    move_file(file, &buggy_dir.join(name))
}

/// Apply a terminal outcome to a staged file: delete on success, quarantine
/// on failure. Missing files are treated as already finalized.
pub fn finalize(file: &Path, succeeded: bool, buggy_dir: &Path) -> io::Result<()> {
    if !file.exists() {
        return Ok(());
    }
    if succeeded {
        std::fs::remove_file(file)
    } else {
        quarantine(file, buggy_dir)
    }
}

/// Move every file stranded in the run directory back to waiting.
///
/// Run once before the dispatch loop starts; files left in run from a prior
/// crash represent ambiguous in-flight work and must become candidates
/// again. Idempotent: an empty run directory is a no-op. Returns the number
/// of files restored.
pub fn recover_startup(run_dir: &Path, wait_dir: &Path) -> usize {
    let entries = match std::fs::read_dir(run_dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!(dir = %run_dir.display(), error = %e, "Failed to scan run directory for recovery");
            return 0;
        },
    };
    let mut recovered = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let Some(name) = path.file_name() else { continue };
        match move_file(&path, &wait_dir.join(name)) {
            Ok(()) => recovered += 1,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to recover leftover run file");
            },
        }
    }
    if recovered > 0 {
        info!(files = recovered, "Recovered staged files from a previous run");
    }
    recovered
}
