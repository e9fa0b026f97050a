//! Destructive reset of all local backup data
//!
//! Irreversible: everything inside the backup directory goes, including `.git`, together
//! with any installed recurring job. No confirmation happens here.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::schedule::ScheduleInstaller;

#[derive(Debug, Clone)]
pub struct ResetReport {
    pub path: PathBuf,
    pub removed_entries: usize,
    pub removed_jobs: Vec<PathBuf>,
}

pub fn nuke(path: &Path, schedule: &ScheduleInstaller<'_>) -> Result<ResetReport> {
    if path.parent().is_none() {
        return Err(anyhow!("refusing to wipe {}", path.display()));
    }

    warn!("Destroying all backup data in {}", path.display());

    let mut removed_entries = 0;
    if path.exists() {
        let entries = std::fs::read_dir(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        for entry in entries {
            let entry = entry.with_context(|| format!("Failed to read {}", path.display()))?;
            let entry_path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("Failed to stat {}", entry_path.display()))?;

            // file_type() does not follow symlinks, so linked directories are unlinked only
            let removal = if file_type.is_dir() {
                std::fs::remove_dir_all(&entry_path)
            } else {
                std::fs::remove_file(&entry_path)
            };
            removal.with_context(|| format!("Failed to remove {}", entry_path.display()))?;

            removed_entries += 1;
        }
    }

    let removed_jobs = match schedule.uninstall_all() {
        Ok(removed) => removed,
        Err(e) => {
            warn!("Failed to remove scheduled jobs: {:#}", e);
            Vec::new()
        }
    };

    info!(
        "Removed {} entries and {} scheduled jobs",
        removed_entries,
        removed_jobs.len()
    );

    Ok(ResetReport {
        path: path.to_path_buf(),
        removed_entries,
        removed_jobs,
    })
}
