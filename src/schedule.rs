//! Recurring job installation
//!
//! The job is a shell script dropped into `<root>/<interval>/gina` (the layout of
//! busybox/Alpine `/etc/periodic`). It restates the sync protocol so scheduled runs keep
//! working without this binary: pull preferring the remote, optional dump, add, commit with
//! the same message format as [`crate::sync::commit_message`], force-push.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::{Interval, SqlConfig};
use crate::connection::Credential;
use crate::git::{sh_quote, ssh_command};
use crate::lifecycle::REMOTE_NAME;
use crate::sync::{COMMIT_TAG, COMMIT_TIMESTAMP_FORMAT};
use crate::target::BackupTarget;

pub const JOB_FILE_NAME: &str = "gina";

pub struct ScheduleInstaller<'a> {
    root: &'a Path,
}

impl<'a> ScheduleInstaller<'a> {
    pub fn new(root: &'a Path) -> Self {
        Self { root }
    }

    pub fn job_path(&self, interval: Interval) -> PathBuf {
        self.root.join(interval.as_str()).join(JOB_FILE_NAME)
    }

    /// Write the job for `interval` and remove jobs left behind under other intervals
    pub fn install(
        &self,
        interval: Interval,
        backup_directory: &Path,
        target: &BackupTarget,
        branch: &str,
        sql: &SqlConfig,
    ) -> Result<PathBuf> {
        let path = self.job_path(interval);
        let script = render_job(backup_directory, target, branch, sql);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, script)
            .with_context(|| format!("Failed to write job file {}", path.display()))?;
        make_executable(&path)?;

        for other in Interval::ALL.into_iter().filter(|other| *other != interval) {
            let stale = self.job_path(other);
            if stale.exists() {
                match std::fs::remove_file(&stale) {
                    Ok(()) => debug!("Removed stale job {}", stale.display()),
                    Err(e) => warn!("Failed to remove stale job {}: {}", stale.display(), e),
                }
            }
        }

        info!("Installed {} job at {}", interval, path.display());
        Ok(path)
    }

    /// Remove every installed job, returning the removed paths
    pub fn uninstall_all(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for interval in Interval::ALL {
            let path = self.job_path(interval);
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove job file {}", path.display()))?;
                removed.push(path);
            }
        }
        Ok(removed)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to make {} executable", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

pub fn render_job(
    backup_directory: &Path,
    target: &BackupTarget,
    branch: &str,
    sql: &SqlConfig,
) -> String {
    let mut script = String::from("#!/bin/sh\n# Installed by gina, overwritten on every run\n");
    script.push_str("export GIT_TERMINAL_PROMPT=0\n");

    if let Credential::SshKey(key) = &target.credential {
        script.push_str(&format!(
            "export GIT_SSH_COMMAND={}\n",
            sh_quote(&ssh_command(key))
        ));
    }

    script.push_str(&format!(
        "cd {} || exit 1\n",
        sh_quote(&backup_directory.to_string_lossy())
    ));
    script.push_str(&format!(
        "git pull --no-edit --allow-unrelated-histories -X theirs {} {}\n",
        REMOTE_NAME,
        sh_quote(branch)
    ));

    if target.sql_mode {
        script.push_str(&format!("{} > {}\n", sql.dump_command, sh_quote(&sql.dump_file)));
    }

    script.push_str("git add -A\n");
    script.push_str(&format!(
        "git commit -q -m \"$(date '+{}') {}\"\n",
        COMMIT_TIMESTAMP_FORMAT, COMMIT_TAG
    ));
    script.push_str(&format!(
        "git push --force {} HEAD:{}\n",
        REMOTE_NAME,
        sh_quote(branch)
    ));

    script
}
