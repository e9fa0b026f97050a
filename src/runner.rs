//! Subprocess execution seam
//!
//! The package installer talks to the host only through [`CommandRunner`], so the
//! privilege ladder can be exercised in tests without a real package manager.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Locate a binary on the executable search path
    fn locate(&self, binary: &str) -> Option<PathBuf>;

    /// Whether the current process already runs with root privileges
    fn is_privileged(&self) -> bool;
}

/// Runs commands on the local host
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("Running: {} {}", program, args.join(" "));

        let output = AsyncCommand::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", program))?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn locate(&self, binary: &str) -> Option<PathBuf> {
        which::which(binary).ok()
    }

    fn is_privileged(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }
}
