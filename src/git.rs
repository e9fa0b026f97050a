use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::connection::Credential;

/// Thin async wrapper around the `git` binary.
///
/// Every invocation runs non-interactively; with an SSH key credential the key is
/// forced through `GIT_SSH_COMMAND`.
#[derive(Debug, Clone, Default)]
pub struct GitClient {
    ssh_key: Option<PathBuf>,
}

/// Output of a git command that exited successfully
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

impl GitClient {
    pub fn new(credential: &Credential) -> Self {
        match credential {
            Credential::SshKey(key) => Self {
                ssh_key: Some(key.clone()),
            },
            Credential::Password { .. } => Self::default(),
        }
    }

    /// Non-interactive `git` invocation in `path`, pinned to the C locale
    fn command(&self, path: &Path, args: &[&str]) -> AsyncCommand {
        let mut command = AsyncCommand::new("git");
        command
            .args(args)
            .current_dir(path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C");

        if let Some(key) = &self.ssh_key {
            command.env("GIT_SSH_COMMAND", ssh_command(key));
        }
        command
    }

    /// Run git in `path`, failing with stderr when git exits non-zero
    pub async fn run(&self, path: &Path, args: &[&str]) -> Result<GitOutput> {
        debug!("git {} (in {})", args.join(" "), path.display());

        let output = self
            .command(path, args)
            .output()
            .await
            .with_context(|| format!("Failed to execute git {}", args.first().unwrap_or(&"")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
            return Err(anyhow!("git {} failed: {}", args.join(" "), detail));
        }

        Ok(GitOutput { stdout, stderr })
    }

    pub async fn init(&self, path: &Path, branch: &str) -> Result<()> {
        self.run(path, &["init", "--quiet"]).await?;
        // Unborn HEAD can be repointed freely, works on git versions without --initial-branch
        let head_ref = format!("refs/heads/{}", branch);
        self.run(path, &["symbolic-ref", "HEAD", &head_ref]).await?;
        Ok(())
    }

    pub async fn set_config(&self, path: &Path, key: &str, value: &str) -> Result<()> {
        self.run(path, &["config", key, value]).await?;
        Ok(())
    }

    pub async fn get_remote_url(&self, path: &Path, remote: &str) -> Result<Option<String>> {
        match self.run(path, &["remote", "get-url", remote]).await {
            Ok(output) => Ok(Some(output.stdout.trim().to_string())),
            Err(_) => Ok(None),
        }
    }

    /// Add `remote`, or repoint it when it already exists
    pub async fn bind_remote(&self, path: &Path, remote: &str, url: &str) -> Result<()> {
        match self.get_remote_url(path, remote).await? {
            Some(existing) if existing == url => Ok(()),
            Some(_) => {
                self.run(path, &["remote", "set-url", remote, url]).await?;
                Ok(())
            }
            None => {
                self.run(path, &["remote", "add", remote, url]).await?;
                Ok(())
            }
        }
    }

    pub async fn add_all(&self, path: &Path) -> Result<()> {
        self.run(path, &["add", "-A"]).await?;
        Ok(())
    }

    pub async fn has_staged_changes(&self, path: &Path) -> Result<bool> {
        let output = self.run(path, &["status", "--porcelain"]).await?;
        Ok(!output.stdout.trim().is_empty())
    }

    pub async fn commit(&self, path: &Path, message: &str) -> Result<()> {
        self.run(path, &["commit", "--quiet", "-m", message]).await?;
        Ok(())
    }

    pub async fn fetch(&self, path: &Path, remote: &str, branch: &str) -> Result<()> {
        self.run(path, &["fetch", "--quiet", remote, branch]).await?;
        Ok(())
    }

    /// True when `name` resolves to a commit (false for an unborn HEAD)
    pub async fn has_ref(&self, path: &Path, name: &str) -> bool {
        self.run(path, &["rev-parse", "--verify", "--quiet", name])
            .await
            .is_ok()
    }

    /// Merge `FETCH_HEAD` without a strategy option, stopping before the merge commit
    pub async fn merge_no_commit(&self, path: &Path) -> Result<GitOutput> {
        self.run(
            path,
            &[
                "merge",
                "--allow-unrelated-histories",
                "--no-commit",
                "--no-edit",
                "FETCH_HEAD",
            ],
        )
        .await
    }

    pub async fn abort_merge(&self, path: &Path) -> Result<()> {
        self.run(path, &["merge", "--abort"]).await?;
        Ok(())
    }

    /// Merge `FETCH_HEAD`, preferring the fetched side on conflicting hunks
    pub async fn merge_theirs(&self, path: &Path) -> Result<GitOutput> {
        self.run(
            path,
            &[
                "merge",
                "--allow-unrelated-histories",
                "-X",
                "theirs",
                "--no-edit",
                "FETCH_HEAD",
            ],
        )
        .await
    }

    pub async fn unmerged_paths(&self, path: &Path) -> Result<Vec<String>> {
        let output = self
            .run(path, &["diff", "--name-only", "--diff-filter=U"])
            .await?;

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Take the fetched side of one unmerged path, deleting it if the remote did
    pub async fn take_theirs(&self, path: &Path, file: &str) -> Result<()> {
        if self
            .run(path, &["checkout", "--theirs", "--", file])
            .await
            .is_ok()
        {
            self.run(path, &["add", "--", file]).await?;
        } else {
            self.run(path, &["rm", "--quiet", "--", file]).await?;
        }
        Ok(())
    }

    pub async fn conclude_merge(&self, path: &Path) -> Result<()> {
        self.run(path, &["commit", "--quiet", "--no-edit"]).await?;
        Ok(())
    }

    pub async fn push_force(&self, path: &Path, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:{}", branch);
        self.run(path, &["push", "--quiet", "--force", remote, &refspec])
            .await?;
        Ok(())
    }
}

/// `GIT_SSH_COMMAND` value forcing `key`; git hands it to a shell
pub fn ssh_command(key: &Path) -> String {
    format!(
        "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
        sh_quote(&key.to_string_lossy())
    )
}

/// Single-quote a value for POSIX sh
pub fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// True when a git failure message points at rejected credentials rather than the network
pub fn is_auth_failure(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        "authentication failed",
        "permission denied",
        "could not read username",
        "invalid username or password",
        "error: 403",
        "error: 401",
        "access denied",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}
