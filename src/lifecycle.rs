//! Repository lifecycle: absent → uninitialized directory → initialized repository
//!
//! [`RepositoryLifecycle::ensure_initialized`] is the only writer of [`RepositoryState`].
//! It never removes content already in the directory.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::IdentityConfig;
use crate::git::GitClient;

pub const REMOTE_NAME: &str = "origin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState {
    Absent,
    UninitializedDir,
    Initialized,
}

impl fmt::Display for RepositoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryState::Absent => write!(f, "absent"),
            RepositoryState::UninitializedDir => write!(f, "uninitialized directory"),
            RepositoryState::Initialized => write!(f, "initialized"),
        }
    }
}

pub struct RepositoryLifecycle<'a> {
    git: &'a GitClient,
    identity: &'a IdentityConfig,
    branch: &'a str,
}

impl<'a> RepositoryLifecycle<'a> {
    pub fn new(git: &'a GitClient, identity: &'a IdentityConfig, branch: &'a str) -> Self {
        Self {
            git,
            identity,
            branch,
        }
    }

    /// Current state of `path`, without touching it
    pub fn inspect(path: &Path) -> RepositoryState {
        if !path.exists() {
            RepositoryState::Absent
        } else if path.join(".git").exists() {
            RepositoryState::Initialized
        } else {
            RepositoryState::UninitializedDir
        }
    }

    /// Make `path` a git repository bound to `remote_url`.
    ///
    /// Identity and remote are re-asserted on every call so re-running is harmless.
    pub async fn ensure_initialized(&self, path: &Path, remote_url: &str) -> Result<RepositoryState> {
        let before = Self::inspect(path);
        debug!("Repository {} is {}", path.display(), before);

        match before {
            RepositoryState::Absent => {
                tokio::fs::create_dir_all(path)
                    .await
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                self.git.init(path, self.branch).await?;
                info!("Initialized new backup repository at {}", path.display());
            }
            RepositoryState::UninitializedDir => {
                self.git.init(path, self.branch).await?;
                info!("Initialized backup repository in existing {}", path.display());
            }
            RepositoryState::Initialized => {}
        }

        self.git
            .set_config(path, "user.name", &self.identity.name)
            .await?;
        self.git
            .set_config(path, "user.email", &self.identity.email)
            .await?;
        self.git
            .bind_remote(path, REMOTE_NAME, remote_url)
            .await
            .context("Failed to register remote")?;

        Ok(RepositoryState::Initialized)
    }
}
