//! Dependency installation across package managers
//!
//! Required binaries are looked up on `PATH` first so a re-run on every scheduled cycle does
//! no install work once the host is provisioned. Missing binaries are installed with the
//! host's package manager, escalating through `sudo` where the manager family allows it.
//! A second failure is reported as [`InstallOutcome::NeedsPrivilegedRetry`]; the caller
//! decides what to do with it, the installer never re-executes itself.

use std::fmt;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::error::GinaError;
use crate::runner::{CommandOutput, CommandRunner};

/// Binaries gina needs on the host
pub const REQUIRED_BINARIES: &[&str] = &["git"];

const OS_RELEASE: &str = "/etc/os-release";

/// Package manager family of the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageManager {
    Alpine,
    ArchLike,
    DebianLike,
    Unsupported(String),
}

impl PackageManager {
    /// Identify the package manager from the host's `/etc/os-release`
    pub fn detect() -> Self {
        Self::detect_from(Path::new(OS_RELEASE))
    }

    pub fn detect_from(os_release: &Path) -> Self {
        match std::fs::read_to_string(os_release) {
            Ok(content) => Self::from_os_release(&content),
            Err(e) => {
                warn!("Cannot read {}: {}", os_release.display(), e);
                PackageManager::Unsupported("unknown".to_string())
            }
        }
    }

    /// Classify by `ID`, falling back to the families listed in `ID_LIKE`
    pub fn from_os_release(content: &str) -> Self {
        let field = |key: &str| -> String {
            content
                .lines()
                .filter_map(|line| line.strip_prefix(key))
                .filter_map(|rest| rest.strip_prefix('='))
                .map(|value| value.trim().trim_matches('"').trim_matches('\'').to_lowercase())
                .next()
                .unwrap_or_default()
        };

        let id = field("ID");
        let id_like = field("ID_LIKE");

        std::iter::once(id.as_str())
            .chain(id_like.split_whitespace())
            .find_map(Self::from_id)
            .unwrap_or_else(|| {
                PackageManager::Unsupported(if id.is_empty() { "unknown".to_string() } else { id })
            })
    }

    fn from_id(id: &str) -> Option<Self> {
        match id {
            "alpine" | "postmarketos" => Some(PackageManager::Alpine),
            "arch" | "archarm" | "manjaro" | "endeavouros" | "artix" => {
                Some(PackageManager::ArchLike)
            }
            "debian" | "ubuntu" | "raspbian" | "linuxmint" | "pop" => {
                Some(PackageManager::DebianLike)
            }
            _ => None,
        }
    }

    fn install_command<'a>(&self, packages: &[&'a str]) -> Option<(&'static str, Vec<&'a str>)> {
        let (program, mut args): (&'static str, Vec<&'a str>) = match self {
            PackageManager::Alpine => ("apk", vec!["add", "--force-overwrite"]),
            PackageManager::ArchLike => ("pacman", vec!["-S", "--noconfirm", "--needed"]),
            PackageManager::DebianLike => ("apt-get", vec!["install", "-y"]),
            PackageManager::Unsupported(_) => return None,
        };
        args.extend_from_slice(packages);
        Some((program, args))
    }

    fn cache_clean_command(&self) -> Option<(&'static str, Vec<&'static str>)> {
        match self {
            PackageManager::Alpine => Some(("sh", vec!["-c", "rm -rf /var/cache/apk/*"])),
            PackageManager::ArchLike => Some(("pacman", vec!["-Scc", "--noconfirm"])),
            PackageManager::DebianLike => Some(("apt-get", vec!["clean"])),
            PackageManager::Unsupported(_) => None,
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageManager::Alpine => write!(f, "alpine"),
            PackageManager::ArchLike => write!(f, "arch"),
            PackageManager::DebianLike => write!(f, "debian"),
            PackageManager::Unsupported(id) => write!(f, "unsupported ({})", id),
        }
    }
}

/// What the installer has to do this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    pub missing: Vec<String>,
    pub manager: PackageManager,
}

/// Result of [`PackageInstaller::ensure_installed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Everything was already on `PATH`
    AlreadySatisfied,
    /// These packages were installed
    Installed(Vec<String>),
    /// Installation failed even with elevation; re-run as root
    NeedsPrivilegedRetry(String),
    /// Installation failed for a reason elevation will not fix
    Failed(String),
}

impl InstallOutcome {
    /// Map a non-success outcome to the run's error taxonomy
    pub fn into_result(self) -> Result<Self, GinaError> {
        match self {
            InstallOutcome::NeedsPrivilegedRetry(detail) => Err(GinaError::Permission(detail)),
            InstallOutcome::Failed(detail) => Err(GinaError::Unclassified(anyhow::anyhow!(
                "package installation failed: {}",
                detail
            ))),
            ok => Ok(ok),
        }
    }
}

/// Installs missing binaries through the host package manager
pub struct PackageInstaller<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> PackageInstaller<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Partition requirements into present and missing
    pub fn plan(&self, requirements: &[&str], manager: &PackageManager) -> InstallPlan {
        let missing = requirements
            .iter()
            .filter(|binary| match self.runner.locate(binary) {
                Some(path) => {
                    debug!("Found {} at {}", binary, path.display());
                    false
                }
                None => true,
            })
            .map(|binary| binary.to_string())
            .collect();

        InstallPlan {
            missing,
            manager: manager.clone(),
        }
    }

    pub async fn ensure_installed(
        &self,
        requirements: &[&str],
        manager: &PackageManager,
    ) -> Result<InstallOutcome, GinaError> {
        let plan = self.plan(requirements, manager);

        if plan.missing.is_empty() {
            debug!("All required binaries present: {}", requirements.join(", "));
            return Ok(InstallOutcome::AlreadySatisfied);
        }

        info!(
            "Installing missing packages with {}: {}",
            plan.manager,
            plan.missing.join(", ")
        );

        let packages: Vec<&str> = plan.missing.iter().map(String::as_str).collect();
        let Some((program, args)) = plan.manager.install_command(&packages) else {
            return Err(GinaError::UnsupportedPlatform(plan.manager.to_string()));
        };

        match plan.manager {
            PackageManager::Alpine => {
                let output = self.run_quiet(program, &args, false).await;
                if output.success {
                    self.clean_cache(&plan.manager, false).await;
                    Ok(InstallOutcome::Installed(plan.missing))
                } else if self.runner.is_privileged() {
                    Ok(InstallOutcome::Failed(output.stderr.trim().to_string()))
                } else {
                    Ok(InstallOutcome::NeedsPrivilegedRetry(format!(
                        "{} requires root: {}",
                        program,
                        output.stderr.trim()
                    )))
                }
            }
            _ => {
                let output = self.run_quiet(program, &args, false).await;
                if output.success {
                    self.clean_cache(&plan.manager, false).await;
                    return Ok(InstallOutcome::Installed(plan.missing));
                }

                warn!(
                    "{} failed unprivileged, retrying with sudo: {}",
                    program,
                    output.stderr.trim()
                );

                let output = self.run_quiet(program, &args, true).await;
                if output.success {
                    self.clean_cache(&plan.manager, true).await;
                    Ok(InstallOutcome::Installed(plan.missing))
                } else {
                    Ok(InstallOutcome::NeedsPrivilegedRetry(format!(
                        "{} failed with sudo: {}",
                        program,
                        output.stderr.trim()
                    )))
                }
            }
        }
    }

    /// Run a command, folding spawn errors into a failed output
    async fn run_quiet(&self, program: &str, args: &[&str], elevated: bool) -> CommandOutput {
        let result = if elevated {
            let mut sudo_args = Vec::with_capacity(args.len() + 1);
            sudo_args.push(program);
            sudo_args.extend_from_slice(args);
            self.runner.run("sudo", &sudo_args).await
        } else {
            self.runner.run(program, args).await
        };

        result.unwrap_or_else(|e| CommandOutput {
            success: false,
            stdout: String::new(),
            stderr: format!("{:#}", e),
        })
    }

    async fn clean_cache(&self, manager: &PackageManager, elevated: bool) {
        let Some((program, args)) = manager.cache_clean_command() else {
            return;
        };

        let output = self.run_quiet(program, &args, elevated).await;
        if output.success {
            debug!("Cleared {} package cache", manager);
        } else {
            warn!("Failed to clear {} package cache: {}", manager, output.stderr.trim());
        }
    }
}
