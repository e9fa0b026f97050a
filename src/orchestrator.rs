//! Drives one run: reset, or parse → install → schedule → initialize → sync

use tracing::{info, warn};

use crate::config::Settings;
use crate::connection::Credential;
use crate::error::GinaError;
use crate::git::GitClient;
use crate::lifecycle::RepositoryLifecycle;
use crate::packages::{InstallOutcome, PackageInstaller, PackageManager, REQUIRED_BINARIES};
use crate::reset::{self, ResetReport};
use crate::runner::CommandRunner;
use crate::schedule::ScheduleInstaller;
use crate::sync::{SyncEngine, SyncReport};
use crate::target::BackupTarget;

/// What a successful run did
#[derive(Debug, Clone)]
pub enum RunSummary {
    Reset(ResetReport),
    Synced(SyncReport),
}

pub struct Orchestrator<R: CommandRunner> {
    settings: Settings,
    installer: PackageInstaller<R>,
    manager: PackageManager,
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn new(settings: Settings, runner: R, manager: PackageManager) -> Self {
        Self {
            settings,
            installer: PackageInstaller::new(runner),
            manager,
        }
    }

    pub async fn run(&self) -> Result<RunSummary, GinaError> {
        let settings = &self.settings;
        let schedule = ScheduleInstaller::new(&settings.schedule_directory);

        // Reset wins over every other flag and never syncs
        if settings.delete {
            let report = reset::nuke(&settings.backup_directory, &schedule)
                .map_err(GinaError::classify)?;
            return Ok(RunSummary::Reset(report));
        }

        let target = BackupTarget::from_settings(settings)?;
        match &target.credential {
            Credential::Password { user, .. } => info!(
                "Backing up {} to {} as {}",
                settings.backup_directory.display(),
                target.host,
                user
            ),
            Credential::SshKey(key) => info!(
                "Backing up {} to {} with key {}",
                settings.backup_directory.display(),
                target.host,
                key.display()
            ),
        }

        let outcome = self
            .installer
            .ensure_installed(REQUIRED_BINARIES, &self.manager)
            .await?
            .into_result()?;
        if let InstallOutcome::Installed(packages) = outcome {
            info!("Installed {}", packages.join(", "));
        }

        if let Some(interval) = target.interval {
            if let Err(e) = schedule.install(
                interval,
                &settings.backup_directory,
                &target,
                &settings.branch,
                &settings.sql,
            ) {
                warn!("Failed to install {} job: {:#}", interval, e);
            }
        }

        let git = GitClient::new(&target.credential);
        RepositoryLifecycle::new(&git, &settings.identity, &settings.branch)
            .ensure_initialized(&settings.backup_directory, &target.remote_url)
            .await
            .map_err(GinaError::classify)?;

        let runner = self.installer.runner();
        let report = SyncEngine::new(&git, runner, &settings.branch, &settings.sql)
            .sync_once(&settings.backup_directory, &target)
            .await;

        Ok(RunSummary::Synced(report))
    }
}
