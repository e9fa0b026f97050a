//! gina - Git-backed backup synchronization for a single directory
//!
//! gina turns a local directory into a git working copy bound to a remote repository and
//! keeps the two converged: local changes are committed and force-published, remote
//! changes win every conflict, and a recurring job repeats the cycle unattended.
//!
//! ## Core Features
//!
//! - **Connection Parsing**: Credentials extracted from the repository URL, SSH key fallback
//! - **Dependency Provisioning**: Missing binaries installed through apk, pacman or apt-get
//! - **Theirs-wins Sync**: Fetch, merge preferring the remote, commit, force-push
//! - **Scheduling**: Job scripts under `/etc/periodic/<interval>`
//! - **Reset**: Destroys local backup data and installed jobs
//!
//! ## Modules
//!
//! - [`config`]: Configuration file, environment defaults and resolved settings
//! - [`connection`]: Repository URL parsing and credential selection
//! - [`orchestrator`]: One end-to-end run
//! - [`error`]: Exit code taxonomy

pub mod config;
pub mod connection;
pub mod error;
pub mod git;
pub mod lifecycle;
pub mod orchestrator;
pub mod packages;
pub mod reset;
pub mod runner;
pub mod schedule;
pub mod sync;
pub mod target;

pub use config::{CliOptions, Config, EnvDefaults, Interval, Settings};
pub use connection::{ConnectionString, Credential};
pub use error::{ErrorReporter, ExitStatus, GinaError};
pub use git::GitClient;
pub use orchestrator::{Orchestrator, RunSummary};
pub use packages::{PackageInstaller, PackageManager};
pub use runner::{CommandRunner, SystemRunner};
pub use sync::{SyncEngine, SyncOutcome, SyncReport};
