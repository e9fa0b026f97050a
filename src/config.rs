use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::GinaError;

/// File-backed defaults for gina
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Directory that is backed up (defaults to the current directory)
    #[serde(default)]
    pub backup_directory: Option<String>,

    /// Remote branch the backup is published to
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Default repository URL
    #[serde(default)]
    pub repository: Option<String>,

    /// Default SSH key
    #[serde(default)]
    pub ssh_key: Option<String>,

    /// Default schedule interval
    #[serde(default)]
    pub interval: Option<Interval>,

    /// Author identity recorded on backup commits
    #[serde(default)]
    pub identity: IdentityConfig,

    /// SQL dump settings
    #[serde(default)]
    pub sql: SqlConfig,

    /// Recurring job settings
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Service identity used for commits, never the invoking user
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_name")]
    pub name: String,

    #[serde(default = "default_identity_email")]
    pub email: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SqlConfig {
    /// Command whose stdout becomes the dump file
    #[serde(default = "default_dump_command")]
    pub dump_command: String,

    /// Dump file name, relative to the backup directory
    #[serde(default = "default_dump_file")]
    pub dump_file: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScheduleConfig {
    /// Root holding one sub-directory per interval (`/etc/periodic/daily`, ...)
    #[serde(default = "default_schedule_directory")]
    pub directory: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

/// How often the recurring job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Interval {
    #[serde(rename = "15min")]
    #[value(name = "15min")]
    FifteenMinutes,
    #[serde(rename = "hourly")]
    Hourly,
    #[serde(rename = "daily")]
    Daily,
    #[serde(rename = "weekly")]
    Weekly,
    #[serde(rename = "monthly")]
    Monthly,
}

impl Interval {
    pub const ALL: [Interval; 5] = [
        Interval::FifteenMinutes,
        Interval::Hourly,
        Interval::Daily,
        Interval::Weekly,
        Interval::Monthly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::FifteenMinutes => "15min",
            Interval::Hourly => "hourly",
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = GinaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|interval| interval.as_str() == s.trim())
            .ok_or_else(|| GinaError::InvalidOption(format!("unknown interval '{}'", s)))
    }
}

// Default value functions
fn default_branch() -> String {
    "main".to_string()
}
fn default_identity_name() -> String {
    "gina".to_string()
}
fn default_identity_email() -> String {
    "gina@localhost".to_string()
}
fn default_dump_command() -> String {
    "mysqldump --all-databases".to_string()
}
fn default_dump_file() -> String {
    "dump.sql".to_string()
}
fn default_schedule_directory() -> String {
    "/etc/periodic".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: default_identity_name(),
            email: default_identity_email(),
        }
    }
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            dump_command: default_dump_command(),
            dump_file: default_dump_file(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            directory: default_schedule_directory(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_directory: None,
            branch: default_branch(),
            repository: None,
            ssh_key: None,
            interval: None,
            identity: IdentityConfig::default(),
            sql: SqlConfig::default(),
            schedule: ScheduleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load the default config file if there is one, built-in defaults otherwise
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("gina").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        if let Some(dir) = &self.backup_directory {
            self.backup_directory = Some(
                shellexpand::full(dir)
                    .context("Failed to expand backup_directory path")?
                    .into_owned(),
            );
        }

        if let Some(key) = &self.ssh_key {
            self.ssh_key = Some(
                shellexpand::full(key)
                    .context("Failed to expand ssh_key path")?
                    .into_owned(),
            );
        }

        self.schedule.directory = shellexpand::full(&self.schedule.directory)
            .context("Failed to expand schedule directory")?
            .into_owned();

        Ok(())
    }
}

/// `GINA_*` environment defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvDefaults {
    pub repository: Option<String>,
    pub ssh_key: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub interval: Option<String>,
    pub path: Option<String>,
}

impl EnvDefaults {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            repository: get("GINA_REPOSITORY"),
            ssh_key: get("GINA_SSHKEY"),
            host: get("GINA_HOST"),
            user: get("GINA_USER"),
            password: get("GINA_PASSWORD"),
            interval: get("GINA_INTERVAL"),
            path: get("GINA_PATH"),
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub repository: Option<String>,
    pub interval: Option<Interval>,
    pub ssh_key: Option<PathBuf>,
    pub sql: bool,
    pub delete: bool,
    pub path: Option<PathBuf>,
}

/// Fully resolved, immutable run settings.
///
/// Built once at startup with precedence CLI > environment > config file > defaults and
/// handed to every component by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    pub repository: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub interval: Option<Interval>,
    pub sql_mode: bool,
    pub delete: bool,
    pub backup_directory: PathBuf,
    pub fallback_host: Option<String>,
    pub fallback_user: Option<String>,
    pub fallback_password: Option<String>,
    pub branch: String,
    pub identity: IdentityConfig,
    pub sql: SqlConfig,
    pub schedule_directory: PathBuf,
}

impl Settings {
    pub fn resolve(cli: CliOptions, env: EnvDefaults, config: Config) -> Result<Self, GinaError> {
        let interval = match (cli.interval, env.interval.as_deref()) {
            (Some(interval), _) => Some(interval),
            (None, Some(raw)) => Some(raw.parse()?),
            (None, None) => config.interval,
        };

        // Scheduled jobs run from the scheduler's cwd, so the path must be absolute
        let backup_directory = match cli
            .path
            .or_else(|| env.path.map(PathBuf::from))
            .or_else(|| config.backup_directory.map(PathBuf::from))
        {
            Some(path) if path.is_absolute() => path,
            Some(path) => current_dir()?.join(path),
            None => current_dir()?,
        };
        let backup_directory = path_clean::clean(backup_directory);

        Ok(Self {
            repository: cli.repository.or(env.repository).or(config.repository),
            ssh_key: cli
                .ssh_key
                .or_else(|| env.ssh_key.map(PathBuf::from))
                .or_else(|| config.ssh_key.map(PathBuf::from)),
            interval,
            sql_mode: cli.sql,
            delete: cli.delete,
            backup_directory,
            fallback_host: env.host,
            fallback_user: env.user,
            fallback_password: env.password,
            branch: config.branch,
            identity: config.identity,
            sql: config.sql,
            schedule_directory: PathBuf::from(config.schedule.directory),
        })
    }
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("Failed to determine current directory")
}
