//! Error taxonomy and the single exit handler
//!
//! Every way the process can end is funnelled through [`ErrorReporter::finish`], which
//! renders a short human-readable summary and hands back the exit code. The numeric code
//! is the durable, scriptable signal that cron and shell callers act on.

use std::process::ExitCode;

use clap::error::{ContextKind, ContextValue, ErrorKind};
use thiserror::Error;
use tracing::error;

use crate::orchestrator::RunSummary;
use crate::sync::SyncOutcome;

/// Failures that end a run with a classified exit code
#[derive(Debug, Error)]
pub enum GinaError {
    /// An option was given without its required value
    #[error("option '{0}' requires a value")]
    MissingArgument(String),

    /// A privileged operation is needed; the caller should retry as root
    #[error("permission denied: {0}")]
    Permission(String),

    /// No usable user/secret pair and no SSH key
    #[error("no usable credential: {0}")]
    Credential(String),

    /// Host uses a package manager we cannot drive
    #[error("unsupported platform '{0}': cannot install missing packages")]
    UnsupportedPlatform(String),

    /// Option not recognised or not implemented
    #[error("invalid or unimplemented option: {0}")]
    InvalidOption(String),

    /// Anything else
    #[error(transparent)]
    Unclassified(#[from] anyhow::Error),
}

/// Process exit codes understood by callers and schedulers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    MissingArgument,
    PermissionDenied,
    CredentialFailure,
    InvalidOption,
    Unclassified(u8),
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::MissingArgument => 40,
            ExitStatus::PermissionDenied => 43,
            ExitStatus::CredentialFailure => 44,
            ExitStatus::InvalidOption => 51,
            ExitStatus::Unclassified(code) => code,
        }
    }

    /// Interpret any raw exit code
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ExitStatus::Success,
            40 => ExitStatus::MissingArgument,
            43 => ExitStatus::PermissionDenied,
            44 => ExitStatus::CredentialFailure,
            51 => ExitStatus::InvalidOption,
            other => ExitStatus::Unclassified(other),
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ExitStatus::Success => "completed successfully",
            ExitStatus::MissingArgument => "a required argument is missing for an option",
            ExitStatus::PermissionDenied => "permission denied, re-run as root",
            ExitStatus::CredentialFailure => {
                "no usable username/password in the repository URL and no SSH key given"
            }
            ExitStatus::InvalidOption => "invalid or unimplemented option",
            ExitStatus::Unclassified(_) => "unclassified internal error",
        }
    }
}

impl GinaError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            GinaError::MissingArgument(_) => ExitStatus::MissingArgument,
            GinaError::Permission(_) => ExitStatus::PermissionDenied,
            GinaError::Credential(_) => ExitStatus::CredentialFailure,
            GinaError::InvalidOption(_) => ExitStatus::InvalidOption,
            GinaError::UnsupportedPlatform(_) | GinaError::Unclassified(_) => {
                ExitStatus::Unclassified(1)
            }
        }
    }

    /// Classify a command line parse failure; `None` for help and version output
    pub fn from_clap(error: &clap::Error) -> Option<Self> {
        let argument = match error.get(ContextKind::InvalidArg) {
            Some(ContextValue::String(arg)) => Some(arg.as_str()),
            Some(ContextValue::Strings(args)) => args.first().map(String::as_str),
            _ => None,
        }
        // "--repository <URL>" → "--repository"
        .and_then(|arg| arg.split_whitespace().next())
        .map(str::to_string);

        let value = match error.get(ContextKind::InvalidValue) {
            Some(ContextValue::String(value)) => Some(value.as_str()),
            _ => None,
        };

        let described = || {
            argument.clone().unwrap_or_else(|| {
                let rendered = error.render().to_string();
                rendered
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim_start_matches("error: ")
                    .to_string()
            })
        };

        match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => None,
            ErrorKind::MissingRequiredArgument | ErrorKind::NoEquals | ErrorKind::TooFewValues => {
                Some(GinaError::MissingArgument(described()))
            }
            ErrorKind::InvalidValue if value.map_or(true, str::is_empty) => {
                Some(GinaError::MissingArgument(described()))
            }
            ErrorKind::InvalidValue => Some(GinaError::InvalidOption(format!(
                "'{}' for {}",
                value.unwrap_or_default(),
                described()
            ))),
            _ => Some(GinaError::InvalidOption(described())),
        }
    }

    /// Classify a component failure, surfacing permission problems as such
    pub fn classify(error: anyhow::Error) -> Self {
        let denied = error.chain().any(|cause| {
            cause
                .downcast_ref::<std::io::Error>()
                .is_some_and(|io| io.kind() == std::io::ErrorKind::PermissionDenied)
        });

        if denied {
            GinaError::Permission(format!("{:#}", error))
        } else {
            GinaError::Unclassified(error)
        }
    }
}

/// Renders the end-of-run summary and produces the exit code
pub struct ErrorReporter;

impl ErrorReporter {
    /// Single exit point for the binary
    pub fn finish(result: Result<RunSummary, GinaError>) -> ExitCode {
        match &result {
            Ok(summary) => {
                Self::print_summary(summary);
                ExitCode::from(ExitStatus::Success.code())
            }
            Err(e) => Self::fail(e),
        }
    }

    /// Print a classified failure and produce its exit code
    pub fn fail(error: &GinaError) -> ExitCode {
        let status = error.exit_status();
        error!("{:#}", error);
        eprintln!("❌ gina: {}", error);
        eprintln!("   exit {}: {}", status.code(), status.describe());
        ExitCode::from(status.code())
    }

    fn print_summary(summary: &RunSummary) {
        match summary {
            RunSummary::Reset(report) => {
                println!("💣 Backup data destroyed in {}", report.path.display());
                println!("   Entries removed: {}", report.removed_entries);
                if !report.removed_jobs.is_empty() {
                    println!("   Scheduled jobs removed: {}", report.removed_jobs.len());
                }
            }
            RunSummary::Synced(report) => {
                let icon = match report.outcome {
                    SyncOutcome::Success => "✅",
                    SyncOutcome::MergeConflictForcedResolved => "⚠️ ",
                    SyncOutcome::RemoteUnreachable | SyncOutcome::Denied => "🔌",
                };
                println!("{} Backup sync: {}", icon, report.outcome);
                for step in report.failed_steps() {
                    println!("   ❌ {}", step);
                }
            }
        }
        println!("   exit 0: {}", ExitStatus::Success.describe());
    }
}
