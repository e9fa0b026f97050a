/// Common test utilities and helpers for gina binary tests

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const GINA_VARS: &[&str] = &[
    "GINA_REPOSITORY",
    "GINA_SSHKEY",
    "GINA_HOST",
    "GINA_USER",
    "GINA_PASSWORD",
    "GINA_INTERVAL",
    "GINA_PATH",
];

/// Isolated backup directory, schedule root and config file
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub backup_dir: PathBuf,
    pub schedule_dir: PathBuf,
    pub config_path: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backup_dir = temp_dir.path().join("backup");
        let schedule_dir = temp_dir.path().join("periodic");
        std::fs::create_dir_all(&backup_dir).expect("Failed to create backup dir");

        let config_path = temp_dir.path().join("config.yml");
        let config_content = format!(
            "schedule:\n  directory: \"{}\"\nlogging:\n  level: \"debug\"\n",
            schedule_dir.display()
        );
        std::fs::write(&config_path, config_content).expect("Failed to write test config");

        Self {
            temp_dir,
            backup_dir,
            schedule_dir,
            config_path,
        }
    }

    /// The gina binary pointed at this environment, with no inherited GINA_* defaults
    pub fn gina(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_gina"));
        for var in GINA_VARS {
            command.env_remove(var);
        }
        command
            .env("XDG_CONFIG_HOME", self.temp_dir.path())
            .env("GIT_TERMINAL_PROMPT", "0")
            .arg("--config")
            .arg(&self.config_path)
            .arg("--path")
            .arg(&self.backup_dir);
        command
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.gina().args(args).output().expect("Failed to execute gina")
    }

    pub fn job(&self, interval: &str) -> PathBuf {
        self.schedule_dir.join(interval).join("gina")
    }

    pub fn write_backup_file(&self, name: &str, content: &str) {
        let path = self.backup_dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(path, content).expect("Failed to write backup file");
    }

    /// Create a bare repository usable as a local remote
    pub fn bare_remote(&self) -> PathBuf {
        let bare = self.temp_dir.path().join("remote.git");
        std::fs::create_dir_all(&bare).expect("Failed to create remote dir");
        git(&bare, &["init", "--bare", "--quiet"]);
        bare
    }
}

pub fn git(dir: &Path, args: &[&str]) -> Output {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
