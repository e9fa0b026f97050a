//! Sync Engine - commit, fetch, merge toward the remote, force-publish
//!
//! One call to [`SyncEngine::sync_once`] runs the protocol below, strictly in order:
//!
//! 1. stage everything and commit with a timestamped message
//! 2. fetch the backup branch
//! 3. merge it, allowing unrelated histories and taking the remote side of every conflict
//! 4. force-push local history over the remote branch
//!
//! In SQL mode a database dump is written into the repository before step 1.
//!
//! Each step is best-effort: a failure is logged and recorded in the [`SyncReport`] but
//! never stops the later steps, so an unattended scheduled run always completes its cycle.
//! Because publishing is forced after a remote-preferring merge, local changes that
//! conflicted with the remote are dropped without further notice; the remote is trusted
//! as the source of truth on conflict.

use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::config::SqlConfig;
use crate::git::{is_auth_failure, GitClient};
use crate::lifecycle::REMOTE_NAME;
use crate::runner::CommandRunner;
use crate::target::BackupTarget;

/// Tag appended to every automated commit message
pub const COMMIT_TAG: &str = "[gina]";

/// `strftime` format of the commit timestamp, shared with the scheduled job
pub const COMMIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn commit_message(now: chrono::DateTime<chrono::Local>) -> String {
    format!("{} {}", now.format(COMMIT_TIMESTAMP_FORMAT), COMMIT_TAG)
}

/// Terminal result of one sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    MergeConflictForcedResolved,
    RemoteUnreachable,
    Denied,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Success => write!(f, "published"),
            SyncOutcome::MergeConflictForcedResolved => {
                write!(f, "published, conflicts resolved toward the remote")
            }
            SyncOutcome::RemoteUnreachable => write!(f, "remote unreachable, not published"),
            SyncOutcome::Denied => write!(f, "remote denied access, not published"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Dump,
    Commit,
    Fetch,
    Merge,
    Publish,
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStep::Dump => "dump",
            SyncStep::Commit => "commit",
            SyncStep::Fetch => "fetch",
            SyncStep::Merge => "merge",
            SyncStep::Publish => "publish",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    NothingToDo,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub step: SyncStep,
    pub status: StepStatus,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            StepStatus::Completed => write!(f, "{}: ok", self.step),
            StepStatus::NothingToDo => write!(f, "{}: nothing to do", self.step),
            StepStatus::Failed(error) => write!(f, "{}: {}", self.step, error),
        }
    }
}

/// Everything one sync did, step by step
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub steps: Vec<StepResult>,
    /// Paths whose local version was replaced by the remote one
    pub conflicts_resolved: Vec<String>,
}

impl SyncReport {
    pub fn step(&self, step: SyncStep) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.status)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
    }
}

/// Runs the backup protocol against one repository
pub struct SyncEngine<'a, R: CommandRunner> {
    git: &'a GitClient,
    runner: &'a R,
    branch: &'a str,
    sql: &'a SqlConfig,
}

impl<'a, R: CommandRunner> SyncEngine<'a, R> {
    pub fn new(git: &'a GitClient, runner: &'a R, branch: &'a str, sql: &'a SqlConfig) -> Self {
        Self {
            git,
            runner,
            branch,
            sql,
        }
    }

    pub async fn sync_once(&self, path: &Path, target: &BackupTarget) -> SyncReport {
        info!("Syncing {} to {}", path.display(), target.host);

        let mut steps = Vec::new();

        if target.sql_mode {
            steps.push(record(SyncStep::Dump, self.write_dump(path).await));
        }

        steps.push(record(SyncStep::Commit, self.commit(path).await));

        let fetch = record(SyncStep::Fetch, self.fetch(path).await);
        let fetched = fetch.status == StepStatus::Completed;
        steps.push(fetch);

        // Nothing to merge when the remote branch is absent or unreachable
        let mut conflicts_resolved = Vec::new();
        let merge = if fetched {
            self.merge(path, &mut conflicts_resolved).await
        } else {
            Ok(StepStatus::NothingToDo)
        };
        steps.push(record(SyncStep::Merge, merge));

        let publish = record(SyncStep::Publish, self.publish(path).await);
        let outcome = match &publish.status {
            StepStatus::Failed(error) if is_auth_failure(error) => SyncOutcome::Denied,
            StepStatus::Failed(_) => SyncOutcome::RemoteUnreachable,
            _ if !conflicts_resolved.is_empty() => SyncOutcome::MergeConflictForcedResolved,
            _ => SyncOutcome::Success,
        };
        steps.push(publish);

        info!("Sync finished: {}", outcome);

        SyncReport {
            outcome,
            steps,
            conflicts_resolved,
        }
    }

    async fn write_dump(&self, path: &Path) -> Result<StepStatus> {
        let output = self
            .runner
            .run("sh", &["-c", self.sql.dump_command.as_str()])
            .await?;

        if !output.success {
            return Err(anyhow!(
                "{} failed: {}",
                self.sql.dump_command,
                output.stderr.trim()
            ));
        }

        let dump_path = path.join(&self.sql.dump_file);
        tokio::fs::write(&dump_path, output.stdout)
            .await
            .with_context(|| format!("Failed to write {}", dump_path.display()))?;

        debug!("Wrote SQL dump to {}", dump_path.display());
        Ok(StepStatus::Completed)
    }

    async fn commit(&self, path: &Path) -> Result<StepStatus> {
        self.git.add_all(path).await?;

        if !self.git.has_staged_changes(path).await? {
            return Ok(StepStatus::NothingToDo);
        }

        self.git
            .commit(path, &commit_message(chrono::Local::now()))
            .await?;
        Ok(StepStatus::Completed)
    }

    async fn fetch(&self, path: &Path) -> Result<StepStatus> {
        match self.git.fetch(path, REMOTE_NAME, self.branch).await {
            Ok(()) => Ok(StepStatus::Completed),
            // Empty remote or first publish of the branch
            Err(e) if e.to_string().contains("couldn't find remote ref") => {
                debug!("Remote has no branch {} yet", self.branch);
                Ok(StepStatus::NothingToDo)
            }
            Err(e) => Err(e),
        }
    }

    async fn merge(&self, path: &Path, resolved: &mut Vec<String>) -> Result<StepStatus> {
        // A plain merge first, so conflicts surface before -X theirs silently settles them
        let error = match self.git.merge_no_commit(path).await {
            Ok(output) => {
                if output.stdout.contains("Already up to date") {
                    return Ok(StepStatus::NothingToDo);
                }
                // Fast-forwards leave no merge in progress
                if self.git.has_ref(path, "MERGE_HEAD").await {
                    self.git.conclude_merge(path).await?;
                }
                return Ok(StepStatus::Completed);
            }
            Err(e) => e,
        };

        let conflicted = self.git.unmerged_paths(path).await.unwrap_or_default();
        if conflicted.is_empty() {
            return Err(error);
        }
        for file in &conflicted {
            warn!("Conflict in {}, keeping the remote version", file);
        }

        self.git.abort_merge(path).await?;
        if self.git.merge_theirs(path).await.is_err() {
            // -X theirs cannot settle modify/delete and similar tree conflicts
            for file in self.git.unmerged_paths(path).await? {
                self.git.take_theirs(path, &file).await?;
            }
            self.git.conclude_merge(path).await?;
        }

        resolved.extend(conflicted);
        Ok(StepStatus::Completed)
    }

    async fn publish(&self, path: &Path) -> Result<StepStatus> {
        if !self.git.has_ref(path, "HEAD").await {
            debug!("No commits yet, nothing to publish");
            return Ok(StepStatus::NothingToDo);
        }
        self.git.push_force(path, REMOTE_NAME, self.branch).await?;
        Ok(StepStatus::Completed)
    }
}

fn record(step: SyncStep, result: Result<StepStatus>) -> StepResult {
    let status = match result {
        Ok(status) => status,
        Err(e) => {
            warn!("Sync step {} failed: {:#}", step, e);
            StepStatus::Failed(format!("{:#}", e))
        }
    };
    StepResult { step, status }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::connection::Credential;
    use crate::lifecycle::RepositoryLifecycle;
    use crate::runner::{CommandOutput, SystemRunner};
    use assert_fs::prelude::*;
    use async_trait::async_trait;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use predicates::prelude::*;
    use std::path::PathBuf;
    use std::process::Command;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(["-c", "user.name=remote", "-c", "user.email=remote@example.com"])
            .args(args)
            .current_dir(dir)
            .output()
            .expect("git should run");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// Bare remote plus a second clone used to push "concurrent" remote changes
    struct Remote {
        _root: assert_fs::TempDir,
        bare: PathBuf,
        peer: PathBuf,
    }

    impl Remote {
        fn new() -> Self {
            let root = assert_fs::TempDir::new().unwrap();
            let bare = root.path().join("remote.git");
            let peer = root.path().join("peer");
            std::fs::create_dir_all(&bare).unwrap();
            git(&bare, &["init", "--bare", "--quiet"]);
            std::fs::create_dir_all(&peer).unwrap();
            git(&peer, &["init", "--quiet"]);
            git(&peer, &["symbolic-ref", "HEAD", "refs/heads/main"]);
            git(&peer, &["remote", "add", "origin", bare.to_str().unwrap()]);
            Self {
                _root: root,
                bare,
                peer,
            }
        }

        fn push_file(&self, name: &str, content: &str) {
            std::fs::write(self.peer.join(name), content).unwrap();
            git(&self.peer, &["add", "-A"]);
            git(&self.peer, &["commit", "--quiet", "-m", "remote change"]);
            git(&self.peer, &["push", "--quiet", "--force", "origin", "HEAD:main"]);
        }

        fn show(&self, file: &str) -> String {
            git(&self.bare, &["show", &format!("main:{}", file)])
        }

        fn url(&self) -> String {
            self.bare.to_string_lossy().into_owned()
        }
    }

    fn target_for(url: &str) -> BackupTarget {
        BackupTarget {
            repository_url: url.to_string(),
            remote_url: url.to_string(),
            host: String::new(),
            user: String::new(),
            secret: String::new(),
            ssh_key: None,
            credential: Credential::SshKey(PathBuf::from("/unused")),
            interval: None,
            sql_mode: false,
        }
    }

    async fn prepare(dir: &Path, url: &str) -> GitClient {
        let client = GitClient::default();
        let identity = IdentityConfig::default();
        RepositoryLifecycle::new(&client, &identity, "main")
            .ensure_initialized(dir, url)
            .await
            .unwrap();
        client
    }

    #[test]
    fn test_commit_message_format() {
        let when = chrono::Local
            .with_ymd_and_hms(2026, 3, 4, 5, 6, 7)
            .unwrap();
        assert_eq!(commit_message(when), "2026-03-04 05:06:07 [gina]");
    }

    #[tokio::test]
    async fn test_first_sync_publishes_to_empty_remote() {
        let remote = Remote::new();
        let local = assert_fs::TempDir::new().unwrap();
        local.child("app.conf").write_str("port = 80\n").unwrap();
        let client = prepare(local.path(), &remote.url()).await;
        let sql = SqlConfig::default();

        let report = SyncEngine::new(&client, &SystemRunner, "main", &sql)
            .sync_once(local.path(), &target_for(&remote.url()))
            .await;

        assert_eq!(report.outcome, SyncOutcome::Success);
        assert_eq!(report.step(SyncStep::Commit), Some(&StepStatus::Completed));
        assert_eq!(report.step(SyncStep::Fetch), Some(&StepStatus::NothingToDo));
        assert_eq!(remote.show("app.conf"), "port = 80\n");

        let log = git(&remote.bare, &["log", "-1", "--format=%s%n%an"]);
        assert!(log.contains(COMMIT_TAG));
        assert!(log.contains("gina"));
    }

    #[tokio::test]
    async fn test_conflict_prefers_remote_and_keeps_local_additions() {
        let remote = Remote::new();
        remote.push_file("shared.conf", "remote value\n");

        let local = assert_fs::TempDir::new().unwrap();
        local.child("shared.conf").write_str("local value\n").unwrap();
        local.child("local-only.log").write_str("kept\n").unwrap();
        let client = prepare(local.path(), &remote.url()).await;
        let sql = SqlConfig::default();

        let report = SyncEngine::new(&client, &SystemRunner, "main", &sql)
            .sync_once(local.path(), &target_for(&remote.url()))
            .await;

        assert_eq!(report.outcome, SyncOutcome::MergeConflictForcedResolved);
        assert_eq!(report.conflicts_resolved, vec!["shared.conf".to_string()]);
        local.child("shared.conf").assert("remote value\n");
        local.child("local-only.log").assert("kept\n");
        assert_eq!(remote.show("shared.conf"), "remote value\n");
        assert_eq!(remote.show("local-only.log"), "kept\n");
    }

    #[tokio::test]
    async fn test_remote_deletion_wins_over_local_edit() {
        let remote = Remote::new();
        remote.push_file("rotating.log", "base\n");

        let local = assert_fs::TempDir::new().unwrap();
        let client = prepare(local.path(), &remote.url()).await;
        let sql = SqlConfig::default();
        let engine = SyncEngine::new(&client, &SystemRunner, "main", &sql);
        let target = target_for(&remote.url());

        // Pick up the shared base
        engine.sync_once(local.path(), &target).await;
        local.child("rotating.log").assert("base\n");

        // Remote deletes while local edits
        git(&remote.peer, &["pull", "--quiet", "origin", "main"]);
        git(&remote.peer, &["rm", "--quiet", "rotating.log"]);
        git(&remote.peer, &["commit", "--quiet", "-m", "rotate"]);
        git(&remote.peer, &["push", "--quiet", "origin", "HEAD:main"]);
        local.child("rotating.log").write_str("local edit\n").unwrap();

        let report = engine.sync_once(local.path(), &target).await;

        assert_eq!(report.outcome, SyncOutcome::MergeConflictForcedResolved);
        assert_eq!(report.conflicts_resolved, vec!["rotating.log".to_string()]);
        local.child("rotating.log").assert(predicate::path::missing());
    }

    #[tokio::test]
    async fn test_unreachable_remote_still_commits() {
        let local = assert_fs::TempDir::new().unwrap();
        local.child("notes.txt").write_str("hello\n").unwrap();
        let url = local.path().join("no-such-remote.git");
        let url = url.to_string_lossy().into_owned();
        let client = prepare(local.path(), &url).await;
        let sql = SqlConfig::default();

        let report = SyncEngine::new(&client, &SystemRunner, "main", &sql)
            .sync_once(local.path(), &target_for(&url))
            .await;

        assert_eq!(report.outcome, SyncOutcome::RemoteUnreachable);
        assert_eq!(report.step(SyncStep::Commit), Some(&StepStatus::Completed));
        assert_matches!(report.step(SyncStep::Fetch), Some(StepStatus::Failed(_)));
        assert_eq!(report.step(SyncStep::Merge), Some(&StepStatus::NothingToDo));
        assert_matches!(report.step(SyncStep::Publish), Some(StepStatus::Failed(_)));
        assert_eq!(report.failed_steps().count(), 2);

        let log = git(local.path(), &["log", "--format=%s"]);
        assert!(log.contains(COMMIT_TAG));
    }

    #[tokio::test]
    async fn test_sql_mode_commits_dump_file() {
        let remote = Remote::new();
        let local = assert_fs::TempDir::new().unwrap();
        let client = prepare(local.path(), &remote.url()).await;
        let sql = SqlConfig {
            dump_command: "echo 'CREATE TABLE t (id int);'".to_string(),
            dump_file: "dump.sql".to_string(),
        };
        let mut target = target_for(&remote.url());
        target.sql_mode = true;

        let report = SyncEngine::new(&client, &SystemRunner, "main", &sql)
            .sync_once(local.path(), &target)
            .await;

        assert_eq!(report.step(SyncStep::Dump), Some(&StepStatus::Completed));
        assert_eq!(report.outcome, SyncOutcome::Success);
        assert_eq!(remote.show("dump.sql"), "CREATE TABLE t (id int);\n");
    }

    #[tokio::test]
    async fn test_failed_dump_does_not_block_sync() {
        let remote = Remote::new();
        let local = assert_fs::TempDir::new().unwrap();
        local.child("keep.txt").write_str("x\n").unwrap();
        let client = prepare(local.path(), &remote.url()).await;
        let sql = SqlConfig {
            dump_command: "exit 1".to_string(),
            dump_file: "dump.sql".to_string(),
        };
        let mut target = target_for(&remote.url());
        target.sql_mode = true;

        let report = SyncEngine::new(&client, &SystemRunner, "main", &sql)
            .sync_once(local.path(), &target)
            .await;

        assert_matches!(report.step(SyncStep::Dump), Some(StepStatus::Failed(_)));
        assert_eq!(report.outcome, SyncOutcome::Success);
        assert_eq!(remote.show("keep.txt"), "x\n");
    }

    #[tokio::test]
    async fn test_nothing_to_commit_is_not_a_failure() {
        let remote = Remote::new();
        let local = assert_fs::TempDir::new().unwrap();
        local.child("a.txt").write_str("a\n").unwrap();
        let client = prepare(local.path(), &remote.url()).await;
        let sql = SqlConfig::default();
        let engine = SyncEngine::new(&client, &SystemRunner, "main", &sql);
        let target = target_for(&remote.url());

        engine.sync_once(local.path(), &target).await;
        let report = engine.sync_once(local.path(), &target).await;

        assert_eq!(report.step(SyncStep::Commit), Some(&StepStatus::NothingToDo));
        assert_eq!(report.step(SyncStep::Merge), Some(&StepStatus::NothingToDo));
        assert_eq!(report.outcome, SyncOutcome::Success);
        assert_eq!(report.failed_steps().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_edit_of_shared_base_is_reported() {
        let remote = Remote::new();
        remote.push_file("shared.conf", "first\n2\n3\n4\n5\nlast\n");

        let local = assert_fs::TempDir::new().unwrap();
        let client = prepare(local.path(), &remote.url()).await;
        let sql = SqlConfig::default();
        let engine = SyncEngine::new(&client, &SystemRunner, "main", &sql);
        let target = target_for(&remote.url());

        let first = engine.sync_once(local.path(), &target).await;
        assert_eq!(first.outcome, SyncOutcome::Success);
        assert!(first.conflicts_resolved.is_empty());

        remote.push_file("shared.conf", "remote\n2\n3\n4\n5\nlast\n");
        local
            .child("shared.conf")
            .write_str("local\n2\n3\n4\n5\nlocal last\n")
            .unwrap();

        let report = engine.sync_once(local.path(), &target).await;

        assert_eq!(report.outcome, SyncOutcome::MergeConflictForcedResolved);
        assert_eq!(report.conflicts_resolved, vec!["shared.conf".to_string()]);
        // Conflicting hunk from the remote, independent local hunk kept
        local
            .child("shared.conf")
            .assert("remote\n2\n3\n4\n5\nlocal last\n");
        assert_eq!(remote.show("shared.conf"), "remote\n2\n3\n4\n5\nlocal last\n");
    }

    #[tokio::test]
    async fn test_clean_merge_reports_success() {
        let remote = Remote::new();
        remote.push_file("remote.conf", "r\n");

        let local = assert_fs::TempDir::new().unwrap();
        local.child("local.conf").write_str("l\n").unwrap();
        let client = prepare(local.path(), &remote.url()).await;
        let sql = SqlConfig::default();

        let report = SyncEngine::new(&client, &SystemRunner, "main", &sql)
            .sync_once(local.path(), &target_for(&remote.url()))
            .await;

        assert_eq!(report.outcome, SyncOutcome::Success);
        assert_eq!(report.step(SyncStep::Merge), Some(&StepStatus::Completed));
        assert!(report.conflicts_resolved.is_empty());
        assert_eq!(remote.show("remote.conf"), "r\n");
        assert_eq!(remote.show("local.conf"), "l\n");
    }

    #[tokio::test]
    async fn test_empty_directory_and_empty_remote_is_success() {
        let remote = Remote::new();
        let root = assert_fs::TempDir::new().unwrap();
        let local = root.child("backup");
        let client = prepare(local.path(), &remote.url()).await;
        let sql = SqlConfig::default();

        let report = SyncEngine::new(&client, &SystemRunner, "main", &sql)
            .sync_once(local.path(), &target_for(&remote.url()))
            .await;

        assert_eq!(report.outcome, SyncOutcome::Success);
        assert_eq!(report.step(SyncStep::Commit), Some(&StepStatus::NothingToDo));
        assert_eq!(report.step(SyncStep::Publish), Some(&StepStatus::NothingToDo));
        assert_eq!(report.failed_steps().count(), 0);
    }

    /// Answers every command with a canned dump
    struct CannedDump;

    #[async_trait]
    impl CommandRunner for CannedDump {
        async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            assert_eq!(program, "sh");
            assert_eq!(args, ["-c", "pg_dumpall"]);
            Ok(CommandOutput {
                success: true,
                stdout: "-- canned\n".to_string(),
                stderr: String::new(),
            })
        }

        fn locate(&self, _binary: &str) -> Option<PathBuf> {
            None
        }

        fn is_privileged(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_dump_goes_through_injected_runner() {
        let remote = Remote::new();
        let local = assert_fs::TempDir::new().unwrap();
        let client = prepare(local.path(), &remote.url()).await;
        let sql = SqlConfig {
            dump_command: "pg_dumpall".to_string(),
            dump_file: "all.sql".to_string(),
        };
        let mut target = target_for(&remote.url());
        target.sql_mode = true;

        let report = SyncEngine::new(&client, &CannedDump, "main", &sql)
            .sync_once(local.path(), &target)
            .await;

        assert_eq!(report.step(SyncStep::Dump), Some(&StepStatus::Completed));
        local.child("all.sql").assert("-- canned\n");
        assert_eq!(remote.show("all.sql"), "-- canned\n");
    }
}
