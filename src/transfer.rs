//! Clone/pull outcomes and the classification of git's output
//!
//! git reports a few expected conditions only as text on stderr or stdout.
//! This module is the one place that knows those strings.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

use crate::discovery::RepositoryDescriptor;

/// stderr of `git pull` when the requested branch does not exist on the remote
pub const NO_REMOTE_REF: &str = "couldn't find remote ref";

/// stdout of `git pull` when nothing changed
pub const ALREADY_UP_TO_DATE: &str = "Already up to date.";

/// stderr of `git clone` when the destination is already populated
pub const DESTINATION_EXISTS: &str = "already exists and is not an empty directory";

/// Captured result of one git invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn status(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Result of syncing one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Repository was cloned
    Cloned,
    /// New changes were pulled; `output` is git's report
    Pulled { output: String },
    /// Pull found nothing new
    UpToDate,
    /// Archived repository left untouched
    SkippedArchived,
    /// The remote has no such branch (usually an empty repository)
    SkippedNoDefaultBranch,
    /// Clone destination already populated
    SkippedAlreadyExists,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncOutcome::Cloned => "cloned",
            SyncOutcome::Pulled { .. } => "pulled",
            SyncOutcome::UpToDate => "up-to-date",
            SyncOutcome::SkippedArchived => "skipped-archived",
            SyncOutcome::SkippedNoDefaultBranch => "skipped-no-default-branch",
            SyncOutcome::SkippedAlreadyExists => "skipped-already-exists",
        };
        f.write_str(label)
    }
}

/// Classify a finished `git pull`
pub fn classify_pull(repo: &str, output: &CommandOutput) -> Result<SyncOutcome> {
    if !output.success {
        if output.stderr.contains(NO_REMOTE_REF) {
            return Ok(SyncOutcome::SkippedNoDefaultBranch);
        }
        return Err(anyhow!(
            "failed to pull {}: {}, with message: {}",
            repo,
            output.status(),
            output.stderr.trim()
        ));
    }

    if output.stdout.starts_with(ALREADY_UP_TO_DATE) {
        Ok(SyncOutcome::UpToDate)
    } else {
        Ok(SyncOutcome::Pulled {
            output: output.stdout.clone(),
        })
    }
}

/// Classify a finished `git clone`
pub fn classify_clone(repo: &str, output: &CommandOutput) -> Result<SyncOutcome> {
    if output.success {
        return Ok(SyncOutcome::Cloned);
    }
    if output.stderr.contains(DESTINATION_EXISTS) {
        return Ok(SyncOutcome::SkippedAlreadyExists);
    }
    Err(anyhow!(
        "failed to clone {}: {}, with message: {}",
        repo,
        output.status(),
        output.stderr.trim()
    ))
}

/// The clone/pull primitive used by sync workers
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Clone `repo` into `target`
    async fn clone_repository(
        &self,
        repo: &RepositoryDescriptor,
        target: &Path,
    ) -> Result<SyncOutcome>;

    /// Pull `repo`'s default branch (or the tracked upstream) into the checkout at `target`
    async fn pull_repository(&self, repo: &RepositoryDescriptor, target: &Path)
        -> Result<SyncOutcome>;
}
