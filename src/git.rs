use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use crate::discovery::RepositoryDescriptor;
use crate::transfer::{classify_clone, classify_pull, CommandOutput, SyncOutcome, Transfer};

/// Environment variable carrying the token to the credential helper
const TOKEN_ENV: &str = "MULTIREPO_GIT_TOKEN";

/// Credential helper that answers with the token from [`TOKEN_ENV`]
const TOKEN_CREDENTIAL_HELPER: &str =
    "!f() { echo username=x-access-token; echo \"password=$MULTIREPO_GIT_TOKEN\"; }; f";

/// One git command line, ready to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitInvocation {
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

/// Runs git and captures its output
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &GitInvocation) -> Result<CommandOutput>;
}

/// [`CommandRunner`] that spawns the `git` executable
pub struct ProcessRunner {
    program: PathBuf,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &GitInvocation) -> Result<CommandOutput> {
        let mut command = AsyncCommand::new(&self.program);
        command
            .args(&invocation.args)
            .envs(invocation.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null());

        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }

        let output = command.output().await.with_context(|| {
            format!(
                "Failed to execute {} {}",
                self.program.display(),
                invocation.args.join(" ")
            )
        })?;

        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Git operations used by the sync workers and the folder scanner
#[derive(Clone)]
pub struct GitClient {
    runner: Arc<dyn CommandRunner>,
    token: Option<String>,
    force_color: bool,
}

impl GitClient {
    /// Client that runs the `git` found on `PATH`
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ProcessRunner::default()))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            token: None,
            force_color: true,
        }
    }

    /// Authenticate clones and pulls with `token`
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Pass `color.ui=always` so captured output keeps git's colors
    pub fn with_force_color(mut self, force_color: bool) -> Self {
        self.force_color = force_color;
        self
    }

    /// Build a transfer command: color and credential settings go before the subcommand
    fn transfer_invocation(&self, cwd: Option<&Path>, args: Vec<String>) -> GitInvocation {
        let mut full_args = Vec::new();
        let mut envs = Vec::new();

        if self.force_color {
            full_args.extend(["-c".to_string(), "color.ui=always".to_string()]);
        }
        if let Some(token) = &self.token {
            full_args.extend([
                "-c".to_string(),
                "credential.helper=".to_string(),
                "-c".to_string(),
                format!("credential.helper={}", TOKEN_CREDENTIAL_HELPER),
            ]);
            envs.push((TOKEN_ENV.to_string(), token.clone()));
        }
        full_args.extend(args);

        GitInvocation {
            args: full_args,
            cwd: cwd.map(Path::to_path_buf),
            envs,
        }
    }

    /// Whether `dir` is inside a git working tree
    pub async fn is_work_tree(&self, dir: &Path) -> Result<bool> {
        let invocation = GitInvocation {
            args: vec!["rev-parse".to_string(), "--is-inside-work-tree".to_string()],
            cwd: Some(dir.to_path_buf()),
            envs: Vec::new(),
        };
        let output = self.runner.run(&invocation).await?;
        Ok(output.success)
    }

    /// Names of the immediate subdirectories of `dir` that are git working trees, sorted
    pub async fn scan_directory(&self, dir: &Path) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

        let mut repos = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        {
            let file_type = entry.file_type().await?;
            if !file_type.is_dir() {
                continue;
            }

            let path = entry.path();
            if self.is_work_tree(&path).await? {
                repos.push(entry.file_name().to_string_lossy().into_owned());
            } else {
                debug!("Not a git repository, ignoring: {}", path.display());
            }
        }

        repos.sort();
        Ok(repos)
    }
}

impl Default for GitClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transfer for GitClient {
    async fn clone_repository(
        &self,
        repo: &RepositoryDescriptor,
        target: &Path,
    ) -> Result<SyncOutcome> {
        let url = repo
            .clone_url
            .as_deref()
            .ok_or_else(|| anyhow!("No clone URL for {}", repo.full_name()))?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let invocation = self.transfer_invocation(
            None,
            vec![
                "clone".to_string(),
                url.to_string(),
                target.to_string_lossy().into_owned(),
            ],
        );

        debug!("Using clone URL: {}", url);
        let output = self.runner.run(&invocation).await?;
        classify_clone(&repo.name, &output)
    }

    async fn pull_repository(
        &self,
        repo: &RepositoryDescriptor,
        target: &Path,
    ) -> Result<SyncOutcome> {
        let mut args = vec!["pull".to_string()];
        if let Some(url) = repo.clone_url.as_deref().filter(|u| !u.is_empty()) {
            args.push(url.to_string());
            if let Some(branch) = repo.default_branch.as_deref().filter(|b| !b.is_empty()) {
                args.push(branch.to_string());
            }
        }

        let invocation = self.transfer_invocation(Some(target), args);
        let output = self.runner.run(&invocation).await?;
        classify_pull(&repo.name, &output)
    }
}
