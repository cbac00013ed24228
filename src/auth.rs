use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

/// Where the GitHub token came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Passed with `--token`
    Explicit,
    /// `GH_TOKEN` environment variable
    GhTokenEnv,
    /// `GITHUB_TOKEN` environment variable
    GitHubTokenEnv,
    /// `gh auth token`
    GitHubCLI,
    /// `oauth_token` stored in the GitHub CLI hosts file
    GhHostsFile,
}

/// A resolved GitHub token
#[derive(Clone)]
pub struct Credentials {
    pub strategy: AuthStrategy,
    token: String,
}

impl Credentials {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("strategy", &self.strategy)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Resolve a GitHub token: flag, `GH_TOKEN`, `GITHUB_TOKEN`, GitHub CLI, then its hosts file
pub fn resolve_token(explicit: Option<&str>) -> Result<Credentials> {
    let credentials = detect_token(explicit)?;
    info!("Using authentication strategy: {:?}", credentials.strategy);
    Ok(credentials)
}

fn detect_token(explicit: Option<&str>) -> Result<Credentials> {
    let found = |strategy, token: String| Credentials { strategy, token };

    if let Some(token) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(found(AuthStrategy::Explicit, token.to_string()));
    }
    if let Some(token) = non_empty_env("GH_TOKEN") {
        return Ok(found(AuthStrategy::GhTokenEnv, token));
    }
    if let Some(token) = non_empty_env("GITHUB_TOKEN") {
        return Ok(found(AuthStrategy::GitHubTokenEnv, token));
    }

    let cli_error = match try_github_cli() {
        Ok(token) => return Ok(found(AuthStrategy::GitHubCLI, token)),
        Err(e) => e,
    };
    debug!("GitHub CLI authentication unavailable: {:#}", cli_error);

    match try_hosts_file() {
        Ok(token) => Ok(found(AuthStrategy::GhHostsFile, token)),
        Err(hosts_error) => Err(anyhow!(
            "No GitHub authentication found. Please either:\n\
             1. Pass --token <token>\n\
             2. Set GH_TOKEN or GITHUB_TOKEN environment variable\n\
             3. Install and authenticate GitHub CLI: gh auth login\n\
             (gh cli: {:#}; hosts file: {:#})",
            cli_error,
            hosts_error
        )),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Try to get token from GitHub CLI
fn try_github_cli() -> Result<String> {
    debug!("Attempting GitHub CLI authentication");

    let token_output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .context("Failed to run gh auth token")?;

    if !token_output.status.success() {
        return Err(anyhow!(
            "Failed to retrieve token from GitHub CLI: {}",
            String::from_utf8_lossy(&token_output.stderr).trim()
        ));
    }

    let token = String::from_utf8(token_output.stdout)
        .context("GitHub CLI token is not valid UTF-8")?
        .trim()
        .to_string();

    if token.is_empty() {
        return Err(anyhow!("GitHub CLI returned empty token"));
    }

    debug!("Successfully obtained token from GitHub CLI");
    Ok(token)
}

fn try_hosts_file() -> Result<String> {
    let path = hosts_file_path()?;
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    parse_hosts_file(&content).with_context(|| format!("Failed to parse {:?}", path))
}

fn hosts_file_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Failed to get home directory")?;
    Ok(home.join(".config").join("gh").join("hosts.yml"))
}

#[derive(Debug, Deserialize)]
struct HostEntry {
    #[serde(default)]
    oauth_token: Option<String>,
}

/// Extract the `github.com` token from a GitHub CLI `hosts.yml`
pub fn parse_hosts_file(content: &str) -> Result<String> {
    let hosts: HashMap<String, HostEntry> =
        serde_yaml::from_str(content).context("Invalid hosts.yml")?;

    hosts
        .get("github.com")
        .ok_or_else(|| anyhow!("No github.com credentials in hosts.yml"))?
        .oauth_token
        .clone()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| anyhow!("github.com entry has no oauth_token"))
}
