use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of repositories requested per API page
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Default number of concurrent clone/pull workers
pub const DEFAULT_PARALLEL_WORKERS: usize = 10;

/// Main configuration structure for multirepo
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Directory that holds one checkout per organization repository
    #[serde(default = "default_target_directory")]
    pub target_directory: String,

    /// GitHub API and discovery settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GitHubConfig {
    /// API base URL, for GitHub Enterprise installations
    #[serde(default)]
    pub api_url: Option<String>,

    /// Repositories requested per listing page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Repository exclusion patterns (`*` wildcard)
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SyncConfig {
    /// Number of concurrent clone/pull workers
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,

    /// Clone repositories that are missing locally when pulling an organization
    #[serde(default = "default_true")]
    pub clone_missing: bool,

    /// Ask git for colored output even though it is captured
    #[serde(default = "default_true")]
    pub force_color: bool,

    /// Fail the run when some listing pages could not be fetched
    #[serde(default)]
    pub fail_on_partial_discovery: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_target_directory() -> String {
    ".".to_string()
}
fn default_true() -> bool {
    true
}
fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}
fn default_parallel_workers() -> usize {
    DEFAULT_PARALLEL_WORKERS
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            page_size: default_page_size(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parallel_workers: default_parallel_workers(),
            clone_missing: default_true(),
            force_color: default_true(),
            fail_on_partial_discovery: false,
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
            target_directory: default_target_directory(),
            github: GitHubConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to built-in defaults
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;

        Ok(config)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("multirepo").join("config.yml"))
    }

    fn validate(&self) -> Result<()> {
        if self.sync.parallel_workers == 0 {
            bail!("sync.parallel_workers must be at least 1");
        }
        if self.github.page_size == 0 || self.github.page_size > 100 {
            bail!("github.page_size must be between 1 and 100");
        }
        Ok(())
    }

    /// Resolve a target directory: expand `~` and environment variables, then normalize
    pub fn resolve_directory(raw: &str) -> Result<PathBuf> {
        let expanded = shellexpand::full(raw)
            .with_context(|| format!("Failed to expand directory path: {}", raw))?;

        Ok(path_clean::clean(&*expanded))
    }

    /// The configured target directory, expanded and normalized
    pub fn target_directory(&self) -> Result<PathBuf> {
        Self::resolve_directory(&self.target_directory)
    }
}
