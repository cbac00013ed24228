use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use multirepo::auth::{self, Credentials};
use multirepo::shutdown::{install_interrupt_handler, is_cancelled, Cancelled};
use multirepo::{
    tally_languages, Config, DiscoveryReport, ExcludeFilter, GitClient, GitHubClient,
    RepositoryDescriptor, RepositoryLister, RepositoryStream, SyncEngine, SyncMode,
};

#[derive(Parser)]
#[command(name = "multirepo")]
#[command(about = "Clone and pull every repository of a GitHub organization")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// GitHub token (defaults to GH_TOKEN, GITHUB_TOKEN or the GitHub CLI)
    #[arg(long, global = true)]
    token: Option<String>,

    /// GitHub API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull every repository of an organization, cloning the missing ones
    PullOrg {
        /// Organization login
        owner: String,

        /// Directory holding the checkouts
        #[arg(short, long)]
        target_dir: Option<String>,

        /// Number of concurrent git workers
        #[arg(short, long)]
        parallel_workers: Option<usize>,
    },

    /// Pull every git checkout directly under the current directory
    Pull {
        /// Number of concurrent git workers
        #[arg(short, long)]
        parallel_workers: Option<usize>,
    },

    /// Clone every repository of an organization
    Clone {
        /// Organization login
        owner: String,

        /// Directory to clone into
        #[arg(short, long)]
        target_dir: Option<String>,

        /// Number of concurrent git workers
        #[arg(short, long)]
        parallel_workers: Option<usize>,
    },

    /// Count an organization's repositories per primary language
    Stats {
        /// Organization login
        owner: String,

        /// Print the counts as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a configuration file
    Init {
        /// Directory holding the checkouts
        #[arg(short, long)]
        target_dir: Option<String>,
    },
}

/// Settings shared by every command of one invocation
struct Session {
    config: Config,
    config_path: Option<PathBuf>,
    token: Option<String>,
    api_url: Option<String>,
    cancel: CancellationToken,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let creating_config = matches!(cli.command, Commands::Init { .. });
    let config = load_config(cli.config.as_deref(), creating_config);
    let level = config
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);
    info!("Starting multirepo v{}", env!("CARGO_PKG_VERSION"));

    let result = match config {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_cancelled(&e) => {
            debug!("Run cancelled");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let _interrupts = install_interrupt_handler(cancel.clone());

    let session = Session {
        config,
        config_path: cli.config,
        token: cli.token,
        api_url: cli.api_url,
        cancel,
    };

    match cli.command {
        Commands::PullOrg {
            owner,
            target_dir,
            parallel_workers,
        } => cmd_sync_org(&session, &owner, SyncMode::Pull, target_dir, parallel_workers).await,
        Commands::Clone {
            owner,
            target_dir,
            parallel_workers,
        } => cmd_sync_org(&session, &owner, SyncMode::Clone, target_dir, parallel_workers).await,
        Commands::Pull { parallel_workers } => cmd_pull_folder(&session, parallel_workers).await,
        Commands::Stats { owner, json } => cmd_stats(&session, &owner, json).await,
        Commands::Init { target_dir } => cmd_init(&session, target_dir),
    }
}

/// Initialize logging on stderr; `RUST_LOG` wins over `--verbose` and the configured level
fn init_logging(verbose: bool, level: &str) {
    let default_level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>, creating: bool) -> Result<Config> {
    match config_path {
        Some(path) if creating && !path.exists() => Ok(Config::default()),
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

fn worker_count(session: &Session, flag: Option<usize>) -> Result<usize> {
    let workers = flag.unwrap_or(session.config.sync.parallel_workers);
    if workers == 0 {
        bail!("--parallel-workers must be at least 1");
    }
    Ok(workers)
}

fn repository_lister(session: &Session, credentials: &Credentials) -> Result<RepositoryLister> {
    let api_url = session
        .api_url
        .as_deref()
        .or(session.config.github.api_url.as_deref());
    let client = GitHubClient::new(credentials.token(), api_url)?;
    let exclude = ExcludeFilter::new(&session.config.github.exclude_patterns)?;

    Ok(RepositoryLister::new(Arc::new(client), session.config.github.page_size).with_exclude(exclude))
}

/// Surface pages that never made it into the stream
fn check_discovery(report: &DiscoveryReport, fail_on_partial: bool) -> Result<()> {
    if report.is_complete() {
        debug!(
            "Listing complete: {} pages, {} repositories",
            report.pages_fetched, report.repositories_emitted
        );
        return Ok(());
    }

    for failure in &report.failures {
        warn!("Page {} could not be fetched: {}", failure.page, failure.error);
    }
    if report.pages_panicked > 0 {
        warn!("{} page fetch task(s) panicked", report.pages_panicked);
    }
    let message = format!(
        "Repository listing incomplete: {} of {} pages fetched",
        report.pages_fetched, report.pages_requested
    );
    if fail_on_partial {
        bail!(message);
    }
    warn!("{}", message);
    Ok(())
}

/// Clone or pull every repository of `owner`
async fn cmd_sync_org(
    session: &Session,
    owner: &str,
    mode: SyncMode,
    target_dir: Option<String>,
    parallel_workers: Option<usize>,
) -> Result<()> {
    let config = &session.config;
    let workers = worker_count(session, parallel_workers)?;
    let target = match target_dir {
        Some(dir) => Config::resolve_directory(&dir)?,
        None => config.target_directory()?,
    };
    tokio::fs::create_dir_all(&target)
        .await
        .with_context(|| format!("Failed to create target directory: {}", target.display()))?;

    let credentials = auth::resolve_token(session.token.as_deref())?;
    let lister = repository_lister(session, &credentials)?;
    let listing = lister.list_organization_repos(owner, &session.cancel).await?;

    let git = GitClient::new()
        .with_token(credentials.token())
        .with_force_color(config.sync.force_color);
    let engine = SyncEngine::new(Arc::new(git), workers)
        .with_clone_missing(config.sync.clone_missing);

    let result = engine
        .run(listing.stream, &target, mode, &session.cancel)
        .await;
    let report = listing.discovery.wait().await?;

    result.into_result()?;
    check_discovery(&report, config.sync.fail_on_partial_discovery)
}

/// Pull every checkout found in the current directory
async fn cmd_pull_folder(session: &Session, parallel_workers: Option<usize>) -> Result<()> {
    let workers = worker_count(session, parallel_workers)?;
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    let git = GitClient::new().with_force_color(session.config.sync.force_color);
    let names = git.scan_directory(&cwd).await?;
    info!("Found {} repositories in {}", names.len(), cwd.display());

    let stream = RepositoryStream::from_descriptors(
        names.into_iter().map(RepositoryDescriptor::local).collect(),
    );
    let engine = SyncEngine::new(Arc::new(git), workers);

    engine
        .run(stream, &cwd, SyncMode::Pull, &session.cancel)
        .await
        .into_result()?;
    Ok(())
}

/// Print repository counts per language
async fn cmd_stats(session: &Session, owner: &str, json: bool) -> Result<()> {
    let credentials = auth::resolve_token(session.token.as_deref())?;
    let lister = repository_lister(session, &credentials)?;
    let listing = lister.list_organization_repos(owner, &session.cancel).await?;

    let tally = tally_languages(listing.stream).await;
    let report = listing.discovery.wait().await?;

    if session.cancel.is_cancelled() {
        return Err(Cancelled.into());
    }
    check_discovery(&report, session.config.sync.fail_on_partial_discovery)?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&tally).context("Failed to serialize statistics")?;
        println!("{}", rendered);
    } else {
        for entry in &tally {
            println!("{}: {}", entry.language, entry.count);
        }
    }

    Ok(())
}

/// Write the effective configuration
fn cmd_init(session: &Session, target_dir: Option<String>) -> Result<()> {
    info!("Initializing multirepo...");

    let mut new_config = session.config.clone();
    if let Some(dir) = target_dir {
        new_config.target_directory = dir;
    }

    let target = new_config.target_directory()?;
    std::fs::create_dir_all(&target)
        .with_context(|| format!("Failed to create target directory: {}", target.display()))?;

    let config_path = match &session.config_path {
        Some(path) => path.clone(),
        None => Config::default_config_path()?,
    };
    new_config.save(&config_path)?;

    info!("Configuration saved to: {:?}", config_path);

    println!("✅ multirepo initialized successfully!");
    println!("   Config: {}", config_path.display());
    println!("   Target directory: {}", target.display());

    Ok(())
}
