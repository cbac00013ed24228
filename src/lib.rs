//! multirepo - Bulk synchronization of a GitHub organization's repositories
//!
//! Lists every repository of an organization with concurrent page fetches and
//! clones or pulls them into a local folder with a fixed pool of git workers.
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`auth`]: GitHub token resolution
//! - [`discovery`]: Paginated listing into a shared repository stream
//! - [`github`]: GitHub API client behind discovery
//! - [`git`]: git sub-process execution and local checkout scanning
//! - [`transfer`]: Clone/pull outcome classification
//! - [`sync`]: The worker pool
//! - [`stats`]: Language statistics
//! - [`shutdown`]: Cancellation and interrupt handling

pub mod auth;
pub mod config;
pub mod discovery;
pub mod git;
pub mod github;
pub mod shutdown;
pub mod stats;
pub mod sync;
pub mod transfer;

pub use config::Config;
pub use discovery::{
    DiscoveryReport, ExcludeFilter, RepositoryDescriptor, RepositoryLister, RepositoryStream,
};
pub use git::GitClient;
pub use github::GitHubClient;
pub use stats::{tally_languages, LanguageCount};
pub use sync::{RunResult, SyncEngine, SyncMode, SyncSummary};
pub use transfer::{SyncOutcome, Transfer};
