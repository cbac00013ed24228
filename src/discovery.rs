//! Repository discovery
//!
//! Lists an organization's repositories page by page, with every page fetched
//! concurrently, and hands them to consumers through a [`RepositoryStream`] as
//! soon as each page arrives.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, Stream};
use regex::Regex;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::shutdown::Cancelled;

/// Descriptors buffered between page fetchers and workers before senders block
pub const STREAM_BUFFER: usize = 64;

/// Metadata for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    /// Repository name, also the checkout directory name
    pub name: String,

    /// Owner/organization login
    pub owner: Option<String>,

    /// Clone URL; `None` for checkouts found on disk
    pub clone_url: Option<String>,

    /// Default branch name
    pub default_branch: Option<String>,

    /// Whether the repository is archived
    pub archived: bool,

    /// Primary language reported by the API
    pub language: Option<String>,
}

impl RepositoryDescriptor {
    /// Descriptor for an existing checkout; git pulls its tracked upstream
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: None,
            clone_url: None,
            default_branch: None,
            archived: false,
            language: None,
        }
    }

    /// Get display name (owner/name format when the owner is known)
    pub fn full_name(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}/{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}

/// Unordered, single-pass sequence of descriptors shared by many consumers.
///
/// Cloning the stream shares the same queue: each descriptor is handed to
/// exactly one caller of [`RepositoryStream::next`].
#[derive(Clone)]
pub struct RepositoryStream {
    receiver: Arc<Mutex<mpsc::Receiver<RepositoryDescriptor>>>,
}

impl RepositoryStream {
    /// Create a bounded stream and the sender that feeds it
    pub fn channel(capacity: usize) -> (mpsc::Sender<RepositoryDescriptor>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            sender,
            Self {
                receiver: Arc::new(Mutex::new(receiver)),
            },
        )
    }

    /// A closed stream that yields exactly `descriptors`
    pub fn from_descriptors(descriptors: Vec<RepositoryDescriptor>) -> Self {
        let (sender, stream) = Self::channel(descriptors.len());
        for descriptor in descriptors {
            // Capacity equals the number of items, so this cannot be full.
            let _ = sender.try_send(descriptor);
        }
        stream
    }

    /// Next descriptor, or `None` once every producer is done and the queue is drained
    pub async fn next(&self) -> Option<RepositoryDescriptor> {
        self.receiver.lock().await.recv().await
    }

    /// Adapt into a [`futures::Stream`] for combinator-style consumers
    pub fn into_stream(self) -> impl Stream<Item = RepositoryDescriptor> {
        stream::unfold(self, |stream| async move {
            stream.next().await.map(|descriptor| (descriptor, stream))
        })
    }
}

/// Remote API used to enumerate an organization's repositories
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    /// Total repositories owned by the organization (private + public)
    async fn organization_repo_count(&self, owner: &str) -> Result<usize>;

    /// One page (1-based) of the organization's repositories
    async fn list_repositories_page(
        &self,
        owner: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RepositoryDescriptor>>;
}

/// A page that could not be fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub page: u32,
    pub error: String,
}

/// What the page fetchers of one listing managed to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub pages_requested: u32,
    pub pages_fetched: u32,
    pub pages_aborted: u32,
    /// Page tasks that panicked; their page number is unknown
    pub pages_panicked: u32,
    pub repositories_emitted: usize,
    pub failures: Vec<PageFailure>,
}

impl DiscoveryReport {
    /// Every page was fetched and fully emitted
    pub fn is_complete(&self) -> bool {
        self.pages_fetched == self.pages_requested
    }
}

/// Handle to the task that closes the stream once all pages are done
pub struct DiscoveryHandle {
    handle: JoinHandle<DiscoveryReport>,
}

impl DiscoveryHandle {
    /// Wait for every page-fetch task and return what they achieved
    pub async fn wait(self) -> Result<DiscoveryReport> {
        self.handle
            .await
            .map_err(|e| anyhow!("Repository discovery task failed: {}", e))
    }
}

/// A listing in progress
pub struct RepositoryListing {
    /// Count reported by the organization metadata
    pub total_count: usize,
    /// Number of page-fetch tasks launched
    pub page_count: u32,
    pub stream: RepositoryStream,
    pub discovery: DiscoveryHandle,
}

/// Glob-style repository name exclusions
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    patterns: Vec<Regex>,
}

impl ExcludeFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                let escaped = regex::escape(pattern).replace(r"\*", ".*");
                Regex::new(&format!("^{}$", escaped))
                    .with_context(|| format!("Invalid exclude pattern: {}", pattern))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }
}

/// Number of pages needed for `total` items
pub fn page_count(total: usize, per_page: u32) -> u32 {
    let per_page = per_page.max(1) as usize;
    total.div_ceil(per_page) as u32
}

/// Concurrent, paginated lister of organization repositories
pub struct RepositoryLister {
    api: Arc<dyn RepositoryApi>,
    page_size: u32,
    buffer: usize,
    exclude: ExcludeFilter,
}

impl RepositoryLister {
    pub fn new(api: Arc<dyn RepositoryApi>, page_size: u32) -> Self {
        Self {
            api,
            page_size: page_size.max(1),
            buffer: STREAM_BUFFER,
            exclude: ExcludeFilter::default(),
        }
    }

    pub fn with_exclude(mut self, exclude: ExcludeFilter) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Start listing `owner`'s non-archived repositories.
    ///
    /// Returns once the organization metadata is known; pages are fetched in
    /// the background under a child of `cancel`. The first failing page
    /// cancels the remaining fetches. The stream closes after every fetch
    /// task has finished, and [`RepositoryListing::discovery`] reports which
    /// pages made it.
    pub async fn list_organization_repos(
        &self,
        owner: &str,
        cancel: &CancellationToken,
    ) -> Result<RepositoryListing> {
        let total_count = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled.into()),
            count = self.api.organization_repo_count(owner) => count
                .with_context(|| format!("Failed to fetch organization metadata for {}", owner))?,
        };

        let page_count = page_count(total_count, self.page_size);
        info!("Total org repos: {} ({} pages)", total_count, page_count);

        let (sender, stream) = RepositoryStream::channel(self.buffer);
        let scope = cancel.child_token();

        let mut fetchers = JoinSet::new();
        for page in 1..=page_count {
            let fetch = PageFetch {
                api: Arc::clone(&self.api),
                owner: owner.to_string(),
                page,
                per_page: self.page_size,
                exclude: self.exclude.clone(),
                sender: sender.clone(),
                scope: scope.clone(),
            };
            fetchers.spawn(fetch.run());
        }

        let handle = tokio::spawn(collect_pages(fetchers, sender, scope, page_count));

        Ok(RepositoryListing {
            total_count,
            page_count,
            stream,
            discovery: DiscoveryHandle { handle },
        })
    }
}

/// Join every page task, then close the stream by dropping the last sender
async fn collect_pages(
    mut fetchers: JoinSet<PageOutcome>,
    sender: mpsc::Sender<RepositoryDescriptor>,
    scope: CancellationToken,
    pages_requested: u32,
) -> DiscoveryReport {
    let mut report = DiscoveryReport {
        pages_requested,
        ..Default::default()
    };

    while let Some(joined) = fetchers.join_next().await {
        let outcome = match joined {
            Ok(done) => done,
            Err(e) => {
                error!("Page fetch task panicked: {}", e);
                scope.cancel();
                report.pages_panicked += 1;
                continue;
            }
        };

        report.repositories_emitted += outcome.emitted;
        match outcome.result {
            Ok(()) => report.pages_fetched += 1,
            Err(e) if crate::shutdown::is_cancelled(&e) => {
                debug!("Page {} fetch aborted", outcome.page);
                report.pages_aborted += 1;
            }
            Err(e) => {
                error!("Error fetching org repos: {:#}", e);
                scope.cancel();
                report.failures.push(PageFailure {
                    page: outcome.page,
                    error: format!("{:#}", e),
                });
            }
        }
    }

    drop(sender);
    report.failures.sort_by_key(|failure| failure.page);
    report
}

struct PageOutcome {
    page: u32,
    /// Descriptors sent before the task finished, even if it then failed
    emitted: usize,
    result: Result<()>,
}

struct PageFetch {
    api: Arc<dyn RepositoryApi>,
    owner: String,
    page: u32,
    per_page: u32,
    exclude: ExcludeFilter,
    sender: mpsc::Sender<RepositoryDescriptor>,
    scope: CancellationToken,
}

impl PageFetch {
    async fn run(self) -> PageOutcome {
        let mut emitted = 0;
        let result = self.fetch_and_emit(&mut emitted).await;
        PageOutcome {
            page: self.page,
            emitted,
            result,
        }
    }

    /// Fetch the page and emit its non-archived repositories
    async fn fetch_and_emit(&self, emitted: &mut usize) -> Result<()> {
        let repositories = tokio::select! {
            biased;
            _ = self.scope.cancelled() => return Err(Cancelled.into()),
            page = self.api.list_repositories_page(&self.owner, self.page, self.per_page) => page
                .with_context(|| format!("Failed to fetch page {} of {} repositories", self.page, self.owner))?,
        };

        debug!("Fetched page {} with {} repositories", self.page, repositories.len());

        for repo in repositories {
            if repo.archived {
                debug!("Repo is archived, skipping: {}", repo.name);
                continue;
            }
            if self.exclude.is_excluded(&repo.name) {
                debug!("Excluding repository due to pattern match: {}", repo.name);
                continue;
            }

            tokio::select! {
                biased;
                _ = self.scope.cancelled() => return Err(Cancelled.into()),
                sent = self.sender.send(repo) => {
                    // Every consumer is gone; nobody will read the rest.
                    if sent.is_err() {
                        return Err(Cancelled.into());
                    }
                }
            }
            *emitted += 1;
        }

        Ok(())
    }
}
