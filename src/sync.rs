//! Sync Engine - Drains a repository stream with a fixed pool of workers
//!
//! Every worker takes the next descriptor from the shared stream, clones or
//! pulls it, and moves on. A fatal transfer error cancels the run; the engine
//! waits for every worker before reporting it.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::discovery::{RepositoryDescriptor, RepositoryStream};
use crate::shutdown::{is_cancelled, Cancelled};
use crate::transfer::{SyncOutcome, Transfer};

/// What the workers do with each descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Clone,
    Pull,
}

/// Outcome counts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub cloned: usize,
    pub pulled: usize,
    pub up_to_date: usize,
    pub skipped_archived: usize,
    pub skipped_no_default_branch: usize,
    pub skipped_already_exists: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl SyncSummary {
    fn record(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Cloned => self.cloned += 1,
            SyncOutcome::Pulled { .. } => self.pulled += 1,
            SyncOutcome::UpToDate => self.up_to_date += 1,
            SyncOutcome::SkippedArchived => self.skipped_archived += 1,
            SyncOutcome::SkippedNoDefaultBranch => self.skipped_no_default_branch += 1,
            SyncOutcome::SkippedAlreadyExists => self.skipped_already_exists += 1,
        }
    }

    fn merge(&mut self, other: &SyncSummary) {
        self.cloned += other.cloned;
        self.pulled += other.pulled;
        self.up_to_date += other.up_to_date;
        self.skipped_archived += other.skipped_archived;
        self.skipped_no_default_branch += other.skipped_no_default_branch;
        self.skipped_already_exists += other.skipped_already_exists;
        self.failed += other.failed;
    }

    pub fn skipped(&self) -> usize {
        self.skipped_archived + self.skipped_no_default_branch + self.skipped_already_exists
    }

    /// Repositories that reached a transfer or a skip decision
    pub fn processed(&self) -> usize {
        self.cloned + self.pulled + self.up_to_date + self.skipped() + self.failed
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cloned, {} pulled, {} up to date, {} skipped, {} failed in {:.2}s",
            self.cloned,
            self.pulled,
            self.up_to_date,
            self.skipped(),
            self.failed,
            self.duration.as_secs_f64()
        )
    }
}

/// Result of [`SyncEngine::run`]
#[derive(Debug)]
pub struct RunResult {
    pub summary: SyncSummary,
    /// First fatal error raised by a worker
    pub error: Option<anyhow::Error>,
    /// The run stopped because its token was cancelled from outside
    pub cancelled: bool,
}

impl RunResult {
    /// The fatal error if any, [`Cancelled`] on user interruption, else the summary
    pub fn into_result(self) -> Result<SyncSummary> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.cancelled {
            return Err(Cancelled.into());
        }
        Ok(self.summary)
    }
}

/// Fixed-size worker pool over a [`Transfer`]
#[derive(Clone)]
pub struct SyncEngine {
    transfer: Arc<dyn Transfer>,
    workers: usize,
    clone_missing: bool,
}

impl SyncEngine {
    pub fn new(transfer: Arc<dyn Transfer>, workers: usize) -> Self {
        Self {
            transfer,
            workers: workers.max(1),
            clone_missing: false,
        }
    }

    /// In pull mode, clone repositories whose checkout does not exist yet
    pub fn with_clone_missing(mut self, clone_missing: bool) -> Self {
        self.clone_missing = clone_missing;
        self
    }

    /// Sync every descriptor of `stream` into `target_dir`.
    ///
    /// Exactly `workers` tasks share the stream. A worker that hits a fatal
    /// error cancels `cancel` and stops; the others stop taking new work.
    pub async fn run(
        &self,
        stream: RepositoryStream,
        target_dir: &Path,
        mode: SyncMode,
        cancel: &CancellationToken,
    ) -> RunResult {
        let start_time = Instant::now();
        info!(
            "Syncing into {} with {} workers ({:?} mode)",
            target_dir.display(),
            self.workers,
            mode
        );

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let worker = Worker {
                id,
                transfer: Arc::clone(&self.transfer),
                stream: stream.clone(),
                target_dir: target_dir.to_path_buf(),
                mode,
                clone_missing: self.clone_missing,
                cancel: cancel.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(stream);

        let mut summary = SyncSummary::default();
        let mut first_error = None;

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => {
                    summary.merge(&report.summary);
                    if first_error.is_none() {
                        first_error = report.error;
                    }
                }
                Err(e) => {
                    error!("Sync worker panicked: {}", e);
                    cancel.cancel();
                    summary.failed += 1;
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("Sync worker panicked: {}", e));
                    }
                }
            }
        }

        summary.duration = start_time.elapsed();
        let cancelled = first_error.is_none() && cancel.is_cancelled();

        info!("Sync finished: {}", summary);

        RunResult {
            summary,
            error: first_error,
            cancelled,
        }
    }
}

struct WorkerReport {
    summary: SyncSummary,
    error: Option<anyhow::Error>,
}

struct Worker {
    id: usize,
    transfer: Arc<dyn Transfer>,
    stream: RepositoryStream,
    target_dir: PathBuf,
    mode: SyncMode,
    clone_missing: bool,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) -> WorkerReport {
        let mut report = WorkerReport {
            summary: SyncSummary::default(),
            error: None,
        };

        loop {
            let repo = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.stream.next() => match next {
                    Some(repo) => repo,
                    None => break,
                },
            };

            match self.sync_repository(&repo).await {
                Ok(outcome) => report.summary.record(&outcome),
                Err(e) if is_cancelled(&e) => break,
                Err(e) => {
                    debug!("Sync worker {} stopping after error: {:#}", self.id, e);
                    report.summary.failed += 1;
                    report.error = Some(e);
                    self.cancel.cancel();
                    break;
                }
            }
        }

        debug!("Sync worker {} done", self.id);
        report
    }

    async fn sync_repository(&self, repo: &RepositoryDescriptor) -> Result<SyncOutcome> {
        let target = self.target_dir.join(&repo.name);

        let clone_missing = self.mode == SyncMode::Pull
            && !repo.archived
            && self.should_clone_missing(repo, &target).await?;

        let outcome = match self.mode {
            SyncMode::Pull if repo.archived => SyncOutcome::SkippedArchived,
            SyncMode::Pull if clone_missing => self.clone_into(repo, &target).await?,
            SyncMode::Pull => {
                info!("Pulling {:>35} in {}", repo.name, target.display());
                self.transfer
                    .pull_repository(repo, &target)
                    .await
                    .with_context(|| format!("Failed to pull {}", repo.full_name()))?
            }
            SyncMode::Clone => self.clone_into(repo, &target).await?,
        };

        match &outcome {
            SyncOutcome::Pulled { output } if !output.is_empty() => print!("{}", output),
            SyncOutcome::SkippedArchived => info!("Repo is archived, skipping: {}", repo.name),
            SyncOutcome::SkippedNoDefaultBranch => {
                warn!("No default branch found, skipping: {}", repo.name)
            }
            SyncOutcome::SkippedAlreadyExists => {
                info!("Repo already exists, skipping: {}", repo.name)
            }
            _ => debug!("{}: {}", repo.name, outcome),
        }

        Ok(outcome)
    }

    async fn clone_into(
        &self,
        repo: &RepositoryDescriptor,
        target: &Path,
    ) -> Result<SyncOutcome> {
        info!("Cloning {} to {}", repo.name, target.display());
        self.transfer
            .clone_repository(repo, target)
            .await
            .with_context(|| format!("Failed to clone {}", repo.full_name()))
    }

    async fn should_clone_missing(
        &self,
        repo: &RepositoryDescriptor,
        target: &Path,
    ) -> Result<bool> {
        if !self.clone_missing || repo.clone_url.is_none() {
            return Ok(false);
        }
        let exists = tokio::fs::try_exists(target)
            .await
            .with_context(|| format!("Failed to check checkout: {}", target.display()))?;
        Ok(!exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Clone)]
    enum Script {
        Outcome(SyncOutcome),
        Fail,
    }

    /// Transfer that sleeps, records calls and tracks how many run at once
    struct FakeTransfer {
        delay: Duration,
        scripts: HashMap<String, Script>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: StdMutex<Vec<(&'static str, String)>>,
    }

    impl FakeTransfer {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                scripts: HashMap::new(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn script(mut self, name: &str, script: Script) -> Self {
            self.scripts.insert(name.to_string(), script);
            self
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        async fn perform(
            &self,
            kind: &'static str,
            repo: &RepositoryDescriptor,
            default: SyncOutcome,
        ) -> Result<SyncOutcome> {
            self.calls.lock().unwrap().push((kind, repo.name.clone()));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.scripts.get(&repo.name) {
                Some(Script::Outcome(outcome)) => Ok(outcome.clone()),
                Some(Script::Fail) => Err(anyhow!("failed to {} {}: exit status 1", kind, repo.name)),
                None => Ok(default),
            }
        }
    }

    #[async_trait]
    impl Transfer for FakeTransfer {
        async fn clone_repository(
            &self,
            repo: &RepositoryDescriptor,
            _target: &Path,
        ) -> Result<SyncOutcome> {
            self.perform("clone", repo, SyncOutcome::Cloned).await
        }

        async fn pull_repository(
            &self,
            repo: &RepositoryDescriptor,
            _target: &Path,
        ) -> Result<SyncOutcome> {
            self.perform("pull", repo, SyncOutcome::UpToDate).await
        }
    }

    fn remote(name: &str) -> RepositoryDescriptor {
        RepositoryDescriptor {
            name: name.to_string(),
            owner: Some("acme".to_string()),
            clone_url: Some(format!("https://github.com/acme/{}.git", name)),
            default_branch: Some("main".to_string()),
            archived: false,
            language: None,
        }
    }

    fn many(count: usize) -> Vec<RepositoryDescriptor> {
        (0..count).map(|i| remote(&format!("repo-{:03}", i))).collect()
    }

    #[tokio::test]
    async fn test_worker_count_bounds_concurrency() {
        let transfer = Arc::new(FakeTransfer::new(Duration::from_millis(10)));
        let engine = SyncEngine::new(transfer.clone(), 3);
        let cancel = CancellationToken::new();

        let result = engine
            .run(
                RepositoryStream::from_descriptors(many(30)),
                Path::new("/src"),
                SyncMode::Clone,
                &cancel,
            )
            .await;

        let summary = result.into_result().unwrap();
        assert_eq!(summary.cloned, 30);
        assert_eq!(transfer.call_count(), 30);
        let max = transfer.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "saw {} concurrent transfers", max);
        assert!(max >= 2);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_the_run() {
        let transfer = Arc::new(
            FakeTransfer::new(Duration::from_millis(20)).script("repo-002", Script::Fail),
        );
        let engine = SyncEngine::new(transfer.clone(), 2);
        let cancel = CancellationToken::new();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            engine.run(
                RepositoryStream::from_descriptors(many(100)),
                Path::new("/src"),
                SyncMode::Pull,
                &cancel,
            ),
        )
        .await
        .expect("run should return promptly after a fatal error");

        assert!(cancel.is_cancelled());
        assert!(!result.cancelled);
        assert_eq!(result.summary.failed, 1);
        assert!(transfer.call_count() < 100);

        let err = result.into_result().unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Failed to pull acme/repo-002"));
        assert!(message.contains("exit status 1"));
    }

    #[tokio::test]
    async fn test_non_fatal_outcomes_keep_going() {
        let transfer = Arc::new(
            FakeTransfer::new(Duration::from_millis(1))
                .script("empty", Script::Outcome(SyncOutcome::SkippedNoDefaultBranch))
                .script(
                    "busy",
                    Script::Outcome(SyncOutcome::Pulled {
                        output: String::new(),
                    }),
                ),
        );
        let engine = SyncEngine::new(transfer.clone(), 2);
        let repos = vec![remote("empty"), remote("busy"), remote("quiet")];

        let summary = engine
            .run(
                RepositoryStream::from_descriptors(repos),
                Path::new("/src"),
                SyncMode::Pull,
                &CancellationToken::new(),
            )
            .await
            .into_result()
            .unwrap();

        assert_eq!(summary.skipped_no_default_branch, 1);
        assert_eq!(summary.pulled, 1);
        assert_eq!(summary.up_to_date, 1);
        assert_eq!(summary.processed(), 3);
    }

    #[tokio::test]
    async fn test_archived_repositories_are_not_pulled() {
        let transfer = Arc::new(FakeTransfer::new(Duration::ZERO));
        let engine = SyncEngine::new(transfer.clone(), 4);
        let mut archived = remote("legacy");
        archived.archived = true;

        let summary = engine
            .run(
                RepositoryStream::from_descriptors(vec![archived, remote("api")]),
                Path::new("/src"),
                SyncMode::Pull,
                &CancellationToken::new(),
            )
            .await
            .into_result()
            .unwrap();

        assert_eq!(summary.skipped_archived, 1);
        assert_eq!(
            *transfer.calls.lock().unwrap(),
            vec![("pull", "api".to_string())]
        );
    }

    #[tokio::test]
    async fn test_clone_missing_in_pull_mode() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("present")).unwrap();

        let transfer = Arc::new(FakeTransfer::new(Duration::ZERO));
        let engine = SyncEngine::new(transfer.clone(), 1).with_clone_missing(true);

        let summary = engine
            .run(
                RepositoryStream::from_descriptors(vec![remote("present"), remote("absent")]),
                temp.path(),
                SyncMode::Pull,
                &CancellationToken::new(),
            )
            .await
            .into_result()
            .unwrap();

        assert_eq!(summary.up_to_date, 1);
        assert_eq!(summary.cloned, 1);
        let calls = transfer.calls.lock().unwrap().clone();
        assert!(calls.contains(&("pull", "present".to_string())));
        assert!(calls.contains(&("clone", "absent".to_string())));
    }

    #[tokio::test]
    async fn test_missing_checkout_pulled_when_clone_missing_disabled() {
        let temp = tempfile::TempDir::new().unwrap();
        let transfer = Arc::new(FakeTransfer::new(Duration::ZERO));
        let engine = SyncEngine::new(transfer.clone(), 1);

        engine
            .run(
                RepositoryStream::from_descriptors(vec![remote("absent")]),
                temp.path(),
                SyncMode::Pull,
                &CancellationToken::new(),
            )
            .await
            .into_result()
            .unwrap();

        assert_eq!(
            *transfer.calls.lock().unwrap(),
            vec![("pull", "absent".to_string())]
        );
    }

    #[tokio::test]
    async fn test_clone_failure_names_repository() {
        let temp = tempfile::TempDir::new().unwrap();
        let transfer = Arc::new(FakeTransfer::new(Duration::ZERO).script("absent", Script::Fail));
        let engine = SyncEngine::new(transfer, 1).with_clone_missing(true);

        let err = engine
            .run(
                RepositoryStream::from_descriptors(vec![remote("absent")]),
                temp.path(),
                SyncMode::Pull,
                &CancellationToken::new(),
            )
            .await
            .into_result()
            .unwrap_err();

        let message = format!("{:#}", err);
        assert!(message.contains("Failed to clone acme/absent"));
        assert!(message.contains("failed to clone absent"));
    }

    #[tokio::test]
    async fn test_local_checkouts_are_never_cloned() {
        let temp = tempfile::TempDir::new().unwrap();
        let transfer = Arc::new(FakeTransfer::new(Duration::ZERO));
        let engine = SyncEngine::new(transfer.clone(), 1).with_clone_missing(true);

        engine
            .run(
                RepositoryStream::from_descriptors(vec![RepositoryDescriptor::local("gone")]),
                temp.path(),
                SyncMode::Pull,
                &CancellationToken::new(),
            )
            .await
            .into_result()
            .unwrap();

        assert_eq!(
            *transfer.calls.lock().unwrap(),
            vec![("pull", "gone".to_string())]
        );
    }

    #[tokio::test]
    async fn test_user_cancellation_is_not_an_error() {
        let transfer = Arc::new(FakeTransfer::new(Duration::ZERO));
        let engine = SyncEngine::new(transfer.clone(), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine
            .run(
                RepositoryStream::from_descriptors(many(10)),
                Path::new("/src"),
                SyncMode::Clone,
                &cancel,
            )
            .await;

        assert!(result.cancelled);
        assert!(result.error.is_none());
        assert_eq!(transfer.call_count(), 0);
        assert_matches!(result.into_result(), Err(e) if is_cancelled(&e));
    }

    #[tokio::test]
    async fn test_idle_workers_stop_on_cancel() {
        let transfer = Arc::new(FakeTransfer::new(Duration::ZERO));
        let engine = SyncEngine::new(transfer, 4);
        let cancel = CancellationToken::new();

        // Keep the sender alive so the stream never closes on its own.
        let (_sender, stream) = RepositoryStream::channel(4);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            engine.run(stream, Path::new("/src"), SyncMode::Pull, &cancel),
        )
        .await
        .expect("workers should observe cancellation");

        assert!(result.cancelled);
        assert_eq!(result.summary.processed(), 0);
    }

    #[test]
    fn test_summary_display() {
        let summary = SyncSummary {
            cloned: 2,
            pulled: 1,
            up_to_date: 4,
            skipped_archived: 1,
            skipped_already_exists: 2,
            duration: Duration::from_millis(1500),
            ..Default::default()
        };
        assert_eq!(
            summary.to_string(),
            "2 cloned, 1 pulled, 4 up to date, 3 skipped, 0 failed in 1.50s"
        );
    }
}
