use crate::classify::{classify, SkipReason, Verdict};
use crate::compare::{already_linked, ContentComparator, LinkDecision};
use crate::config::Policy;
use crate::entry::EntryPair;
use crate::error::{Error, Result};
use crate::link::Linker;
use crate::progress::ProgressReporter;
use crate::report::{Report, Resolution};
use crate::walker::{display_relative, TreeWalker, WalkEvent};
use rayon::prelude::*;
use std::fs::{self, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The two snapshot roots under comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPair {
    pub older: PathBuf,
    pub newer: PathBuf,
}

impl SnapshotPair {
    pub fn new(older: impl Into<PathBuf>, newer: impl Into<PathBuf>) -> Self {
        Self {
            older: older.into(),
            newer: newer.into(),
        }
    }

    /// Both roots must be distinct, non-nested directories on one device.
    pub fn validate(&self) -> Result<()> {
        let older = root_metadata(&self.older, "older")?;
        let newer = root_metadata(&self.newer, "newer")?;

        if older.dev() != newer.dev() {
            return Err(Error::Config(format!(
                "{} and {} are on different devices; hardlinks cannot cross filesystems",
                self.older.display(),
                self.newer.display()
            )));
        }
        if older.ino() == newer.ino() {
            return Err(Error::Config(format!(
                "{} and {} are the same directory",
                self.older.display(),
                self.newer.display()
            )));
        }

        let older_canonical = fs::canonicalize(&self.older)?;
        let newer_canonical = fs::canonicalize(&self.newer)?;
        if older_canonical.starts_with(&newer_canonical)
            || newer_canonical.starts_with(&older_canonical)
        {
            return Err(Error::Config(format!(
                "{} and {} are nested inside one another",
                self.older.display(),
                self.newer.display()
            )));
        }
        Ok(())
    }
}

fn root_metadata(path: &Path, label: &str) -> Result<Metadata> {
    let metadata = fs::metadata(path).map_err(|err| {
        Error::Config(format!("{} snapshot {}: {}", label, path.display(), err))
    })?;
    if !metadata.is_dir() {
        return Err(Error::Config(format!(
            "{} snapshot {} is not a directory",
            label,
            path.display()
        )));
    }
    Ok(metadata)
}

/// Runs one reconciliation of a snapshot pair under a fixed policy.
pub struct ReconcileEngine {
    snapshots: SnapshotPair,
    policy: Policy,
    cancel_token: Arc<AtomicBool>,
}

impl ReconcileEngine {
    pub fn new(snapshots: SnapshotPair, policy: Policy) -> Self {
        Self {
            snapshots,
            policy,
            cancel_token: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the token stops the run before the next path is processed.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_token)
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Walk both snapshots and link every identical, not yet linked pair.
    ///
    /// Only configuration problems are returned as `Err`; per-path failures
    /// end up in [`Report::errors`].
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<Report> {
        self.snapshots.validate()?;
        self.policy.validate()?;

        info!(
            "Reconciling {} (older) with {} (newer), keeping {} copies{}",
            self.snapshots.older.display(),
            self.snapshots.newer.display(),
            self.policy.keep_side,
            if self.policy.dry_run { " [dry run]" } else { "" }
        );
        reporter.on_run_start(&self.snapshots, &self.policy);

        let start = Instant::now();
        let mut report = Report::new(self.policy.dry_run);
        if self.policy.jobs > 1 {
            self.run_parallel(&mut report, reporter)?;
        } else {
            let walker = self.walker()?;
            let mut worker = Worker::new(&self.policy);
            self.drain(walker, &mut worker, &mut report, reporter);
        }
        report.duration = start.elapsed();

        info!(
            "Scanned {} paths in {:.2}s: {} linked ({} bytes), {} already linked, {} differ, {} skipped, {} errors",
            report.paths_scanned,
            report.duration.as_secs_f64(),
            report.linked,
            report.bytes_reclaimed,
            report.already_linked,
            report.differing,
            report.skipped.total(),
            report.errors.len(),
        );
        reporter.on_run_complete(&report);
        Ok(report)
    }

    fn walker(&self) -> Result<TreeWalker> {
        Ok(TreeWalker::new(
            &self.snapshots.older,
            &self.snapshots.newer,
            self.policy.unmatched,
            self.policy.compile_ignore_patterns()?,
        ))
    }

    /// The first level is handled on the calling thread; every directory
    /// below it becomes an independent job with its own partial report.
    fn run_parallel(&self, report: &mut Report, reporter: &dyn ProgressReporter) -> Result<()> {
        let ignores = self.policy.compile_ignore_patterns()?;
        let mut top = self.walker()?.defer_subtrees();
        let mut worker = Worker::new(&self.policy);
        self.drain(&mut top, &mut worker, report, reporter);
        if report.cancelled {
            return Ok(());
        }

        let subtrees = top.take_deferred();
        debug!(
            "Distributing {} subtrees over {} workers",
            subtrees.len(),
            self.policy.jobs
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.policy.jobs)
            .build()
            .map_err(|err| {
                Error::Config(format!(
                    "cannot start {} worker threads: {}",
                    self.policy.jobs, err
                ))
            })?;

        let partials: Vec<Report> = pool.install(|| {
            subtrees
                .into_par_iter()
                .map_init(
                    || Worker::new(&self.policy),
                    |worker, subtree| {
                        let walker = TreeWalker::for_subtree(
                            &self.snapshots.older,
                            &self.snapshots.newer,
                            self.policy.unmatched,
                            ignores.clone(),
                            subtree,
                        );
                        let mut partial = Report::new(self.policy.dry_run);
                        self.drain(walker, worker, &mut partial, reporter);
                        partial
                    },
                )
                .collect()
        });

        for partial in partials {
            report.merge(partial);
        }
        Ok(())
    }

    fn drain(
        &self,
        events: impl Iterator<Item = WalkEvent>,
        worker: &mut Worker<'_>,
        report: &mut Report,
        reporter: &dyn ProgressReporter,
    ) {
        for event in events {
            if self.cancel_token.load(Ordering::Relaxed) {
                info!("Cancellation requested; stopping traversal");
                report.cancelled = true;
                break;
            }

            let (relative, resolution) = match event {
                WalkEvent::Pair(pair) => {
                    let resolution = worker.resolve(&pair);
                    (pair.relative, resolution)
                }
                WalkEvent::Excluded { relative } => {
                    (relative, Resolution::Skipped(SkipReason::Excluded))
                }
                WalkEvent::Failed { relative, failure } => (relative, Resolution::Failed(failure)),
            };

            log_resolution(&relative, &resolution);
            reporter.on_path(&relative, &resolution);
            report.record(&relative, &resolution);
        }
    }
}

/// Per-thread pipeline state: the comparator's read buffers and the
/// linker's temporary-name counter.
struct Worker<'a> {
    policy: &'a Policy,
    comparator: ContentComparator,
    linker: Linker,
}

impl<'a> Worker<'a> {
    fn new(policy: &'a Policy) -> Self {
        Self {
            policy,
            comparator: ContentComparator::new(policy),
            linker: Linker::new(policy),
        }
    }

    fn decide<'p>(&mut self, pair: &'p EntryPair) -> LinkDecision<'p> {
        match classify(pair, self.policy) {
            Verdict::NotEligible(reason) => LinkDecision::NotEligible(reason),
            Verdict::Eligible { older, newer } if already_linked(older, newer) => {
                LinkDecision::AlreadyLinked
            }
            Verdict::Eligible { older, newer } => self.comparator.compare(older, newer),
        }
    }

    fn resolve(&mut self, pair: &EntryPair) -> Resolution {
        match self.decide(pair) {
            LinkDecision::AlreadyLinked => Resolution::AlreadyLinked,
            LinkDecision::NotEligible(reason) => Resolution::Skipped(reason),
            LinkDecision::CandidateDiffers(reason) => Resolution::Differs(reason),
            LinkDecision::Error(failure) => Resolution::Failed(failure),
            LinkDecision::CandidateIdentical { older, newer } => {
                match self.linker.apply(older, newer) {
                    Ok(outcome) => Resolution::Linked(outcome),
                    Err(failure) => Resolution::Failed(failure),
                }
            }
        }
    }
}

fn log_resolution(relative: &Path, resolution: &Resolution) {
    let path = display_relative(relative);
    match resolution {
        Resolution::Linked(outcome) if outcome.dry_run => {
            info!("Would link {} ({} bytes, keeping {})", path, outcome.bytes, outcome.kept)
        }
        Resolution::Linked(outcome) => {
            info!("Linked {} ({} bytes, kept {})", path, outcome.bytes, outcome.kept)
        }
        Resolution::Failed(failure) => warn!("{}: {}", path, failure),
        Resolution::Differs(reason) => debug!("{}: {}", path, reason),
        Resolution::AlreadyLinked => debug!("{}: already linked", path),
        Resolution::Skipped(reason) => debug!("{}: skipped, {}", path, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let pair = SnapshotPair::new(tmp.path().join("missing"), tmp.path());
        assert!(matches!(pair.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_file_root_and_nesting() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("file");
        fs::write(&file, "x").unwrap();
        let dir = tmp.path().join("dir");
        fs::create_dir_all(dir.join("inner")).unwrap();

        assert!(matches!(
            SnapshotPair::new(&file, &dir).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SnapshotPair::new(&dir, dir.join("inner")).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SnapshotPair::new(&dir, &dir).validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_worker_links_identical_pair() {
        use crate::config::KeepSide;
        use crate::entry::Entry;

        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a"), "same").unwrap();
        fs::write(tmp.path().join("b"), "same").unwrap();
        let pair = EntryPair {
            relative: PathBuf::from("a"),
            older: Some(Entry::lstat(&tmp.path().join("a")).unwrap()),
            newer: Some(Entry::lstat(&tmp.path().join("b")).unwrap()),
        };

        let policy = Policy::new(KeepSide::Older);
        let mut worker = Worker::new(&policy);
        assert!(matches!(
            worker.decide(&pair),
            LinkDecision::CandidateIdentical { .. }
        ));
        assert!(matches!(worker.resolve(&pair), Resolution::Linked(_)));
        assert!(matches!(worker.resolve(&pair), Resolution::Failed(_)));

        let relinked = EntryPair {
            relative: PathBuf::from("a"),
            older: Some(Entry::lstat(&tmp.path().join("a")).unwrap()),
            newer: Some(Entry::lstat(&tmp.path().join("b")).unwrap()),
        };
        assert_eq!(worker.resolve(&relinked), Resolution::AlreadyLinked);
    }

    #[test]
    fn test_accepts_sibling_directories() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("a")).unwrap();
        fs::create_dir(tmp.path().join("b")).unwrap();
        SnapshotPair::new(tmp.path().join("a"), tmp.path().join("b"))
            .validate()
            .unwrap();
    }
}
