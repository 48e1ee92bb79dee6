use crate::config::Policy;
use crate::engine::SnapshotPair;
use crate::report::{Report, Resolution};
use std::path::Path;

/// Trait for observing a run.
///
/// The CLI implements it with a spinner and an optional CSV event log.
/// `on_path` may be called from several worker threads at once when the
/// run is parallel. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_run_start(&self, _snapshots: &SnapshotPair, _policy: &Policy) {}
    fn on_path(&self, _relative: &Path, _resolution: &Resolution) {}
    fn on_run_complete(&self, _report: &Report) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
