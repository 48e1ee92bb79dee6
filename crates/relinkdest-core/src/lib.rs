//! Reconcile successive `rsync --link-dest` snapshots: find files that are
//! byte-identical between the two trees but stored as separate inodes, and
//! replace one copy with a hardlink to the other.

pub mod classify;
pub mod compare;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod link;
pub mod progress;
pub mod report;
pub mod walker;

pub use config::{FileConfig, KeepSide, Policy, UnmatchedPolicy};
pub use engine::{ReconcileEngine, SnapshotPair};
pub use error::{Error, PairFailure, Result};
pub use progress::{ProgressReporter, SilentReporter};
pub use report::{Report, Resolution, RunStatus};
