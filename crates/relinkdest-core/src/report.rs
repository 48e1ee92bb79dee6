use crate::classify::SkipReason;
use crate::compare::DiffReason;
use crate::error::PairFailure;
use crate::link::LinkOutcome;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Final outcome for one visited path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    AlreadyLinked,
    Skipped(SkipReason),
    Differs(DiffReason),
    /// Linked, or would have been in a dry run.
    Linked(LinkOutcome),
    Failed(PairFailure),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub only_on_one_side: u64,
    pub kind_mismatch: u64,
    pub symlink: u64,
    pub special: u64,
    pub zero_byte: u64,
    pub cross_device: u64,
    pub excluded: u64,
}

impl SkipCounts {
    fn add(&mut self, reason: SkipReason) {
        let counter = match reason {
            SkipReason::OnlyOnOneSide(_) => &mut self.only_on_one_side,
            SkipReason::KindMismatch => &mut self.kind_mismatch,
            SkipReason::Symlink { .. } => &mut self.symlink,
            SkipReason::Special => &mut self.special,
            SkipReason::ZeroByte => &mut self.zero_byte,
            SkipReason::CrossDevice => &mut self.cross_device,
            SkipReason::Excluded => &mut self.excluded,
            SkipReason::Directory => return,
        };
        *counter += 1;
    }

    fn merge(&mut self, other: &SkipCounts) {
        self.only_on_one_side += other.only_on_one_side;
        self.kind_mismatch += other.kind_mismatch;
        self.symlink += other.symlink;
        self.special += other.special;
        self.zero_byte += other.zero_byte;
        self.cross_device += other.cross_device;
        self.excluded += other.excluded;
    }

    pub fn total(&self) -> u64 {
        self.only_on_one_side
            + self.kind_mismatch
            + self.symlink
            + self.special
            + self.zero_byte
            + self.cross_device
            + self.excluded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathError {
    pub relative: PathBuf,
    pub failure: PairFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Traversal finished but some paths failed.
    PartialFailure,
    Cancelled,
}

/// Aggregated result of one run.
#[derive(Debug, Clone)]
pub struct Report {
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    pub dry_run: bool,
    pub cancelled: bool,
    pub paths_scanned: u64,
    pub directories: u64,
    pub already_linked: u64,
    /// Newly linked pairs (would-link pairs in a dry run).
    pub linked: u64,
    pub linked_with_external_links: u64,
    pub bytes_reclaimed: u64,
    pub differing: u64,
    pub skipped: SkipCounts,
    pub errors: Vec<PathError>,
}

impl Report {
    pub fn new(dry_run: bool) -> Self {
        Self {
            started_at: Local::now(),
            duration: Duration::ZERO,
            dry_run,
            cancelled: false,
            paths_scanned: 0,
            directories: 0,
            already_linked: 0,
            linked: 0,
            linked_with_external_links: 0,
            bytes_reclaimed: 0,
            differing: 0,
            skipped: SkipCounts::default(),
            errors: Vec::new(),
        }
    }

    pub fn record(&mut self, relative: &Path, resolution: &Resolution) {
        self.paths_scanned += 1;
        match resolution {
            Resolution::AlreadyLinked => self.already_linked += 1,
            Resolution::Skipped(SkipReason::Directory) => self.directories += 1,
            Resolution::Skipped(reason) => self.skipped.add(*reason),
            Resolution::Differs(_) => self.differing += 1,
            Resolution::Linked(outcome) => {
                self.linked += 1;
                self.bytes_reclaimed += outcome.bytes;
                if outcome.external_links {
                    self.linked_with_external_links += 1;
                }
            }
            Resolution::Failed(failure) => self.errors.push(PathError {
                relative: relative.to_path_buf(),
                failure: failure.clone(),
            }),
        }
    }

    /// Fold a worker's partial report into this one. The earlier start time
    /// and the longer duration win.
    pub fn merge(&mut self, other: Report) {
        self.started_at = self.started_at.min(other.started_at);
        self.duration = self.duration.max(other.duration);
        self.cancelled |= other.cancelled;
        self.paths_scanned += other.paths_scanned;
        self.directories += other.directories;
        self.already_linked += other.already_linked;
        self.linked += other.linked;
        self.linked_with_external_links += other.linked_with_external_links;
        self.bytes_reclaimed += other.bytes_reclaimed;
        self.differing += other.differing;
        self.skipped.merge(&other.skipped);
        self.errors.extend(other.errors);
    }

    pub fn status(&self) -> RunStatus {
        if self.cancelled {
            RunStatus::Cancelled
        } else if self.errors.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::PartialFailure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Side;

    fn linked(bytes: u64, external_links: bool) -> Resolution {
        Resolution::Linked(LinkOutcome {
            bytes,
            kept: Side::Older,
            external_links,
            dry_run: false,
        })
    }

    #[test]
    fn test_record_counts_each_resolution() {
        let mut report = Report::new(false);
        let path = Path::new("a");
        report.record(path, &Resolution::AlreadyLinked);
        report.record(path, &linked(10, false));
        report.record(path, &linked(5, true));
        report.record(path, &Resolution::Differs(DiffReason::Size));
        report.record(path, &Resolution::Skipped(SkipReason::Directory));
        report.record(path, &Resolution::Skipped(SkipReason::OnlyOnOneSide(Side::Newer)));
        report.record(path, &Resolution::Skipped(SkipReason::ZeroByte));

        assert_eq!(report.paths_scanned, 7);
        assert_eq!(report.already_linked, 1);
        assert_eq!(report.linked, 2);
        assert_eq!(report.linked_with_external_links, 1);
        assert_eq!(report.bytes_reclaimed, 15);
        assert_eq!(report.differing, 1);
        assert_eq!(report.directories, 1);
        assert_eq!(report.skipped.total(), 2);
        assert_eq!(report.status(), RunStatus::Success);
    }

    #[test]
    fn test_errors_make_partial_failure() {
        let mut report = Report::new(false);
        report.record(
            Path::new("bad"),
            &Resolution::Failed(PairFailure::traversal("permission denied")),
        );
        assert_eq!(report.status(), RunStatus::PartialFailure);
        assert_eq!(report.errors[0].relative, PathBuf::from("bad"));

        report.cancelled = true;
        assert_eq!(report.status(), RunStatus::Cancelled);
    }

    #[test]
    fn test_merge_sums_partials() {
        let mut total = Report::new(true);
        let mut partial = Report::new(true);
        total.record(Path::new("a"), &linked(3, false));
        partial.record(Path::new("b"), &linked(4, false));
        partial.record(
            Path::new("c"),
            &Resolution::Failed(PairFailure::link("rename failed")),
        );

        total.merge(partial);
        assert_eq!(total.linked, 2);
        assert_eq!(total.bytes_reclaimed, 7);
        assert_eq!(total.paths_scanned, 3);
        assert_eq!(total.errors.len(), 1);
    }
}
