//! Replace one copy of an identical pair with a hardlink to the other.
//!
//! The replacement is a `link(2)` to a temporary name in the same directory
//! followed by `rename(2)` over the original, so the path never goes missing.

use crate::config::{KeepSide, Policy};
use crate::entry::{Entry, EntryKind, FileId, Mtime, Side};
use crate::error::{PairFailure, Stage};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TEMP_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Size of the copy that was (or would be) replaced.
    pub bytes: u64,
    pub kept: Side,
    /// The replaced inode had other names, so its blocks stay allocated.
    pub external_links: bool,
    pub dry_run: bool,
}

pub struct Linker {
    keep_side: KeepSide,
    dry_run: bool,
    pid: u32,
    seq: u64,
}

impl Linker {
    pub fn new(policy: &Policy) -> Self {
        Self {
            keep_side: policy.keep_side,
            dry_run: policy.dry_run,
            pid: std::process::id(),
            seq: 0,
        }
    }

    /// Link a pair the comparator found identical. On failure the file that
    /// would have been replaced is left untouched.
    pub fn apply(&mut self, older: &Entry, newer: &Entry) -> Result<LinkOutcome, PairFailure> {
        let (keep, replace) = match self.keep_side {
            KeepSide::Older => (older, newer),
            KeepSide::Newer => (newer, older),
        };
        let outcome = LinkOutcome {
            bytes: replace.size,
            kept: self.keep_side.keep(),
            external_links: replace.nlink > 1,
            dry_run: self.dry_run,
        };

        if self.dry_run {
            debug!(
                "Would link {} -> {}",
                replace.path.display(),
                keep.path.display()
            );
            return Ok(outcome);
        }

        revalidate(keep)?;
        revalidate(replace)?;

        let temp = self.link_to_temp(&keep.path, &replace.path)?;
        if let Err(err) = fs::rename(&temp, &replace.path) {
            if let Err(cleanup) = fs::remove_file(&temp) {
                warn!(
                    "Failed to remove temporary link {}: {}",
                    temp.display(),
                    cleanup
                );
            }
            return Err(PairFailure::link(format!(
                "cannot rename {} over {}: {}",
                temp.display(),
                replace.path.display(),
                err
            )));
        }

        debug!("Linked {} -> {}", replace.path.display(), keep.path.display());
        Ok(outcome)
    }

    fn link_to_temp(&mut self, keep: &Path, replace: &Path) -> Result<PathBuf, PairFailure> {
        let parent = replace.parent().ok_or_else(|| {
            PairFailure::link(format!("{} has no parent directory", replace.display()))
        })?;

        for _ in 0..TEMP_ATTEMPTS {
            self.seq += 1;
            let temp = parent.join(format!(".relinkdest.{}.{}.tmp", self.pid, self.seq));
            match fs::hard_link(keep, &temp) {
                Ok(()) => return Ok(temp),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(PairFailure::link(format!(
                        "cannot link {} to {}: {}",
                        keep.display(),
                        temp.display(),
                        err
                    )));
                }
            }
        }
        Err(PairFailure::link(format!(
            "no free temporary name in {}",
            parent.display()
        )))
    }
}

/// The path must still name the inode, size and mtime that were compared.
fn revalidate(entry: &Entry) -> Result<(), PairFailure> {
    let metadata = fs::symlink_metadata(&entry.path).map_err(|err| {
        PairFailure::raced(
            Stage::Link,
            format!("cannot re-check {}: {}", entry.path.display(), err),
        )
    })?;
    let current = Entry::from_metadata(&entry.path, &metadata);

    if current.kind != EntryKind::File
        || FileId::of(&metadata) != entry.id
        || current.size != entry.size
        || Mtime::of(&metadata) != entry.mtime
    {
        return Err(PairFailure::raced(
            Stage::Link,
            format!("{} changed before it could be linked", entry.path.display()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::os::unix::fs::MetadataExt;

    fn setup() -> (tempfile::TempDir, Entry, Entry) {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("older")).unwrap();
        fs::create_dir(tmp.path().join("newer")).unwrap();
        let older = tmp.path().join("older/a.txt");
        let newer = tmp.path().join("newer/a.txt");
        fs::write(&older, "X").unwrap();
        fs::write(&newer, "X").unwrap();
        let older = Entry::lstat(&older).unwrap();
        let newer = Entry::lstat(&newer).unwrap();
        (tmp, older, newer)
    }

    fn ino(path: &Path) -> u64 {
        fs::metadata(path).unwrap().ino()
    }

    #[test]
    fn test_keep_older_links_newer_path() {
        let (tmp, older, newer) = setup();
        let mut linker = Linker::new(&Policy::new(KeepSide::Older));
        let outcome = linker.apply(&older, &newer).unwrap();

        assert_eq!(outcome.bytes, 1);
        assert_eq!(outcome.kept, Side::Older);
        assert_eq!(ino(&newer.path), older.id.ino);
        assert_eq!(fs::read_to_string(&newer.path).unwrap(), "X");

        // no temporary names left behind
        let leftovers: Vec<_> = fs::read_dir(tmp.path().join("newer"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_keep_newer_links_older_path() {
        let (_tmp, older, newer) = setup();
        let mut linker = Linker::new(&Policy::new(KeepSide::Newer));
        linker.apply(&older, &newer).unwrap();
        assert_eq!(ino(&older.path), newer.id.ino);
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let (_tmp, older, newer) = setup();
        let mut linker = Linker::new(&Policy::new(KeepSide::Older).with_dry_run(true));
        let outcome = linker.apply(&older, &newer).unwrap();
        assert!(outcome.dry_run);
        assert_eq!(ino(&newer.path), newer.id.ino);
    }

    #[test]
    fn test_replaced_file_leaves_target_untouched() {
        let (tmp, older, newer) = setup();
        let swapped = tmp.path().join("newer/swap");
        fs::write(&swapped, "X").unwrap();
        fs::rename(&swapped, &newer.path).unwrap();

        let mut linker = Linker::new(&Policy::new(KeepSide::Older));
        let failure = linker.apply(&older, &newer).unwrap_err();
        assert_eq!(failure.kind, FailureKind::Raced);
        assert_eq!(failure.stage, Stage::Link);
        assert_ne!(ino(&newer.path), older.id.ino);
    }

    #[test]
    fn test_external_links_are_flagged() {
        let (tmp, older, _) = setup();
        let extra = tmp.path().join("elsewhere");
        let newer_path = tmp.path().join("newer/a.txt");
        fs::hard_link(&newer_path, &extra).unwrap();
        let newer = Entry::lstat(&newer_path).unwrap();

        let mut linker = Linker::new(&Policy::new(KeepSide::Older));
        let outcome = linker.apply(&older, &newer).unwrap();
        assert!(outcome.external_links);
        assert_eq!(fs::read_to_string(&extra).unwrap(), "X");
    }
}
