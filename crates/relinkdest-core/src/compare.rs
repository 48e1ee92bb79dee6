//! Identity and content comparison of eligible file pairs.
//!
//! Cheapest checks run first: inode identity, then size, then the optional
//! mtime filter, and only then a chunked byte comparison of both files.

use crate::classify::SkipReason;
use crate::config::Policy;
use crate::entry::{Entry, FileId, Mtime};
use crate::error::{PairFailure, Stage};
use std::fs::{File, Metadata};
use std::io::{self, Read};
use std::time::Duration;
use tracing::trace;

/// Result of the comparison stages for one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDecision<'a> {
    AlreadyLinked,
    NotEligible(SkipReason),
    /// Carries the compared entries on to the linker.
    CandidateIdentical { older: &'a Entry, newer: &'a Entry },
    CandidateDiffers(DiffReason),
    Error(PairFailure),
}

/// Which filter told the pair apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffReason {
    Size,
    Mtime,
    /// First differing byte.
    Content { offset: u64 },
}

impl std::fmt::Display for DiffReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffReason::Size => f.write_str("size differs"),
            DiffReason::Mtime => f.write_str("mtime outside tolerance"),
            DiffReason::Content { offset } => write!(f, "content differs at byte {}", offset),
        }
    }
}

/// Both entries already name the same inode.
pub fn already_linked(older: &Entry, newer: &Entry) -> bool {
    older.id == newer.id
}

/// Staged byte comparator. Owns the two read buffers so a worker reuses them
/// for every pair it compares.
pub struct ContentComparator {
    mtime_tolerance: Option<Duration>,
    left: Vec<u8>,
    right: Vec<u8>,
}

impl ContentComparator {
    pub fn new(policy: &Policy) -> Self {
        Self {
            mtime_tolerance: policy.mtime_tolerance,
            left: vec![0; policy.chunk_size],
            right: vec![0; policy.chunk_size],
        }
    }

    /// Compare two eligible files that are not already linked.
    pub fn compare<'a>(&mut self, older: &'a Entry, newer: &'a Entry) -> LinkDecision<'a> {
        if older.size != newer.size {
            return LinkDecision::CandidateDiffers(DiffReason::Size);
        }

        if let Some(tolerance) = self.mtime_tolerance {
            if older.mtime.distance(newer.mtime) > tolerance {
                return LinkDecision::CandidateDiffers(DiffReason::Mtime);
            }
        }

        if older.size == 0 {
            return LinkDecision::CandidateIdentical { older, newer };
        }

        match self.compare_content(older, newer) {
            Ok(None) => LinkDecision::CandidateIdentical { older, newer },
            Ok(Some(offset)) => LinkDecision::CandidateDiffers(DiffReason::Content { offset }),
            Err(failure) => LinkDecision::Error(failure),
        }
    }

    /// `Ok(None)` when identical, `Ok(Some(offset))` at the first mismatch.
    fn compare_content(&mut self, older: &Entry, newer: &Entry) -> Result<Option<u64>, PairFailure> {
        let mut left = OpenedFile::open(older)?;
        let mut right = OpenedFile::open(newer)?;
        self.compare_opened(&mut left, &mut right)
    }

    /// Byte comparison of two files opened at the scanned size.
    fn compare_opened<'e>(
        &mut self,
        left_file: &mut OpenedFile<'e>,
        right_file: &mut OpenedFile<'e>,
    ) -> Result<Option<u64>, PairFailure> {
        let (older, newer) = (left_file.entry, right_file.entry);
        let size = older.size;
        let chunk = self.left.len() as u64;
        let mut offset = 0u64;

        while offset < size {
            let want = chunk.min(size - offset) as usize;
            let left = &mut self.left[..want];
            let right = &mut self.right[..want];

            let got = read_full(&mut left_file.file, left).map_err(|e| read_failure(older, e))?;
            if got < want {
                return Err(shrank(older, offset + got as u64));
            }
            let got = read_full(&mut right_file.file, right).map_err(|e| read_failure(newer, e))?;
            if got < want {
                return Err(shrank(newer, offset + got as u64));
            }

            if left != right {
                let index = left
                    .iter()
                    .zip(right.iter())
                    .position(|(a, b)| a != b)
                    .unwrap_or(0);
                trace!("Mismatch at byte {} of {}", offset + index as u64, older.path.display());
                return Ok(Some(offset + index as u64));
            }
            offset += want as u64;
        }

        for opened in [left_file, right_file] {
            opened.check_at_eof()?;
            opened.check_unchanged()?;
        }
        Ok(None)
    }
}

/// A file opened for comparison plus its metadata at open time.
struct OpenedFile<'a> {
    entry: &'a Entry,
    file: File,
    opened: Metadata,
}

impl<'a> OpenedFile<'a> {
    /// Open `entry` and verify the handle still refers to the inode and size
    /// the walker saw.
    fn open(entry: &'a Entry) -> Result<Self, PairFailure> {
        let file = File::open(&entry.path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                PairFailure::raced(
                    Stage::Compare,
                    format!("{} disappeared before comparison", entry.path.display()),
                )
            } else {
                PairFailure::io(format!("cannot open {}: {}", entry.path.display(), err))
            }
        })?;
        let opened = file.metadata().map_err(|err| stat_failure(entry, err))?;

        if FileId::of(&opened) != entry.id {
            return Err(PairFailure::raced(
                Stage::Compare,
                format!("{} was replaced since it was scanned", entry.path.display()),
            ));
        }
        if opened.len() != entry.size {
            return Err(PairFailure::raced(
                Stage::Compare,
                format!(
                    "{} changed size since it was scanned ({} -> {} bytes)",
                    entry.path.display(),
                    entry.size,
                    opened.len()
                ),
            ));
        }
        Ok(Self {
            entry,
            file,
            opened,
        })
    }

    /// After `entry.size` bytes the file must be at EOF.
    fn check_at_eof(&mut self) -> Result<(), PairFailure> {
        let mut probe = [0u8; 1];
        let extra = read_full(&mut self.file, &mut probe)
            .map_err(|err| read_failure(self.entry, err))?;
        if extra > 0 {
            return Err(PairFailure::raced(
                Stage::Compare,
                format!("{} grew during comparison", self.entry.path.display()),
            ));
        }
        Ok(())
    }

    /// Size and mtime must match what the handle reported at open.
    fn check_unchanged(&self) -> Result<(), PairFailure> {
        let now = self
            .file
            .metadata()
            .map_err(|err| stat_failure(self.entry, err))?;
        if now.len() != self.opened.len() || Mtime::of(&now) != Mtime::of(&self.opened) {
            return Err(PairFailure::raced(
                Stage::Compare,
                format!("{} was modified during comparison", self.entry.path.display()),
            ));
        }
        Ok(())
    }
}

/// Fill `buf` unless EOF comes first; returns the bytes read.
fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn stat_failure(entry: &Entry, err: io::Error) -> PairFailure {
    PairFailure::io(format!("cannot stat {}: {}", entry.path.display(), err))
}

fn read_failure(entry: &Entry, err: io::Error) -> PairFailure {
    PairFailure::io(format!("cannot read {}: {}", entry.path.display(), err))
}

fn shrank(entry: &Entry, at: u64) -> PairFailure {
    PairFailure::raced(
        Stage::Compare,
        format!(
            "{} shrank during comparison (EOF at {} of {} bytes)",
            entry.path.display(),
            at,
            entry.size
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeepSide;
    use crate::error::FailureKind;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::Path;

    fn write(path: &Path, content: &[u8]) -> Entry {
        fs::write(path, content).unwrap();
        Entry::lstat(path).unwrap()
    }

    fn comparator(chunk_size: usize) -> ContentComparator {
        ContentComparator::new(&Policy::new(KeepSide::Older).with_chunk_size(chunk_size))
    }

    #[test]
    fn test_identical_across_many_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let a = write(&tmp.path().join("a"), &content);
        let b = write(&tmp.path().join("b"), &content);

        assert!(!already_linked(&a, &b));
        assert_eq!(
            comparator(64).compare(&a, &b),
            LinkDecision::CandidateIdentical {
                older: &a,
                newer: &b
            }
        );
    }

    #[test]
    fn test_reports_first_differing_byte() {
        let tmp = tempfile::tempdir().unwrap();
        let mut content = vec![7u8; 300];
        let a = write(&tmp.path().join("a"), &content);
        content[200] = 8;
        let b = write(&tmp.path().join("b"), &content);

        assert_eq!(
            comparator(64).compare(&a, &b),
            LinkDecision::CandidateDiffers(DiffReason::Content { offset: 200 })
        );
    }

    #[test]
    fn test_size_filter_needs_no_io() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(&tmp.path().join("a"), b"abc");
        let b = write(&tmp.path().join("b"), b"abcd");
        // Content is never opened, so removing the files changes nothing.
        fs::remove_file(&a.path).unwrap();
        fs::remove_file(&b.path).unwrap();
        assert_eq!(
            comparator(64).compare(&a, &b),
            LinkDecision::CandidateDiffers(DiffReason::Size)
        );
    }

    #[test]
    fn test_mtime_filter_is_opt_in() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(&tmp.path().join("a"), b"same");
        let mut b = write(&tmp.path().join("b"), b"same");
        b.mtime.secs += 100;

        let strict = Policy::new(KeepSide::Older).with_mtime_tolerance(Some(Duration::from_secs(2)));
        assert_eq!(
            ContentComparator::new(&strict).compare(&a, &b),
            LinkDecision::CandidateDiffers(DiffReason::Mtime)
        );
    }

    #[test]
    fn test_truncated_file_is_a_race() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(&tmp.path().join("a"), b"hello world");
        let b = write(&tmp.path().join("b"), b"hello world");
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&b.path)
            .unwrap();

        match comparator(4).compare(&a, &b) {
            LinkDecision::Error(failure) => {
                assert_eq!(failure.kind, FailureKind::Raced);
                assert_eq!(failure.stage, Stage::Compare);
            }
            other => panic!("expected race, got {:?}", other),
        }
    }

    #[test]
    fn test_appended_file_is_a_race() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(&tmp.path().join("a"), b"hello");
        let b = write(&tmp.path().join("b"), b"hello");
        let mut file = OpenOptions::new().append(true).open(&a.path).unwrap();
        file.write_all(b" again").unwrap();

        assert!(matches!(
            comparator(4).compare(&a, &b),
            LinkDecision::Error(PairFailure {
                kind: FailureKind::Raced,
                ..
            })
        ));
    }

    #[test]
    fn test_empty_files_are_identical_without_reads() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(&tmp.path().join("a"), b"");
        let b = write(&tmp.path().join("b"), b"");
        fs::remove_file(&a.path).unwrap();
        assert!(matches!(
            comparator(64).compare(&a, &b),
            LinkDecision::CandidateIdentical { .. }
        ));
    }

    fn assert_raced(result: Result<Option<u64>, PairFailure>, needle: &str) {
        match result {
            Err(failure) => {
                assert_eq!(failure.kind, FailureKind::Raced);
                assert_eq!(failure.stage, Stage::Compare);
                assert!(failure.message.contains(needle), "{}", failure.message);
            }
            other => panic!("expected race, got {:?}", other),
        }
    }

    fn pair(tmp: &Path, content: &[u8]) -> (Entry, Entry) {
        (write(&tmp.join("a"), content), write(&tmp.join("b"), content))
    }

    #[test]
    fn test_truncated_while_open_is_a_race() {
        let tmp = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..4096u32).map(|i| (i % 13) as u8).collect();
        let (a, b) = pair(tmp.path(), &content);
        let mut left = OpenedFile::open(&a).unwrap();
        let mut right = OpenedFile::open(&b).unwrap();

        OpenOptions::new()
            .write(true)
            .open(&b.path)
            .unwrap()
            .set_len(1000)
            .unwrap();

        let result = comparator(256).compare_opened(&mut left, &mut right);
        assert_raced(result, "shrank");
    }

    #[test]
    fn test_grown_while_open_is_a_race() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = pair(tmp.path(), b"hello world");
        let mut left = OpenedFile::open(&a).unwrap();
        let mut right = OpenedFile::open(&b).unwrap();

        let mut file = OpenOptions::new().append(true).open(&a.path).unwrap();
        file.write_all(b"!").unwrap();

        let result = comparator(4).compare_opened(&mut left, &mut right);
        assert_raced(result, "grew");
    }

    #[test]
    fn test_touched_while_open_is_a_race() {
        let tmp = tempfile::tempdir().unwrap();
        let (a, b) = pair(tmp.path(), b"same bytes");
        let mut left = OpenedFile::open(&a).unwrap();
        let mut right = OpenedFile::open(&b).unwrap();

        OpenOptions::new()
            .write(true)
            .open(&b.path)
            .unwrap()
            .set_modified(std::time::SystemTime::UNIX_EPOCH)
            .unwrap();

        let result = comparator(4).compare_opened(&mut left, &mut right);
        assert_raced(result, "modified during comparison");
    }
}
