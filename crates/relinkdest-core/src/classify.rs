use crate::config::Policy;
use crate::entry::{Entry, EntryKind, EntryPair, Side};
use std::fmt;

/// Why a pair is never handed to the comparators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    OnlyOnOneSide(Side),
    KindMismatch,
    /// Symlinks are compared by target but never linked.
    Symlink { targets_equal: bool },
    Special,
    ZeroByte,
    CrossDevice,
    Excluded,
    /// Both sides are directories; walked, never linked.
    Directory,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OnlyOnOneSide(side) => write!(f, "only in {} snapshot", side),
            SkipReason::KindMismatch => f.write_str("kind mismatch"),
            SkipReason::Symlink { targets_equal: true } => f.write_str("symlink (same target)"),
            SkipReason::Symlink { targets_equal: false } => {
                f.write_str("symlink (different target)")
            }
            SkipReason::Special => f.write_str("special file"),
            SkipReason::ZeroByte => f.write_str("empty file"),
            SkipReason::CrossDevice => f.write_str("different devices"),
            SkipReason::Excluded => f.write_str("excluded"),
            SkipReason::Directory => f.write_str("directory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict<'a> {
    Eligible { older: &'a Entry, newer: &'a Entry },
    NotEligible(SkipReason),
}

/// Coarse eligibility of a pair. Pure; touches no filesystem state.
pub fn classify<'a>(pair: &'a EntryPair, policy: &Policy) -> Verdict<'a> {
    let (older, newer) = match (&pair.older, &pair.newer) {
        (Some(older), Some(newer)) => (older, newer),
        (Some(_), None) => return Verdict::NotEligible(SkipReason::OnlyOnOneSide(Side::Older)),
        (None, Some(_)) => return Verdict::NotEligible(SkipReason::OnlyOnOneSide(Side::Newer)),
        // The walker never yields an empty pair.
        (None, None) => return Verdict::NotEligible(SkipReason::KindMismatch),
    };

    if older.kind != newer.kind {
        return Verdict::NotEligible(SkipReason::KindMismatch);
    }

    match older.kind {
        EntryKind::Directory => Verdict::NotEligible(SkipReason::Directory),
        EntryKind::Symlink => Verdict::NotEligible(SkipReason::Symlink {
            targets_equal: older.link_target == newer.link_target,
        }),
        EntryKind::Special => Verdict::NotEligible(SkipReason::Special),
        EntryKind::File if older.id.dev != newer.id.dev => {
            Verdict::NotEligible(SkipReason::CrossDevice)
        }
        EntryKind::File if older.size == 0 && newer.size == 0 && !policy.link_zero_byte_files => {
            Verdict::NotEligible(SkipReason::ZeroByte)
        }
        EntryKind::File => Verdict::Eligible { older, newer },
    }
}
