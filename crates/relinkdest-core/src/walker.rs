//! Lockstep traversal of the two snapshot trees.
//!
//! The walker yields the union of both trees, one relative path at a time,
//! depth-first and in file-name byte order within each directory. Only one
//! merged listing per directory level is held at a time.

use crate::config::UnmatchedPolicy;
use crate::entry::{Entry, EntryPair, Side};
use crate::error::PairFailure;
use glob::Pattern;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

#[derive(Debug)]
pub enum WalkEvent {
    Pair(EntryPair),
    /// Matched an ignore pattern; not inspected or recursed.
    Excluded { relative: PathBuf },
    Failed {
        relative: PathBuf,
        failure: PairFailure,
    },
}

/// A directory still to be walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subtree {
    /// Directory present on both sides.
    Both(PathBuf),
    /// Directory present on one side only, walked under
    /// [`UnmatchedPolicy::Descend`].
    OneSided(Side, PathBuf),
}

#[derive(Debug)]
struct MergedName {
    name: OsString,
    in_older: bool,
    in_newer: bool,
}

struct Frame {
    relative: PathBuf,
    names: std::vec::IntoIter<MergedName>,
}

struct OneSidedWalk {
    side: Side,
    root: PathBuf,
    iter: walkdir::IntoIter,
}

pub struct TreeWalker {
    older_root: PathBuf,
    newer_root: PathBuf,
    unmatched: UnmatchedPolicy,
    ignores: Vec<Pattern>,
    stack: Vec<Frame>,
    pending: Option<Subtree>,
    one_sided: Option<OneSidedWalk>,
    defer_subtrees: bool,
    deferred: Vec<Subtree>,
}

impl TreeWalker {
    pub fn new(
        older_root: &Path,
        newer_root: &Path,
        unmatched: UnmatchedPolicy,
        ignores: Vec<Pattern>,
    ) -> Self {
        Self::for_subtree(
            older_root,
            newer_root,
            unmatched,
            ignores,
            Subtree::Both(PathBuf::new()),
        )
    }

    /// Walk only the contents of `subtree`. The directory itself is not
    /// yielded.
    pub fn for_subtree(
        older_root: &Path,
        newer_root: &Path,
        unmatched: UnmatchedPolicy,
        ignores: Vec<Pattern>,
        subtree: Subtree,
    ) -> Self {
        Self {
            older_root: older_root.to_path_buf(),
            newer_root: newer_root.to_path_buf(),
            unmatched,
            ignores,
            stack: Vec::new(),
            pending: Some(subtree),
            one_sided: None,
            defer_subtrees: false,
            deferred: Vec::new(),
        }
    }

    /// Yield the first level only and collect directories to descend into
    /// instead of walking them. Used to fan subtrees out to workers.
    pub fn defer_subtrees(mut self) -> Self {
        self.defer_subtrees = true;
        self
    }

    pub fn take_deferred(&mut self) -> Vec<Subtree> {
        std::mem::take(&mut self.deferred)
    }

    fn root(&self, side: Side) -> &Path {
        match side {
            Side::Older => &self.older_root,
            Side::Newer => &self.newer_root,
        }
    }

    fn schedule(&mut self, subtree: Subtree) {
        if self.defer_subtrees {
            self.deferred.push(subtree);
        } else {
            self.pending = Some(subtree);
        }
    }

    fn open(&mut self, subtree: Subtree) -> Result<(), WalkEvent> {
        match subtree {
            Subtree::Both(relative) => {
                let older = list_dir(&self.older_root.join(&relative));
                let newer = list_dir(&self.newer_root.join(&relative));
                let (older, newer) = match (older, newer) {
                    (Ok(older), Ok(newer)) => (older, newer),
                    (Err(err), _) | (_, Err(err)) => {
                        return Err(WalkEvent::Failed {
                            failure: PairFailure::traversal(format!(
                                "cannot list directory {}: {}",
                                display_relative(&relative),
                                err
                            )),
                            relative,
                        });
                    }
                };
                trace!(
                    "Listing {}: {} older, {} newer",
                    display_relative(&relative),
                    older.len(),
                    newer.len()
                );
                self.stack.push(Frame {
                    relative,
                    names: merge_names(older, newer).into_iter(),
                });
            }
            Subtree::OneSided(side, relative) => {
                let root = self.root(side).to_path_buf();
                let iter = WalkDir::new(root.join(&relative))
                    .min_depth(1)
                    .follow_links(false)
                    .sort_by_file_name()
                    .into_iter();
                self.one_sided = Some(OneSidedWalk { side, root, iter });
            }
        }
        Ok(())
    }

    fn stat(&self, side: Side, relative: &Path, listed: bool) -> Result<Option<Entry>, PairFailure> {
        if !listed {
            return Ok(None);
        }
        let path = self.root(side).join(relative);
        match Entry::lstat(&path) {
            Ok(entry) => Ok(Some(entry)),
            // Removed between listing and lstat.
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(PairFailure::traversal(format!(
                "cannot stat {}: {}",
                path.display(),
                err
            ))),
        }
    }

    fn visit(&mut self, relative: PathBuf, in_older: bool, in_newer: bool) -> Option<WalkEvent> {
        if is_excluded(&self.ignores, &relative) {
            return Some(WalkEvent::Excluded { relative });
        }

        let older = self.stat(Side::Older, &relative, in_older);
        let newer = self.stat(Side::Newer, &relative, in_newer);
        let (older, newer) = match (older, newer) {
            (Ok(older), Ok(newer)) => (older, newer),
            (Err(failure), _) | (_, Err(failure)) => {
                return Some(WalkEvent::Failed { relative, failure });
            }
        };

        let older_dir = older.as_ref().map(Entry::is_dir);
        let newer_dir = newer.as_ref().map(Entry::is_dir);
        match (older_dir, newer_dir) {
            (None, None) => return None,
            (Some(true), Some(true)) => self.schedule(Subtree::Both(relative.clone())),
            (Some(true), None) if self.unmatched == UnmatchedPolicy::Descend => {
                self.schedule(Subtree::OneSided(Side::Older, relative.clone()))
            }
            (None, Some(true)) if self.unmatched == UnmatchedPolicy::Descend => {
                self.schedule(Subtree::OneSided(Side::Newer, relative.clone()))
            }
            _ => {}
        }

        Some(WalkEvent::Pair(EntryPair {
            relative,
            older,
            newer,
        }))
    }
}

impl Iterator for TreeWalker {
    type Item = WalkEvent;

    fn next(&mut self) -> Option<WalkEvent> {
        loop {
            if let Some(walk) = self.one_sided.as_mut() {
                match walk.next_event(&self.ignores) {
                    Some(event) => return Some(event),
                    None => self.one_sided = None,
                }
            }

            if let Some(subtree) = self.pending.take() {
                if let Err(event) = self.open(subtree) {
                    return Some(event);
                }
                continue;
            }

            let frame = self.stack.last_mut()?;
            let Some(merged) = frame.names.next() else {
                self.stack.pop();
                continue;
            };
            let relative = frame.relative.join(&merged.name);
            if let Some(event) = self.visit(relative, merged.in_older, merged.in_newer) {
                return Some(event);
            }
        }
    }
}

impl OneSidedWalk {
    fn next_event(&mut self, ignores: &[Pattern]) -> Option<WalkEvent> {
        let item = self.iter.next()?;
        let event = match item {
            Ok(dent) => {
                let relative = strip_root(&self.root, dent.path());
                if is_excluded(ignores, &relative) {
                    if dent.file_type().is_dir() {
                        self.iter.skip_current_dir();
                    }
                    return Some(WalkEvent::Excluded { relative });
                }
                match dent.metadata() {
                    Ok(metadata) => {
                        let entry = Entry::from_metadata(dent.path(), &metadata);
                        let (older, newer) = match self.side {
                            Side::Older => (Some(entry), None),
                            Side::Newer => (None, Some(entry)),
                        };
                        WalkEvent::Pair(EntryPair {
                            relative,
                            older,
                            newer,
                        })
                    }
                    Err(err) => WalkEvent::Failed {
                        relative,
                        failure: PairFailure::traversal(err.to_string()),
                    },
                }
            }
            Err(err) => WalkEvent::Failed {
                relative: err
                    .path()
                    .map(|path| strip_root(&self.root, path))
                    .unwrap_or_default(),
                failure: PairFailure::traversal(err.to_string()),
            },
        };
        Some(event)
    }
}

fn list_dir(dir: &Path) -> io::Result<Vec<OsString>> {
    let mut names = fs::read_dir(dir)?
        .map(|entry| entry.map(|entry| entry.file_name()))
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

fn merge_names(older: Vec<OsString>, newer: Vec<OsString>) -> Vec<MergedName> {
    let mut merged = Vec::with_capacity(older.len().max(newer.len()));
    let mut older = older.into_iter().peekable();
    let mut newer = newer.into_iter().peekable();

    loop {
        let next = match (older.peek(), newer.peek()) {
            (None, None) => break,
            (Some(_), None) => (older.next(), None),
            (None, Some(_)) => (None, newer.next()),
            (Some(a), Some(b)) => match a.cmp(b) {
                std::cmp::Ordering::Less => (older.next(), None),
                std::cmp::Ordering::Greater => (None, newer.next()),
                std::cmp::Ordering::Equal => (older.next(), newer.next()),
            },
        };
        let (in_older, in_newer) = (next.0.is_some(), next.1.is_some());
        if let Some(name) = next.0.or(next.1) {
            merged.push(MergedName {
                name,
                in_older,
                in_newer,
            });
        }
    }
    merged
}

fn is_excluded(ignores: &[Pattern], relative: &Path) -> bool {
    ignores.iter().any(|pattern| pattern.matches_path(relative))
}

fn strip_root(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

pub(crate) fn display_relative(relative: &Path) -> std::path::Display<'_> {
    if relative.as_os_str().is_empty() {
        Path::new(".").display()
    } else {
        relative.display()
    }
}
