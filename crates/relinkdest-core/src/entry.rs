use std::fmt;
use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which snapshot an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Older,
    Newer,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Older => f.write_str("older"),
            Side::Newer => f.write_str("newer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// Block/char devices, sockets and fifos.
    Special,
}

/// Device + inode: what "already hardlinked" means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub dev: u64,
    pub ino: u64,
}

impl FileId {
    pub fn of(metadata: &Metadata) -> Self {
        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mtime {
    pub secs: i64,
    pub nanos: i64,
}

impl Mtime {
    pub fn of(metadata: &Metadata) -> Self {
        Self {
            secs: metadata.mtime(),
            nanos: metadata.mtime_nsec(),
        }
    }

    fn as_nanos(self) -> i128 {
        self.secs as i128 * 1_000_000_000 + self.nanos as i128
    }

    pub fn distance(self, other: Mtime) -> Duration {
        let delta = (self.as_nanos() - other.as_nanos()).unsigned_abs();
        let secs = (delta / 1_000_000_000).min(u64::MAX as u128) as u64;
        Duration::new(secs, (delta % 1_000_000_000) as u32)
    }
}

/// Snapshot of one side of a visited path, taken with `lstat` semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: Mtime,
    pub id: FileId,
    pub mode: u32,
    pub nlink: u64,
    pub link_target: Option<PathBuf>,
}

impl Entry {
    /// Describe `path` without following a final symlink.
    pub fn lstat(path: &Path) -> io::Result<Entry> {
        let metadata = fs::symlink_metadata(path)?;
        let mut entry = Entry::from_metadata(path, &metadata);
        if entry.kind == EntryKind::Symlink {
            entry.link_target = Some(fs::read_link(path)?);
        }
        Ok(entry)
    }

    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Entry {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            debug_assert!(
                file_type.is_block_device()
                    || file_type.is_char_device()
                    || file_type.is_fifo()
                    || file_type.is_socket()
            );
            EntryKind::Special
        };

        Entry {
            path: path.to_path_buf(),
            kind,
            size: metadata.len(),
            mtime: Mtime::of(metadata),
            id: FileId::of(metadata),
            mode: metadata.mode() & 0o7777,
            nlink: metadata.nlink(),
            link_target: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// One relative path and what each snapshot holds there. `None` means the
/// path does not exist on that side.
#[derive(Debug, Clone)]
pub struct EntryPair {
    pub relative: PathBuf,
    pub older: Option<Entry>,
    pub newer: Option<Entry>,
}
