use std::fmt;
use thiserror::Error;

/// Errors that abort a whole run. Everything scoped to a single path is
/// recorded in the report as a [`PairFailure`] instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Invalid ignore pattern: {0}")]
    Glob(#[from] glob::PatternError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stage of the pipeline a per-path failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Traverse,
    Compare,
    Link,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Traverse => "traverse",
            Stage::Compare => "compare",
            Stage::Link => "link",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Unreadable directory or entry metadata.
    Traversal,
    /// The file changed underneath us.
    Raced,
    /// link(2) or rename(2) failed.
    Link,
    /// Plain read failure while comparing.
    Io,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Traversal => "traversal",
            FailureKind::Raced => "raced",
            FailureKind::Link => "link",
            FailureKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// A non-fatal failure attached to one relative path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} failed ({kind}): {message}")]
pub struct PairFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

impl PairFailure {
    pub fn traversal(message: impl Into<String>) -> Self {
        Self {
            stage: Stage::Traverse,
            kind: FailureKind::Traversal,
            message: message.into(),
        }
    }

    pub fn raced(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: FailureKind::Raced,
            message: message.into(),
        }
    }

    pub fn link(message: impl Into<String>) -> Self {
        Self {
            stage: Stage::Link,
            kind: FailureKind::Link,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self {
            stage: Stage::Compare,
            kind: FailureKind::Io,
            message: message.into(),
        }
    }
}
