use crate::entry::Side;
use crate::error::{Error, Result};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use glob::Pattern;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Read chunk used by the content comparator.
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

/// Largest accepted read chunk; each worker allocates two of these.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Which copy survives when a pair is linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepSide {
    Older,
    Newer,
}

impl KeepSide {
    pub fn keep(self) -> Side {
        match self {
            KeepSide::Older => Side::Older,
            KeepSide::Newer => Side::Newer,
        }
    }
}

impl FromStr for KeepSide {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "older" | "old" => Ok(KeepSide::Older),
            "newer" | "new" => Ok(KeepSide::Newer),
            other => Err(format!("expected 'older' or 'newer', got '{}'", other)),
        }
    }
}

impl fmt::Display for KeepSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.keep().fmt(f)
    }
}

/// What to do with a directory that exists on only one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    /// Report the directory itself once and do not look inside.
    #[default]
    Skip,
    /// Walk it and report every contained entry as one-sided.
    Descend,
}

impl FromStr for UnmatchedPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(UnmatchedPolicy::Skip),
            "descend" => Ok(UnmatchedPolicy::Descend),
            other => Err(format!("expected 'skip' or 'descend', got '{}'", other)),
        }
    }
}

impl fmt::Display for UnmatchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmatchedPolicy::Skip => f.write_str("skip"),
            UnmatchedPolicy::Descend => f.write_str("descend"),
        }
    }
}

/// Fully resolved matching policy for one run.
///
/// Has no `Default`; callers always choose the keep side.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub keep_side: KeepSide,
    pub link_zero_byte_files: bool,
    /// `None` means content is always compared.
    pub mtime_tolerance: Option<Duration>,
    pub dry_run: bool,
    pub unmatched: UnmatchedPolicy,
    pub chunk_size: usize,
    /// Worker threads; `0` and `1` both mean sequential.
    pub jobs: usize,
    /// Globs matched against paths relative to the snapshot roots.
    pub ignore_patterns: Vec<String>,
}

impl Policy {
    pub fn new(keep_side: KeepSide) -> Self {
        Self {
            keep_side,
            link_zero_byte_files: false,
            mtime_tolerance: None,
            dry_run: false,
            unmatched: UnmatchedPolicy::Skip,
            chunk_size: DEFAULT_CHUNK_SIZE,
            jobs: 1,
            ignore_patterns: Vec::new(),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_link_zero_byte_files(mut self, link: bool) -> Self {
        self.link_zero_byte_files = link;
        self
    }

    pub fn with_mtime_tolerance(mut self, tolerance: Option<Duration>) -> Self {
        self.mtime_tolerance = tolerance;
        self
    }

    pub fn with_unmatched(mut self, unmatched: UnmatchedPolicy) -> Self {
        self.unmatched = unmatched;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be greater than zero".into()));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "chunk size {} exceeds the maximum of {} bytes",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        self.compile_ignore_patterns()?;
        Ok(())
    }

    pub fn compile_ignore_patterns(&self) -> Result<Vec<Pattern>> {
        self.ignore_patterns
            .iter()
            .map(|glob| Pattern::new(glob).map_err(Error::from))
            .collect()
    }
}

/// Policy values as they appear in `Relinkdest.toml` or `RELINKDEST_*`
/// environment variables. Every field is optional so that command-line
/// flags can be layered on top with [`FileConfig::overlay`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    pub keep_side: Option<KeepSide>,
    pub link_zero_byte_files: Option<bool>,
    pub mtime_tolerance_secs: Option<f64>,
    pub dry_run: Option<bool>,
    pub unmatched: Option<UnmatchedPolicy>,
    pub chunk_size: Option<usize>,
    pub jobs: Option<usize>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

impl FileConfig {
    /// Values set in `other` win; ignore patterns accumulate.
    pub fn overlay(mut self, other: FileConfig) -> FileConfig {
        self.keep_side = other.keep_side.or(self.keep_side);
        self.link_zero_byte_files = other.link_zero_byte_files.or(self.link_zero_byte_files);
        self.mtime_tolerance_secs = other.mtime_tolerance_secs.or(self.mtime_tolerance_secs);
        self.dry_run = other.dry_run.or(self.dry_run);
        self.unmatched = other.unmatched.or(self.unmatched);
        self.chunk_size = other.chunk_size.or(self.chunk_size);
        self.jobs = other.jobs.or(self.jobs);
        self.ignore_patterns.extend(other.ignore_patterns);
        self
    }

    pub fn resolve(self) -> Result<Policy> {
        let keep_side = self.keep_side.ok_or_else(|| {
            Error::Config("keep side not chosen; pass --keep older|newer or set keep_side".into())
        })?;

        let mtime_tolerance = match self.mtime_tolerance_secs {
            Some(secs) => Some(Duration::try_from_secs_f64(secs).map_err(|err| {
                Error::Config(format!(
                    "mtime tolerance must be a non-negative number of seconds, got {}: {}",
                    secs, err
                ))
            })?),
            None => None,
        };

        let policy = Policy {
            keep_side,
            link_zero_byte_files: self.link_zero_byte_files.unwrap_or(false),
            mtime_tolerance,
            dry_run: self.dry_run.unwrap_or(false),
            unmatched: self.unmatched.unwrap_or_default(),
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            jobs: self.jobs.unwrap_or(1),
            ignore_patterns: self.ignore_patterns,
        };
        policy.validate()?;
        Ok(policy)
    }
}

/// Load `Relinkdest.toml` from the working directory (or `path` when given)
/// and overlay `RELINKDEST_*` environment variables.
pub fn load_configuration(path: Option<&Path>) -> std::result::Result<FileConfig, ConfigError> {
    let file_source = match path {
        Some(path) => ConfigFile::from(path).required(true),
        None => ConfigFile::with_name("Relinkdest").required(false),
    };

    let builder = Config::builder()
        .add_source(file_source)
        .add_source(
            Environment::with_prefix("RELINKDEST")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<FileConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_requires_keep_side() {
        let err = FileConfig::default().resolve().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_resolve_defaults() {
        let policy = FileConfig {
            keep_side: Some(KeepSide::Older),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(policy, Policy::new(KeepSide::Older));
        assert!(!policy.link_zero_byte_files);
        assert_eq!(policy.mtime_tolerance, None);
    }

    #[test]
    fn test_overlay_prefers_later_values() {
        let file = FileConfig {
            keep_side: Some(KeepSide::Older),
            dry_run: Some(true),
            ignore_patterns: vec!["*.tmp".into()],
            ..Default::default()
        };
        let flags = FileConfig {
            keep_side: Some(KeepSide::Newer),
            mtime_tolerance_secs: Some(2.0),
            ignore_patterns: vec!["cache/**".into()],
            ..Default::default()
        };
        let policy = file.overlay(flags).resolve().unwrap();
        assert_eq!(policy.keep_side, KeepSide::Newer);
        assert!(policy.dry_run);
        assert_eq!(policy.mtime_tolerance, Some(Duration::from_secs(2)));
        assert_eq!(policy.ignore_patterns, vec!["*.tmp", "cache/**"]);
    }

    #[test]
    fn test_rejects_bad_values() {
        let negative = FileConfig {
            keep_side: Some(KeepSide::Older),
            mtime_tolerance_secs: Some(-1.0),
            ..Default::default()
        };
        assert!(matches!(negative.resolve(), Err(Error::Config(_))));

        let huge = FileConfig {
            keep_side: Some(KeepSide::Older),
            mtime_tolerance_secs: Some(1e30),
            ..Default::default()
        };
        assert!(matches!(huge.resolve(), Err(Error::Config(_))));

        let not_a_number = FileConfig {
            keep_side: Some(KeepSide::Older),
            mtime_tolerance_secs: Some(f64::NAN),
            ..Default::default()
        };
        assert!(matches!(not_a_number.resolve(), Err(Error::Config(_))));

        let zero_chunk = Policy::new(KeepSide::Older).with_chunk_size(0);
        assert!(matches!(zero_chunk.validate(), Err(Error::Config(_))));

        let huge_chunk = Policy::new(KeepSide::Older).with_chunk_size(1 << 40);
        assert!(matches!(huge_chunk.validate(), Err(Error::Config(_))));
        let largest = Policy::new(KeepSide::Older).with_chunk_size(MAX_CHUNK_SIZE);
        assert!(largest.validate().is_ok());

        let bad_glob = Policy::new(KeepSide::Older).with_ignore_patterns(vec!["[".into()]);
        assert!(matches!(bad_glob.validate(), Err(Error::Glob(_))));
    }

    #[test]
    fn test_keep_side_parsing() {
        assert_eq!("older".parse::<KeepSide>().unwrap(), KeepSide::Older);
        assert_eq!("NEW".parse::<KeepSide>().unwrap(), KeepSide::Newer);
        assert!("both".parse::<KeepSide>().is_err());
        assert_eq!(KeepSide::Newer.keep(), Side::Newer);
    }

    #[test]
    fn test_load_configuration_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("relinkdest.toml");
        fs::write(
            &path,
            "keep_side = \"newer\"\nlink_zero_byte_files = true\nunmatched = \"descend\"\nignore_patterns = [\"*.part\"]\n",
        )
        .unwrap();

        let loaded = load_configuration(Some(&path)).unwrap();
        assert_eq!(loaded.keep_side, Some(KeepSide::Newer));
        assert_eq!(loaded.link_zero_byte_files, Some(true));
        assert_eq!(loaded.unmatched, Some(UnmatchedPolicy::Descend));
        assert_eq!(loaded.ignore_patterns, vec!["*.part"]);
    }
}
