use crate::summary::policy_summary;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use relinkdest_core::report::{Report, Resolution};
use relinkdest_core::{Policy, ProgressReporter, SnapshotPair};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const REFRESH_EVERY: u64 = 64;

/// CLI progress reporter: a spinner with running counts and, optionally,
/// a CSV log of every path that was linked, differed or failed.
pub struct CliReporter {
    bar: Option<ProgressBar>,
    csv: Option<Mutex<CsvEvents>>,
    visited: AtomicU64,
    linked: AtomicU64,
}

struct CsvEvents {
    writer: csv::Writer<File>,
    error: Option<csv::Error>,
}

impl CliReporter {
    pub fn new(show_progress: bool, csv_path: Option<&Path>) -> Result<Self> {
        let csv = match csv_path {
            Some(path) => {
                let mut writer = csv::Writer::from_path(path)
                    .with_context(|| format!("cannot create CSV file {}", path.display()))?;
                writer
                    .write_record(["path", "event", "detail", "bytes"])
                    .with_context(|| format!("cannot write to {}", path.display()))?;
                Some(Mutex::new(CsvEvents {
                    writer,
                    error: None,
                }))
            }
            None => None,
        };

        Ok(Self {
            bar: show_progress.then(ProgressBar::new_spinner),
            csv,
            visited: AtomicU64::new(0),
            linked: AtomicU64::new(0),
        })
    }

    /// Flush the CSV log and surface the first write error, if any.
    pub fn finish(self) -> Result<()> {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
        let Some(csv) = self.csv else {
            return Ok(());
        };
        let mut events = csv
            .into_inner()
            .map_err(|_| anyhow::anyhow!("CSV writer poisoned by a panicking worker"))?;
        if let Some(err) = events.error.take() {
            return Err(err).context("writing CSV events");
        }
        events.writer.flush().context("flushing CSV events")?;
        Ok(())
    }

    fn write_event(&self, relative: &Path, resolution: &Resolution) {
        let Some(csv) = &self.csv else {
            return;
        };
        let (event, detail, bytes) = match resolution {
            Resolution::Linked(outcome) => (
                if outcome.dry_run { "would-link" } else { "linked" },
                format!("kept {}", outcome.kept),
                outcome.bytes.to_string(),
            ),
            Resolution::Differs(reason) => ("differs", reason.to_string(), String::new()),
            Resolution::Failed(failure) => ("error", failure.to_string(), String::new()),
            Resolution::AlreadyLinked | Resolution::Skipped(_) => return,
        };

        let Ok(mut events) = csv.lock() else {
            return;
        };
        if events.error.is_some() {
            return;
        }
        let path = relative.to_string_lossy();
        if let Err(err) = events
            .writer
            .write_record([path.as_ref(), event, detail.as_str(), bytes.as_str()])
        {
            events.error = Some(err);
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_run_start(&self, snapshots: &SnapshotPair, policy: &Policy) {
        if let Some(bar) = &self.bar {
            if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
                bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
            }
            bar.set_message(format!(
                "Comparing {} with {} ({})",
                snapshots.older.display(),
                snapshots.newer.display(),
                policy_summary(policy)
            ));
            bar.enable_steady_tick(Duration::from_millis(80));
        }
    }

    fn on_path(&self, relative: &Path, resolution: &Resolution) {
        self.write_event(relative, resolution);

        let linked = if matches!(resolution, Resolution::Linked(_)) {
            self.linked.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.linked.load(Ordering::Relaxed)
        };
        let visited = self.visited.fetch_add(1, Ordering::Relaxed) + 1;
        if visited % REFRESH_EVERY == 0 {
            if let Some(bar) = &self.bar {
                bar.set_message(format!("{} paths checked, {} linked", visited, linked));
            }
        }
    }

    fn on_run_complete(&self, _report: &Report) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
