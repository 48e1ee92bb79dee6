use colored::*;
use relinkdest_core::report::Report;
use relinkdest_core::Policy;
use std::fmt::Write;

const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

pub fn human_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// One-line description of the policy knobs that change behaviour.
pub fn policy_summary(policy: &Policy) -> String {
    let mut parts = vec![format!("keep {}", policy.keep_side)];
    if policy.dry_run {
        parts.push("dry run".to_string());
    }
    if policy.link_zero_byte_files {
        parts.push("linking empty files".to_string());
    }
    if let Some(tolerance) = policy.mtime_tolerance {
        parts.push(format!("mtime tolerance {:.1}s", tolerance.as_secs_f64()));
    }
    if policy.jobs > 1 {
        parts.push(format!("{} jobs", policy.jobs));
    }
    parts.join(", ")
}

pub fn render_policy(policy: &Policy) -> String {
    let tolerance = match policy.mtime_tolerance {
        Some(tolerance) => format!("{}s", tolerance.as_secs_f64()),
        None => "off (always compare content)".to_string(),
    };
    let ignores = if policy.ignore_patterns.is_empty() {
        "none".to_string()
    } else {
        policy.ignore_patterns.join(", ")
    };

    let mut out = String::new();
    let _ = writeln!(out, "keep_side            = {}", policy.keep_side);
    let _ = writeln!(out, "link_zero_byte_files = {}", policy.link_zero_byte_files);
    let _ = writeln!(out, "mtime_tolerance      = {}", tolerance);
    let _ = writeln!(out, "dry_run              = {}", policy.dry_run);
    let _ = writeln!(out, "unmatched            = {}", policy.unmatched);
    let _ = writeln!(out, "chunk_size           = {}", human_bytes(policy.chunk_size as u64));
    let _ = writeln!(out, "jobs                 = {}", policy.jobs.max(1));
    let _ = writeln!(out, "ignore_patterns      = {}", ignores);
    out
}

pub fn render_report(report: &Report) -> String {
    let mut out = String::new();
    let header = if report.dry_run {
        "Dry run summary".bold()
    } else {
        "Summary".bold()
    };
    let _ = writeln!(
        out,
        "{} (started {}, took {:.2}s)",
        header,
        report.started_at.format("%Y-%m-%d %H:%M:%S"),
        report.duration.as_secs_f64()
    );
    if report.cancelled {
        let _ = writeln!(out, "  {}", "Cancelled before traversal finished".yellow());
    }

    let linked_label = if report.dry_run { "would link" } else { "newly linked" };
    let reclaim_label = if report.dry_run {
        "would reclaim"
    } else {
        "reclaimed"
    };
    let _ = writeln!(out, "  {:<16}{}", "paths scanned", report.paths_scanned);
    let _ = writeln!(out, "  {:<16}{}", "directories", report.directories);
    let _ = writeln!(out, "  {:<16}{}", "already linked", report.already_linked);
    let _ = writeln!(
        out,
        "  {:<16}{}",
        linked_label,
        report.linked.to_string().green()
    );
    let _ = writeln!(
        out,
        "  {:<16}{}",
        reclaim_label,
        human_bytes(report.bytes_reclaimed).green()
    );
    if report.linked_with_external_links > 0 {
        let _ = writeln!(
            out,
            "  {:<16}{} (replaced copies still linked elsewhere; space not freed)",
            "",
            report.linked_with_external_links.to_string().yellow()
        );
    }
    let _ = writeln!(out, "  {:<16}{}", "differing", report.differing);

    let skipped = &report.skipped;
    let _ = writeln!(out, "  {:<16}{}", "skipped", skipped.total());
    for (label, count) in [
        ("one side only", skipped.only_on_one_side),
        ("kind mismatch", skipped.kind_mismatch),
        ("symlink", skipped.symlink),
        ("special file", skipped.special),
        ("zero bytes", skipped.zero_byte),
        ("cross device", skipped.cross_device),
        ("excluded", skipped.excluded),
    ] {
        if count > 0 {
            let _ = writeln!(out, "    {:<14}{}", label, count);
        }
    }

    let errors = report.errors.len().to_string();
    let errors = if report.errors.is_empty() {
        errors.normal()
    } else {
        errors.red()
    };
    let _ = writeln!(out, "  {:<16}{}", "errors", errors);
    for error in &report.errors {
        let path = if error.relative.as_os_str().is_empty() {
            ".".into()
        } else {
            error.relative.to_string_lossy()
        };
        let _ = writeln!(out, "    {}: {}", path.red(), error.failure);
    }
    out
}
