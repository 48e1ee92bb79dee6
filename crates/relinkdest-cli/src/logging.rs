use std::env;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Default level for a given `-v` count; `-q` wins over everything.
fn default_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RELINKDEST_LOG` overrides the level
/// derived from the flags. A file layer is added when `log_file` or
/// `LOG_FILE_PATH` names a file; the returned guard flushes it on drop.
pub fn init_logger(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = env::var("RELINKDEST_LOG")
        .unwrap_or_else(|_| default_level(verbose, quiet).to_string());
    let filter_layer = EnvFilter::new(filter);

    let log_file = log_file
        .map(Path::to_path_buf)
        .or_else(|| env::var_os("LOG_FILE_PATH").map(PathBuf::from));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf();
            let name = path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("relinkdest.log"));
            let file_appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true),
        )
        .with(file_layer)
        .with(filter_layer)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        assert_eq!(default_level(0, false), "warn");
        assert_eq!(default_level(1, false), "info");
        assert_eq!(default_level(2, false), "debug");
        assert_eq!(default_level(7, false), "trace");
        assert_eq!(default_level(3, true), "error");
    }
}
