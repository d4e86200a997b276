use chrono::Local;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Directory holding log files, under the platform data directory.
pub fn log_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("arbor").join("logs"))
}

/// Initialize the tracing system with a file logger that appends to a timestamp-named file.
/// Falls back to stdout when no data directory exists. Filtering comes from RUST_LOG.
pub fn init_tracing() -> io::Result<PathBuf> {
    match log_dir() {
        Some(dir) => init_tracing_in(&dir),
        None => {
            let subscriber = tracing_subscriber::registry()
                .with(fmt::Layer::default().with_ansi(true).with_target(true))
                .with(EnvFilter::from_default_env());

            tracing::subscriber::set_global_default(subscriber).map_err(already_set)?;

            tracing::debug!(
                target: "utils::tracing",
                "Tracing initialized with stdout output. Filter configured via RUST_LOG env var."
            );
            Ok(PathBuf::new())
        }
    }
}

/// File logging into `log_dir`. Returns the log file path.
pub fn init_tracing_in(log_dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;

    let file_name = format!("{}.log", Local::now().format("%Y%m%d_%H%M%S"));
    let path = log_dir.join(&file_name);
    let file_appender = rolling::never(log_dir, &file_name);

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::Layer::new()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true),
        )
        .with(EnvFilter::from_default_env());

    tracing::subscriber::set_global_default(subscriber).map_err(already_set)?;

    tracing::debug!(
        target: "utils::tracing",
        path = %path.display(),
        "Tracing initialized with file output. Filter configured via RUST_LOG env var."
    );
    Ok(path)
}

fn already_set(err: tracing::subscriber::SetGlobalDefaultError) -> io::Error {
    io::Error::new(io::ErrorKind::AlreadyExists, err.to_string())
}
