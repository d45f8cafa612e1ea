use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use std::fs::OpenOptions;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
fn default_directive(verbosity: u8) -> &'static str {
  match verbosity {
    0 => "warn",
    1 => "info",
    _ => "debug",
  }
}

/// Install the global subscriber.
///
/// Logs go to stderr unless `log_file` is set. The returned guard flushes the
/// file writer and must be kept alive until the process exits.
pub fn init(verbosity: u8, json: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

  let (writer, guard) = match log_file {
    Some(path) => {
      let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("Failed to open log file {}", path.display()))?;
      let (writer, guard) = tracing_appender::non_blocking(file);
      (BoxMakeWriter::new(writer), Some(guard))
    }
    None => (BoxMakeWriter::new(std::io::stderr), None),
  };

  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(log_file.is_none());

  let installed = if json {
    builder.json().try_init()
  } else {
    builder.try_init()
  };
  installed.map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
