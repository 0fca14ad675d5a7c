use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "alongside=info";

/// Log to `<dir>/alongside.log` through a non-blocking writer.
///
/// Standard output is left to command results. The returned guard flushes
/// pending lines when dropped, so keep it alive for the life of the process.
pub fn init(dir: &Path) -> WorkerGuard {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  let file_appender = tracing_appender::rolling::never(dir, "alongside.log");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
    .with(filter)
    .init();

  guard
}
