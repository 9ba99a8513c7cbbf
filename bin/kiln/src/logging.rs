//! Tracing initialisation.
//!
//! Records go to a rolling file under `<root>/logs/`; `--verbose`
//! duplicates them to stderr. The daemon and the CLI write separate base
//! names so an interactive command never interleaves with server logs.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Daemon log base name.
pub const SERVER_LOG_BASE: &str = "kiln";
/// CLI log base name.
pub const CLI_LOG_BASE: &str = "kiln-cli";

/// Initialise the global subscriber. The returned guard must stay alive for
/// the process lifetime or buffered records are lost.
pub fn init(logs_dir: &Path, base: &str, verbose: bool) -> WorkerGuard {
    let appender = tracing_appender::rolling::daily(logs_dir, format!("{base}.log"));
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if verbose {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        registry.init();
    }

    guard
}
