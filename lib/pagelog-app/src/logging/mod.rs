//! Logging.

use std::path::Path;

use pagelog_error::{generic_error, GenericError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, Layer as _};

mod config;
pub use self::config::{LogLevel, LoggingConfiguration};

mod layer;
use self::layer::build_formatting_layer;

/// Keeps background log writers alive.
///
/// Must be held until the process is about to exit. Dropping it flushes any buffered log lines.
#[derive(Default)]
pub struct LoggingGuard {
    worker_guards: Vec<WorkerGuard>,
}

impl LoggingGuard {
    fn add_worker_guard(&mut self, guard: WorkerGuard) {
        self.worker_guards.push(guard);
    }
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the global `tracing` subscriber.
///
/// Console output goes to standard error, leaving standard output free for command output. When `log_file` is set,
/// the same events are also appended to that file. Both outputs share one filter built from `log_level`.
///
/// # Errors
///
/// If the log file path is unusable, or a global subscriber was already installed, an error is returned.
pub fn initialize_logging(config: &LoggingConfiguration, app_name: &str) -> Result<LoggingGuard, GenericError> {
    let mut configured_layers = Vec::new();
    let mut logging_guard = LoggingGuard::default();

    if config.log_to_console {
        let (nb_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
        logging_guard.add_worker_guard(guard);

        configured_layers.push(build_formatting_layer(config, app_name, nb_stderr));
    }

    if !config.log_file.is_empty() {
        let path = Path::new(&config.log_file);
        let file_name = path
            .file_name()
            .ok_or_else(|| generic_error!("Log file path '{}' does not name a file.", config.log_file))?;
        let directory = path.parent().unwrap_or_else(|| Path::new("."));

        let appender = tracing_appender::rolling::never(directory, file_name);
        let (nb_appender, guard) = tracing_appender::non_blocking(appender);
        logging_guard.add_worker_guard(guard);

        configured_layers.push(build_formatting_layer(config, app_name, nb_appender));
    }

    tracing_subscriber::registry()
        .with(configured_layers.with_filter(config.log_level.as_env_filter()))
        .try_init()?;

    Ok(logging_guard)
}
