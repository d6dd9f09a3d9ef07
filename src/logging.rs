use crate::error::P1Error;
use log::{error, info, log_enabled, Level};
use std::fs::OpenOptions;
use std::path::Path;

/// Name of the log file written when a log directory is configured.
pub const LOG_FILE_NAME: &str = "p1-collector.log";

/// Initializes `env_logger` with `level` as the default filter.
///
/// `RUST_LOG` still takes precedence. When `log_dir` is given, records are
/// appended to [`LOG_FILE_NAME`] in that directory instead of stderr.
pub fn init_logger_with_level(level: &str, log_dir: Option<&Path>) -> Result<(), P1Error> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE_NAME))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder
        .try_init()
        .map_err(|e| P1Error::Config(format!("logger already initialized: {e}")))
}

/// Logs an error message.
pub fn log_error(message: &str) {
    if log_enabled!(Level::Error) {
        error!("{message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}
