use std::fs;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::Subscriber;
use tracing_subscriber::EnvFilter;

use crate::errors::{LauncherError, Result};

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

const LOG_FILE_NAME: &str = "adofai-tools.log";
const FILTER_ENV_VAR: &str = "ADOFAI_TOOLS_LOG";
// Transfer progress produces a lot of traffic at debug level; keep the
// HTTP stack quiet unless asked for explicitly.
const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

fn resolve_filter(explicit: Option<String>) -> EnvFilter {
    explicit
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Sets up a daily-rolling log file under `log_dir`. `ADOFAI_TOOLS_LOG`
/// takes precedence over `RUST_LOG` for the filter.
pub fn init(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let filter = resolve_filter(std::env::var(FILTER_ENV_VAR).ok());

    let subscriber = Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| LauncherError::Config(err.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_filter_wins_over_the_default() {
        let filter = resolve_filter(Some("debug".to_string()));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn default_filter_damps_the_http_stack() {
        let rendered = EnvFilter::new(DEFAULT_FILTER).to_string();
        assert!(rendered.contains("hyper=warn"));
        assert!(rendered.contains("reqwest=warn"));
    }
}
