use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::SystemTime;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_RETENTION_DAYS: u64 = 7;
const LOG_FILE_PREFIX: &str = "ridgeline-agent";

pub struct LoggingSettings<'a> {
    pub level: Option<&'a str>,
    pub directory: Option<&'a str>,
    pub retention_days: Option<u64>,
    /// Suppress stdout/stderr logging; set when a consumer owns the terminal.
    pub suppress_stdout: bool,
}

/// Initializes the global tracing subscriber: a daily-rolling file appender plus an
/// optional stdout layer, filtered with `EnvFilter`. Returns the resolved log
/// directory. Safe to call at most once per process — subsequent calls return an
/// error rather than panicking, since tests may construct multiple `Config`s.
pub fn setup_tracing_with_settings(settings: LoggingSettings<'_>) -> Result<PathBuf> {
    let log_dir = resolve_log_dir(settings.directory)?;
    let retention_days = settings.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS).max(1);
    if let Err(e) = cleanup_old_logs(&log_dir, retention_days) {
        eprintln!("Failed to clean up old logs: {e}");
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD
        .set(guard)
        .map_err(|_| anyhow!("logging already initialized"))?;

    let time_format = ChronoUtc::new("%Y-%m-%dT%H:%M:%S".to_string());

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .with_timer(time_format.clone());

    let filter = build_filter(settings.level);

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    if settings.suppress_stdout {
        registry.init();
    } else {
        let stdout_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_timer(time_format);
        registry.with(stdout_layer).init();
    }

    Ok(log_dir)
}

fn build_filter(level: Option<&str>) -> EnvFilter {
    let default_for = |level: &str| {
        EnvFilter::new(format!(
            "ridgeline_agent={level},axum=warn,tower_http=warn,hyper=warn,reqwest=warn"
        ))
    };
    if let Some(level) = level {
        EnvFilter::try_new(format!(
            "ridgeline_agent={level},axum=warn,tower_http=warn,hyper=warn,reqwest=warn"
        ))
        .unwrap_or_else(|_| default_for(level))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_for("info"))
    }
}

fn resolve_log_dir(directory: Option<&str>) -> Result<PathBuf> {
    let dir = match directory {
        Some(d) => PathBuf::from(d),
        None => crate::paths::logs_dir(),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn cleanup_old_logs(dir: &PathBuf, retention_days: u64) -> Result<()> {
    let cutoff = SystemTime::now()
        .checked_sub(std::time::Duration::from_secs(retention_days * 86_400))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            if let Ok(modified) = meta.modified() {
                if modified < cutoff {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
    }
    Ok(())
}
