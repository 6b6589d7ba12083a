//! Process-level logging setup shared by `main`. Request-scoped middleware
//! (CORS, HTTP tracing) is wired directly onto the `Router` in
//! `api::build_router` since axum ties layers to the router they guard;
//! this module owns everything that exists before the first request.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber. When `log_path` is set, logs
/// are written to a daily-rolling file via a non-blocking writer in
/// addition to stdout; the returned guard must be held for the process
/// lifetime or buffered lines are dropped on exit.
pub fn init_tracing(log_level: &str, log_path: Option<&str>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_path {
        Some(path) => {
            let directory = std::path::Path::new(path).parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = std::path::Path::new(path)
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "surge-backend.log".to_string());
            let file_appender = tracing_appender::rolling::daily(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            fmt().with_env_filter(filter).init();
            None
        }
    }
}
