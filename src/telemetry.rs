//! JSON trace log of connection and turn lifecycle events.
//!
//! Info-level events carry only kinds, counts, and timings. Debug-level events
//! may describe user content and are recorded only with `--log-content`.

use crate::config::AppConfig;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;

const TRACE_LOG_ENV: &str = "ESSENCE_TRACE_LOG";
static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub(crate) fn tracing_log_path() -> PathBuf {
    env::var(TRACE_LOG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("essence_trace.jsonl"))
}

/// `None` when tracing is off for this launch.
fn trace_level(config: &AppConfig) -> Option<LevelFilter> {
    if config.no_logs || !config.logs {
        return None;
    }
    Some(if config.log_content {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    })
}

fn init_tracing_once(config: &AppConfig, once: &OnceLock<()>) -> bool {
    let Some(level) = trace_level(config) else {
        return false;
    };
    let mut installed = false;
    once.get_or_init(|| {
        let path = tracing_log_path();
        let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
            return;
        };
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(level)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        installed = tracing::subscriber::set_global_default(subscriber).is_ok();
    });
    installed
}

/// Install the trace subscriber once per process when logging is enabled.
pub fn init_tracing(config: &AppConfig) {
    init_tracing_once(config, &TRACING_INIT);
}
