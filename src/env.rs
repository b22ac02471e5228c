pub use std::env::*;
use std::{path::PathBuf, sync::LazyLock};

use indexmap::IndexSet;

pub static CIRUN_FILE: LazyLock<Option<PathBuf>> = LazyLock::new(|| var_path("CIRUN_FILE"));
pub static CIRUN_LOG: LazyLock<log::LevelFilter> = LazyLock::new(|| {
    var_log_level("CIRUN_LOG")
        .or(var_log_level("CIRUN_LOG_LEVEL"))
        .unwrap_or(log::LevelFilter::Info)
});

// When set, write a JSON timing report to this path after the run finishes
pub static CIRUN_TIMING_JSON: LazyLock<Option<PathBuf>> =
    LazyLock::new(|| var_path("CIRUN_TIMING_JSON"));

pub static CIRUN_SKIP_STEPS: LazyLock<IndexSet<String>> = LazyLock::new(|| {
    var_csv("CIRUN_SKIP_STEPS")
        .or(var_csv("CIRUN_SKIP_STEP"))
        .unwrap_or_default()
});

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TraceMode {
    Off,
    Text,
    Json,
}

pub static CIRUN_TRACE: LazyLock<TraceMode> = LazyLock::new(|| trace_mode(var("CIRUN_TRACE").ok()));

fn trace_mode(value: Option<String>) -> TraceMode {
    match value.map(|v| v.to_lowercase()) {
        Some(v) if v == "json" => TraceMode::Json,
        Some(v) if v == "1" || v == "true" => TraceMode::Text,
        _ => TraceMode::Off,
    }
}

fn var_path(name: &str) -> Option<PathBuf> {
    var(name).map(PathBuf::from).ok()
}

fn var_csv(name: &str) -> Option<IndexSet<String>> {
    var(name).ok().map(|val| parse_csv(&val))
}

fn parse_csv(val: &str) -> IndexSet<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn var_log_level(name: &str) -> Option<log::LevelFilter> {
    var(name).ok().and_then(|level| level.parse().ok())
}
