//! Logging module
//!
//! Initializes env_logger to emit one-line JSON logs. Defaults to stdout;
//! `--log-file` redirects to an append-mode file instead. There is no
//! daemon-mode file/console split here - the core always runs in the
//! foreground, per the spec's CLI surface.

use anyhow::Result;
use log::LevelFilter;
use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

fn parse_log_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Initialize logging. `log_file` redirects output to that path (created if
/// missing, appended to otherwise); `None` logs to stdout.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let log_level = parse_log_level(verbose);

    match log_file {
        Some(path) => init_file_logging(log_level, path),
        None => init_console_logging(log_level),
    }
}

fn init_console_logging(log_level: LevelFilter) -> Result<()> {
    env_logger::Builder::new()
        .format(move |buf, record| {
            let payload = build_json_payload(
                &chrono::Utc::now().to_rfc3339(),
                &record.level().to_string(),
                &record.args().to_string(),
                record.module_path().unwrap_or(record.target()),
                "log",
                json!({}),
            );
            writeln!(buf, "{}", payload)
        })
        .filter_level(log_level)
        .init();

    Ok(())
}

fn init_file_logging(log_level: LevelFilter, log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let target = Box::new(
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?,
    );

    env_logger::Builder::new()
        .target(env_logger::Target::Pipe(target))
        .format(move |buf, record| {
            let payload = build_json_payload(
                &chrono::Utc::now().to_rfc3339(),
                &record.level().to_string(),
                &record.args().to_string(),
                record.module_path().unwrap_or(record.target()),
                "log",
                json!({}),
            );
            writeln!(buf, "{}", payload)
        })
        .filter_level(log_level)
        .init();

    Ok(())
}

fn build_json_payload(
    timestamp: &str,
    level: &str,
    message: &str,
    module: &str,
    event: &str,
    fields: Value,
) -> Value {
    json!({
        "timestamp": timestamp,
        "level": level,
        "message": message,
        "module": module,
        "event": event,
        "fields": fields
    })
}
