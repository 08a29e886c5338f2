//! Static configuration check module (spec §4.1, operator-facing)
//!
//! Validates the YAML configuration without spawning anything: port-range
//! arithmetic, worker binary executability, and whatever `Config::validate`
//! already enforces. Kept separate from `Config::load` so `rotor check` can
//! report all errors/warnings at once instead of bailing on the first.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::Config;
use crate::operator_message::render_operator_message;

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub config_path: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub worker_count: usize,
}

impl CheckReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn to_plain_text(&self, verbose: bool) -> String {
        let mut lines = vec![
            "rotor check".to_string(),
            format!(
                "  result: {}",
                if self.has_errors() { "FAILED" } else { "OK" }
            ),
            format!("  workers: {}", self.worker_count),
            format!("  warnings: {}", self.warnings.len()),
        ];

        if !verbose {
            if !self.errors.is_empty() {
                lines.extend(render_operator_message(
                    "configuration validation failed",
                    "required fields are missing or invalid values were provided",
                    "run 'rotor check --json' and fix listed errors",
                ));
            } else if self.has_warnings() {
                lines.extend(render_operator_message(
                    "configuration is usable but has warnings",
                    "the worker binary or exit-node settings may need review",
                    "inspect warnings, then run 'rotor start'",
                ));
            } else {
                lines.push("  next: run 'rotor start'".to_string());
            }

            return lines.join("\n");
        }

        lines.push(format!("  config: {}", self.config_path));

        if self.errors.is_empty() {
            lines.push("  errors: none".to_string());
        } else {
            lines.push(format!("  errors: {}", self.errors.len()));
            for error in &self.errors {
                lines.push(format!("    - {}", error));
            }
        }

        if self.warnings.is_empty() {
            lines.push("  warning_details: none".to_string());
        } else {
            lines.push("  warning_details:".to_string());
            for warning in &self.warnings {
                lines.push(format!("    - {}", warning));
            }
        }

        lines.join("\n")
    }
}

pub async fn run_check(config_path: Option<PathBuf>) -> Result<CheckReport> {
    let path = Config::resolve_config_path(config_path.as_deref())?;

    if !path.exists() {
        bail!("Configuration file not found: {}", path.display());
    }

    let config = match Config::load(&path).await {
        Ok(config) => config,
        Err(e) => {
            return Ok(CheckReport {
                config_path: path.display().to_string(),
                errors: vec![e.to_string()],
                warnings: Vec::new(),
                worker_count: 0,
            });
        }
    };

    let mut warnings = Vec::new();

    if !config.worker_binary_is_executable() {
        warnings.push(format!(
            "worker_binary_path {} does not exist or is not executable",
            config.worker_binary_path.display()
        ));
    }

    if config.directory_url.is_none() && config.exit_nodes_per_worker > 0 {
        warnings.push(
            "exit_nodes_per_worker is set but directory_url is empty; exit-node pinning will be skipped".to_string(),
        );
    }

    if config.frontend_listen.starts_with("0.0.0.0") {
        warnings.push("frontend_listen binds all interfaces (0.0.0.0)".to_string());
    }

    Ok(CheckReport {
        config_path: path.display().to_string(),
        errors: Vec::new(),
        warnings,
        worker_count: config.worker_count,
    })
}

pub async fn run_and_print(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let report = run_check(config_path).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.to_plain_text(false));
    }

    if report.has_errors() {
        bail!("static check failed")
    }

    Ok(())
}
