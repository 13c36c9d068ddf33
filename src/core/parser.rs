//! CR-008: YAML parsing and validation of `crbl.yaml`.
//!
//! Parses the pipeline config and validates structural constraints:
//! - Version must be "1.0"
//! - Name and every input path must be non-empty
//! - nu must lie in (0, 1); chunk_size and threads must be positive
//! - The files table must be a flat name → path mapping

use super::registry::FileTable;
use super::types::*;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a crbl.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<PipelineConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a crbl.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<PipelineConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &PipelineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", config.version));
    }

    if config.name.trim().is_empty() {
        push("name must not be empty".to_string());
    }

    for (key, value) in [
        ("training", &config.inputs.training),
        ("transcriptome", &config.inputs.transcriptome),
        ("database", &config.inputs.database),
    ] {
        if value.trim().is_empty() {
            push(format!("inputs.{} must not be empty", key));
        }
    }

    if config.model.trim().is_empty() {
        push("model must not be empty".to_string());
    }

    if config.chunk_size == 0 {
        push("chunk_size must be greater than 0".to_string());
    }

    if config.last.threads == 0 {
        push("last.threads must be greater than 0".to_string());
    }

    if config.last.top_hits == Some(0) {
        push("last.top_hits must be greater than 0 when set".to_string());
    }

    let nu = config.classifier.nu;
    if !(nu > 0.0 && nu < 1.0) {
        push(format!("classifier.nu must be in (0, 1), got {}", nu));
    }

    if config.execution.directory.trim().is_empty() {
        push("execution.directory must not be empty".to_string());
    }

    if let Some(ns) = &config.execution.namespace {
        if ns.is_empty() || ns.contains(['/', '\\']) {
            push(format!("execution.namespace '{}' is not a plain name", ns));
        }
    }

    if let Err(e) = FileTable::from_yaml(&config.files) {
        push(e.to_string());
    }

    errors
}
