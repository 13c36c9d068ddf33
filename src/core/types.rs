//! CR-008: Configuration, run-report, and event types.
//!
//! `crbl.yaml` maps onto `PipelineConfig`. Everything except `version`,
//! `name`, and `inputs` has a default, so a minimal config is three keys.

use super::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Top-level crbl.yaml
// ============================================================================

/// Root configuration for one pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable pipeline name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Sequence inputs
    pub inputs: Inputs,

    /// Model artifact path; the scaler lives at `<model>.scaler`
    #[serde(default = "default_model")]
    pub model: String,

    /// Alignment records per streamed chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub last: LastSettings,

    #[serde(default)]
    pub classifier: ClassifierSettings,

    #[serde(default)]
    pub execution: ExecutionSettings,

    /// Extra named paths merged into the engine's file table
    #[serde(default)]
    pub files: serde_yaml_ng::Value,
}

fn default_model() -> String {
    "crbl.model.json".to_string()
}

fn default_chunk_size() -> usize {
    10_000
}

/// Input sequence files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inputs {
    /// Training proteins (the reference proteome)
    pub training: String,

    /// Transcriptome to annotate (nucleotide)
    pub transcriptome: String,

    /// Protein database searched against
    pub database: String,
}

/// LAST aligner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastSettings {
    #[serde(default = "default_lastdb")]
    pub lastdb: String,

    #[serde(default = "default_lastal")]
    pub lastal: String,

    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Restrict each query to its best N hits (`lastal -N`)
    #[serde(default)]
    pub top_hits: Option<u32>,
}

impl Default for LastSettings {
    fn default() -> Self {
        Self {
            lastdb: default_lastdb(),
            lastal: default_lastal(),
            threads: default_threads(),
            top_hits: None,
        }
    }
}

fn default_lastdb() -> String {
    "lastdb".to_string()
}

fn default_lastal() -> String {
    "lastal".to_string()
}

fn default_threads() -> u32 {
    1
}

/// One-class classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// Expected outlier fraction of the training data, in (0, 1)
    #[serde(default = "default_nu")]
    pub nu: f64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self { nu: default_nu() }
    }
}

fn default_nu() -> f64 {
    0.1
}

/// Where and how the task engine runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Execution root; relative paths resolve against the config file
    #[serde(default = "default_directory")]
    pub directory: String,

    /// Store namespace: `<namespace>.doit.db`
    #[serde(default)]
    pub namespace: Option<String>,

    /// Write `profile.csv` for every run
    #[serde(default)]
    pub profile: bool,

    #[serde(default)]
    pub failure: FailurePolicy,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            namespace: None,
            profile: false,
            failure: FailurePolicy::default(),
        }
    }
}

fn default_directory() -> String {
    "crbl-work".to_string()
}

/// Failure handling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the run at the first failing task
    #[default]
    StopOnFirst,
    /// Skip tasks downstream of a failure, keep running the rest
    ContinueIndependent,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopOnFirst => write!(f, "stop_on_first"),
            Self::ContinueIndependent => write!(f, "continue_independent"),
        }
    }
}

// ============================================================================
// Run events
// ============================================================================

/// Event appended to the JSONL run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        tasks: Vec<String>,
        crbl_version: String,
    },
    TaskStarted {
        run_id: String,
        task: String,
        reasons: Vec<String>,
    },
    TaskCompleted {
        run_id: String,
        task: String,
        duration_seconds: f64,
        records: usize,
    },
    TaskSkipped {
        run_id: String,
        task: String,
        reason: String,
    },
    TaskFailed {
        run_id: String,
        task: String,
        error: String,
    },
    RunCompleted {
        run_id: String,
        executed: u32,
        skipped: u32,
        blocked: u32,
        failed: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

// ============================================================================
// Run report
// ============================================================================

/// A task that failed during a run.
#[derive(Debug)]
pub struct TaskFailure {
    pub task: String,
    pub error: EngineError,
}

/// Outcome of one `Engine::run`.
#[derive(Debug, Default)]
pub struct RunReport {
    pub run_id: String,
    /// Tasks whose actions ran to completion
    pub executed: Vec<String>,
    /// Up-to-date tasks
    pub skipped: Vec<String>,
    /// Tasks not attempted because an upstream task failed
    pub blocked: Vec<String>,
    pub failures: Vec<TaskFailure>,
    pub duration: Duration,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} executed, {} up-to-date, {} blocked, {} failed ({:.1}s)",
            self.executed.len(),
            self.skipped.len(),
            self.blocked.len(),
            self.failures.len(),
            self.duration.as_secs_f64()
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
