//! CR-006: Profiling session — per-task and per-action timing samples.
//!
//! The report is written when the profiler is dropped, so it lands on every
//! exit path of a run, including failures.

use super::table::csv_field;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Report file name inside the execution root.
pub const PROFILE_FILE: &str = "profile.csv";

const HEADER: &str = "task,phase,start_secs,duration_secs";

#[derive(Debug, Clone)]
struct Sample {
    task: String,
    phase: String,
    start: Duration,
    duration: Duration,
}

/// Collects timing samples and writes them as CSV on drop.
#[derive(Debug)]
pub struct Profiler {
    path: PathBuf,
    origin: Instant,
    samples: Vec<Sample>,
}

impl Profiler {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(PROFILE_FILE),
            origin: Instant::now(),
            samples: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a phase of `task` that began at `started` and ends now.
    pub fn record(&mut self, task: &str, phase: &str, started: Instant) {
        self.samples.push(Sample {
            task: task.to_string(),
            phase: phase.to_string(),
            start: started.saturating_duration_since(self.origin),
            duration: started.elapsed(),
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn render(&self) -> String {
        let mut out = String::with_capacity(64 * (self.samples.len() + 1));
        out.push_str(HEADER);
        out.push('\n');
        for s in &self.samples {
            let _ = writeln!(
                out,
                "{},{},{:.6},{:.6}",
                csv_field(&s.task),
                csv_field(&s.phase),
                s.start.as_secs_f64(),
                s.duration.as_secs_f64()
            );
        }
        out
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        match std::fs::write(&self.path, self.render()) {
            Ok(()) => info!(
                "wrote {} profile sample(s) to {}",
                self.samples.len(),
                self.path.display()
            ),
            Err(e) => warn!("cannot write profile {}: {}", self.path.display(), e),
        }
    }
}
