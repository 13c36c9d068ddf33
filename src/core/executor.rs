//! CR-006: Executor — the task engine's run, status, and clean loops.
//!
//! One `Engine` owns its registry and its dependency store handle. A run:
//! resolve order → ensure root → enter workdir → (profile) → for each task:
//! evaluate → skip or execute actions → fingerprint deps → commit → events

use super::error::EngineError;
use super::eventlog;
use super::fingerprint::fingerprint;
use super::profile::Profiler;
use super::registry::{FileTable, TaskRegistry};
use super::resolver;
use super::status::{StatusEvaluator, StatusKind, TaskStatus};
use super::store::{store_file_path, DependencyStore, RUN_ONCE_KEY};
use super::task::{Cleanup, Task, TaskContext};
use super::types::*;
use super::workdir::{self, WorkdirGuard};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Execution root; relative task paths resolve against it
    pub root: PathBuf,
    /// Store namespace: `<root>/<namespace>.doit.db`
    pub namespace: Option<String>,
    /// Write `<root>/profile.csv` for each run
    pub profile: bool,
    pub failure: FailurePolicy,
    /// Append run events to `<root>/events.jsonl`
    pub event_log: bool,
}

impl EngineConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            namespace: None,
            profile: false,
            failure: FailurePolicy::default(),
            event_log: true,
        }
    }
}

/// Outcome of a single task within a run.
enum TaskOutcome {
    Executed,
    UpToDate,
}

/// Incremental task engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    registry: TaskRegistry,
    store: DependencyStore,
}

impl Engine {
    /// Create the execution root if needed and open its dependency store.
    /// An unreadable store is moved aside and replaced by an empty one.
    pub fn open(mut config: EngineConfig) -> Result<Self, EngineError> {
        workdir::ensure_dir(&config.root)?;
        // Task paths are resolved against the root while the working
        // directory is the root, so it must not stay relative.
        config.root = std::fs::canonicalize(&config.root).map_err(|source| EngineError::Io {
            path: config.root.clone(),
            source,
        })?;
        let db = store_file_path(&config.root, config.namespace.as_deref());
        debug!("dependency store file: {}", db.display());
        let store = DependencyStore::open_or_reset(&db)?;
        Ok(Self {
            config,
            registry: TaskRegistry::new(),
            store,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn store(&self) -> &DependencyStore {
        &self.store
    }

    /// Register (or overwrite) a task and merge its extra files.
    pub fn register_task(
        &mut self,
        name: &str,
        task: Task,
        files: FileTable,
    ) -> Result<Option<Task>, EngineError> {
        self.registry.register(name, task, files)
    }

    /// Remove every registered task. Dependency records are kept.
    pub fn clear_tasks(&mut self) -> usize {
        self.registry.clear()
    }

    /// Status of one registered task.
    pub fn status(&self, name: &str) -> Result<TaskStatus, EngineError> {
        let task = self.registry.get(name).map_err(|e| {
            error!("task not found: {}", name);
            e
        })?;
        debug!("getting status for task {}", name);
        Ok(self.evaluator().evaluate(task))
    }

    /// Status of every task, in registration order.
    pub fn statuses(&self) -> Result<Vec<(String, TaskStatus)>, EngineError> {
        let _cwd = WorkdirGuard::enter(&self.config.root)?;
        let eval = self.evaluator();
        Ok(self
            .registry
            .list()
            .into_iter()
            .map(|t| (t.name().to_string(), eval.evaluate(t)))
            .collect())
    }

    /// Whether every task is up-to-date, plus the per-task table.
    pub fn check_uptodate(&self) -> Result<(bool, IndexMap<String, bool>), EngineError> {
        let _cwd = WorkdirGuard::enter(&self.config.root)?;
        Ok(self.evaluator().evaluate_all(self.registry.list()))
    }

    /// Print `uptodate_msg` when everything is current, otherwise the
    /// up-to-date and out-of-date task lists.
    pub fn print_statuses(
        &self,
        uptodate_msg: &str,
    ) -> Result<(bool, IndexMap<String, bool>), EngineError> {
        let (uptodate, statuses) = self.check_uptodate()?;
        if uptodate {
            println!("{}", uptodate_msg);
        } else {
            let current: Vec<&str> = statuses
                .iter()
                .filter(|(_, ok)| **ok)
                .map(|(n, _)| n.as_str())
                .collect();
            let outdated: Vec<&str> = statuses
                .iter()
                .filter(|(_, ok)| !**ok)
                .map(|(n, _)| n.as_str())
                .collect();
            if !current.is_empty() {
                println!("\nUp-to-date tasks:");
                for name in &current {
                    println!("  - {}", name);
                }
            }
            if !outdated.is_empty() {
                println!("\nOut-of-date tasks:");
                for name in &outdated {
                    println!("  - {}", name);
                }
            }
        }
        Ok((uptodate, statuses))
    }

    fn evaluator(&self) -> StatusEvaluator<'_> {
        StatusEvaluator::new(&self.store, &self.registry, &self.config.root)
    }

    fn log_event(&self, event: RunEvent) {
        if self.config.event_log {
            if let Err(e) = eventlog::append_event(&self.config.root, event) {
                warn!("event log: {}", e);
            }
        }
    }

    /// Run the named tasks (all when empty) plus their upstream producers.
    ///
    /// Under `StopOnFirst` the first failure aborts the run and is returned
    /// as the error. Under `ContinueIndependent` failures are collected in
    /// the report and their downstream tasks are reported as blocked.
    pub fn run(&mut self, selected: &[String]) -> Result<RunReport, EngineError> {
        let start = Instant::now();
        let order = resolver::execution_order(&self.registry, selected)?;

        workdir::ensure_dir(&self.config.root)?;
        let _cwd = WorkdirGuard::enter(&self.config.root)?;
        let mut profiler = self.config.profile.then(|| Profiler::new(&self.config.root));

        let run_id = eventlog::generate_run_id();
        info!("run {}: {} task(s), failure policy {}", run_id, order.len(), self.config.failure);
        self.log_event(RunEvent::RunStarted {
            run_id: run_id.clone(),
            tasks: order.clone(),
            crbl_version: env!("CARGO_PKG_VERSION").to_string(),
        });

        let mut report = RunReport {
            run_id: run_id.clone(),
            ..Default::default()
        };
        let mut blocked: HashSet<String> = HashSet::new();

        for name in &order {
            if blocked.contains(name) {
                warn!("{} - blocked by an upstream failure", name);
                self.log_event(RunEvent::TaskSkipped {
                    run_id: run_id.clone(),
                    task: name.clone(),
                    reason: "upstream task failed".to_string(),
                });
                report.blocked.push(name.clone());
                continue;
            }

            match self.run_task(name, &run_id, profiler.as_mut()) {
                Ok(TaskOutcome::Executed) => report.executed.push(name.clone()),
                Ok(TaskOutcome::UpToDate) => report.skipped.push(name.clone()),
                Err(err) => {
                    error!("{}", err);
                    self.log_event(RunEvent::TaskFailed {
                        run_id: run_id.clone(),
                        task: name.clone(),
                        error: err.to_string(),
                    });
                    match self.config.failure {
                        FailurePolicy::StopOnFirst => {
                            report.duration = start.elapsed();
                            self.finish_run(&report, report.failures.len() + 1);
                            return Err(err);
                        }
                        FailurePolicy::ContinueIndependent => {
                            blocked.extend(resolver::downstream_of(&self.registry, name)?);
                            report.failures.push(TaskFailure {
                                task: name.clone(),
                                error: err,
                            });
                        }
                    }
                }
            }
        }

        report.duration = start.elapsed();
        self.finish_run(&report, report.failures.len());
        Ok(report)
    }

    fn finish_run(&self, report: &RunReport, failed: usize) {
        if failed > report.failures.len() {
            error!("run {}: stopped after first failure", report.run_id);
        } else {
            info!("run {}: {}", report.run_id, report);
        }
        self.log_event(RunEvent::RunCompleted {
            run_id: report.run_id.clone(),
            executed: count(report.executed.len()),
            skipped: count(report.skipped.len()),
            blocked: count(report.blocked.len()),
            failed: count(failed),
            total_seconds: report.duration.as_secs_f64(),
        });
    }

    /// Evaluate one task and execute it when stale.
    fn run_task(
        &mut self,
        name: &str,
        run_id: &str,
        mut profiler: Option<&mut Profiler>,
    ) -> Result<TaskOutcome, EngineError> {
        let task = self.registry.get(name)?;
        let root = self.config.root.as_path();
        let status = StatusEvaluator::new(&self.store, &self.registry, root).evaluate(task);

        match status.kind {
            StatusKind::UpToDate => {
                info!("-- {}", task.title());
                self.log_event(RunEvent::TaskSkipped {
                    run_id: run_id.to_string(),
                    task: name.to_string(),
                    reason: "up-to-date".to_string(),
                });
                return Ok(TaskOutcome::UpToDate);
            }
            StatusKind::Error => {
                return Err(EngineError::execution(name, status.reasons.join("; ")));
            }
            StatusKind::Stale => {}
        }

        info!(".  {}", task.title());
        debug!("{} is stale: {}", name, status.reasons.join("; "));
        self.log_event(RunEvent::TaskStarted {
            run_id: run_id.to_string(),
            task: name.to_string(),
            reasons: status.reasons,
        });

        let ctx = TaskContext::new(root, task);
        let started = Instant::now();
        for action in task.actions() {
            let action_start = Instant::now();
            let result = action.execute(&ctx);
            if let Some(p) = profiler.as_deref_mut() {
                p.record(name, &action.describe(), action_start);
            }
            result.map_err(|e| EngineError::execution(name, e))?;
        }
        if let Some(p) = profiler {
            p.record(name, "task", started);
        }

        let records = task
            .file_deps()
            .iter()
            .map(|dep| {
                let path = ctx.resolve(dep);
                fingerprint(&path)
                    .map(|fp| (dep.to_string_lossy().into_owned(), fp))
                    .map_err(|reason| EngineError::Fingerprint { path, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let values: &[(&str, &str)] = if task.is_run_once() {
            &[(RUN_ONCE_KEY, "done")]
        } else {
            &[]
        };
        self.store.commit(name, &records, values)?;

        self.log_event(RunEvent::TaskCompleted {
            run_id: run_id.to_string(),
            task: name.to_string(),
            duration_seconds: started.elapsed().as_secs_f64(),
            records: records.len(),
        });
        Ok(TaskOutcome::Executed)
    }

    /// Run cleanups and drop dependency records, regardless of status.
    /// With no names every task is cleaned, in reverse registration order.
    /// Returns the cleaned task names; the first cleanup failure is
    /// returned after every task has been processed.
    pub fn clean(&mut self, selected: &[String]) -> Result<Vec<String>, EngineError> {
        let names: Vec<String> = if selected.is_empty() {
            self.registry.names().rev().map(str::to_string).collect()
        } else {
            for name in selected {
                self.registry.get(name)?;
            }
            selected.to_vec()
        };

        workdir::ensure_dir(&self.config.root)?;
        let _cwd = WorkdirGuard::enter(&self.config.root)?;
        let mut first_error: Option<EngineError> = None;
        for name in &names {
            let task = self.registry.get(name)?;
            let ctx = TaskContext::new(&self.config.root, task);
            info!("{} - cleaning", name);
            let result = task.cleanup().clean(&ctx);
            let removed = self.store.remove(name)?;
            debug!("{} - removed {} stored row(s)", name, removed);
            if let Err(e) = result {
                error!("{} - cleanup failed: {}", name, e);
                first_error.get_or_insert_with(|| EngineError::execution(name, e));
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(names),
        }
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
