//! CR-003: Status evaluation — up-to-date, stale, or error for each task.
//!
//! Evaluation never fails for a single task: unexpected I/O problems become
//! an `Error` status carrying the failing path in its reasons.

use super::registry::TaskRegistry;
use super::store::{DependencyStore, RUN_ONCE_KEY};
use super::task::{Task, TaskContext};
use indexmap::IndexMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// Outcome class of a status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    UpToDate,
    Stale,
    Error,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => write!(f, "up-to-date"),
            Self::Stale => write!(f, "run"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Computed status of one task plus the reasons behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub kind: StatusKind,
    pub reasons: Vec<String>,
}

impl TaskStatus {
    pub fn up_to_date() -> Self {
        Self {
            kind: StatusKind::UpToDate,
            reasons: Vec::new(),
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        self.kind == StatusKind::UpToDate
    }
}

/// Compares current file state against the dependency store.
pub struct StatusEvaluator<'a> {
    store: &'a DependencyStore,
    registry: &'a TaskRegistry,
    root: &'a Path,
}

impl<'a> StatusEvaluator<'a> {
    pub fn new(store: &'a DependencyStore, registry: &'a TaskRegistry, root: &'a Path) -> Self {
        Self {
            store,
            registry,
            root,
        }
    }

    /// Evaluate one task. All checks run; any error wins over stale.
    pub fn evaluate(&self, task: &Task) -> TaskStatus {
        let ctx = TaskContext::new(self.root, task);
        let mut stale = Vec::new();
        let mut errors = Vec::new();

        for check in task.uptodate() {
            match check.check(&ctx) {
                Ok(true) => {}
                Ok(false) => stale.push(format!("uptodate check '{}' is false", check.describe())),
                Err(e) => errors.push(format!("uptodate check '{}' failed: {}", check.describe(), e)),
            }
        }

        if task.is_run_once() {
            match self.store.get_value(task.name(), RUN_ONCE_KEY) {
                Ok(Some(_)) => {}
                Ok(None) => stale.push("run-once task has not run yet".to_string()),
                Err(e) => {
                    warn!("{}: cannot read run-once marker ({}); treating as absent", task.name(), e);
                    stale.push("run-once task has not run yet".to_string());
                }
            }
        }

        for target in task.targets() {
            let path = ctx.resolve(target);
            match std::fs::symlink_metadata(&path) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    stale.push(format!("target {} does not exist", target.display()));
                }
                Err(e) => errors.push(format!("cannot stat target {}: {}", target.display(), e)),
            }
        }

        let has_predicates = !task.uptodate().is_empty() || task.is_run_once();
        if task.file_deps().is_empty() && !has_predicates {
            stale.push("no file dependencies".to_string());
        }

        for dep in task.file_deps() {
            if let Some(reason) = self.check_dep(task, &ctx, dep, &mut errors) {
                stale.push(reason);
            }
        }

        let status = if !errors.is_empty() {
            TaskStatus {
                kind: StatusKind::Error,
                reasons: errors,
            }
        } else if !stale.is_empty() {
            TaskStatus {
                kind: StatusKind::Stale,
                reasons: stale,
            }
        } else {
            TaskStatus::up_to_date()
        };
        debug!("status {}: {} {:?}", task.name(), status.kind, status.reasons);
        status
    }

    /// Stale reason for one dependency, if any. Errors are pushed to `errors`.
    fn check_dep(
        &self,
        task: &Task,
        ctx: &TaskContext,
        dep: &Path,
        errors: &mut Vec<String>,
    ) -> Option<String> {
        let path = ctx.resolve(dep);
        let key = dep.to_string_lossy();
        match std::fs::metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                errors.push(format!("cannot stat file dependency {}: {}", dep.display(), e));
                return None;
            }
            Err(_) => return self.missing_dep(task, dep, errors),
        }
        let recorded = match self.store.get(task.name(), &key) {
            Ok(r) => r,
            Err(e) => {
                warn!("{}: unreadable record for {} ({}); treating as absent", task.name(), key, e);
                None
            }
        };
        let Some(recorded) = recorded else {
            return Some(format!("file dependency {} has no record", dep.display()));
        };
        match recorded.matches(&path) {
            Ok(true) => None,
            Ok(false) => Some(format!("file dependency {} changed", dep.display())),
            Err(e) => {
                errors.push(format!("cannot fingerprint {}: {}", dep.display(), e));
                None
            }
        }
    }

    /// A dependency absent from disk: stale when another task produces it.
    fn missing_dep(&self, task: &Task, dep: &Path, errors: &mut Vec<String>) -> Option<String> {
        match self.registry.producer_of(dep) {
            Some(producer) if producer != task.name() => Some(format!(
                "file dependency {} is missing (produced by {})",
                dep.display(),
                producer
            )),
            _ => {
                errors.push(format!(
                    "file dependency {} does not exist and no task produces it",
                    dep.display()
                ));
                None
            }
        }
    }

    /// Evaluate every task, never short-circuiting. Errors count as not
    /// up-to-date.
    pub fn evaluate_all<'t, I>(&self, tasks: I) -> (bool, IndexMap<String, bool>)
    where
        I: IntoIterator<Item = &'t Task>,
    {
        let mut all = true;
        let mut table = IndexMap::new();
        for task in tasks {
            let ok = self.evaluate(task).is_up_to_date();
            all &= ok;
            table.insert(task.name().to_string(), ok);
        }
        (all, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::fingerprint;
    use crate::core::registry::FileTable;
    use crate::core::task::TaskContext;

    fn setup() -> (tempfile::TempDir, DependencyStore, TaskRegistry) {
        let dir = tempfile::tempdir().unwrap();
        (dir, DependencyStore::in_memory().unwrap(), TaskRegistry::new())
    }

    fn add(reg: &mut TaskRegistry, task: Task) {
        let name = task.name().to_string();
        reg.register(&name, task, FileTable::new()).unwrap();
    }

    #[test]
    fn test_cr003_no_deps_always_stale() {
        let (dir, store, mut reg) = setup();
        add(&mut reg, Task::builder("t").build().unwrap());
        let eval = StatusEvaluator::new(&store, &reg, dir.path());
        let status = eval.evaluate(reg.get("t").unwrap());
        assert_eq!(status.kind, StatusKind::Stale);
        assert_eq!(status.reasons, vec!["no file dependencies".to_string()]);
    }

    #[test]
    fn test_cr003_missing_target_stale() {
        let (dir, store, mut reg) = setup();
        add(&mut reg, Task::builder("t").target("a.txt").build().unwrap());
        let eval = StatusEvaluator::new(&store, &reg, dir.path());
        let status = eval.evaluate(reg.get("t").unwrap());
        assert_eq!(status.kind, StatusKind::Stale);
        assert!(status.reasons[0].contains("target a.txt does not exist"));
    }

    #[test]
    fn test_cr003_dep_without_record_stale() {
        let (dir, store, mut reg) = setup();
        std::fs::write(dir.path().join("in.txt"), "x").unwrap();
        add(&mut reg, Task::builder("t").file_dep("in.txt").build().unwrap());
        let eval = StatusEvaluator::new(&store, &reg, dir.path());
        let status = eval.evaluate(reg.get("t").unwrap());
        assert_eq!(status.kind, StatusKind::Stale);
        assert!(status.reasons[0].contains("has no record"));
    }

    #[test]
    fn test_cr003_recorded_dep_up_to_date_then_changed() {
        let (dir, mut store, mut reg) = setup();
        let dep = dir.path().join("in.txt");
        std::fs::write(&dep, "x").unwrap();
        store.put("t", "in.txt", &fingerprint(&dep).unwrap()).unwrap();
        add(&mut reg, Task::builder("t").file_dep("in.txt").build().unwrap());
        {
            let eval = StatusEvaluator::new(&store, &reg, dir.path());
            assert!(eval.evaluate(reg.get("t").unwrap()).is_up_to_date());
        }
        std::fs::write(&dep, "changed content").unwrap();
        let eval = StatusEvaluator::new(&store, &reg, dir.path());
        let status = eval.evaluate(reg.get("t").unwrap());
        assert_eq!(status.kind, StatusKind::Stale);
        assert!(status.reasons[0].contains("changed"));
    }

    #[test]
    fn test_cr003_missing_dep_with_producer_is_stale() {
        let (dir, store, mut reg) = setup();
        add(&mut reg, Task::builder("t1").target("a.txt").build().unwrap());
        add(&mut reg, Task::builder("t2").file_dep("a.txt").build().unwrap());
        let eval = StatusEvaluator::new(&store, &reg, dir.path());
        let status = eval.evaluate(reg.get("t2").unwrap());
        assert_eq!(status.kind, StatusKind::Stale);
        assert!(status.reasons[0].contains("produced by t1"));
    }

    #[test]
    fn test_cr003_missing_dep_without_producer_is_error() {
        let (dir, store, mut reg) = setup();
        add(&mut reg, Task::builder("t").file_dep("ghost.txt").build().unwrap());
        let eval = StatusEvaluator::new(&store, &reg, dir.path());
        let status = eval.evaluate(reg.get("t").unwrap());
        assert_eq!(status.kind, StatusKind::Error);
        assert!(status.reasons[0].contains("ghost.txt"));
    }

    #[test]
    fn test_cr003_unstatable_dep_is_error() {
        let (dir, store, mut reg) = setup();
        std::fs::write(dir.path().join("plain.txt"), "x").unwrap();
        // a path through a regular file fails with ENOTDIR, not NotFound
        add(&mut reg, Task::builder("t1").target("plain.txt/a.txt").build().unwrap());
        add(&mut reg, Task::builder("t2").file_dep("plain.txt/a.txt").build().unwrap());
        let eval = StatusEvaluator::new(&store, &reg, dir.path());
        let status = eval.evaluate(reg.get("t2").unwrap());
        assert_eq!(status.kind, StatusKind::Error);
        assert!(status.reasons[0].contains("cannot stat file dependency plain.txt/a.txt"));
    }

    #[test]
    fn test_cr003_uptodate_predicates() {
        let (dir, store, mut reg) = setup();
        add(
            &mut reg,
            Task::builder("yes")
                .uptodate(|_: &TaskContext| Ok::<bool, String>(true))
                .build()
                .unwrap(),
        );
        add(
            &mut reg,
            Task::builder("no")
                .uptodate(|_: &TaskContext| Ok::<bool, String>(false))
                .build()
                .unwrap(),
        );
        add(
            &mut reg,
            Task::builder("broken")
                .uptodate(|_: &TaskContext| Err::<bool, String>("boom".to_string()))
                .build()
                .unwrap(),
        );
        let eval = StatusEvaluator::new(&store, &reg, dir.path());
        assert!(eval.evaluate(reg.get("yes").unwrap()).is_up_to_date());
        assert_eq!(eval.evaluate(reg.get("no").unwrap()).kind, StatusKind::Stale);
        let broken = eval.evaluate(reg.get("broken").unwrap());
        assert_eq!(broken.kind, StatusKind::Error);
        assert!(broken.reasons[0].contains("boom"));
    }

    #[test]
    fn test_cr003_run_once_marker() {
        let (dir, mut store, mut reg) = setup();
        add(&mut reg, Task::builder("once").run_once().build().unwrap());
        {
            let eval = StatusEvaluator::new(&store, &reg, dir.path());
            assert_eq!(eval.evaluate(reg.get("once").unwrap()).kind, StatusKind::Stale);
        }
        store.commit("once", &[], &[(RUN_ONCE_KEY, "done")]).unwrap();
        let eval = StatusEvaluator::new(&store, &reg, dir.path());
        assert!(eval.evaluate(reg.get("once").unwrap()).is_up_to_date());
    }

    #[test]
    fn test_cr003_evaluate_all_no_short_circuit() {
        let (dir, mut store, mut reg) = setup();
        let dep = dir.path().join("in.txt");
        std::fs::write(&dep, "x").unwrap();
        store.put("last", "in.txt", &fingerprint(&dep).unwrap()).unwrap();
        add(&mut reg, Task::builder("first").build().unwrap());
        add(&mut reg, Task::builder("broken").file_dep("ghost.txt").build().unwrap());
        add(&mut reg, Task::builder("last").file_dep("in.txt").build().unwrap());
        let eval = StatusEvaluator::new(&store, &reg, dir.path());
        let (all, table) = eval.evaluate_all(reg.list());
        assert!(!all);
        assert_eq!(table.len(), 3);
        assert!(!table["first"]);
        assert!(!table["broken"]);
        assert!(table["last"]);
    }

    #[test]
    fn test_cr003_status_kind_display() {
        assert_eq!(StatusKind::UpToDate.to_string(), "up-to-date");
        assert_eq!(StatusKind::Stale.to_string(), "run");
        assert_eq!(StatusKind::Error.to_string(), "error");
    }
}
