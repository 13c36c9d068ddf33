//! CR-002: Task definitions — actions, cleanups, uptodate checks, and the builder.
//!
//! A `Task` is immutable once built. Malformed shapes (empty names, empty
//! paths, a path that is both dependency and target) are rejected by
//! `TaskBuilder::build`, never at execution time.

use super::error::EngineError;
use crate::transport::local;
use std::fmt;
use std::path::{Path, PathBuf};

/// Placeholder replaced by the task name in title templates.
pub const TITLE_NAME: &str = "{name}";

/// Placeholder replaced by the action descriptions in title templates.
pub const TITLE_ACTIONS: &str = "{actions}";

/// Execution context handed to actions, cleanups, and uptodate checks.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    pub root: &'a Path,
    pub task: &'a str,
    pub file_deps: &'a [PathBuf],
    pub targets: &'a [PathBuf],
}

impl<'a> TaskContext<'a> {
    pub fn new(root: &'a Path, task: &'a Task) -> Self {
        Self {
            root,
            task: &task.name,
            file_deps: &task.file_deps,
            targets: &task.targets,
        }
    }

    /// Resolve a task-relative path against the execution root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// One executable step of a task.
pub trait Action: Send + Sync {
    fn execute(&self, ctx: &TaskContext) -> Result<(), String>;

    /// Short human-readable description, used in titles and profiles.
    fn describe(&self) -> String;
}

/// Shell command run through `bash` in the execution root.
#[derive(Debug, Clone)]
pub struct ShellAction {
    command: String,
}

impl ShellAction {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Action for ShellAction {
    fn execute(&self, ctx: &TaskContext) -> Result<(), String> {
        let script = format!("set -euo pipefail\n{}\n", self.command);
        let out = local::exec_local(&script, ctx.root)?;
        if out.success() {
            Ok(())
        } else {
            tracing::debug!("{} - stderr:\n{}", ctx.task, out.stderr.trim_end());
            Err(format!("exit code {}: {}", out.exit_code, out.stderr_tail()))
        }
    }

    fn describe(&self) -> String {
        format!("Cmd: {}", self.command)
    }
}

/// In-process action backed by a closure.
pub struct FnAction<F> {
    label: String,
    f: F,
}

impl<F> FnAction<F>
where
    F: Fn(&TaskContext) -> Result<(), String> + Send + Sync,
{
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
        }
    }
}

impl<F> Action for FnAction<F>
where
    F: Fn(&TaskContext) -> Result<(), String> + Send + Sync,
{
    fn execute(&self, ctx: &TaskContext) -> Result<(), String> {
        (self.f)(ctx)
    }

    fn describe(&self) -> String {
        format!("Fn: {}", self.label)
    }
}

/// Undo the effects of a task.
pub trait Cleanup: Send + Sync {
    fn clean(&self, ctx: &TaskContext) -> Result<(), String>;
}

/// Remove the task's targets. Missing targets are ignored; empty
/// directories are removed, non-empty ones are left in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanTargets;

impl Cleanup for CleanTargets {
    fn clean(&self, ctx: &TaskContext) -> Result<(), String> {
        for target in ctx.targets {
            let path = ctx.resolve(target);
            let result = if path.is_dir() {
                let empty = std::fs::read_dir(&path)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(false);
                if !empty {
                    tracing::warn!(
                        "{} - not removing non-empty directory {}",
                        ctx.task,
                        path.display()
                    );
                    continue;
                }
                std::fs::remove_dir(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => tracing::debug!("{} - removed {}", ctx.task, path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(format!("cannot remove {}: {}", path.display(), e)),
            }
        }
        Ok(())
    }
}

/// Cleanup backed by a closure (e.g. resetting in-memory state).
pub struct FnCleanup<F>(pub F);

impl<F> Cleanup for FnCleanup<F>
where
    F: Fn(&TaskContext) -> Result<(), String> + Send + Sync,
{
    fn clean(&self, ctx: &TaskContext) -> Result<(), String> {
        (self.0)(ctx)
    }
}

/// Ordered list of cleanups, itself a cleanup.
///
/// Every entry runs even if an earlier one fails; failures are joined.
#[derive(Default)]
pub struct CleanupList(Vec<Box<dyn Cleanup>>);

impl CleanupList {
    pub fn push(&mut self, cleanup: impl Cleanup + 'static) {
        self.0.push(Box::new(cleanup));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Cleanup for CleanupList {
    fn clean(&self, ctx: &TaskContext) -> Result<(), String> {
        let errors: Vec<String> = self
            .0
            .iter()
            .filter_map(|c| c.clean(ctx).err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

/// Custom staleness predicate. `Ok(false)` marks the task stale.
pub trait UptodateCheck: Send + Sync {
    fn check(&self, ctx: &TaskContext) -> Result<bool, String>;

    fn describe(&self) -> String {
        "custom".to_string()
    }
}

impl<F> UptodateCheck for F
where
    F: Fn(&TaskContext) -> Result<bool, String> + Send + Sync,
{
    fn check(&self, ctx: &TaskContext) -> Result<bool, String> {
        self(ctx)
    }
}

/// A unit of work with file dependencies and targets.
pub struct Task {
    name: String,
    title: Option<String>,
    actions: Vec<Box<dyn Action>>,
    file_deps: Vec<PathBuf>,
    targets: Vec<PathBuf>,
    cleanup: CleanupList,
    uptodate: Vec<Box<dyn UptodateCheck>>,
    run_once: bool,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("actions", &self.action_descriptions())
            .field("file_deps", &self.file_deps)
            .field("targets", &self.targets)
            .field("cleanups", &self.cleanup.len())
            .field("uptodate", &self.uptodate.len())
            .field("run_once", &self.run_once)
            .finish()
    }
}

impl Task {
    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }

    pub fn file_deps(&self) -> &[PathBuf] {
        &self.file_deps
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn cleanup(&self) -> &CleanupList {
        &self.cleanup
    }

    pub fn uptodate(&self) -> &[Box<dyn UptodateCheck>] {
        &self.uptodate
    }

    pub fn is_run_once(&self) -> bool {
        self.run_once
    }

    fn action_descriptions(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.describe()).collect()
    }

    /// Render the title template. Without a template: `name => actions`.
    pub fn title(&self) -> String {
        let actions = self.action_descriptions().join(" | ");
        match &self.title {
            Some(template) => template
                .replace(TITLE_NAME, &self.name)
                .replace(TITLE_ACTIONS, &actions),
            None if actions.is_empty() => self.name.clone(),
            None => format!("{} => {}", self.name, actions),
        }
    }
}

/// Builder for `Task`.
pub struct TaskBuilder {
    name: String,
    title: Option<String>,
    actions: Vec<Box<dyn Action>>,
    file_deps: Vec<PathBuf>,
    targets: Vec<PathBuf>,
    cleanup: CleanupList,
    uptodate: Vec<Box<dyn UptodateCheck>>,
    run_once: bool,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            actions: Vec::new(),
            file_deps: Vec::new(),
            targets: Vec::new(),
            cleanup: CleanupList::default(),
            uptodate: Vec::new(),
            run_once: false,
        }
    }

    pub fn title(mut self, template: impl Into<String>) -> Self {
        self.title = Some(template.into());
        self
    }

    pub fn action(mut self, action: impl Action + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    pub fn shell(self, command: impl Into<String>) -> Self {
        self.action(ShellAction::new(command))
    }

    pub fn func<F>(self, label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TaskContext) -> Result<(), String> + Send + Sync + 'static,
    {
        self.action(FnAction::new(label, f))
    }

    pub fn file_dep(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_deps.push(path.into());
        self
    }

    pub fn file_deps<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.file_deps.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn target(mut self, path: impl Into<PathBuf>) -> Self {
        self.targets.push(path.into());
        self
    }

    pub fn targets<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.targets.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn clean(mut self, cleanup: impl Cleanup + 'static) -> Self {
        self.cleanup.push(cleanup);
        self
    }

    pub fn clean_targets(self) -> Self {
        self.clean(CleanTargets)
    }

    pub fn uptodate(mut self, check: impl UptodateCheck + 'static) -> Self {
        self.uptodate.push(Box::new(check));
        self
    }

    /// Consider the task up-to-date after its first successful run.
    pub fn run_once(mut self) -> Self {
        self.run_once = true;
        self
    }

    pub fn build(self) -> Result<Task, EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Config("task name must not be empty".to_string()));
        }
        let file_deps = dedup_paths(&self.name, "file_dep", self.file_deps)?;
        let targets = dedup_paths(&self.name, "target", self.targets)?;
        if let Some(both) = file_deps.iter().find(|p| targets.contains(p)) {
            return Err(EngineError::Config(format!(
                "task '{}': '{}' is both a file dependency and a target",
                self.name,
                both.display()
            )));
        }
        Ok(Task {
            name: self.name,
            title: self.title,
            actions: self.actions,
            file_deps,
            targets,
            cleanup: self.cleanup,
            uptodate: self.uptodate,
            run_once: self.run_once,
        })
    }
}

fn dedup_paths(task: &str, kind: &str, paths: Vec<PathBuf>) -> Result<Vec<PathBuf>, EngineError> {
    let mut out: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for path in paths {
        if path.as_os_str().is_empty() {
            return Err(EngineError::Config(format!(
                "task '{}': empty {} path",
                task, kind
            )));
        }
        if !out.contains(&path) {
            out.push(path);
        }
    }
    Ok(out)
}
