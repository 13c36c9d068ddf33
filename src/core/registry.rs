//! CR-002: Task registry — insertion-ordered tasks and the shared file table.
//!
//! Insertion order is the default execution order. Re-registering a name
//! replaces the task in place and keeps its original position.

use super::error::EngineError;
use super::task::Task;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Flat name → path table shared across tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTable(IndexMap<String, PathBuf>);

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from a YAML value. `null` is an empty table; anything
    /// other than a flat string → string mapping is rejected.
    pub fn from_yaml(value: &serde_yaml_ng::Value) -> Result<Self, EngineError> {
        let mapping = match value {
            serde_yaml_ng::Value::Null => return Ok(Self::default()),
            serde_yaml_ng::Value::Mapping(m) => m,
            other => {
                return Err(EngineError::Config(format!(
                    "files must be a mapping of name to path, got {}",
                    yaml_kind(other)
                )))
            }
        };
        let mut table = Self::default();
        for (key, val) in mapping {
            let name = key.as_str().ok_or_else(|| {
                EngineError::Config(format!("files key must be a string, got {}", yaml_kind(key)))
            })?;
            let path = val.as_str().ok_or_else(|| {
                EngineError::Config(format!(
                    "files entry '{}' must be a path string, got {}",
                    name,
                    yaml_kind(val)
                ))
            })?;
            table.insert(name, path);
        }
        Ok(table)
    }

    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.0.insert(name.into(), path.into());
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.0.get(name).map(PathBuf::as_path)
    }

    pub fn extend(&mut self, other: FileTable) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }
}

fn yaml_kind(value: &serde_yaml_ng::Value) -> &'static str {
    match value {
        serde_yaml_ng::Value::Null => "null",
        serde_yaml_ng::Value::Bool(_) => "a boolean",
        serde_yaml_ng::Value::Number(_) => "a number",
        serde_yaml_ng::Value::String(_) => "a string",
        serde_yaml_ng::Value::Sequence(_) => "a sequence",
        serde_yaml_ng::Value::Mapping(_) => "a mapping",
        serde_yaml_ng::Value::Tagged(_) => "a tagged value",
    }
}

/// Ordered mapping from task name to task.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: IndexMap<String, Task>,
    files: FileTable,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the task under `name` and merge `extra_files`
    /// into the file table. Returns the replaced task, if any.
    pub fn register(
        &mut self,
        name: &str,
        task: Task,
        extra_files: FileTable,
    ) -> Result<Option<Task>, EngineError> {
        if task.name() != name {
            return Err(EngineError::Config(format!(
                "cannot register task '{}' under name '{}'",
                task.name(),
                name
            )));
        }
        debug!(
            "registered task {}: deps={:?} targets={:?} with {} file(s)",
            name,
            task.file_deps(),
            task.targets(),
            extra_files.len()
        );
        self.files.extend(extra_files);
        Ok(self.tasks.insert(name.to_string(), task))
    }

    /// Remove every task. Returns the number removed.
    pub fn clear(&mut self) -> usize {
        let n = self.tasks.len();
        debug!("clearing {} task(s)", n);
        self.tasks.clear();
        n
    }

    /// Tasks in insertion order.
    pub fn list(&self) -> Vec<&Task> {
        self.tasks.values().collect()
    }

    pub fn names(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<&Task, EngineError> {
        self.tasks
            .get(name)
            .ok_or_else(|| EngineError::TaskNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registration position of `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.tasks.get_index_of(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn files(&self) -> &FileTable {
        &self.files
    }

    /// First registered task declaring `path` as a target.
    pub fn producer_of(&self, path: &Path) -> Option<&str> {
        self.tasks
            .values()
            .find(|t| t.targets().iter().any(|p| p == path))
            .map(Task::name)
    }
}
