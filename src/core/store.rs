//! CR-001: Dependency store — per-task fingerprint records in a single SQLite file.
//!
//! The store has no policy: it only remembers what the executor committed.
//! One `DependencyStore` handle is owned by one engine; writes go through
//! `&mut self`.

use super::error::EngineError;
use super::fingerprint::Fingerprint;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default store file name inside the execution root.
pub const DEFAULT_DB_NAME: &str = "doit.db";

/// Value key marking that a run-once task has completed.
pub const RUN_ONCE_KEY: &str = "run-once";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dependencies (
    task        TEXT NOT NULL,
    dep         TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    PRIMARY KEY (task, dep)
);
CREATE TABLE IF NOT EXISTS task_values (
    task  TEXT NOT NULL,
    key   TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (task, key)
);
";

/// Derive the store file path for an execution root and optional namespace.
pub fn store_file_path(root: &Path, namespace: Option<&str>) -> PathBuf {
    match namespace {
        Some(ns) => root.join(format!("{}.{}", ns, DEFAULT_DB_NAME)),
        None => root.join(DEFAULT_DB_NAME),
    }
}

/// Persistent record of each task's last successful fingerprints.
pub struct DependencyStore {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for DependencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyStore")
            .field("path", &self.path)
            .finish()
    }
}

impl DependencyStore {
    /// Open (or create) the store at `path`.
    ///
    /// Fails with `StoreCorrupt` when the file exists but is not a readable
    /// store.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let conn = Connection::open(path).map_err(|e| corrupt(path, e))?;
        conn.execute_batch(SCHEMA).map_err(|e| corrupt(path, e))?;
        conn.query_row("SELECT COUNT(*) FROM dependencies", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| corrupt(path, e))?;
        debug!("opened dependency store {}", path.display());
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open the store, moving an unreadable file aside and starting empty.
    ///
    /// With no records every task evaluates stale, which is the safe default.
    pub fn open_or_reset(path: &Path) -> Result<Self, EngineError> {
        match Self::open(path) {
            Ok(store) => Ok(store),
            Err(EngineError::StoreCorrupt { reason, .. }) => {
                let aside = corrupt_path(path);
                warn!(
                    "dependency store {} is unreadable ({}); moving it to {} and treating all tasks as stale",
                    path.display(),
                    reason,
                    aside.display()
                );
                std::fs::rename(path, &aside).map_err(|source| EngineError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::open(path)
            }
            Err(e) => Err(e),
        }
    }

    /// In-memory store, mostly for tests.
    pub fn in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded fingerprint of `dep` for `task`, if any.
    pub fn get(&self, task: &str, dep: &str) -> Result<Option<Fingerprint>, EngineError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT fingerprint FROM dependencies WHERE task = ?1 AND dep = ?2",
                params![task, dep],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| EngineError::StoreCorrupt {
                path: self.path.clone(),
                reason: format!("bad record for {}/{}: {}", task, dep, e),
            })
        })
        .transpose()
    }

    /// Insert or replace one record.
    pub fn put(&mut self, task: &str, dep: &str, fp: &Fingerprint) -> Result<(), EngineError> {
        let json = encode(fp)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO dependencies (task, dep, fingerprint) VALUES (?1, ?2, ?3)",
            params![task, dep, json],
        )?;
        Ok(())
    }

    /// Stored value for `task`/`key`, if any.
    pub fn get_value(&self, task: &str, key: &str) -> Result<Option<String>, EngineError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM task_values WHERE task = ?1 AND key = ?2",
                params![task, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Remove every record and value of `task`. Returns the number of rows removed.
    pub fn remove(&mut self, task: &str) -> Result<usize, EngineError> {
        let tx = self.conn.transaction()?;
        let deps = tx.execute("DELETE FROM dependencies WHERE task = ?1", params![task])?;
        let values = tx.execute("DELETE FROM task_values WHERE task = ?1", params![task])?;
        tx.commit()?;
        Ok(deps + values)
    }

    /// Replace all records and values of `task` in one transaction.
    pub fn commit(
        &mut self,
        task: &str,
        records: &[(String, Fingerprint)],
        values: &[(&str, &str)],
    ) -> Result<(), EngineError> {
        let encoded = records
            .iter()
            .map(|(dep, fp)| encode(fp).map(|json| (dep.as_str(), json)))
            .collect::<Result<Vec<_>, _>>()?;

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM dependencies WHERE task = ?1", params![task])?;
        tx.execute("DELETE FROM task_values WHERE task = ?1", params![task])?;
        for (dep, json) in &encoded {
            tx.execute(
                "INSERT INTO dependencies (task, dep, fingerprint) VALUES (?1, ?2, ?3)",
                params![task, dep, json],
            )?;
        }
        for (key, value) in values {
            tx.execute(
                "INSERT INTO task_values (task, key, value) VALUES (?1, ?2, ?3)",
                params![task, key, value],
            )?;
        }
        tx.commit()?;
        debug!("committed {} record(s) for task {}", encoded.len(), task);
        Ok(())
    }

    /// Number of dependency records held for `task`.
    pub fn record_count(&self, task: &str) -> Result<usize, EngineError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM dependencies WHERE task = ?1",
            params![task],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

fn encode(fp: &Fingerprint) -> Result<String, EngineError> {
    serde_json::to_string(fp)
        .map_err(|e| EngineError::Config(format!("cannot encode fingerprint: {}", e)))
}

fn corrupt(path: &Path, e: rusqlite::Error) -> EngineError {
    EngineError::StoreCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}
