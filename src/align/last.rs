//! CR-011: LAST aligner tasks — `lastdb` index builds and `lastal` searches.
//!
//! Commands run through `bash` in the execution root. `lastal` writes to a
//! temporary file that is renamed into place, so a failed search never
//! leaves a partial target behind.

use crate::core::{EngineError, Task};
use std::path::{Path, PathBuf};

/// Files written by `lastdb` for a protein database.
pub const LASTDB_EXTENSIONS: [&str; 7] = ["bck", "des", "prj", "sds", "ssp", "suf", "tis"];

/// Search breadth for `lastal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignMode {
    /// Report every significant alignment
    #[default]
    Full,
    /// Keep at most N alignments per query (`-N`)
    TopHits(u32),
}

/// Executable names and search settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastConfig {
    pub lastdb: String,
    pub lastal: String,
    pub threads: u32,
    pub mode: AlignMode,
}

impl Default for LastConfig {
    fn default() -> Self {
        Self {
            lastdb: "lastdb".to_string(),
            lastal: "lastal".to_string(),
            threads: 1,
            mode: AlignMode::Full,
        }
    }
}

impl From<&crate::core::types::LastSettings> for LastConfig {
    fn from(s: &crate::core::types::LastSettings) -> Self {
        Self {
            lastdb: s.lastdb.clone(),
            lastal: s.lastal.clone(),
            threads: s.threads,
            mode: s.top_hits.map_or(AlignMode::Full, AlignMode::TopHits),
        }
    }
}

/// Quote a word for bash when it contains anything beyond a safe set.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

fn quote_path(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

/// The files `lastdb` produces for `prefix`.
pub fn lastdb_targets(prefix: &Path) -> Vec<PathBuf> {
    LASTDB_EXTENSIONS
        .iter()
        .map(|ext| {
            let mut name = prefix.as_os_str().to_os_string();
            name.push(".");
            name.push(ext);
            PathBuf::from(name)
        })
        .collect()
}

/// `lastdb -p -P threads prefix fasta`
pub fn lastdb_command(cfg: &LastConfig, fasta: &Path, prefix: &Path) -> String {
    format!(
        "{} -p -P {} {} {}",
        shell_quote(&cfg.lastdb),
        cfg.threads,
        quote_path(prefix),
        quote_path(fasta)
    )
}

/// `lastal [-F15] [-N n] -P threads db query > out`, via a temp file.
/// `translate` enables the nucleotide-query vs protein-db frameshift search.
pub fn lastal_command(
    cfg: &LastConfig,
    query: &Path,
    db_prefix: &Path,
    out: &Path,
    translate: bool,
) -> String {
    let mut args = vec![shell_quote(&cfg.lastal)];
    if translate {
        args.push("-F15".to_string());
    }
    if let AlignMode::TopHits(n) = cfg.mode {
        args.push(format!("-N {}", n));
    }
    args.push(format!("-P {}", cfg.threads));
    args.push(quote_path(db_prefix));
    args.push(quote_path(query));
    let mut tmp = out.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    format!(
        "{} > {} && mv {} {}",
        args.join(" "),
        quote_path(&tmp),
        quote_path(&tmp),
        quote_path(out)
    )
}

/// Index `fasta` as a protein database at `prefix`.
pub fn lastdb_task(
    name: &str,
    fasta: &Path,
    prefix: &Path,
    cfg: &LastConfig,
) -> Result<Task, EngineError> {
    Task::builder(name)
        .title("{name}: {actions}")
        .shell(lastdb_command(cfg, fasta, prefix))
        .file_dep(fasta)
        .targets(lastdb_targets(prefix))
        .clean_targets()
        .build()
}

/// Align `query` against the database indexed at `db_prefix`.
pub fn lastal_task(
    name: &str,
    query: &Path,
    db_prefix: &Path,
    out: &Path,
    translate: bool,
    cfg: &LastConfig,
) -> Result<Task, EngineError> {
    Task::builder(name)
        .title("{name}: {actions}")
        .shell(lastal_command(cfg, query, db_prefix, out, translate))
        .file_dep(query)
        .file_deps(lastdb_targets(db_prefix))
        .target(out)
        .clean_targets()
        .build()
}
