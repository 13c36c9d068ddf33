//! CR-017: Small file helpers shared by the engine and the pipeline: atomic writes
//! and minimal CSV quoting/splitting.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sibling temp path used while a file is being written.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `contents` atomically (write to temp, then rename).
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), String> {
    let tmp = tmp_path(path);
    std::fs::write(&tmp, contents)
        .map_err(|e| format!("cannot write {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| format!("cannot rename {} → {}: {}", tmp.display(), path.display(), e))
}

/// Buffered writer to a temp file that only replaces `path` on `commit`.
/// Dropping it without committing removes the temp file.
pub struct AtomicFile {
    path: PathBuf,
    tmp: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AtomicFile {
    pub fn create(path: &Path) -> Result<Self, String> {
        let tmp = tmp_path(path);
        let file =
            File::create(&tmp).map_err(|e| format!("cannot create {}: {}", tmp.display(), e))?;
        Ok(Self {
            path: path.to_path_buf(),
            tmp,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Write one line of pre-quoted CSV fields.
    pub fn write_row<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<(), String> {
        let line = fields
            .iter()
            .map(|f| csv_field(f.as_ref()))
            .collect::<Vec<_>>()
            .join(",");
        let tmp = &self.tmp;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| format!("{} already committed", tmp.display()))?;
        writeln!(writer, "{}", line).map_err(|e| format!("write error {}: {}", tmp.display(), e))
    }

    pub fn commit(mut self) -> Result<(), String> {
        if let Some(writer) = self.writer.take() {
            writer
                .into_inner()
                .map_err(|e| format!("flush error {}: {}", self.tmp.display(), e.error()))?
                .sync_all()
                .map_err(|e| format!("sync error {}: {}", self.tmp.display(), e))?;
        }
        std::fs::rename(&self.tmp, &self.path).map_err(|e| {
            format!(
                "cannot rename {} → {}: {}",
                self.tmp.display(),
                self.path.display(),
                e
            )
        })
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Split one CSV line, honoring double-quoted fields.
pub fn split_csv_line(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => quoted = false,
            ('"', false) if field.is_empty() => quoted = true,
            (',', false) => fields.push(std::mem::take(&mut field)),
            (c, _) => field.push(c),
        }
    }
    if quoted {
        return Err(format!("unterminated quoted field in: {}", line));
    }
    fields.push(field);
    Ok(fields)
}
