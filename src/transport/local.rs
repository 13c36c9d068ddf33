//! CR-010: Local execution via `bash` in a given working directory.

use super::ExecOutput;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Execute a shell script locally via `bash`, with `cwd` as its working
/// directory. The script is fed on stdin so quoting is left to the caller.
pub fn exec_local(script: &str, cwd: &Path) -> Result<ExecOutput, String> {
    debug!("bash in {}: {}", cwd.display(), script.trim());
    let mut child = Command::new("bash")
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn bash in {}: {}", cwd.display(), e))?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait error: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cr010_local_echo() {
        let dir = tempfile::tempdir().unwrap();
        let out = exec_local("echo hello", dir.path()).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_cr010_local_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = exec_local("exit 42", dir.path()).unwrap();
        assert_eq!(out.exit_code, 42);
    }

    #[test]
    fn test_cr010_local_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = exec_local("ls", dir.path()).unwrap();
        assert!(out.stdout.contains("marker.txt"));
    }

    #[test]
    fn test_cr010_local_missing_cwd() {
        let err = exec_local("true", Path::new("/nonexistent/crbl-root")).unwrap_err();
        assert!(err.contains("failed to spawn bash"));
    }

    #[test]
    fn test_cr010_local_pipefail() {
        let dir = tempfile::tempdir().unwrap();
        let out = exec_local("set -euo pipefail\nfalse | true", dir.path()).unwrap();
        assert!(!out.success(), "pipefail should catch false in pipeline");
    }
}
