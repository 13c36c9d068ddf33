//! CR-009: Append-only JSONL run event log.

use super::types::{RunEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Event log file name inside the execution root.
pub const EVENT_LOG_FILE: &str = "events.jsonl";

/// RFC 3339 UTC timestamp with second precision.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .unsigned_abs();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Event log path for an execution root.
pub fn event_log_path(root: &Path) -> PathBuf {
    root.join(EVENT_LOG_FILE)
}

/// Append an event to the root's event log.
pub fn append_event(root: &Path, event: RunEvent) -> Result<(), String> {
    let path = event_log_path(root);
    let te = TimestampedEvent {
        ts: now_rfc3339(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

/// Read every event back, skipping lines that do not parse.
pub fn read_events(root: &Path) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(root);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read event log {}: {}", path.display(), e))?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cr009_now_rfc3339() {
        let ts = now_rfc3339();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_cr009_generate_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert_eq!(id.len(), 14);
    }

    #[test]
    fn test_cr009_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        append_event(
            dir.path(),
            RunEvent::RunStarted {
                run_id: "r-abc".to_string(),
                tasks: vec!["fit".to_string()],
                crbl_version: "0.4.0".to_string(),
            },
        )
        .unwrap();
        append_event(
            dir.path(),
            RunEvent::TaskFailed {
                run_id: "r-abc".to_string(),
                task: "fit".to_string(),
                error: "empty training set".to_string(),
            },
        )
        .unwrap();

        let content = std::fs::read_to_string(dir.path().join(EVENT_LOG_FILE)).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("run_started"));

        let events = read_events(dir.path()).unwrap();
        assert!(matches!(events[1].event, RunEvent::TaskFailed { ref task, .. } if task == "fit"));
    }

    #[test]
    fn test_cr009_missing_root_is_error() {
        let err = append_event(
            Path::new("/nonexistent/crbl-root"),
            RunEvent::TaskSkipped {
                run_id: "r".into(),
                task: "t".into(),
                reason: "x".into(),
            },
        )
        .unwrap_err();
        assert!(err.contains("cannot open event log"));
    }
}
