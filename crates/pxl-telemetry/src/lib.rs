use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use pxl_core::{TelemetryEvent, TelemetrySink};
use serde::Serialize;

pub const SINK_ENV: &str = "PXL_TELEMETRY_SINK";
pub const FILE_ENV: &str = "PXL_TELEMETRY_FILE";

/// Picks a sink from `PXL_TELEMETRY_SINK` (`stderr` or `file`). The file sink
/// also needs `PXL_TELEMETRY_FILE`. Stdout is left to the command output.
pub fn sink_from_env() -> Option<Box<dyn TelemetrySink>> {
    let mode = std::env::var(SINK_ENV).ok()?;
    let file = std::env::var(FILE_ENV).ok();
    sink_for(&mode, file.as_deref())
}

pub fn sink_for(mode: &str, file: Option<&str>) -> Option<Box<dyn TelemetrySink>> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "stderr" => Some(Box::new(StderrSink)),
        "file" => {
            let path = file.filter(|v| !v.trim().is_empty())?;
            Some(Box::new(FileSink::new(PathBuf::from(path))))
        }
        _ => None,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TelemetryEnvelope {
    event_type: String,
    width: u32,
    height: u32,
    duration_ms: Option<u64>,
    detail: Option<String>,
}

impl From<&TelemetryEvent> for TelemetryEnvelope {
    fn from(event: &TelemetryEvent) -> Self {
        Self {
            event_type: format!("{:?}", event.event_type),
            width: event.width,
            height: event.height,
            duration_ms: event.duration_ms,
            detail: event.detail.clone(),
        }
    }
}

pub struct StderrSink;

impl TelemetrySink for StderrSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Ok(line) = serde_json::to_string(&TelemetryEnvelope::from(&event)) {
            eprintln!("{}", line);
        }
    }
}

pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn write_line(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("creating telemetry log parent directory")?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("opening telemetry file")?;
        writeln!(file, "{}", line).context("writing telemetry line")?;
        Ok(())
    }
}

impl TelemetrySink for FileSink {
    fn emit(&self, event: TelemetryEvent) {
        if let Ok(line) = serde_json::to_string(&TelemetryEnvelope::from(&event)) {
            if let Err(err) = self.write_line(&line) {
                tracing::warn!(path = %self.path.display(), error = %format!("{err:#}"), "dropping telemetry event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pxl_core::TelemetryEventType;

    use super::*;

    #[test]
    fn unknown_or_incomplete_modes_yield_no_sink() {
        assert!(sink_for("http", None).is_none());
        assert!(sink_for("file", None).is_none());
        assert!(sink_for("file", Some("  ")).is_none());
        assert!(sink_for("stdout", None).is_none());
        assert!(sink_for(" STDERR ", None).is_some());
    }

    #[test]
    fn unwritable_file_sink_drops_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").expect("write blocker");
        let path = blocker.join("events.jsonl");
        let sink = sink_for("file", path.to_str()).expect("file sink");
        sink.emit(TelemetryEvent {
            event_type: TelemetryEventType::ExtractError,
            width: 1,
            height: 1,
            duration_ms: None,
            detail: Some("boom".to_string()),
        });
        assert!(!path.exists());
        assert_eq!(std::fs::read(&blocker).expect("read blocker"), b"");
    }

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("events.jsonl");
        let sink = sink_for("file", path.to_str()).expect("file sink");
        for event_type in [TelemetryEventType::ConvertStart, TelemetryEventType::ConvertSuccess] {
            sink.emit(TelemetryEvent {
                event_type,
                width: 3,
                height: 4,
                duration_ms: Some(1),
                detail: None,
            });
        }

        let data = std::fs::read_to_string(&path).expect("read log");
        let lines: Vec<serde_json::Value> = data
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["eventType"], "ConvertStart");
        assert_eq!(lines[1]["eventType"], "ConvertSuccess");
        assert_eq!(lines[1]["height"], 4);
    }
}
