//! Ingestion progress reporting.
//!
//! Progress is emitted incrementally during `tutor ingest` so a long run is
//! auditable mid-flight. Events go to **stderr** so stdout remains parseable
//! for scripts; the final per-kind summary goes to stdout.

use std::io::Write;

/// Phase of the ingestion pipeline for one document kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    LoadingSource,
    UpsertingDocuments,
    GeneratingEmbeddings,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::LoadingSource => "loading source",
            Phase::UpsertingDocuments => "upserting documents",
            Phase::GeneratingEmbeddings => "generating embeddings",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum IngestEvent {
    PhaseStarted {
        kind: &'static str,
        phase: Phase,
    },
    /// Emitted after every completed batch.
    BatchCompleted {
        kind: &'static str,
        processed: usize,
        total: usize,
        embedded: usize,
        skipped: usize,
        failed: usize,
    },
}

/// Reports ingestion progress. Implementations write to stderr.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IngestEvent);
}

/// Human-friendly progress: "ingest cards  1,200 / 30,000  (embedded 1,180, skipped 20)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: IngestEvent) {
        let line = match &event {
            IngestEvent::PhaseStarted { kind, phase } => {
                format!("ingest {}  {}...\n", kind, phase.name())
            }
            IngestEvent::BatchCompleted {
                kind,
                processed,
                total,
                embedded,
                skipped,
                failed,
            } => format!(
                "ingest {}  {} / {}  (embedded {}, skipped {}, failed {})\n",
                kind,
                format_number(*processed as u64),
                format_number(*total as u64),
                format_number(*embedded as u64),
                format_number(*skipped as u64),
                format_number(*failed as u64),
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: IngestEvent) {
        let obj = match &event {
            IngestEvent::PhaseStarted { kind, phase } => serde_json::json!({
                "event": "progress",
                "kind": kind,
                "phase": phase.name(),
            }),
            IngestEvent::BatchCompleted {
                kind,
                processed,
                total,
                embedded,
                skipped,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "kind": kind,
                "processed": processed,
                "total": total,
                "embedded": embedded,
                "skipped": skipped,
                "failed": failed,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IngestEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
