//! Batch progress reporting.
//!
//! Reports observable progress while a pipeline runs so operators can see
//! how many batches are left. Progress is emitted on **stderr** so stdout
//! stays parseable for scripts; structured logs go through `tracing`.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    BatchStarted {
        pipeline: String,
        batch: usize,
        batches: usize,
        size: usize,
    },
    BatchFinished {
        pipeline: String,
        batch: usize,
        batches: usize,
        committed: usize,
        failed: usize,
    },
}

/// Receives progress events from the orchestrator.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "images  batch 3 / 12  done (2 ok, 0 failed)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::BatchStarted {
                pipeline,
                batch,
                batches,
                size,
            } => format!(
                "{}  batch {} / {}  started ({} artifacts)\n",
                pipeline,
                format_number(*batch as u64),
                format_number(*batches as u64),
                size
            ),
            ProgressEvent::BatchFinished {
                pipeline,
                batch,
                batches,
                committed,
                failed,
            } => format!(
                "{}  batch {} / {}  done ({} ok, {} failed)\n",
                pipeline,
                format_number(*batch as u64),
                format_number(*batches as u64),
                committed,
                failed
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::BatchStarted {
                pipeline,
                batch,
                batches,
                size,
            } => serde_json::json!({
                "event": "batch_started",
                "pipeline": pipeline,
                "batch": batch,
                "batches": batches,
                "size": size
            }),
            ProgressEvent::BatchFinished {
                pipeline,
                batch,
                batches,
                committed,
                failed,
            } => serde_json::json!({
                "event": "batch_finished",
                "pipeline": pipeline,
                "batch": batch,
                "batches": batches,
                "committed": committed,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
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
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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
