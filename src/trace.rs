//! Run event capture for pipeline runs.
//!
//! Observers are per run: the controller hands every event to the observer
//! it was given, and nothing is buffered globally.

use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::agent::aggregate::AggregateBranch;
use crate::agent::reflect::Verdict;
use crate::agent::types::Stage;

#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub timestamp_ms: i64,
    pub run_id: Uuid,
    #[serde(flatten)]
    pub kind: RunEventKind,
}

impl RunEvent {
    pub fn new(run_id: Uuid, kind: RunEventKind) -> Self {
        Self {
            timestamp_ms: now_epoch_ms(),
            run_id,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEventKind {
    StageStarted {
        stage: Stage,
    },
    StageFinished {
        stage: Stage,
        elapsed_ms: u64,
    },
    PlanParsed {
        expected: usize,
        parsed: usize,
        missing: Vec<usize>,
    },
    StepFinished {
        key: String,
        index: usize,
        succeeded: bool,
        duration_ms: u64,
    },
    Reflected {
        verdict: Verdict,
    },
    Aggregated {
        branch: AggregateBranch,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("trace channel closed")]
    Closed,
    #[error("trace worker failed: {0}")]
    Join(String),
}

/// Receives events for a single run. Must not block.
pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: RunEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    fn on_event(&self, _event: RunEvent) {}
}

/// Writes events as JSON lines from a background thread.
#[derive(Clone)]
pub struct JsonlTraceSink {
    sender: mpsc::Sender<RunEvent>,
}

pub struct TraceWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TraceError>>>,
}

impl TraceWorker {
    /// Wait for the writer to drain; call after every sink clone is dropped.
    pub fn join(mut self) -> Result<(), TraceError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(TraceError::Join("trace worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlTraceSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<RunEvent>();
        let handle = std::thread::spawn(move || write_trace_loop(file, receiver));
        Ok((
            Self { sender },
            TraceWorker {
                handle: Some(handle),
            },
        ))
    }

    pub fn record(&self, event: RunEvent) -> Result<(), TraceError> {
        self.sender.send(event).map_err(|_| TraceError::Closed)
    }
}

impl RunObserver for JsonlTraceSink {
    fn on_event(&self, event: RunEvent) {
        if let Err(err) = self.record(event) {
            tracing::warn!(error = %err, "dropping run trace event");
        }
    }
}

fn write_trace_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<RunEvent>,
) -> Result<(), TraceError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line = serde_json::to_string(&event).map_err(|e| TraceError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
