pub mod events;
mod execute;

pub use events::{drive_events, HostStatus, RunnerEvent};
pub use execute::{execute_playbook, RunnerInvocation};

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const REASON_OK: &str = "ok";
pub const REASON_ERRORS_IGNORED: &str = "Errors ignored";
pub const REASON_UNREACHABLE: &str = "runner: unreachable target";
pub const REASON_EXECUTION_FAILED: &str = "runner: execution failed";

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("runner binary not found: {binary}")]
    MissingBinary { binary: String },
    #[error("failed to spawn runner {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("runner io failure: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid runner event: {0}")]
    Event(String),
    #[error("runner exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    #[error("runner finished without reporting aggregate stats")]
    MissingStats,
    #[error("failed to encode execution variables: {0}")]
    EncodeVariables(#[source] serde_json::Error),
}

/// Receives the runner's event stream, one method per event kind. Every
/// method has a no-op default, so a listener implements only what it needs
/// (the progress tracker implements most; tests can pass `NoopListener`).
///
/// Events fire synchronously on the thread driving the run.
pub trait RunListener {
    fn on_play_start(&mut self, _name: &str) {}
    fn on_task_start(&mut self, _name: &str) {}
    fn on_setup(&mut self) {}
    fn on_host_ok(&mut self, _host: &str, _result: &Value) {}
    fn on_host_failed(&mut self, _host: &str, _result: &Value) {}
    fn on_host_skipped(&mut self, _host: &str) {}
    fn on_unreachable(&mut self, _host: &str, _result: &Value) {}
    fn on_no_hosts(&mut self) {}
    fn on_async_poll(&mut self, _host: &str, _result: &Value) {}
    fn on_file_diff(&mut self, _host: &str, _diff: &Value) {}
}

pub struct NoopListener;

impl RunListener for NoopListener {}

/// Per-host counters reported by the runner after the last play.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AggregateStats {
    #[serde(default)]
    pub ok: BTreeMap<String, u64>,
    #[serde(default)]
    pub failures: BTreeMap<String, u64>,
    #[serde(default)]
    pub unreachable: BTreeMap<String, u64>,
    #[serde(default)]
    pub skipped: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub success: bool,
    pub reason: String,
    pub data: Map<String, Value>,
}

/// The ignore-failures flag wins over everything the stats say; otherwise an
/// unreachable host outranks a failed task, and a clean run carries the
/// derived outputs as reply data.
pub fn verdict_from_stats(
    stats: &AggregateStats,
    ignore_failures: bool,
    derived_outputs: &Map<String, Value>,
) -> Verdict {
    if ignore_failures {
        return Verdict {
            success: true,
            reason: REASON_ERRORS_IGNORED.to_string(),
            data: derived_outputs.clone(),
        };
    }
    if !stats.unreachable.is_empty() {
        return Verdict {
            success: false,
            reason: REASON_UNREACHABLE.to_string(),
            data: Map::new(),
        };
    }
    if !stats.failures.is_empty() {
        return Verdict {
            success: false,
            reason: REASON_EXECUTION_FAILED.to_string(),
            data: Map::new(),
        };
    }
    Verdict {
        success: true,
        reason: REASON_OK.to_string(),
        data: derived_outputs.clone(),
    }
}
