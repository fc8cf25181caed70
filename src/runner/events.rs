use super::{AggregateStats, RunListener, RunnerError};
use serde::Deserialize;
use serde_json::Value;
use std::io::BufRead;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Ok,
    Failed,
    Skipped,
}

/// One line of the runner's stdout feed. Unknown event kinds deserialize to
/// `Other` so a newer runner does not break the worker.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunnerEvent {
    PlayStart {
        name: String,
    },
    TaskStart {
        name: String,
    },
    Setup,
    HostResult {
        host: String,
        status: HostStatus,
        #[serde(default)]
        result: Value,
    },
    Unreachable {
        host: String,
        #[serde(default)]
        result: Value,
    },
    NoHosts,
    AsyncPoll {
        host: String,
        #[serde(default)]
        result: Value,
    },
    FileDiff {
        host: String,
        #[serde(default)]
        diff: Value,
    },
    Stats {
        stats: AggregateStats,
    },
    #[serde(other)]
    Other,
}

/// Reads the JSONL event feed to exhaustion, dispatching each event to the
/// listener, and returns the final aggregate stats if the runner reported
/// them. A line that is not a valid event aborts the run.
pub fn drive_events<R: BufRead>(
    reader: R,
    listener: &mut dyn RunListener,
) -> Result<Option<AggregateStats>, RunnerError> {
    let mut stats = None;
    for line in reader.lines() {
        let line = line.map_err(RunnerError::Io)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let event: RunnerEvent = serde_json::from_str(trimmed)
            .map_err(|err| RunnerError::Event(format!("{err} in `{trimmed}`")))?;
        match event {
            RunnerEvent::PlayStart { name } => listener.on_play_start(&name),
            RunnerEvent::TaskStart { name } => listener.on_task_start(&name),
            RunnerEvent::Setup => listener.on_setup(),
            RunnerEvent::HostResult {
                host,
                status,
                result,
            } => match status {
                HostStatus::Ok => listener.on_host_ok(&host, &result),
                HostStatus::Failed => listener.on_host_failed(&host, &result),
                HostStatus::Skipped => listener.on_host_skipped(&host),
            },
            RunnerEvent::Unreachable { host, result } => listener.on_unreachable(&host, &result),
            RunnerEvent::NoHosts => listener.on_no_hosts(),
            RunnerEvent::AsyncPoll { host, result } => listener.on_async_poll(&host, &result),
            RunnerEvent::FileDiff { host, diff } => listener.on_file_diff(&host, &diff),
            RunnerEvent::Stats { stats: reported } => stats = Some(reported),
            RunnerEvent::Other => {}
        }
    }
    Ok(stats)
}
