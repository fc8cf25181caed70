use super::{drive_events, verdict_from_stats, RunListener, RunnerError, Verdict};
use serde_json::{Map, Value};
use std::io::{BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

#[derive(Debug, Clone)]
pub struct RunnerInvocation<'a> {
    pub binary: &'a str,
    pub playbook_path: &'a Path,
    pub module_path: &'a Path,
    pub variables: &'a Map<String, Value>,
    pub target_hosts: &'a str,
}

/// Invokes the external runner and blocks until it finishes. Listener events
/// fire on the calling thread while the run streams; the verdict is computed
/// from the final aggregate stats once the process exits cleanly.
///
/// Runner faults surface as error values; the request-handling boundary one
/// level up decides how to report them.
pub fn execute_playbook(
    invocation: &RunnerInvocation<'_>,
    ignore_failures: bool,
    derived_outputs: &Map<String, Value>,
    listener: &mut dyn RunListener,
) -> Result<Verdict, RunnerError> {
    let extra_vars = serde_json::to_string(invocation.variables)
        .map_err(RunnerError::EncodeVariables)?;

    let mut command = Command::new(invocation.binary);
    command
        .arg("--playbook")
        .arg(invocation.playbook_path)
        .arg("--module-path")
        .arg(invocation.module_path)
        .arg("--inventory")
        .arg(invocation.target_hosts)
        .arg("--extra-vars")
        .arg(extra_vars)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(RunnerError::MissingBinary {
                binary: invocation.binary.to_string(),
            })
        }
        Err(err) => {
            return Err(RunnerError::Spawn {
                binary: invocation.binary.to_string(),
                source: err,
            })
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RunnerError::Io(std::io::Error::other("missing stdout pipe")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunnerError::Io(std::io::Error::other("missing stderr pipe")))?;

    let stderr_reader = thread::spawn(move || {
        let mut buf = String::new();
        let mut reader = BufReader::new(stderr);
        let _ = reader.read_to_string(&mut buf);
        buf
    });

    let stats = match drive_events(BufReader::new(stdout), listener) {
        Ok(stats) => stats,
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stderr_reader.join();
            return Err(err);
        }
    };

    let exit_status = child.wait().map_err(RunnerError::Io)?;
    let stderr = stderr_reader.join().unwrap_or_default();

    if !exit_status.success() {
        return Err(RunnerError::NonZeroExit {
            code: exit_status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        });
    }

    let stats = stats.ok_or(RunnerError::MissingStats)?;
    Ok(verdict_from_stats(&stats, ignore_failures, derived_outputs))
}
