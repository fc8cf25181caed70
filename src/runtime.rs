use crate::config::{ConfigError, Settings, StatePaths};
use crate::credentials::CredentialError;
use crate::playbook::{self, FetchError};
use crate::progress::{ProgressTracker, RequestStatus};
use crate::queue::{Envelope, QueueError, QueueTransport};
use crate::reply;
use crate::request::{self, CustomResourceRequest, RequestType};
use crate::runner::{self, RunnerError, RunnerInvocation, Verdict};
use crate::shared::logging;
use crate::variables::{self, FunctionRegistry, ResolveError, KEY_FILENAME_VAR};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

pub const IDLE_SLEEP_SECONDS: u64 = 10;

/// Faults that must stop the process: the loop cannot run without
/// credentials or a usable queue handle. Everything else is contained at the
/// per-request boundary.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("credential provisioning failed: {0}")]
    Credentials(#[from] CredentialError),
    #[error("queue failure: {0}")]
    Queue(#[from] QueueError),
}

/// Everything a request needs, built once at startup and passed by
/// reference. No global state.
pub struct Context<'a> {
    pub settings: Settings,
    pub paths: StatePaths,
    pub queue: &'a dyn QueueTransport,
    pub key_path: PathBuf,
    pub functions: FunctionRegistry,
    pub tracker: ProgressTracker,
}

/// What went wrong while handling one Create request. The kind decides the
/// reason string in the failure reply; none of these touch the loop.
#[derive(Debug, thiserror::Error)]
enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ResolveError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

impl PipelineError {
    /// Validation and transport failures are specific enough to forward to
    /// the orchestrator; runner faults get a generic reason, details stay in
    /// the log.
    fn reply_reason(&self) -> String {
        match self {
            PipelineError::Validation(err) => err.to_string(),
            PipelineError::Fetch(err) => err.to_string(),
            PipelineError::Runner(_) => "Error executing playbook".to_string(),
        }
    }
}

/// Polls until the process dies. An empty read sleeps a fixed interval and
/// retries; there is no backoff growth. Queue faults propagate to the crash
/// reporter.
pub fn run_loop(ctx: &mut Context<'_>) -> Result<(), FatalError> {
    logging::append_log(&ctx.paths, "info", "runtime.started", "polling for requests");
    loop {
        let Some(envelope) = ctx.queue.receive()? else {
            std::thread::sleep(Duration::from_secs(IDLE_SLEEP_SECONDS));
            continue;
        };
        handle_envelope(ctx, &envelope)?;
    }
}

/// Handles one envelope to completion. The delete at the end is the single
/// at-least-once commit point: it happens after the reply attempt in every
/// branch, and a crash before it causes redelivery and reprocessing.
pub fn handle_envelope(ctx: &mut Context<'_>, envelope: &Envelope) -> Result<(), FatalError> {
    match request::parse_envelope_body(&envelope.body) {
        Ok(request) => dispatch(ctx, &request),
        Err(err) => {
            // a body that never parses would redeliver forever; drop it
            logging::append_log(
                &ctx.paths,
                "error",
                "request.malformed",
                &err.to_string(),
            );
        }
    }
    ctx.queue.delete(&envelope.receipt_handle)?;
    Ok(())
}

fn dispatch(ctx: &mut Context<'_>, request: &CustomResourceRequest) {
    match request.request_type() {
        RequestType::Create => handle_create(ctx, request),
        RequestType::Delete => {
            // nothing to tear down locally; acknowledge so the stack
            // operation can proceed
            reply::notify(&ctx.paths, request, true, "OK", &Map::new());
        }
        RequestType::Other(kind) => {
            logging::append_log(
                &ctx.paths,
                "warn",
                "request.unhandled",
                &format!("unhandled RequestType {kind}"),
            );
            reply::notify(&ctx.paths, request, true, "OK", &Map::new());
        }
    }
}

/// The full provisioning pipeline. Whatever happens, the orchestrator gets
/// exactly one verdict and the progress record is closed with it.
fn handle_create(ctx: &mut Context<'_>, request: &CustomResourceRequest) {
    ctx.tracker.begin_request(&request.request_id);

    let verdict = match run_pipeline(ctx, request) {
        Ok(verdict) => verdict,
        Err(err) => {
            logging::append_log(&ctx.paths, "error", "pipeline.failed", &err.to_string());
            Verdict {
                success: false,
                reason: err.reply_reason(),
                data: Map::new(),
            }
        }
    };

    let delivered = reply::notify(
        &ctx.paths,
        request,
        verdict.success,
        &verdict.reason,
        &verdict.data,
    );
    if !delivered {
        logging::append_log(
            &ctx.paths,
            "error",
            "reply.lost",
            &format!("verdict for {} not delivered", request.request_id),
        );
    }

    let status = if verdict.success {
        RequestStatus::Ok
    } else {
        RequestStatus::Failed
    };
    ctx.tracker
        .close_request(status, &verdict.reason, verdict.data);
}

fn run_pipeline(
    ctx: &mut Context<'_>,
    request: &CustomResourceRequest,
) -> Result<Verdict, PipelineError> {
    let resolved = variables::resolve_properties(&ctx.functions, &request.resource_properties)?;
    let playbook_path = playbook::retrieve(&resolved.playbook_url, &ctx.paths.scratch_dir())?;

    let mut run_vars = resolved.variables.clone();
    run_vars.insert(
        KEY_FILENAME_VAR.to_string(),
        Value::String(ctx.key_path.display().to_string()),
    );

    let module_path = ctx.paths.module_path();
    let invocation = RunnerInvocation {
        binary: &ctx.settings.runner_bin,
        playbook_path: &playbook_path,
        module_path: &module_path,
        variables: &run_vars,
        target_hosts: &ctx.settings.target_hosts,
    };
    let verdict = runner::execute_playbook(
        &invocation,
        resolved.ignore_failures,
        &resolved.derived_outputs,
        &mut ctx.tracker,
    )?;
    Ok(verdict)
}
