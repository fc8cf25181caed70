pub mod render;

use crate::config::StatePaths;
use crate::runner::RunListener;
use crate::shared::{fs_atomic, logging};
use chrono::Utc;
use serde_json::{Map, Value};

pub const REASON_NO_RESULT: &str = "No result set for this request";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Progress,
    Ok,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Progress => "progress",
            StepStatus::Ok => "ok",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    InProgress,
    Ok,
    Failed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::InProgress => "in-progress",
            RequestStatus::Ok => "ok",
            RequestStatus::Failed => "failed",
        }
    }
}

/// One observable phase of a run: a play, a task, or setup.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEvent {
    pub time: String,
    pub title: String,
    pub status: StepStatus,
    pub result: Option<Value>,
}

/// One handled Create request: its ordered step history and terminal fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub id: String,
    pub started_at: String,
    pub status: RequestStatus,
    pub reason: Option<String>,
    pub data: Map<String, Value>,
    pub steps: Vec<StepEvent>,
}

/// Ordered history of handled requests, rendered to the status page on every
/// mutation. Only ever touched from the single processing thread, so it
/// carries no locks.
pub struct ProgressTracker {
    paths: StatePaths,
    records: Vec<RequestRecord>,
}

impl ProgressTracker {
    /// Renders immediately so the operator page exists from startup onward.
    pub fn new(paths: StatePaths) -> Self {
        let tracker = Self {
            paths,
            records: Vec::new(),
        };
        tracker.render();
        tracker
    }

    pub fn records(&self) -> &[RequestRecord] {
        &self.records
    }

    /// Opens a new record. A predecessor that never got a terminal verdict
    /// is force-closed as failed first, so the page never shows two requests
    /// in flight.
    pub fn begin_request(&mut self, id: &str) {
        if let Some(open) = self
            .records
            .last_mut()
            .filter(|record| record.status == RequestStatus::InProgress)
        {
            close_record(open, RequestStatus::Failed, REASON_NO_RESULT, Map::new());
        }
        self.records.push(RequestRecord {
            id: id.to_string(),
            started_at: now_stamp(),
            status: RequestStatus::InProgress,
            reason: None,
            data: Map::new(),
            steps: Vec::new(),
        });
        self.render();
    }

    /// Appends a step to the current record, closing a still-open previous
    /// step to ok. After this, at most the last step is in progress.
    pub fn add_step(&mut self, title: &str) {
        let Some(record) = self.records.last_mut() else {
            self.log("error", "progress.no_request", "no request for add_step");
            return;
        };
        if let Some(open) = record
            .steps
            .last_mut()
            .filter(|step| step.status == StepStatus::Progress)
        {
            open.status = StepStatus::Ok;
        }
        record.steps.push(StepEvent {
            time: now_stamp(),
            title: title.to_string(),
            status: StepStatus::Progress,
            result: None,
        });
        self.render();
    }

    pub fn set_step_result(&mut self, status: StepStatus, result: Option<Value>) {
        let Some(step) = self
            .records
            .last_mut()
            .and_then(|record| record.steps.last_mut())
        else {
            self.log("error", "progress.no_step", "no step for set_step_result");
            return;
        };
        step.status = status;
        step.result = result;
        self.render();
    }

    pub fn close_request(
        &mut self,
        status: RequestStatus,
        reason: &str,
        data: Map<String, Value>,
    ) {
        let Some(record) = self.records.last_mut() else {
            self.log("error", "progress.no_request", "no request for close_request");
            return;
        };
        close_record(record, status, reason, data);
        self.render();
    }

    pub fn log(&self, level: &str, event: &str, message: &str) {
        logging::append_log(&self.paths, level, event, message);
    }

    fn render(&self) {
        let page = render::status_page(&self.records);
        if let Err(err) = fs_atomic::atomic_write_file(&self.paths.status_page_path(), page.as_bytes())
        {
            logging::append_log(
                &self.paths,
                "error",
                "progress.render",
                &format!("status page write failed: {err}"),
            );
        }
    }
}

fn close_record(record: &mut RequestRecord, status: RequestStatus, reason: &str, data: Map<String, Value>) {
    // a closed record must not show a step still running
    if let Some(open) = record
        .steps
        .last_mut()
        .filter(|step| step.status == StepStatus::Progress)
    {
        open.status = match status {
            RequestStatus::Failed => StepStatus::Failed,
            _ => StepStatus::Ok,
        };
    }
    record.status = status;
    record.reason = Some(reason.to_string());
    record.data = data;
}

fn now_stamp() -> String {
    Utc::now().format(TIME_FORMAT).to_string()
}

/// Runner events route straight into the tracker. Host results mutate the
/// current step; unreachable/no-hosts and the async/diff chatter have no
/// per-host step result, so they are logged only.
impl RunListener for ProgressTracker {
    fn on_play_start(&mut self, name: &str) {
        self.add_step(&format!("starting playbook {{{name}}}"));
        self.log("info", "runner.play", name);
    }

    fn on_task_start(&mut self, name: &str) {
        self.add_step(name);
        self.log("info", "runner.task", name);
    }

    fn on_setup(&mut self) {
        self.add_step("setup");
    }

    fn on_host_ok(&mut self, host: &str, result: &Value) {
        self.set_step_result(StepStatus::Ok, Some(result.clone()));
        self.log("info", "runner.host_ok", host);
    }

    fn on_host_failed(&mut self, host: &str, result: &Value) {
        self.set_step_result(StepStatus::Failed, Some(result.clone()));
        self.log("error", "runner.host_failed", &format!("{host}: {result}"));
    }

    fn on_host_skipped(&mut self, host: &str) {
        self.set_step_result(StepStatus::Skipped, None);
        self.log("info", "runner.host_skipped", host);
    }

    fn on_unreachable(&mut self, host: &str, result: &Value) {
        self.log("error", "runner.unreachable", &format!("{host}: {result}"));
    }

    fn on_no_hosts(&mut self) {
        self.log("error", "runner.no_hosts", "no hosts matched");
    }

    fn on_async_poll(&mut self, host: &str, result: &Value) {
        self.log("info", "runner.async_poll", &format!("{host}: {result}"));
    }

    fn on_file_diff(&mut self, host: &str, _diff: &Value) {
        self.log("info", "runner.file_diff", host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn tracker() -> (tempfile::TempDir, ProgressTracker) {
        let dir = tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path());
        let tracker = ProgressTracker::new(paths);
        (dir, tracker)
    }

    fn statuses(record: &RequestRecord) -> Vec<StepStatus> {
        record.steps.iter().map(|step| step.status).collect()
    }

    #[test]
    fn at_most_the_last_step_is_in_progress() {
        let (_dir, mut tracker) = tracker();
        tracker.begin_request("req-1");
        tracker.add_step("setup");
        tracker.add_step("install");
        tracker.add_step("license");

        let record = &tracker.records()[0];
        assert_eq!(
            statuses(record),
            vec![StepStatus::Ok, StepStatus::Ok, StepStatus::Progress]
        );
    }

    #[test]
    fn a_set_result_is_not_overwritten_by_the_next_step() {
        let (_dir, mut tracker) = tracker();
        tracker.begin_request("req-1");
        tracker.add_step("install");
        tracker.set_step_result(StepStatus::Failed, Some(json!({"msg": "boom"})));
        tracker.add_step("cleanup");

        let record = &tracker.records()[0];
        assert_eq!(statuses(record), vec![StepStatus::Failed, StepStatus::Progress]);
        assert_eq!(record.steps[0].result, Some(json!({"msg": "boom"})));
    }

    #[test]
    fn begin_request_force_closes_an_unfinished_predecessor() {
        let (_dir, mut tracker) = tracker();
        tracker.begin_request("req-1");
        tracker.add_step("install");
        tracker.begin_request("req-2");

        let first = &tracker.records()[0];
        assert_eq!(first.status, RequestStatus::Failed);
        assert_eq!(first.reason.as_deref(), Some(REASON_NO_RESULT));
        assert_eq!(statuses(first), vec![StepStatus::Failed]);

        let second = &tracker.records()[1];
        assert_eq!(second.status, RequestStatus::InProgress);
        assert!(second.steps.is_empty());
    }

    #[test]
    fn close_request_sets_the_terminal_fields() {
        let (_dir, mut tracker) = tracker();
        tracker.begin_request("req-1");
        tracker.add_step("install");
        let data = json!({ "Foo": "bar" }).as_object().expect("object").clone();
        tracker.close_request(RequestStatus::Ok, "ok", data.clone());

        let record = &tracker.records()[0];
        assert_eq!(record.status, RequestStatus::Ok);
        assert_eq!(record.reason.as_deref(), Some("ok"));
        assert_eq!(record.data, data);
        assert_eq!(statuses(record), vec![StepStatus::Ok]);
    }

    #[test]
    fn every_mutation_rerenders_the_status_page() {
        let (dir, mut tracker) = tracker();
        let page_path = StatePaths::new(dir.path()).status_page_path();
        assert!(page_path.is_file());

        tracker.begin_request("req-render");
        let page = std::fs::read_to_string(&page_path).expect("page");
        assert!(page.contains("req-render"));

        tracker.add_step("install firewall");
        let page = std::fs::read_to_string(&page_path).expect("page");
        assert!(page.contains("install firewall"));
    }

    #[test]
    fn runner_events_drive_the_current_record() {
        let (_dir, mut tracker) = tracker();
        tracker.begin_request("req-1");
        tracker.on_play_start("provision");
        tracker.on_setup();
        tracker.on_task_start("install");
        tracker.on_host_failed("localhost", &json!({"rc": 2}));
        tracker.on_unreachable("127.0.0.1", &json!({"msg": "timeout"}));

        let record = &tracker.records()[0];
        assert_eq!(
            record.steps.iter().map(|s| s.title.as_str()).collect::<Vec<_>>(),
            vec!["starting playbook {provision}", "setup", "install"]
        );
        assert_eq!(
            statuses(record),
            vec![StepStatus::Ok, StepStatus::Ok, StepStatus::Failed]
        );
        assert_eq!(record.steps[2].result, Some(json!({"rc": 2})));
    }

    #[test]
    fn skipped_steps_carry_no_payload() {
        let (_dir, mut tracker) = tracker();
        tracker.begin_request("req-1");
        tracker.on_task_start("license");
        tracker.on_host_skipped("localhost");

        let step = &tracker.records()[0].steps[0];
        assert_eq!(step.status, StepStatus::Skipped);
        assert_eq!(step.result, None);
    }
}
