//! End-to-end request handling: in-memory queue transport, local HTTP
//! stand-ins for the callback URL and the playbook source, and a fake runner
//! binary emitting the JSONL event feed.
#![cfg(unix)]

use provisiond::config::{Settings, StatePaths};
use provisiond::progress::{ProgressTracker, RequestStatus};
use provisiond::queue::{Envelope, QueueError, QueueTransport};
use provisiond::runtime::{handle_envelope, Context};
use provisiond::variables::FunctionRegistry;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

struct InMemoryQueue {
    pending: RefCell<VecDeque<Envelope>>,
    deleted: RefCell<Vec<String>>,
}

impl InMemoryQueue {
    fn new(envelopes: Vec<Envelope>) -> Self {
        Self {
            pending: RefCell::new(envelopes.into()),
            deleted: RefCell::new(Vec::new()),
        }
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.borrow().clone()
    }
}

impl QueueTransport for InMemoryQueue {
    fn receive(&self) -> Result<Option<Envelope>, QueueError> {
        Ok(self.pending.borrow_mut().pop_front())
    }

    fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.deleted.borrow_mut().push(receipt_handle.to_string());
        Ok(())
    }
}

struct CapturedRequest {
    method: String,
    body: Value,
}

/// Accepts one HTTP request, hands it to the test, answers 200.
fn capture_one_request() -> (String, mpsc::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let raw = read_http_request(&mut stream);
        let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw.as_str(), ""));
        let method = head.split_whitespace().next().unwrap_or("").to_string();
        let body = serde_json::from_str(body).unwrap_or(Value::Null);
        let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let _ = tx.send(CapturedRequest { method, body });
    });
    (format!("http://{addr}/callback"), rx)
}

fn read_http_request(stream: &mut std::net::TcpStream) -> String {
    let mut collected = Vec::new();
    let mut buf = [0_u8; 1024];
    loop {
        let read = stream.read(&mut buf).unwrap_or(0);
        if read == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..read]);
        let raw = String::from_utf8_lossy(&collected);
        if let Some((head, body)) = raw.split_once("\r\n\r\n") {
            let expected = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if body.len() >= expected {
                break;
            }
        }
    }
    String::from_utf8_lossy(&collected).to_string()
}

fn serve_playbook(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut buf = [0_u8; 2048];
        let _ = stream.read(&mut buf);
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes());
    });
    format!("http://{addr}/pb.yml")
}

fn fake_runner(dir: &Path, feed: &str) -> PathBuf {
    let marker = dir.join("runner-invoked");
    let path = dir.join("fake-runner");
    let script = format!(
        "#!/bin/sh\ntouch {}\ncat <<'FEED'\n{}\nFEED\n",
        marker.display(),
        feed.trim()
    );
    fs::write(&path, script).expect("write runner");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

fn envelope(request: &Value, receipt_handle: &str) -> Envelope {
    Envelope {
        body: json!({ "Message": request.to_string() }).to_string(),
        receipt_handle: receipt_handle.to_string(),
    }
}

fn request_body(request_type: &str, response_url: &str, properties: Value) -> Value {
    json!({
        "RequestType": request_type,
        "StackId": "arn:aws:cloudformation:us-east-1:1:stack/s/1",
        "RequestId": "req-1",
        "LogicalResourceId": "Firewall",
        "ResponseURL": response_url,
        "ResourceProperties": properties,
    })
}

struct Harness {
    _dir: tempfile::TempDir,
    paths: StatePaths,
    settings: Settings,
    key_path: PathBuf,
}

impl Harness {
    fn new(runner_bin: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = StatePaths::new(dir.path());
        let runner_bin = runner_bin.to_string();
        let settings = Settings::from_lookup(move |name| match name {
            "AWS_REGION" => Some("us-east-1".to_string()),
            "AWS_SQS_URL" => Some("https://sqs.example/q".to_string()),
            "STACKNAME" => Some("stack-1".to_string()),
            "PROVISIOND_RUNNER_BIN" => Some(runner_bin.clone()),
            _ => None,
        })
        .expect("settings");
        let key_path = dir.path().join("keys/stack-1.pem");
        fs::create_dir_all(key_path.parent().expect("parent")).expect("keys dir");
        fs::write(&key_path, "key material").expect("key file");
        Self {
            _dir: dir,
            paths,
            settings,
            key_path,
        }
    }

    fn context<'a>(&self, queue: &'a InMemoryQueue) -> Context<'a> {
        Context {
            settings: self.settings.clone(),
            paths: self.paths.clone(),
            queue,
            key_path: self.key_path.clone(),
            functions: FunctionRegistry::builtin(),
            tracker: ProgressTracker::new(self.paths.clone()),
        }
    }
}

#[test]
fn delete_requests_are_acknowledged_without_running_anything() {
    let runner_dir = tempfile::tempdir().expect("runner dir");
    let runner = fake_runner(runner_dir.path(), "{\"event\":\"stats\",\"stats\":{}}");
    let harness = Harness::new(runner.to_str().expect("utf8 path"));
    let (callback_url, captured) = capture_one_request();
    let queue = InMemoryQueue::new(vec![envelope(
        &request_body("Delete", &callback_url, json!({})),
        "rh-delete",
    )]);
    let mut ctx = harness.context(&queue);

    let env = queue.receive().expect("receive").expect("envelope");
    handle_envelope(&mut ctx, &env).expect("handle");

    let reply = captured.recv().expect("callback");
    assert_eq!(reply.method, "PUT");
    assert_eq!(reply.body["Status"], json!("SUCCESS"));
    assert!(reply.body.get("Reason").is_none());
    assert_eq!(queue.deleted(), vec!["rh-delete".to_string()]);
    assert!(ctx.tracker.records().is_empty());
    assert!(!runner_dir.path().join("runner-invoked").exists());
}

#[test]
fn unrecognized_request_types_are_acknowledged_as_success() {
    let harness = Harness::new("/nonexistent/never-spawned");
    let (callback_url, captured) = capture_one_request();
    let queue = InMemoryQueue::new(vec![envelope(
        &request_body("Update", &callback_url, json!({})),
        "rh-update",
    )]);
    let mut ctx = harness.context(&queue);

    let env = queue.receive().expect("receive").expect("envelope");
    handle_envelope(&mut ctx, &env).expect("handle");

    let reply = captured.recv().expect("callback");
    assert_eq!(reply.body["Status"], json!("SUCCESS"));
    assert_eq!(queue.deleted(), vec!["rh-update".to_string()]);

    let log = fs::read_to_string(harness.paths.log_path()).expect("log");
    assert!(log.contains("request.unhandled"));
    assert!(log.contains("Update"));
}

#[test]
fn a_missing_playbook_url_fails_with_the_exact_reason() {
    let runner_dir = tempfile::tempdir().expect("runner dir");
    let runner = fake_runner(runner_dir.path(), "{\"event\":\"stats\",\"stats\":{}}");
    let harness = Harness::new(runner.to_str().expect("utf8 path"));
    let (callback_url, captured) = capture_one_request();
    let queue = InMemoryQueue::new(vec![envelope(
        &request_body("Create", &callback_url, json!({ "Foo": "bar" })),
        "rh-create",
    )]);
    let mut ctx = harness.context(&queue);

    let env = queue.receive().expect("receive").expect("envelope");
    handle_envelope(&mut ctx, &env).expect("handle");

    let reply = captured.recv().expect("callback");
    assert_eq!(reply.body["Status"], json!("FAILED"));
    assert_eq!(reply.body["Reason"], json!("No URL specified"));
    assert!(!runner_dir.path().join("runner-invoked").exists());
    assert_eq!(queue.deleted(), vec!["rh-create".to_string()]);

    let record = &ctx.tracker.records()[0];
    assert_eq!(record.status, RequestStatus::Failed);
    assert_eq!(record.reason.as_deref(), Some("No URL specified"));
}

#[test]
fn a_clean_create_reports_success_with_derived_outputs() {
    let feed = r#"
{"event":"play_start","name":"provision"}
{"event":"setup"}
{"event":"task_start","name":"configure"}
{"event":"host_result","host":"localhost","status":"ok","result":{"changed":true}}
{"event":"stats","stats":{"ok":{"localhost":2},"failures":{},"unreachable":{},"skipped":{}}}
"#;
    let dir = tempfile::tempdir().expect("runner dir");
    let runner = fake_runner(dir.path(), feed);
    let harness = Harness::new(runner.to_str().expect("utf8 path"));

    let (callback_url, captured) = capture_one_request();
    let playbook_url = serve_playbook("- hosts: all\n");
    let properties = json!({
        "PlaybookURL": playbook_url,
        "MgmtDNS": { "VMSeriesHelper::ConvertToEC2DNS": ["1.2.3.4", "eu-west-1"] },
    });
    let queue = InMemoryQueue::new(vec![envelope(
        &request_body("Create", &callback_url, properties),
        "rh-ok",
    )]);
    let mut ctx = harness.context(&queue);

    let env = queue.receive().expect("receive").expect("envelope");
    handle_envelope(&mut ctx, &env).expect("handle");

    let reply = captured.recv().expect("callback");
    assert_eq!(reply.method, "PUT");
    assert_eq!(reply.body["Status"], json!("SUCCESS"));
    assert_eq!(
        reply.body["Data"],
        json!({ "MgmtDNS": "ec2-1-2-3-4.eu-west-1.compute.amazonaws.com" })
    );
    assert_eq!(queue.deleted(), vec!["rh-ok".to_string()]);

    let record = &ctx.tracker.records()[0];
    assert_eq!(record.status, RequestStatus::Ok);
    assert_eq!(record.reason.as_deref(), Some("ok"));
    let titles: Vec<&str> = record.steps.iter().map(|step| step.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["starting playbook {provision}", "setup", "configure"]
    );

    let page = fs::read_to_string(harness.paths.status_page_path()).expect("page");
    assert!(page.contains("configure"));
}

#[test]
fn runner_failures_reach_the_orchestrator_as_failed() {
    let feed = r#"
{"event":"play_start","name":"provision"}
{"event":"task_start","name":"configure"}
{"event":"host_result","host":"localhost","status":"failed","result":{"rc":2}}
{"event":"stats","stats":{"ok":{},"failures":{"localhost":1},"unreachable":{},"skipped":{}}}
"#;
    let dir = tempfile::tempdir().expect("runner dir");
    let runner = fake_runner(dir.path(), feed);
    let harness = Harness::new(runner.to_str().expect("utf8 path"));

    let (callback_url, captured) = capture_one_request();
    let playbook_url = serve_playbook("- hosts: all\n");
    let queue = InMemoryQueue::new(vec![envelope(
        &request_body("Create", &callback_url, json!({ "PlaybookURL": playbook_url })),
        "rh-fail",
    )]);
    let mut ctx = harness.context(&queue);

    let env = queue.receive().expect("receive").expect("envelope");
    handle_envelope(&mut ctx, &env).expect("handle");

    let reply = captured.recv().expect("callback");
    assert_eq!(reply.body["Status"], json!("FAILED"));
    assert_eq!(reply.body["Reason"], json!("runner: execution failed"));
    assert!(reply.body.get("Data").is_none());

    let record = &ctx.tracker.records()[0];
    assert_eq!(record.status, RequestStatus::Failed);
}

#[test]
fn an_undelivered_reply_still_commits_the_envelope() {
    let harness = Harness::new("/nonexistent/never-spawned");
    let queue = InMemoryQueue::new(vec![envelope(
        // nothing listens on this port
        &request_body("Delete", "http://127.0.0.1:9/reply", json!({})),
        "rh-lost",
    )]);
    let mut ctx = harness.context(&queue);

    let env = queue.receive().expect("receive").expect("envelope");
    handle_envelope(&mut ctx, &env).expect("handle");

    assert_eq!(queue.deleted(), vec!["rh-lost".to_string()]);
    let log = fs::read_to_string(harness.paths.log_path()).expect("log");
    assert!(log.contains("reply.undelivered"));
}

#[test]
fn a_malformed_envelope_is_dropped_not_fatal() {
    let harness = Harness::new("/nonexistent/never-spawned");
    let queue = InMemoryQueue::new(vec![Envelope {
        body: "not json".to_string(),
        receipt_handle: "rh-bad".to_string(),
    }]);
    let mut ctx = harness.context(&queue);

    let env = queue.receive().expect("receive").expect("envelope");
    handle_envelope(&mut ctx, &env).expect("handle");

    assert_eq!(queue.deleted(), vec!["rh-bad".to_string()]);
    let log = fs::read_to_string(harness.paths.log_path()).expect("log");
    assert!(log.contains("request.malformed"));
}
