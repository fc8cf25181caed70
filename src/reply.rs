use crate::config::StatePaths;
use crate::request::CustomResourceRequest;
use crate::shared::{ids, logging, now_secs};
use serde_json::{Map, Value};

pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_FAILED: &str = "FAILED";

/// The callback body the orchestrator expects. `Reason` only accompanies a
/// failure; `Data` only appears when there is something to report; a request
/// without a physical resource id gets a freshly generated one.
pub fn build_response_body(
    request: &CustomResourceRequest,
    success: bool,
    reason: &str,
    data: &Map<String, Value>,
) -> Value {
    let mut body = Map::new();
    body.insert(
        "Status".to_string(),
        Value::String(if success { STATUS_SUCCESS } else { STATUS_FAILED }.to_string()),
    );
    body.insert("StackId".to_string(), Value::String(request.stack_id.clone()));
    body.insert(
        "RequestId".to_string(),
        Value::String(request.request_id.clone()),
    );
    body.insert(
        "LogicalResourceId".to_string(),
        Value::String(request.logical_resource_id.clone()),
    );
    if !success {
        body.insert("Reason".to_string(), Value::String(reason.to_string()));
    }
    let physical_resource_id = request
        .physical_resource_id
        .clone()
        .unwrap_or_else(|| ids::generate_physical_resource_id(now_secs()));
    body.insert(
        "PhysicalResourceId".to_string(),
        Value::String(physical_resource_id),
    );
    if !data.is_empty() {
        body.insert("Data".to_string(), Value::Object(data.clone()));
    }
    Value::Object(body)
}

/// One PUT to the request's callback URL, no retry. The empty content type
/// is deliberate: the orchestrator's presigned endpoint rejects anything
/// else. Returns whether the verdict was delivered; an undelivered reply is
/// logged and does not change the recorded outcome.
pub fn notify(
    paths: &StatePaths,
    request: &CustomResourceRequest,
    success: bool,
    reason: &str,
    data: &Map<String, Value>,
) -> bool {
    let body = build_response_body(request, success, reason, data);
    let Ok(raw) = serde_json::to_string(&body) else {
        logging::append_log(paths, "error", "reply.encode", "response body not encodable");
        return false;
    };

    match ureq::put(&request.response_url)
        .set("Content-Type", "")
        .send_string(&raw)
    {
        Ok(response) => {
            logging::append_log(
                paths,
                "info",
                "reply.delivered",
                &format!("{} -> {}", request.request_id, response.status()),
            );
            true
        }
        Err(err) => {
            logging::append_log(
                paths,
                "error",
                "reply.undelivered",
                &format!("{}: {err}", request.request_id),
            );
            false
        }
    }
}
