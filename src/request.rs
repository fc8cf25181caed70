use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid queue envelope body: {0}")]
    EnvelopeBody(#[source] serde_json::Error),
    #[error("invalid custom resource request: {0}")]
    RequestPayload(#[source] serde_json::Error),
}

/// Dispatch value for the router. Anything that is not `Create` or `Delete`
/// (including a missing `RequestType` field) lands in `Other` and is
/// acknowledged without running the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestType {
    Create,
    Delete,
    Other(String),
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestType::Create => write!(f, "Create"),
            RequestType::Delete => write!(f, "Delete"),
            RequestType::Other(raw) => write!(f, "{raw}"),
        }
    }
}

/// A provisioning instruction from the orchestrator, immutable once parsed.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceRequest {
    #[serde(default)]
    pub request_type: Option<String>,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_properties: Map<String, Value>,
}

impl CustomResourceRequest {
    pub fn request_type(&self) -> RequestType {
        match self.request_type.as_deref() {
            Some("Create") => RequestType::Create,
            Some("Delete") => RequestType::Delete,
            Some(other) => RequestType::Other(other.to_string()),
            None => RequestType::Other("<missing>".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EnvelopeBody {
    #[serde(rename = "Message")]
    message: String,
}

/// The envelope body is doubly encoded: a JSON object whose `Message` field
/// is itself a JSON-encoded request.
pub fn parse_envelope_body(body: &str) -> Result<CustomResourceRequest, ParseError> {
    let outer: EnvelopeBody = serde_json::from_str(body).map_err(ParseError::EnvelopeBody)?;
    serde_json::from_str(&outer.message).map_err(ParseError::RequestPayload)
}

/// A resource property value is either a plain literal or a single-key
/// mapping naming a conversion function and its argument list.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue<'a> {
    Literal(&'a Value),
    FunctionCall { name: &'a str, args: &'a Value },
}

pub fn classify_property(value: &Value) -> PropertyValue<'_> {
    if let Value::Object(map) = value {
        if map.len() == 1 {
            if let Some((name, args)) = map.iter().next() {
                return PropertyValue::FunctionCall { name, args };
            }
        }
    }
    PropertyValue::Literal(value)
}
