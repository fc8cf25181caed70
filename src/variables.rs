use crate::request::{classify_property, PropertyValue};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const IGNORE_FAILURE_KEY: &str = "IgnorePlaybookFailure";
pub const PLAYBOOK_URL_KEY: &str = "PlaybookURL";
pub const FN_CONVERT_TO_EC2_DNS: &str = "VMSeriesHelper::ConvertToEC2DNS";

/// The variable the runner reads the credential path from.
pub const KEY_FILENAME_VAR: &str = "key_filename";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No URL specified")]
    MissingPlaybookUrl,
    #[error("unknown property function `{name}`")]
    UnknownFunction { name: String },
    #[error("{name} requires {expected} args")]
    WrongArgCount { name: String, expected: usize },
    #[error("{name} argument {index} must be a string")]
    InvalidArgType { name: String, index: usize },
    #[error("{name} requires an IPv4 address, got `{value}`")]
    InvalidIpArg { name: String, value: String },
}

type PropertyFunction = fn(&str, &[Value]) -> Result<Value, ResolveError>;

/// Named conversion functions recognized in property values. Adding a new
/// conversion is one `register` call; call sites stay untouched.
pub struct FunctionRegistry {
    functions: BTreeMap<&'static str, PropertyFunction>,
}

impl FunctionRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self {
            functions: BTreeMap::new(),
        };
        registry.register(FN_CONVERT_TO_EC2_DNS, convert_to_ec2_dns);
        registry
    }

    pub fn register(&mut self, name: &'static str, function: PropertyFunction) {
        self.functions.insert(name, function);
    }

    pub fn evaluate(&self, name: &str, args: &Value) -> Result<Value, ResolveError> {
        let Some(function) = self.functions.get(name) else {
            return Err(ResolveError::UnknownFunction {
                name: name.to_string(),
            });
        };
        let args = match args {
            Value::Array(items) => items.as_slice(),
            // a non-array argument list can never satisfy an arity check
            _ => &[],
        };
        function(name, args)
    }
}

fn convert_to_ec2_dns(name: &str, args: &[Value]) -> Result<Value, ResolveError> {
    if args.len() != 2 {
        return Err(ResolveError::WrongArgCount {
            name: name.to_string(),
            expected: 2,
        });
    }
    let ip = string_arg(name, args, 0)?;
    let region = string_arg(name, args, 1)?;

    let octets: Vec<&str> = ip.split('.').collect();
    if octets.len() != 4 || octets.iter().any(|octet| octet.is_empty()) {
        return Err(ResolveError::InvalidIpArg {
            name: name.to_string(),
            value: ip.to_string(),
        });
    }

    Ok(Value::String(format!(
        "ec2-{}-{}-{}-{}.{}.compute.amazonaws.com",
        octets[0], octets[1], octets[2], octets[3], region,
    )))
}

fn string_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, ResolveError> {
    args[index].as_str().ok_or_else(|| ResolveError::InvalidArgType {
        name: name.to_string(),
        index,
    })
}

/// The execution-variable mapping handed to the runner, plus what the
/// resolution derived along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVariables {
    pub variables: Map<String, Value>,
    /// Function-call results keyed by their original property name; included
    /// as the data payload of a successful completion reply.
    pub derived_outputs: Map<String, Value>,
    pub ignore_failures: bool,
    pub playbook_url: String,
}

pub fn resolve_properties(
    registry: &FunctionRegistry,
    properties: &Map<String, Value>,
) -> Result<ResolvedVariables, ResolveError> {
    let mut remaining = properties.clone();
    let ignore_failures = remaining
        .remove(IGNORE_FAILURE_KEY)
        .map(|value| ignore_flag_set(&value))
        .unwrap_or(false);
    let playbook_url = match remaining.remove(PLAYBOOK_URL_KEY) {
        Some(Value::String(url)) if !url.trim().is_empty() => url,
        _ => return Err(ResolveError::MissingPlaybookUrl),
    };

    let mut variables = Map::new();
    let mut derived_outputs = Map::new();
    for (key, value) in &remaining {
        match classify_property(value) {
            PropertyValue::Literal(literal) => {
                variables.insert(key.clone(), literal.clone());
            }
            PropertyValue::FunctionCall { name, args } => {
                let resolved = registry.evaluate(name, args)?;
                derived_outputs.insert(key.clone(), resolved.clone());
                variables.insert(key.clone(), resolved);
            }
        }
    }

    Ok(ResolvedVariables {
        variables,
        derived_outputs,
        ignore_failures,
        playbook_url,
    })
}

fn ignore_flag_set(value: &Value) -> bool {
    match value {
        Value::String(raw) => raw == "yes",
        Value::Bool(flag) => *flag,
        _ => false,
    }
}
