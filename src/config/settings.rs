use super::ConfigError;
use std::path::PathBuf;

pub const DEFAULT_RUNNER_BIN: &str = "playbook-runner";
pub const DEFAULT_TARGET_HOSTS: &str = "localhost,127.0.0.1";

const STATE_ROOT_VAR: &str = "PROVISIOND_STATE_ROOT";

/// Startup configuration, read once from the environment. The region, queue
/// locator and key-pair name are owned by the deployment that installs the
/// service; the rest are local overrides with defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub region: String,
    pub queue_url: String,
    pub key_name: String,
    pub state_root: PathBuf,
    pub runner_bin: String,
    pub target_hosts: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let region = required(&lookup, "AWS_REGION")?;
        let queue_url = required(&lookup, "AWS_SQS_URL")?;
        let key_name = required(&lookup, "STACKNAME")?;
        validate_key_name(&key_name)?;

        let state_root = PathBuf::from(
            optional(&lookup, STATE_ROOT_VAR).unwrap_or_else(|| ".".to_string()),
        );
        let runner_bin = optional(&lookup, "PROVISIOND_RUNNER_BIN")
            .unwrap_or_else(|| DEFAULT_RUNNER_BIN.to_string());

        Ok(Self {
            region,
            queue_url,
            key_name,
            state_root,
            runner_bin,
            target_hosts: DEFAULT_TARGET_HOSTS.to_string(),
        })
    }

    /// The state root is also needed before settings parse, so the crash
    /// page has somewhere to go when required variables are missing.
    pub fn state_root_from_env() -> PathBuf {
        std::env::var(STATE_ROOT_VAR)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn required<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(_) => Err(ConfigError::EmptyVar {
            name: name.to_string(),
        }),
        None => Err(ConfigError::MissingVar {
            name: name.to_string(),
        }),
    }
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn validate_key_name(value: &str) -> Result<(), ConfigError> {
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Ok(());
    }
    Err(ConfigError::InvalidVar {
        name: "STACKNAME".to_string(),
        reason: "key name must use only ASCII letters, digits, '-' or '_'".to_string(),
    })
}
