use std::time::Duration;

use m2_api::{ApplicationId, BridgeError, Credentials, FieldMap, LogFormat, SecretStore};
use serde_json::Value;

use crate::{Endpoints, parse_resource_id};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_LOG_STREAM: &str = "*";

/// Typed, immutable view over one invocation's fields.
///
/// Every default lives in [`InvocationFields::from_map`]; nothing downstream
/// reads the raw map except the `rerun` echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationFields {
    pub action: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub end_point: String,
    pub region: String,
    pub application: Option<String>,
    pub jcl_file_name: String,
    pub jcl_file_name_temp: String,
    pub wait: bool,
    pub interval: Duration,
    /// `None` waits until a terminal status, however long that takes.
    pub max_wait: Option<Duration>,
    pub fetch_logs: bool,
    pub fetch_log_format: LogFormat,
    pub log_format: LogFormat,
    pub filter_pattern: String,
    pub log_stream_name: String,
    pub execution_id: String,
    pub force_stop: bool,
}

impl InvocationFields {
    pub fn from_map(map: &FieldMap) -> Result<Self, BridgeError> {
        let max_wait = u64_field(map, "max_wait")?.unwrap_or(0);
        Ok(Self {
            action: string_field(map, "action")?,
            access_key_id: non_empty(string_field(map, "credentials.user")?),
            secret_access_key: non_empty(string_field(map, "credentials.password")?),
            session_token: non_empty(string_field(map, "credentials.token")?),
            end_point: string_field(map, "end_point")?.unwrap_or_default(),
            region: non_empty(string_field(map, "region")?)
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            application: string_field(map, "application")?,
            jcl_file_name: string_field(map, "jcl_file_name")?.unwrap_or_default(),
            jcl_file_name_temp: string_field(map, "jcl_file_name_temp")?.unwrap_or_default(),
            wait: bool_field(map, "wait")?.unwrap_or(false),
            interval: Duration::from_secs(
                u64_field(map, "interval")?.unwrap_or(DEFAULT_INTERVAL_SECS),
            ),
            max_wait: (max_wait > 0).then(|| Duration::from_secs(max_wait)),
            fetch_logs: bool_field(map, "fetch_logs")?.unwrap_or(false),
            fetch_log_format: log_format_field(map, "fetch_log_format")?,
            log_format: log_format_field(map, "log_format")?,
            filter_pattern: string_field(map, "filter_pattern")?.unwrap_or_default(),
            log_stream_name: non_empty(string_field(map, "log_stream_name")?)
                .unwrap_or_else(|| DEFAULT_LOG_STREAM.to_string()),
            execution_id: string_field(map, "execution_id")?.unwrap_or_default(),
            force_stop: bool_field(map, "force_stop")?.unwrap_or(false),
        })
    }

    /// Application id parsed from the `"name (id)"` display string.
    pub fn application_id(&self) -> Option<ApplicationId> {
        self.application.as_deref().and_then(parse_resource_id)
    }

    /// The JCL file to submit: the override wins when non-empty.
    pub fn jcl_file(&self) -> &str {
        if self.jcl_file_name_temp.is_empty() {
            &self.jcl_file_name
        } else {
            &self.jcl_file_name_temp
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::resolve(&self.end_point, &self.region)
    }

    /// Resolves the static credential triple, falling back to the standard
    /// `AWS_*` secrets when the credential fields are empty.
    pub fn credentials(&self, secrets: &dyn SecretStore) -> Result<Credentials, BridgeError> {
        let (access_key_id, secret_access_key, session_token) =
            match (&self.access_key_id, &self.secret_access_key) {
                (Some(key), Some(secret)) => {
                    (key.clone(), secret.clone(), self.session_token.clone())
                }
                _ => {
                    let key = secrets.get("AWS_ACCESS_KEY_ID").ok_or_else(|| {
                        BridgeError::Signing("no access key id in fields or environment".into())
                    })?;
                    let secret = secrets.get("AWS_SECRET_ACCESS_KEY").ok_or_else(|| {
                        BridgeError::Signing(
                            "no secret access key in fields or environment".into(),
                        )
                    })?;
                    (key, secret, secrets.get("AWS_SESSION_TOKEN"))
                }
            };

        Ok(Credentials {
            access_key_id,
            secret_access_key,
            session_token: non_empty(session_token),
            region: self.region.clone(),
        })
    }
}

/// Choice fields arrive as single-element lists; scalars are taken as-is.
fn first_value<'a>(map: &'a FieldMap, key: &str) -> Option<&'a Value> {
    match map.get(key)? {
        Value::Array(items) => items.first().filter(|v| !v.is_null()),
        Value::Null => None,
        other => Some(other),
    }
}

fn string_field(map: &FieldMap, key: &str) -> Result<Option<String>, BridgeError> {
    match first_value(map, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(invalid(key, "a string", other)),
    }
}

fn bool_field(map: &FieldMap, key: &str) -> Result<Option<bool>, BridgeError> {
    match first_value(map, key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" | "" => Ok(Some(false)),
            _ => Err(invalid(key, "a boolean", &Value::String(s.clone()))),
        },
        Some(other) => Err(invalid(key, "a boolean", other)),
    }
}

fn u64_field(map: &FieldMap, key: &str) -> Result<Option<u64>, BridgeError> {
    match first_value(map, key) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(key, "a non-negative integer", &Value::Number(n.clone()))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(key, "a non-negative integer", &Value::String(s.clone()))),
        Some(other) => Err(invalid(key, "a non-negative integer", other)),
    }
}

fn log_format_field(map: &FieldMap, key: &str) -> Result<LogFormat, BridgeError> {
    string_field(map, key)?
        .map_or(Ok(LogFormat::Text), |s| s.trim().to_ascii_lowercase().parse())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn invalid(key: &str, expected: &str, got: &Value) -> BridgeError {
    BridgeError::Validation(format!("field '{key}' must be {expected}, got {got}"))
}
