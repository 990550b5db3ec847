use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub type ApplicationId = String;
pub type ExecutionId = String;

/// Raw caller-supplied field mapping. Values are scalars or value-lists.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

pub const OUTPUT_BATCH_EXECUTION_ID: &str = "batch_execution_id";
pub const OUTPUT_APPLICATION_ID: &str = "application_id";

/// Static credentials for one invocation. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Remote status string for an application or a batch execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteStatus(pub String);

impl RemoteStatus {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(BridgeError::Validation(format!(
                "unknown log format '{other}' (expected text or json)"
            ))),
        }
    }
}

/// The ten operations a task invocation can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    ListApplications,
    ListEnvironments,
    StartBatch,
    FetchLogs,
    StartApplication,
    StopApplication,
    CancelBatchExecution,
    ListBatchJobs,
    /// Populates the `application` selection control.
    ApplicationChoices,
    /// Dynamic no-op command that echoes its fields.
    Rerun,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::ListApplications,
        Action::ListEnvironments,
        Action::StartBatch,
        Action::FetchLogs,
        Action::StartApplication,
        Action::StopApplication,
        Action::CancelBatchExecution,
        Action::ListBatchJobs,
        Action::ApplicationChoices,
        Action::Rerun,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::ListApplications => "list-applications",
            Action::ListEnvironments => "list-environments",
            Action::StartBatch => "start-batch",
            Action::FetchLogs => "fetch-logs",
            Action::StartApplication => "start-application",
            Action::StopApplication => "stop-application",
            Action::CancelBatchExecution => "cancel-batch-execution",
            Action::ListBatchJobs => "list-batch-jobs",
            Action::ApplicationChoices => "application-choices",
            Action::Rerun => "rerun",
        }
    }
}

impl FromStr for Action {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| BridgeError::UnsupportedAction(s.to_string()))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedOutput {
    pub name: String,
    pub data: String,
}

/// The single observable output of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionResult {
    pub rc: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<NamedOutput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl ExtensionResult {
    pub fn new(rc: i32, message: impl Into<String>) -> Self {
        Self {
            rc,
            message: message.into(),
            output_fields: BTreeMap::new(),
            output: None,
            values: Vec::new(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    pub fn is_success(&self) -> bool {
        self.rc == 0
    }
}

impl From<&BridgeError> for ExtensionResult {
    fn from(err: &BridgeError) -> Self {
        ExtensionResult::new(err.return_code(), err.result_message())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unsupported action: '{0}'")]
    UnsupportedAction(String),
    #[error("signing error: {0}")]
    Signing(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote rejected request with status {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("undecodable response body (status {status}): {reason}")]
    Decode {
        status: u16,
        body: String,
        reason: String,
    },
    #[error("response (status {status}) is missing field '{field}'")]
    MissingField {
        status: u16,
        body: String,
        field: &'static str,
    },
    #[error("gave up after {waited_secs}s waiting for a terminal status (last status: {last_status})")]
    PollDeadline { waited_secs: u64, last_status: String },
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl BridgeError {
    /// Fatal errors abort the running operation: no log fetch, no further polling.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Signing(_) | BridgeError::Transport(_) | BridgeError::Output(_)
        )
    }

    pub fn return_code(&self) -> i32 {
        match self {
            BridgeError::MissingField { .. } => 2,
            _ => 1,
        }
    }

    /// Message placed in the final result for this failure.
    pub fn result_message(&self) -> String {
        match self {
            BridgeError::Remote { status, body } | BridgeError::Decode { status, body, .. } => {
                format!("FAILED: Response body = {body}, status_code = {status}")
            }
            BridgeError::MissingField { status, body, .. } => format!(
                "FAILED while parsing response! Response body = {body}, status_code = {status}"
            ),
            BridgeError::UnsupportedAction(name) => format!("Unsupported action: '{name}'"),
            other => format!("ERROR: {other}"),
        }
    }
}

/// Sends one already-signed request. Implementations never retry.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, BridgeError>;
}

pub trait SecretStore: Send + Sync {
    fn get(&self, secret_ref: &str) -> Option<String>;
}

/// Time source for the polling loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Entry point the host framework calls once per task instance.
pub trait TaskEngine: Send + Sync {
    fn run(&self, fields: &FieldMap, stdout: &mut dyn Write) -> ExtensionResult;
}
