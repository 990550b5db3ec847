use std::sync::Arc;

use m2_api::{BridgeError, Credentials, HttpRequest, LogFormat, Method, Transport};
use m2_core::{LOGS_SERVICE, join_url};
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::control_plane::decode;
use crate::signer::RequestSigner;

const FILTER_LOG_EVENTS_TARGET: &str = "Logs_20140328.FilterLogEvents";

/// Log group the platform writes an application's console output to.
pub fn console_log_group(application_id: &str) -> String {
    format!("/aws/vendedlogs/m2/{application_id}/ConsoleLog")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery<'a> {
    pub application_id: &'a str,
    /// Empty means no server-side filter.
    pub filter_pattern: &'a str,
    pub log_stream_name: &'a str,
    pub format: LogFormat,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FilterLogEventsRequest<'a> {
    log_group_name: String,
    log_stream_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_pattern: Option<&'a str>,
}

pub struct LogClient {
    transport: Arc<dyn Transport>,
    signer: RequestSigner,
    base_url: String,
}

impl LogClient {
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials, base_url: String) -> Self {
        Self {
            transport,
            signer: RequestSigner::new(credentials, LOGS_SERVICE),
            base_url,
        }
    }

    /// Runs one filter query and renders the result as stdout lines.
    pub fn fetch_log_events(&self, query: &LogQuery<'_>) -> Result<Vec<String>, BridgeError> {
        let payload = FilterLogEventsRequest {
            log_group_name: console_log_group(query.application_id),
            log_stream_name: query.log_stream_name,
            filter_pattern: Some(query.filter_pattern).filter(|p| !p.is_empty()),
        };
        let body = serde_json::to_string(&payload).map_err(|e| BridgeError::Decode {
            status: 0,
            body: String::new(),
            reason: format!("failed to encode log query: {e}"),
        })?;

        let mut request = HttpRequest::new(Method::Post, join_url(&self.base_url, "/"))
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("Accept", "application/json")
            .header("X-Amz-Target", FILTER_LOG_EVENTS_TARGET)
            .body(body);
        tracing::debug!(log_group = %payload.log_group_name, stream = query.log_stream_name, filter = ?payload.filter_pattern, "fetching log events");
        self.signer.sign(&mut request)?;

        let resp = self.transport.send(&request)?;
        if !resp.is_ok() {
            tracing::warn!(status = resp.status, body = %resp.body, "log query rejected");
            return Err(BridgeError::Remote {
                status: resp.status,
                body: resp.body,
            });
        }

        let value: Value = decode(&resp)?;
        render(&value, query.format).map_err(|reason| BridgeError::Decode {
            status: resp.status,
            body: resp.body.clone(),
            reason,
        })
    }
}

/// `Text` keeps only each event's message, in response order, and skips events
/// without one; `Json` is the whole payload, key-sorted with four-space indentation.
fn render(value: &Value, format: LogFormat) -> Result<Vec<String>, String> {
    match format {
        LogFormat::Json => Ok(vec![pretty_sorted(value)?]),
        LogFormat::Text => {
            let events = match value.get("events") {
                None | Some(Value::Null) => return Ok(Vec::new()),
                Some(Value::Array(events)) => events,
                Some(other) => return Err(format!("'events' is not a list: {other}")),
            };
            Ok(events
                .iter()
                .filter_map(|event| match event.get("message") {
                    Some(Value::String(message)) => Some(message.clone()),
                    None | Some(Value::Null) => None,
                    Some(other) => Some(other.to_string()),
                })
                .collect())
        }
    }
}

fn pretty_sorted(value: &Value) -> Result<String, String> {
    let sorted = sort_keys(value);
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    sorted.serialize(&mut ser).map_err(|e| e.to_string())?;
    String::from_utf8(buf).map_err(|e| e.to_string())
}

// Rebuilt explicitly so ordering holds even if serde_json keeps insertion order.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
