mod fields;

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use m2_api::{BridgeError, FieldMap};
use regex::Regex;

pub use fields::{DEFAULT_INTERVAL_SECS, DEFAULT_LOG_STREAM, DEFAULT_REGION, InvocationFields};

pub const CONTROL_PLANE_SERVICE: &str = "m2";
pub const LOGS_SERVICE: &str = "logs";

static RESOURCE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.* \((.*)\)").expect("resource id pattern compiles"));

/// Extracts `id` from a `"name (id)"` display string.
///
/// Returns `None` when there is no parenthesized id, or when it is empty.
pub fn parse_resource_id(display: &str) -> Option<String> {
    RESOURCE_ID
        .captures(display)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|id| !id.is_empty())
}

/// Base URLs for the two services an invocation talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub control_plane: String,
    pub logs: String,
}

impl Endpoints {
    /// An empty `end_point` selects the regional control-plane endpoint.
    pub fn resolve(end_point: &str, region: &str) -> Self {
        let end_point = end_point.trim();
        let control_plane = if end_point.is_empty() {
            format!("https://{CONTROL_PLANE_SERVICE}.{region}.amazonaws.com")
        } else {
            end_point.to_string()
        };
        Self {
            control_plane,
            logs: format!("https://{LOGS_SERVICE}.{region}.amazonaws.com"),
        }
    }

    pub fn control_plane_url(&self, path: &str) -> String {
        join_url(&self.control_plane, path)
    }

    pub fn logs_url(&self, path: &str) -> String {
        join_url(&self.logs, path)
    }
}

pub fn join_url(base: &str, path: &str) -> String {
    let base = base.strip_suffix('/').unwrap_or(base);
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Loads a field mapping from a `.toml` file, or JSON for any other extension.
pub fn load_fields_from_file(path: &Path) -> Result<FieldMap, BridgeError> {
    let content = fs::read_to_string(path).map_err(|e| {
        BridgeError::Validation(format!("failed to read {}: {e}", path.display()))
    })?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let fields: FieldMap = if is_toml {
        let table: toml::Table = toml::from_str(&content).map_err(|e| {
            BridgeError::Validation(format!("invalid TOML in {}: {e}", path.display()))
        })?;
        serde_json::to_value(table)
            .and_then(serde_json::from_value)
            .map_err(|e| {
                BridgeError::Validation(format!("unusable fields in {}: {e}", path.display()))
            })?
    } else {
        serde_json::from_str(&content).map_err(|e| {
            BridgeError::Validation(format!("invalid JSON in {}: {e}", path.display()))
        })?
    };

    tracing::debug!(path = %path.display(), count = fields.len(), "loaded invocation fields");
    Ok(fields)
}
