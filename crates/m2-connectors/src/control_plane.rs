use std::sync::Arc;

use m2_api::{BridgeError, Credentials, HttpRequest, HttpResponse, Method, RemoteStatus, Transport};
use m2_core::{CONTROL_PLANE_SERVICE, join_url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::signer::RequestSigner;

const JSON_1_1: &str = "application/x-amz-json-1.1";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApplicationSummary {
    pub name: String,
    #[serde(rename = "applicationId")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSummary {
    pub engine_type: String,
    #[serde(rename = "environmentId")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchJobDescriptor {
    File { folder_path: String, file_name: String },
    Script { script_name: String },
}

impl BatchJobDescriptor {
    /// One stdout line per definition, e.g. `FILE: /jcl/PAYROLL.JCL`.
    pub fn display_line(&self) -> String {
        match self {
            BatchJobDescriptor::File {
                folder_path,
                file_name,
            } => format!("FILE: {folder_path}/{file_name}"),
            BatchJobDescriptor::Script { script_name } => format!("SCRIPT: {script_name}"),
        }
    }
}

/// Status body plus the raw text it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: RemoteStatus,
    pub body: String,
}

#[derive(Deserialize)]
struct ApplicationList {
    applications: Vec<ApplicationSummary>,
}

#[derive(Deserialize)]
struct EnvironmentList {
    environments: Vec<EnvironmentSummary>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchJobDefinitionList {
    batch_job_definitions: Vec<RawBatchJobDefinition>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBatchJobDefinition {
    file_batch_job_definition: Option<RawFileDefinition>,
    script_batch_job_definition: Option<RawScriptDefinition>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFileDefinition {
    folder_path: String,
    file_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScriptDefinition {
    script_name: String,
}

#[derive(Deserialize)]
struct StatusBody {
    status: RemoteStatus,
}

/// Client for the mainframe-modernization control plane. Every operation is
/// exactly one signed HTTP call.
pub struct ControlPlaneClient {
    transport: Arc<dyn Transport>,
    signer: RequestSigner,
    base_url: String,
}

impl ControlPlaneClient {
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials, base_url: String) -> Self {
        Self {
            transport,
            signer: RequestSigner::new(credentials, CONTROL_PLANE_SERVICE),
            base_url,
        }
    }

    pub fn list_applications(&self) -> Result<Vec<ApplicationSummary>, BridgeError> {
        let resp = self.get("/applications")?;
        let list: ApplicationList = decode(&resp)?;
        Ok(list.applications)
    }

    pub fn list_environments(&self) -> Result<Vec<EnvironmentSummary>, BridgeError> {
        let resp = self.get("/environments")?;
        let list: EnvironmentList = decode(&resp)?;
        Ok(list.environments)
    }

    pub fn list_batch_job_definitions(
        &self,
        app_id: &str,
    ) -> Result<Vec<BatchJobDescriptor>, BridgeError> {
        let resp = self.get(&format!("/applications/{app_id}/batch-job-definitions"))?;
        let list: BatchJobDefinitionList = decode(&resp)?;
        let mut descriptors = Vec::new();
        for def in list.batch_job_definitions {
            if let Some(file) = def.file_batch_job_definition {
                descriptors.push(BatchJobDescriptor::File {
                    folder_path: file.folder_path,
                    file_name: file.file_name,
                });
            }
            if let Some(script) = def.script_batch_job_definition {
                descriptors.push(BatchJobDescriptor::Script {
                    script_name: script.script_name,
                });
            }
        }
        Ok(descriptors)
    }

    pub fn start_application(&self, app_id: &str) -> Result<Value, BridgeError> {
        let resp = self.post(&format!("/applications/{app_id}/start"), None, JSON_1_1)?;
        decode(&resp)
    }

    pub fn stop_application(&self, app_id: &str, force_stop: bool) -> Result<Value, BridgeError> {
        let body = json!({ "forceStop": force_stop });
        let resp = self.post(&format!("/applications/{app_id}/stop"), Some(&body), JSON_1_1)?;
        decode(&resp)
    }

    /// Returns the new execution id.
    pub fn submit_batch_job(&self, app_id: &str, jcl_file_name: &str) -> Result<String, BridgeError> {
        let body = json!({ "batchJob": { "jclFileName": jcl_file_name } });
        let resp = self.post(
            &format!("/applications/{app_id}/batch-job"),
            Some(&body),
            "application/json",
        )?;
        let value: Value = decode(&resp)?;
        value
            .get("executionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(BridgeError::MissingField {
                status: resp.status,
                body: resp.body,
                field: "executionId",
            })
    }

    pub fn cancel_batch_execution(
        &self,
        app_id: &str,
        execution_id: &str,
    ) -> Result<Value, BridgeError> {
        let resp = self.post(
            &format!("/applications/{app_id}/batch-job-executions/{execution_id}/cancel"),
            None,
            JSON_1_1,
        )?;
        decode(&resp)
    }

    pub fn application_status(&self, app_id: &str) -> Result<StatusReport, BridgeError> {
        let resp = self.get(&format!("/applications/{app_id}"))?;
        status_report(resp)
    }

    pub fn batch_execution_status(
        &self,
        app_id: &str,
        execution_id: &str,
    ) -> Result<StatusReport, BridgeError> {
        let resp = self.get(&format!(
            "/applications/{app_id}/batch-job-executions/{execution_id}"
        ))?;
        status_report(resp)
    }

    fn get(&self, path: &str) -> Result<HttpResponse, BridgeError> {
        let request = HttpRequest::new(Method::Get, join_url(&self.base_url, path))
            .header("Content-Type", JSON_1_1)
            .header("Accept", "application/json");
        self.send(request)
    }

    fn post(
        &self,
        path: &str,
        body: Option<&Value>,
        content_type: &str,
    ) -> Result<HttpResponse, BridgeError> {
        let mut request = HttpRequest::new(Method::Post, join_url(&self.base_url, path))
            .header("Content-Type", content_type);
        if content_type == JSON_1_1 {
            request = request.header("Accept", "application/json");
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }
        self.send(request)
    }

    fn send(&self, mut request: HttpRequest) -> Result<HttpResponse, BridgeError> {
        tracing::debug!(method = %request.method, url = %request.url, body = ?request.body, "control plane request");
        self.signer.sign(&mut request)?;
        let resp = self.transport.send(&request)?;
        if !resp.is_ok() {
            tracing::warn!(status = resp.status, body = %resp.body, url = %request.url, "control plane rejected request");
            return Err(BridgeError::Remote {
                status: resp.status,
                body: resp.body,
            });
        }
        Ok(resp)
    }
}

/// Decodes a 200 body. An empty body counts as `{}`.
pub(crate) fn decode<T: DeserializeOwned>(resp: &HttpResponse) -> Result<T, BridgeError> {
    let text = if resp.body.trim().is_empty() {
        "{}"
    } else {
        resp.body.as_str()
    };
    serde_json::from_str(text).map_err(|e| BridgeError::Decode {
        status: resp.status,
        body: resp.body.clone(),
        reason: e.to_string(),
    })
}

fn status_report(resp: HttpResponse) -> Result<StatusReport, BridgeError> {
    let parsed: StatusBody = decode(&resp)?;
    Ok(StatusReport {
        status: parsed.status,
        body: resp.body,
    })
}
