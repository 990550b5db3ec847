use std::io::Write;

use m2_api::{
    Action, BridgeError, ExtensionResult, FieldMap, NamedOutput, OUTPUT_APPLICATION_ID,
    OUTPUT_BATCH_EXECUTION_ID,
};
use m2_connectors::{ControlPlaneClient, LogClient, LogQuery};
use m2_core::{DEFAULT_LOG_STREAM, InvocationFields};
use serde_json::Value;

use crate::poll::{Poller, StatusVocabulary};

pub(crate) const DEFAULT_MESSAGE: &str = "Task completed";
pub(crate) const FAILED_EXECUTION_ID: &str = "Failed";
pub(crate) const MISSING_EXECUTION_ID: &str = "not_found";
const DYNAMIC_OUTPUT: &str = "DYNAMIC_OUTPUT";

/// Everything one action needs, built once per invocation.
pub(crate) struct Invocation<'a> {
    pub(crate) control: ControlPlaneClient,
    pub(crate) logs: LogClient,
    pub(crate) poller: Poller<'a>,
    pub(crate) fields: &'a InvocationFields,
    pub(crate) raw: &'a FieldMap,
}

impl Invocation<'_> {
    pub(crate) fn dispatch(&self, action: Action, out: &mut dyn Write) -> ExtensionResult {
        match action {
            Action::ListApplications => settle(self.list_applications(out)),
            Action::ListEnvironments => settle(self.list_environments(out)),
            Action::ListBatchJobs => settle(self.list_batch_jobs(out)),
            Action::FetchLogs => settle(self.fetch_logs(out)),
            Action::StartApplication => self.start_application(out),
            Action::StopApplication => self.stop_application(out),
            Action::CancelBatchExecution => self.cancel_batch_execution(out),
            Action::StartBatch => self.start_batch(out),
            Action::ApplicationChoices => self.application_choices(),
            Action::Rerun => rerun(self.raw),
        }
    }

    fn list_applications(&self, out: &mut dyn Write) -> Result<ExtensionResult, BridgeError> {
        for app in self.control.list_applications()? {
            writeln!(out, "{} - {}", app.name, app.id)?;
        }
        Ok(ExtensionResult::success(DEFAULT_MESSAGE))
    }

    fn list_environments(&self, out: &mut dyn Write) -> Result<ExtensionResult, BridgeError> {
        for env in self.control.list_environments()? {
            writeln!(out, "{} - {} - {}", env.engine_type, env.id, env.name)?;
        }
        Ok(ExtensionResult::success(DEFAULT_MESSAGE))
    }

    fn list_batch_jobs(&self, out: &mut dyn Write) -> Result<ExtensionResult, BridgeError> {
        let app_id = self.require_application()?;
        for job in self.control.list_batch_job_definitions(&app_id)? {
            writeln!(out, "{}", job.display_line())?;
        }
        Ok(ExtensionResult::success(DEFAULT_MESSAGE))
    }

    fn fetch_logs(&self, out: &mut dyn Write) -> Result<ExtensionResult, BridgeError> {
        let app_id = self.require_application()?;
        let query = LogQuery {
            application_id: &app_id,
            filter_pattern: &self.fields.filter_pattern,
            log_stream_name: &self.fields.log_stream_name,
            format: self.fields.fetch_log_format,
        };
        self.emit_logs(&query, out)?;
        Ok(ExtensionResult::success(DEFAULT_MESSAGE))
    }

    fn start_application(&self, out: &mut dyn Write) -> ExtensionResult {
        let app_id = match self.require_application() {
            Ok(id) => id,
            Err(err) => return failure(&err),
        };
        tracing::info!(application_id = %app_id, "starting application");
        let initiated = self.control.start_application(&app_id);
        self.follow_up(initiated, "Application successfully started.", &app_id, None, out)
    }

    fn stop_application(&self, out: &mut dyn Write) -> ExtensionResult {
        let app_id = match self.require_application() {
            Ok(id) => id,
            Err(err) => return failure(&err),
        };
        tracing::info!(application_id = %app_id, force = self.fields.force_stop, "stopping application");
        let initiated = self.control.stop_application(&app_id, self.fields.force_stop);
        self.follow_up(initiated, "Application successfully stopped.", &app_id, None, out)
    }

    fn cancel_batch_execution(&self, out: &mut dyn Write) -> ExtensionResult {
        let app_id = match self.require_application() {
            Ok(id) => id,
            Err(err) => return failure(&err),
        };
        let execution_id = self.fields.execution_id.as_str();
        if execution_id.is_empty() {
            return failure(&BridgeError::Validation(
                "cancel-batch-execution needs an execution_id".to_string(),
            ));
        }
        tracing::info!(application_id = %app_id, execution_id, "cancelling batch execution");
        let initiated = self.control.cancel_batch_execution(&app_id, execution_id);
        self.follow_up(
            initiated,
            "Batch execution successfully cancelled.",
            &app_id,
            Some(execution_id),
            out,
        )
    }

    /// Both output fields are set on every path, including fatal ones.
    fn start_batch(&self, out: &mut dyn Write) -> ExtensionResult {
        let app_id = self.fields.application_id();
        let (execution_id, mut result) = self.submit_batch(app_id.as_deref(), out);
        result
            .output_fields
            .insert(OUTPUT_BATCH_EXECUTION_ID.to_string(), execution_id);
        result
            .output_fields
            .insert(OUTPUT_APPLICATION_ID.to_string(), app_id.unwrap_or_default());
        result
    }

    fn submit_batch(&self, app_id: Option<&str>, out: &mut dyn Write) -> (String, ExtensionResult) {
        let Some(app_id) = app_id else {
            return (
                FAILED_EXECUTION_ID.to_string(),
                failure(&self.missing_application()),
            );
        };
        let jcl_file = self.fields.jcl_file();
        tracing::info!(application_id = app_id, jcl_file, "submitting batch job");

        let execution_id = match self.control.submit_batch_job(app_id, jcl_file) {
            Ok(id) => id,
            Err(err) => {
                let placeholder = match &err {
                    BridgeError::MissingField { .. } => MISSING_EXECUTION_ID,
                    _ => FAILED_EXECUTION_ID,
                };
                let result = failure(&err);
                if err.is_fatal() {
                    return (placeholder.to_string(), result);
                }
                return (
                    placeholder.to_string(),
                    self.after_operation(result, app_id, "", out),
                );
            }
        };
        tracing::info!(application_id = app_id, execution_id = %execution_id, "batch job submitted");

        let result = if self.fields.wait {
            match self.wait_for(StatusVocabulary::BatchExecution, app_id, Some(&execution_id), out)
            {
                Ok(result) => result,
                Err(err) if err.is_fatal() => return (execution_id, failure(&err)),
                Err(err) => failure(&err),
            }
        } else {
            ExtensionResult::success(DEFAULT_MESSAGE)
        };
        let result = self.after_operation(result, app_id, &execution_id, out);
        (execution_id, result)
    }

    fn application_choices(&self) -> ExtensionResult {
        match self.control.list_applications() {
            Ok(apps) => {
                let values: Vec<String> = apps
                    .into_iter()
                    .map(|app| format!("{} ({})", app.name, app.id))
                    .collect();
                let mut result = ExtensionResult::success(format!(
                    "Available applications: '{}'",
                    values.join(", ")
                ));
                result.values = values;
                result
            }
            Err(err) if err.is_fatal() => failure(&err),
            Err(err) => {
                tracing::warn!(error = %err, "could not list applications for selection");
                let body = match &err {
                    BridgeError::Remote { body, .. } | BridgeError::Decode { body, .. } => {
                        body.clone()
                    }
                    other => other.to_string(),
                };
                let mut result =
                    ExtensionResult::new(1, format!("Failed to get the applications: '{body}'"));
                result.values = vec!["failed".to_string()];
                result
            }
        }
    }

    /// Shared tail of the lifecycle actions: optional wait, then optional logs.
    fn follow_up(
        &self,
        initiated: Result<Value, BridgeError>,
        success_message: &str,
        app_id: &str,
        execution_id: Option<&str>,
        out: &mut dyn Write,
    ) -> ExtensionResult {
        let vocabulary = match execution_id {
            Some(_) => StatusVocabulary::BatchExecution,
            None => StatusVocabulary::Application,
        };
        let result = match initiated {
            Err(err) if err.is_fatal() => return failure(&err),
            Err(err) => failure(&err),
            Ok(_) if self.fields.wait => {
                match self.wait_for(vocabulary, app_id, execution_id, out) {
                    Ok(result) => result,
                    Err(err) if err.is_fatal() => return failure(&err),
                    Err(err) => failure(&err),
                }
            }
            Ok(_) => ExtensionResult::success(success_message),
        };
        self.after_operation(result, app_id, execution_id.unwrap_or_default(), out)
    }

    fn wait_for(
        &self,
        vocabulary: StatusVocabulary,
        app_id: &str,
        execution_id: Option<&str>,
        out: &mut dyn Write,
    ) -> Result<ExtensionResult, BridgeError> {
        let outcome = self.poller.wait_until_terminal(vocabulary, || match execution_id {
            Some(execution_id) => self.control.batch_execution_status(app_id, execution_id),
            None => self.control.application_status(app_id),
        })?;
        if !self.fields.fetch_logs {
            writeln!(out, "{}", outcome.body)?;
        }
        Ok(ExtensionResult::new(outcome.rc, outcome.message))
    }

    /// Runs the post-operation log query when `fetch_logs` is set. A failure
    /// there only replaces a successful result.
    fn after_operation(
        &self,
        result: ExtensionResult,
        app_id: &str,
        filter_pattern: &str,
        out: &mut dyn Write,
    ) -> ExtensionResult {
        if !self.fields.fetch_logs {
            return result;
        }
        let query = LogQuery {
            application_id: app_id,
            filter_pattern,
            log_stream_name: DEFAULT_LOG_STREAM,
            format: self.fields.log_format,
        };
        match self.emit_logs(&query, out) {
            Ok(()) => result,
            Err(err) if result.is_success() => {
                let mut downgraded = failure(&err);
                downgraded.output_fields = result.output_fields;
                downgraded
            }
            Err(err) => {
                tracing::warn!(error = %err, rc = result.rc, "log fetch failed after a failed operation");
                result
            }
        }
    }

    fn emit_logs(&self, query: &LogQuery<'_>, out: &mut dyn Write) -> Result<(), BridgeError> {
        match self.logs.fetch_log_events(query) {
            Ok(lines) => {
                for line in lines {
                    writeln!(out, "{line}")?;
                }
                Ok(())
            }
            Err(err) => {
                if let BridgeError::Decode { body, .. } = &err {
                    writeln!(out, "{body}")?;
                }
                Err(err)
            }
        }
    }

    fn require_application(&self) -> Result<String, BridgeError> {
        self.fields
            .application_id()
            .ok_or_else(|| self.missing_application())
    }

    fn missing_application(&self) -> BridgeError {
        BridgeError::Validation(format!(
            "no application id in '{}'",
            self.fields.application.as_deref().unwrap_or_default()
        ))
    }
}

/// Echo command. Credential fields are masked in the echo.
pub(crate) fn rerun(raw: &FieldMap) -> ExtensionResult {
    let echoed: serde_json::Map<String, Value> = raw
        .iter()
        .map(|(key, value)| {
            let value = if key.starts_with("credentials.") {
                Value::String("***".to_string())
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect();
    let echoed = Value::Object(echoed).to_string();

    let mut result =
        ExtensionResult::success(format!(
        "Message: Hello from dynamic command 'rerun'! Fields = {echoed}"
    ));
    result.output = Some(NamedOutput {
        name: DYNAMIC_OUTPUT.to_string(),
        data: format!("The batch rerun from the {echoed}."),
    });
    result
}

fn settle(outcome: Result<ExtensionResult, BridgeError>) -> ExtensionResult {
    outcome.unwrap_or_else(|err| failure(&err))
}

fn failure(err: &BridgeError) -> ExtensionResult {
    if err.is_fatal() {
        tracing::error!(error = %err, "action aborted");
    } else {
        tracing::warn!(error = %err, "action failed");
    }
    ExtensionResult::from(err)
}
