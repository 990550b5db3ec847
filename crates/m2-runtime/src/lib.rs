mod dispatch;
mod poll;

use std::io::Write;
use std::sync::Arc;

use m2_api::{
    Action, BridgeError, Clock, ExtensionResult, FieldMap, SecretStore, TaskEngine, Transport,
};
use m2_connectors::{
    ControlPlaneClient, DEFAULT_REQUEST_TIMEOUT, EnvSecretStore, LogClient, ReqwestTransport,
    SystemClock,
};
use m2_core::InvocationFields;

use crate::dispatch::{Invocation, rerun};

pub use poll::{PollOutcome, Poller, RC_FAILED, RC_STOPPED, StatusVocabulary};

/// Task engine for the mainframe-modernization actions.
///
/// Holds no per-invocation state: every call to [`TaskEngine::run`] builds
/// fresh fields, credentials and clients.
pub struct M2Runtime {
    transport: Arc<dyn Transport>,
    secrets: Arc<dyn SecretStore>,
    clock: Arc<dyn Clock>,
}

impl M2Runtime {
    pub fn from_env() -> Result<Self, BridgeError> {
        let transport = ReqwestTransport::new(DEFAULT_REQUEST_TIMEOUT)?;
        Ok(Self::with_parts(
            Arc::new(transport),
            Arc::new(EnvSecretStore),
            Arc::new(SystemClock),
        ))
    }

    pub fn with_parts(
        transport: Arc<dyn Transport>,
        secrets: Arc<dyn SecretStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            secrets,
            clock,
        }
    }

    fn prepare(&self, raw: &FieldMap) -> Result<(Action, InvocationFields), BridgeError> {
        let fields = InvocationFields::from_map(raw)?;
        let action = fields.action.as_deref().unwrap_or_default().parse()?;
        Ok((action, fields))
    }
}

impl TaskEngine for M2Runtime {
    fn run(&self, raw: &FieldMap, stdout: &mut dyn Write) -> ExtensionResult {
        let (action, fields) = match self.prepare(raw) {
            Ok(prepared) => prepared,
            Err(err) => {
                tracing::warn!(error = %err, "rejected invocation");
                return ExtensionResult::from(&err);
            }
        };
        tracing::info!(%action, application = ?fields.application, wait = fields.wait, fetch_logs = fields.fetch_logs, "starting action");

        // The echo command touches nothing remote, so it needs no credentials.
        if action == Action::Rerun {
            return rerun(raw);
        }

        let credentials = match fields.credentials(self.secrets.as_ref()) {
            Ok(credentials) => credentials,
            Err(err) => {
                tracing::error!(error = %err, "could not resolve credentials");
                return ExtensionResult::from(&err);
            }
        };
        let endpoints = fields.endpoints();
        let invocation = Invocation {
            control: ControlPlaneClient::new(
                Arc::clone(&self.transport),
                credentials.clone(),
                endpoints.control_plane,
            ),
            logs: LogClient::new(Arc::clone(&self.transport), credentials, endpoints.logs),
            poller: Poller::new(self.clock.as_ref(), fields.interval, fields.max_wait),
            fields: &fields,
            raw,
        };

        let result = invocation.dispatch(action, stdout);
        tracing::info!(%action, rc = result.rc, message = %result.message, "action finished");
        result
    }
}
