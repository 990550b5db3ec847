mod control_plane;
mod logs;
mod signer;
mod transport;

use std::time::{Duration, Instant};

use m2_api::{Clock, SecretStore};

pub use control_plane::{
    ApplicationSummary, BatchJobDescriptor, ControlPlaneClient, EnvironmentSummary, StatusReport,
};
pub use logs::{LogClient, LogQuery, console_log_group};
pub use signer::{RequestSigner, signed_headers, signing_key};
pub use transport::{DEFAULT_REQUEST_TIMEOUT, ReqwestTransport};

pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get(&self, secret_ref: &str) -> Option<String> {
        std::env::var(secret_ref).ok().filter(|v| !v.is_empty())
    }
}

/// Wall clock that blocks the calling thread on sleep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
