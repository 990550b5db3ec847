#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use m2_api::{
    BridgeError, Clock, ExtensionResult, FieldMap, HttpRequest, HttpResponse, SecretStore,
    TaskEngine, Transport,
};
use m2_runtime::M2Runtime;
use serde_json::Value;

/// Replays canned responses in order and records every request it was handed.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<HttpResponse, BridgeError>>>,
    seen: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn reply(&self, status: u16, body: &str) -> &Self {
        self.replies.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
        self
    }

    pub fn fail(&self, err: BridgeError) -> &Self {
        self.replies.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| {
                let url = r.url.split_once("amazonaws.com").map_or(r.url.as_str(), |(_, p)| p);
                format!("{} {url}", r.method)
            })
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, BridgeError> {
        self.seen.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BridgeError::Transport("no scripted reply left".into())))
    }
}

/// Virtual clock: sleeping advances time instantly.
pub struct FakeClock {
    now: Mutex<Instant>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            sleeps: Mutex::default(),
        }
    }
}

impl FakeClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
    }
}

pub struct NoSecrets;

impl SecretStore for NoSecrets {
    fn get(&self, _secret_ref: &str) -> Option<String> {
        None
    }
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<FakeClock>,
    runtime: M2Runtime,
}

impl Harness {
    pub fn new() -> Self {
        let transport = Arc::new(ScriptedTransport::default());
        let clock = Arc::new(FakeClock::default());
        let runtime = M2Runtime::with_parts(transport.clone(), Arc::new(NoSecrets), clock.clone());
        Self {
            transport,
            clock,
            runtime,
        }
    }

    /// Runs one invocation and returns the result plus captured stdout.
    pub fn run(&self, fields: &FieldMap) -> (ExtensionResult, String) {
        let mut stdout = Vec::new();
        let result = self.runtime.run(fields, &mut stdout);
        (result, String::from_utf8(stdout).unwrap())
    }
}

/// Builds a field map with static test credentials filled in.
pub fn fields(pairs: &[(&str, Value)]) -> FieldMap {
    let mut map: FieldMap = [
        ("credentials.user".to_string(), Value::from("AKIDEXAMPLE")),
        ("credentials.password".to_string(), Value::from("secret")),
    ]
    .into_iter()
    .collect();
    for (key, value) in pairs {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

pub fn status_body(status: &str) -> String {
    format!("{{\"status\":\"{status}\"}}")
}
