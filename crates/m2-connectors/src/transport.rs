use std::time::Duration;

use m2_api::{BridgeError, HttpRequest, HttpResponse, Method, Transport};
use reqwest::blocking::Client;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking HTTP transport. One request in, one response out; no retries.
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, BridgeError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, BridgeError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.headers {
            // The client derives Host from the URL, matching what was signed.
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let resp = builder
            .send()
            .map_err(|e| BridgeError::Transport(format!("{} {}: {e}", request.method, request.url)))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|e| BridgeError::Transport(format!("failed to read response body: {e}")))?;

        tracing::debug!(method = %request.method, url = %request.url, status, "response received");
        Ok(HttpResponse { status, body })
    }
}
