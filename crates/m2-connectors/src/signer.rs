//! AWS Signature Version 4 request signing.
//!
//! Only the header-based variant is implemented: the signature travels in the
//! `Authorization` header, never in the query string.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use m2_api::{BridgeError, Credentials, HttpRequest};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// RFC 3986 unreserved characters stay as-is.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const PATH: &AsciiSet = &UNRESERVED.remove(b'/');

/// Headers owned by the signer; caller-supplied copies are replaced.
const MANAGED_HEADERS: [&str; 4] = ["authorization", "host", "x-amz-date", "x-amz-security-token"];

/// Signs requests for one service with one set of static credentials.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Credentials,
    service: String,
}

impl RequestSigner {
    pub fn new(credentials: Credentials, service: impl Into<String>) -> Self {
        Self {
            credentials,
            service: service.into(),
        }
    }

    pub fn sign(&self, request: &mut HttpRequest) -> Result<(), BridgeError> {
        self.sign_at(request, Utc::now())
    }

    pub fn sign_at(&self, request: &mut HttpRequest, at: DateTime<Utc>) -> Result<(), BridgeError> {
        request.headers = signed_headers(request, &self.service, &self.credentials, at)?;
        Ok(())
    }
}

/// Returns the request's headers plus `Host`, `X-Amz-Date`, the optional
/// session token and `Authorization`.
pub fn signed_headers(
    request: &HttpRequest,
    service: &str,
    credentials: &Credentials,
    at: DateTime<Utc>,
) -> Result<BTreeMap<String, String>, BridgeError> {
    if credentials.access_key_id.is_empty() || credentials.secret_access_key.is_empty() {
        return Err(BridgeError::Signing("missing access key or secret key".into()));
    }
    if credentials.region.is_empty() {
        return Err(BridgeError::Signing("missing region".into()));
    }

    let url = Url::parse(&request.url)
        .map_err(|e| BridgeError::Signing(format!("malformed URL '{}': {e}", request.url)))?;
    let host = url
        .host_str()
        .ok_or_else(|| BridgeError::Signing(format!("URL '{}' has no host", request.url)))?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let amz_date = at.format("%Y%m%dT%H%M%SZ").to_string();
    let date = at.format("%Y%m%d").to_string();

    let mut headers: BTreeMap<String, String> = request
        .headers
        .iter()
        .filter(|(name, _)| {
            !MANAGED_HEADERS
                .iter()
                .any(|managed| name.eq_ignore_ascii_case(managed))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    headers.insert("Host".to_string(), host);
    headers.insert("X-Amz-Date".to_string(), amz_date.clone());
    if let Some(token) = &credentials.session_token {
        headers.insert("X-Amz-Security-Token".to_string(), token.clone());
    }

    let canonical: BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), collapse_whitespace(v)))
        .collect();
    let signed_names = canonical.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical_headers: String = canonical
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();

    let payload_hash = sha256_hex(request.body.as_deref().unwrap_or("").as_bytes());
    let uri = canonical_uri(&url);
    let query = canonical_query(&url);
    let parts: [&str; 6] = [
        request.method.as_str(),
        &uri,
        &query,
        &canonical_headers,
        &signed_names,
        &payload_hash,
    ];
    let canonical_request = parts.join("\n");

    let scope = format!("{date}/{}/{service}/aws4_request", credentials.region);
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(&credentials.secret_access_key, &date, &credentials.region, service)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    tracing::debug!(service, scope = %scope, signed_headers = %signed_names, "signed request");

    headers.insert(
        "Authorization".to_string(),
        format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_names}, Signature={signature}",
            credentials.access_key_id
        ),
    );
    Ok(headers)
}

/// Derives the per-day, per-region, per-service signing key.
pub fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, BridgeError> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, BridgeError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| BridgeError::Signing(format!("invalid HMAC key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

// Non-S3 services expect the already-encoded path to be encoded once more.
fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    utf8_percent_encode(path, PATH).to_string()
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                utf8_percent_encode(&k, UNRESERVED).to_string(),
                utf8_percent_encode(&v, UNRESERVED).to_string(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use m2_api::Method;
    use pretty_assertions::assert_eq;

    use super::*;

    const EXAMPLE_SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn example_credentials(token: Option<&str>) -> Credentials {
        Credentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: EXAMPLE_SECRET.to_string(),
            session_token: token.map(str::to_string),
            region: "us-east-1".to_string(),
        }
    }

    fn example_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    #[test]
    fn signing_key_matches_documented_derivation() {
        let key = signing_key(EXAMPLE_SECRET, "20150830", "us-east-1", "iam").unwrap();
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn get_vanilla_vector() {
        let request = HttpRequest::new(Method::Get, "https://example.amazonaws.com/");
        let headers =
            signed_headers(&request, "service", &example_credentials(None), example_time())
                .unwrap();
        assert_eq!(headers["Host"], "example.amazonaws.com");
        assert_eq!(headers["X-Amz-Date"], "20150830T123600Z");
        assert_eq!(
            headers["Authorization"],
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-date, \
             Signature=5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
    }

    #[test]
    fn session_token_and_caller_headers_are_signed() {
        let request = HttpRequest::new(Method::Post, "https://logs.us-east-1.amazonaws.com/")
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("X-Amz-Target", "Logs_20140328.FilterLogEvents")
            .body("{}".to_string());
        let headers =
            signed_headers(&request, "logs", &example_credentials(Some("TOKEN")), example_time())
                .unwrap();
        assert_eq!(headers["X-Amz-Security-Token"], "TOKEN");
        assert!(headers["Authorization"].contains(
            "SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-amz-target"
        ));
        assert!(headers["Authorization"].contains("/20150830/us-east-1/logs/aws4_request"));
    }

    #[test]
    fn non_default_port_is_part_of_host() {
        let request = HttpRequest::new(Method::Get, "http://127.0.0.1:9000/applications");
        let headers =
            signed_headers(&request, "m2", &example_credentials(None), example_time()).unwrap();
        assert_eq!(headers["Host"], "127.0.0.1:9000");
    }

    #[test]
    fn signing_replaces_stale_managed_headers() {
        let signer = RequestSigner::new(example_credentials(None), "m2");
        let mut request = HttpRequest::new(Method::Get, "https://m2.us-east-1.amazonaws.com/applications")
            .header("authorization", "stale")
            .header("x-amz-date", "19990101T000000Z");
        signer.sign_at(&mut request, example_time()).unwrap();
        assert_eq!(request.header_value("x-amz-date"), Some("20150830T123600Z"));
        assert_eq!(request.headers.len(), 3);
        assert!(request.header_value("authorization").unwrap().starts_with(ALGORITHM));
    }

    #[test]
    fn canonical_forms() {
        let url = Url::parse("https://example.com/a b/c?b=2&a=1&c=x y").unwrap();
        assert_eq!(canonical_uri(&url), "/a%2520b/c");
        assert_eq!(canonical_query(&url), "a=1&b=2&c=x%20y");
        assert_eq!(collapse_whitespace("  a   b "), "a b");
    }

    #[test]
    fn missing_credentials_or_bad_url_fail() {
        let mut creds = example_credentials(None);
        creds.secret_access_key.clear();
        let request = HttpRequest::new(Method::Get, "https://example.amazonaws.com/");
        let err = signed_headers(&request, "m2", &creds, example_time()).unwrap_err();
        assert!(matches!(err, BridgeError::Signing(_)));

        let request = HttpRequest::new(Method::Get, "not a url");
        let err =
            signed_headers(&request, "m2", &example_credentials(None), example_time()).unwrap_err();
        assert!(err.is_fatal());
    }
}
