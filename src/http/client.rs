//! JSON HTTP client with the forge retry ladder.
//!
//! Every attempt produces a full request/response record that can be handed
//! to an [`ExchangeSink`] for content-addressed archival. Authorization
//! headers are stripped from anything that leaves the process boundary.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{PrismError, PrismResult};

/// Statuses retried unconditionally.
const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];
/// Cap on any single backoff sleep.
const MAX_SLEEP_SECS: u64 = 60;

/// A request to execute. Headers here are the real outgoing headers; the
/// archived copy is redacted.
#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub tag: String,
    pub timeout: Duration,
}

impl JsonRequest {
    pub fn get(url: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            tag: tag.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn post(url: impl Into<String>, body: Value, tag: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: Some(body),
            tag: tag.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub method: String,
    pub url: String,
    /// Redacted: never contains Authorization.
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub json: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeMeta {
    pub tag: String,
    pub request_fingerprint: String,
    pub attempt: u32,
}

/// One archived HTTP exchange. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub request: RequestEnvelope,
    pub response: ResponseEnvelope,
    pub meta: ExchangeMeta,
}

/// Receives every attempt's record for archival. Writes must be idempotent:
/// the path is derived from `(tag, fingerprint, attempt)`.
pub trait ExchangeSink: Send + Sync {
    fn record(&self, record: &RawRecord) -> PrismResult<()>;
}

/// Drop the Authorization header from a header map before it is persisted or
/// logged anywhere.
pub fn redact_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("authorization"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Stable 16-hex-char fingerprint of the redacted request. serde_json keeps
/// object keys sorted, so the serialization is canonical.
pub fn request_fingerprint(
    method: &str,
    url: &str,
    redacted_headers: &BTreeMap<String, String>,
    body: Option<&Value>,
) -> String {
    let canonical = json!({
        "method": method,
        "url": url,
        "headers": redacted_headers,
        "body": body,
    });
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Rate-limit-aware JSON client.
pub struct HttpClient {
    client: reqwest::Client,
    max_retries: u32,
    default_backoff_secs: u64,
}

impl HttpClient {
    pub fn new() -> PrismResult<Self> {
        Self::with_retries(6, 5)
    }

    pub fn with_retries(max_retries: u32, default_backoff_secs: u64) -> PrismResult<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            max_retries,
            default_backoff_secs,
        })
    }

    /// Execute a request with the retry ladder:
    /// 1. `Retry-After` seconds + jitter when present and numeric;
    /// 2. else `X-RateLimit-Reset` in the future: `min(reset - now + 1, 60)` + jitter;
    /// 3. else `min(default * 2^(attempt-1), 60)` + jitter.
    ///
    /// Retried statuses are 429/5xx plus 403 bodies mentioning the secondary
    /// rate limit. Every attempt (including retried ones) is offered to the
    /// sink before the retry decision is made.
    pub async fn request_json(
        &self,
        request: &JsonRequest,
        sink: Option<&dyn ExchangeSink>,
    ) -> PrismResult<RawRecord> {
        let redacted = redact_headers(&request.headers);
        let fingerprint =
            request_fingerprint(&request.method, &request.url, &redacted, request.body.as_ref());

        let mut attempt = 0u32;
        let mut last_error: Option<PrismError> = None;
        while attempt < self.max_retries {
            attempt += 1;
            let started_at = Utc::now();

            let mut builder = match request.method.as_str() {
                "GET" => self.client.get(&request.url),
                "POST" => self.client.post(&request.url),
                other => {
                    return Err(PrismError::UpstreamSemantic(format!(
                        "unsupported method {other}"
                    )))
                }
            };
            builder = builder.timeout(request.timeout);
            for (key, value) in &request.headers {
                builder = builder.header(key, value);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = match builder.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(url = %request.url, attempt, error = %e, "transport failure");
                    last_error = Some(PrismError::Transport(e));
                    self.sleep_backoff(attempt, None).await;
                    continue;
                }
            };

            let status = response.status().as_u16();
            let resp_headers: BTreeMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| {
                    v.to_str()
                        .ok()
                        .map(|value| (k.as_str().to_string(), value.to_string()))
                })
                .collect();
            let body_text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    last_error = Some(PrismError::Transport(e));
                    self.sleep_backoff(attempt, None).await;
                    continue;
                }
            };
            let data: Value = serde_json::from_str(&body_text)
                .unwrap_or_else(|_| json!({ "_non_json_body": body_text }));

            let record = RawRecord {
                started_at,
                finished_at: Utc::now(),
                request: RequestEnvelope {
                    method: request.method.clone(),
                    url: request.url.clone(),
                    headers: redacted.clone(),
                    body: request.body.clone(),
                },
                response: ResponseEnvelope {
                    status,
                    headers: resp_headers.clone(),
                    json: data.clone(),
                },
                meta: ExchangeMeta {
                    tag: request.tag.clone(),
                    request_fingerprint: fingerprint.clone(),
                    attempt,
                },
            };
            if let Some(sink) = sink {
                sink.record(&record)?;
            }

            if RETRY_STATUSES.contains(&status) {
                last_error = Some(PrismError::RateLimit(format!(
                    "HTTP {status} for {}",
                    request.url
                )));
                self.sleep_backoff(attempt, Some(&resp_headers)).await;
                continue;
            }
            if status == 403 && is_secondary_rate_limit(&data) {
                last_error = Some(PrismError::RateLimit(format!(
                    "secondary rate limit for {}",
                    request.url
                )));
                self.sleep_secondary(attempt, &resp_headers).await;
                continue;
            }
            if status >= 400 {
                return Err(PrismError::UpstreamSemantic(format!(
                    "HTTP {status} for {}",
                    request.url
                )));
            }

            debug!(url = %request.url, status, attempt, "request ok");
            return Ok(record);
        }

        Err(last_error.unwrap_or_else(|| {
            PrismError::UpstreamSemantic(format!(
                "request failed after {} attempts: {}",
                self.max_retries, request.url
            ))
        }))
    }

    /// GraphQL wrapper: a 200 envelope with a non-empty `errors[]` is a
    /// failure carrying the first error's message and path.
    pub async fn graphql(
        &self,
        request: &JsonRequest,
        sink: Option<&dyn ExchangeSink>,
    ) -> PrismResult<RawRecord> {
        let record = self.request_json(request, sink).await?;
        if let Some(errors) = record.response.json.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let first = &errors[0];
                let message = first
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let path = first
                    .get("path")
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "null".to_string());
                return Err(PrismError::UpstreamSemantic(format!(
                    "GraphQL returned {} error(s). First: {message:?} path={path}",
                    errors.len()
                )));
            }
        }
        Ok(record)
    }

    async fn sleep_backoff(&self, attempt: u32, headers: Option<&BTreeMap<String, String>>) {
        let sleep_s = compute_retry_sleep(
            headers.unwrap_or(&BTreeMap::new()),
            attempt,
            self.default_backoff_secs,
        );
        tokio::time::sleep(Duration::from_secs_f64(sleep_s)).await;
    }

    async fn sleep_secondary(&self, attempt: u32, headers: &BTreeMap<String, String>) {
        // Secondary limits carry no useful headers most of the time; back off
        // a full minute by default.
        let sleep_s = compute_retry_sleep(headers, attempt, 60);
        tokio::time::sleep(Duration::from_secs_f64(sleep_s)).await;
    }
}

fn header_get<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Sleep selection for a retryable response. Exposed for tests.
pub fn compute_retry_sleep(
    headers: &BTreeMap<String, String>,
    attempt: u32,
    default_secs: u64,
) -> f64 {
    let jitter: f64 = rand::thread_rng().gen();
    if let Some(retry_after) = header_get(headers, "Retry-After") {
        if let Ok(seconds) = retry_after.trim().parse::<f64>() {
            return seconds + jitter;
        }
    }
    if let Some(reset) = header_get(headers, "X-RateLimit-Reset") {
        if let Ok(reset_ts) = reset.trim().parse::<i64>() {
            let now = Utc::now().timestamp();
            if reset_ts > now {
                return ((reset_ts - now + 1).min(MAX_SLEEP_SECS as i64)) as f64 + jitter;
            }
        }
    }
    let backoff = default_secs.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    backoff.min(MAX_SLEEP_SECS) as f64 + jitter
}

fn is_secondary_rate_limit(data: &Value) -> bool {
    data.get("message")
        .and_then(Value::as_str)
        .map(|m| m.to_lowercase().contains("secondary rate limit"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_ignores_authorization() {
        let mut headers = BTreeMap::new();
        headers.insert("Accept".to_string(), "application/json".to_string());
        let with_auth = {
            let mut h = headers.clone();
            h.insert("Authorization".to_string(), "Bearer zzz".to_string());
            h
        };
        let a = request_fingerprint("GET", "https://x/y", &redact_headers(&headers), None);
        let b = request_fingerprint("GET", "https://x/y", &redact_headers(&with_auth), None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn redact_headers_strips_authorization_case_insensitively() {
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), "Bearer zzz".to_string());
        headers.insert("Accept".to_string(), "application/json".to_string());
        let redacted = redact_headers(&headers);
        assert!(!redacted.contains_key("authorization"));
        assert!(redacted.contains_key("Accept"));
    }

    #[test]
    fn retry_sleep_prefers_retry_after() {
        let mut headers = BTreeMap::new();
        headers.insert("Retry-After".to_string(), "7".to_string());
        let sleep = compute_retry_sleep(&headers, 1, 5);
        assert!((7.0..8.0).contains(&sleep));
    }

    #[test]
    fn retry_sleep_uses_rate_limit_reset_capped() {
        let mut headers = BTreeMap::new();
        let reset = Utc::now().timestamp() + 600;
        headers.insert("X-RateLimit-Reset".to_string(), reset.to_string());
        let sleep = compute_retry_sleep(&headers, 1, 5);
        assert!((60.0..61.0).contains(&sleep));
    }

    #[test]
    fn retry_sleep_falls_back_to_exponential() {
        let headers = BTreeMap::new();
        let first = compute_retry_sleep(&headers, 1, 5);
        assert!((5.0..6.0).contains(&first));
        let third = compute_retry_sleep(&headers, 3, 5);
        assert!((20.0..21.0).contains(&third));
        let huge = compute_retry_sleep(&headers, 12, 5);
        assert!((60.0..61.0).contains(&huge));
    }

    #[test]
    fn secondary_rate_limit_detection_is_case_insensitive() {
        let body = json!({"message": "You have exceeded a Secondary Rate Limit."});
        assert!(is_secondary_rate_limit(&body));
        assert!(!is_secondary_rate_limit(&json!({"message": "Not Found"})));
        assert!(!is_secondary_rate_limit(&json!([1, 2])));
    }
}
