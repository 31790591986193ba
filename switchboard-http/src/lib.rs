//! Minimal HTTP client with safe logging, retries, and bearer auth.
//!
//! - Request options: `Auth`, query params, timeout, retries
//! - JSON responses, urlencoded form bodies
//! - Redacts secrets: bearer values, sensitive query params, and any path
//!   segment registered with [`HttpClient::with_secret_segment`] (Telegram
//!   puts the bot token in the path)
//! - Retries 429/5xx with exponential backoff and `Retry-After` support
//!
//! Example (no_run):
//! ```rust
//! # async fn demo() -> Result<(), switchboard_http::HttpError> {
//! let client = switchboard_http::HttpClient::new("https://mastodon.example")?;
//! let got: serde_json::Value = client
//!     .get_json("/api/v1/timelines/home", switchboard_http::RequestOpts::default())
//!     .await?;
//! # Ok(()) }
//! ```
//!
//! Callers that need cancellation race the returned future against their own
//! token; dropping the future aborts the request.

use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

const SECRET_QUERY_KEYS: &[&str] = &[
    "access_token",
    "authorization",
    "auth",
    "key",
    "api_key",
    "token",
    "secret",
    "secret_token",
    "client_secret",
    "bearer",
];

// ==============================
// Errors
// ==============================

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid URL: {0}")]
    Url(String),
    #[error("request build failed: {0}")]
    Build(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}, body_snippet: {1}")]
    Decode(String, String),
    #[error("server returned error {status}: {message}")]
    Api { status: StatusCode, message: String },
}

// ==============================
// Auth & Request Options
// ==============================

/// Authentication strategies supported by the client.
///
/// ```
/// use switchboard_http::Auth;
///
/// let bearer = Auth::Bearer("token");
/// assert!(matches!(bearer, Auth::Bearer("token")));
/// ```
#[derive(Clone, Debug)]
pub enum Auth<'a> {
    /// Authorization: Bearer <token>
    Bearer(&'a str),
}

/// Per-request tuning knobs.
///
/// ```
/// use switchboard_http::RequestOpts;
/// use std::time::Duration;
///
/// let opts = RequestOpts {
///     timeout: Some(Duration::from_secs(35)),
///     retries: Some(0),
///     query: Some(vec![("offset", "8".into())]),
///     ..Default::default()
/// };
/// assert_eq!(opts.retries, Some(0));
/// ```
#[derive(Clone, Debug, Default)]
pub struct RequestOpts<'a> {
    pub timeout: Option<Duration>,
    pub retries: Option<usize>,
    pub auth: Option<Auth<'a>>,
    pub query: Option<Vec<(&'a str, Cow<'a, str>)>>,
}

/// Urlencoded form pairs.
type Form<'a> = &'a [(&'a str, String)];

// ==============================
// Client
// ==============================

#[derive(Clone)]
pub struct HttpClient {
    base: Url,
    inner: Client,
    secret_segments: Vec<String>,
    pub default_timeout: Duration,
    pub max_retries: usize,
}

impl HttpClient {
    /// Construct a client anchored to a base URL.
    ///
    /// ```
    /// use switchboard_http::{HttpClient, HttpError};
    /// use std::time::Duration;
    ///
    /// let client = HttpClient::new("https://api.telegram.org")?;
    /// assert_eq!(client.default_timeout, Duration::from_secs(15));
    /// assert_eq!(client.max_retries, 2);
    /// # Ok::<(), HttpError>(())
    /// ```
    pub fn new(base: &str) -> Result<Self, HttpError> {
        let base = Url::parse(base).map_err(|e| HttpError::Url(e.to_string()))?;
        let inner = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;
        Ok(Self {
            base,
            inner,
            secret_segments: Vec::new(),
            default_timeout: Duration::from_secs(15),
            max_retries: 2,
        })
    }

    pub fn with_retries(mut self, n: usize) -> Self {
        self.max_retries = n;
        self
    }

    /// Never log this path segment verbatim.
    ///
    /// ```
    /// use switchboard_http::HttpClient;
    ///
    /// let client = HttpClient::new("https://api.telegram.org")
    ///     .unwrap()
    ///     .with_secret_segment("bot123:abc");
    /// let url = "https://api.telegram.org/bot123:abc/getUpdates".parse().unwrap();
    /// assert_eq!(client.loggable_path(&url), "api.telegram.org/<redacted>/getUpdates");
    /// ```
    pub fn with_secret_segment(mut self, segment: impl Into<String>) -> Self {
        self.secret_segments.push(segment.into());
        self
    }

    /// GET and decode a JSON response.
    pub async fn get_json<T>(&self, path: &str, opts: RequestOpts<'_>) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        self.request_json(Method::GET, path, None, opts).await
    }

    /// POST an urlencoded form and decode a JSON response.
    pub async fn post_form<T>(
        &self,
        path: &str,
        form: &[(&str, String)],
        opts: RequestOpts<'_>,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        self.request_json(Method::POST, path, Some(form), opts)
            .await
    }

    /// `host/path` with secret segments masked, for logs.
    pub fn loggable_path(&self, url: &Url) -> String {
        let path = url
            .path_segments()
            .map(|segs| {
                segs.map(|s| {
                    if self.secret_segments.iter().any(|secret| secret == s) {
                        "<redacted>"
                    } else {
                        s
                    }
                })
                .collect::<Vec<_>>()
                .join("/")
            })
            .unwrap_or_default();
        format!("{}/{}", url.host_str().unwrap_or("-"), path)
    }

    // ==============================
    // Core request implementation
    // ==============================

    async fn request_json<T>(
        &self,
        method: Method,
        path: &str,
        form: Option<Form<'_>>,
        opts: RequestOpts<'_>,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        let url = self
            .base
            .join(path)
            .map_err(|e| HttpError::Url(e.to_string()))?;
        let host_path = self.loggable_path(&url);

        let mut attempt = 0usize;
        let max_retries = opts.retries.unwrap_or(self.max_retries);
        let timeout = opts.timeout.unwrap_or(self.default_timeout);

        loop {
            let mut rb = self.inner.request(method.clone(), url.clone()).timeout(timeout);

            if let Some(q) = &opts.query {
                let pairs: Vec<(&str, &str)> = q.iter().map(|(k, v)| (*k, v.as_ref())).collect();
                rb = rb.query(&pairs);
            }

            if let Some(pairs) = form {
                rb = rb.form(pairs);
            }

            let auth_kind = match &opts.auth {
                Some(Auth::Bearer(tok)) => {
                    rb = rb.bearer_auth(sanitize_token(tok)?);
                    "bearer"
                }
                None => "none",
            };

            tracing::debug!(
                attempt = attempt + 1,
                max_retries,
                method = %method,
                host_path = %host_path,
                query = ?redact_query(opts.query.as_deref()),
                timeout_ms = timeout.as_millis() as u64,
                auth_kind,
                has_body = form.is_some(),
                "http.request.start"
            );

            // ----- Send -----
            let t0 = std::time::Instant::now();
            let sent = match rb.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let headers = resp.headers().clone();
                    resp.bytes().await.map(|b| (status, headers, b))
                }
                Err(err) => Err(err),
            };

            let (status, headers, bytes) = match sent {
                Ok(parts) => parts,
                Err(err) => {
                    // reqwest errors embed the URL, which may carry a token.
                    let message = err.without_url().to_string();
                    if attempt < max_retries {
                        attempt += 1;
                        let delay = backoff(attempt);
                        tracing::warn!(
                            attempt,
                            max_retries,
                            backoff_ms = delay.as_millis() as u64,
                            message = %message,
                            host_path = %host_path,
                            "http.retrying.network"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    tracing::debug!(
                        message = %message,
                        host_path = %host_path,
                        "http.network_error"
                    );
                    return Err(HttpError::Network(message));
                }
            };

            let snippet = snip_body(&bytes);
            tracing::debug!(
                %status,
                duration_ms = t0.elapsed().as_millis() as u64,
                body_len = bytes.len(),
                host_path = %host_path,
                "http.response"
            );
            tracing::trace!(body_snippet = %snippet, "http.response.body_snippet");

            if status.is_success() {
                return serde_json::from_slice::<T>(&bytes).map_err(|e| {
                    tracing::warn!(
                        serde_err = %e,
                        body_snippet = %snippet,
                        host_path = %host_path,
                        "http.response.decode_error"
                    );
                    HttpError::Decode(e.to_string(), snippet)
                });
            }

            let message = extract_error_message(&bytes);
            let is_429 = status == StatusCode::TOO_MANY_REQUESTS;

            if (is_429 || status.is_server_error()) && attempt < max_retries {
                attempt += 1;
                let delay = match retry_after_delay_secs(&headers) {
                    Some(secs) => Duration::from_secs(secs),
                    None if is_429 => backoff(attempt).max(Duration::from_millis(1100)),
                    None => backoff(attempt),
                };
                tracing::warn!(
                    %status,
                    attempt,
                    max_retries,
                    backoff_ms = delay.as_millis() as u64,
                    message = %message,
                    host_path = %host_path,
                    "http.retrying"
                );
                sleep(delay).await;
                continue;
            }

            tracing::debug!(%status, message = %message, host_path = %host_path, "http.error");
            return Err(HttpError::Api { status, message });
        }
    }
}

// ==============================
// Helpers
// ==============================

fn backoff(attempt: usize) -> Duration {
    Duration::from_millis(200u64.saturating_mul(1 << (attempt.saturating_sub(1)).min(10)))
}

fn extract_error_message(body: &[u8]) -> String {
    // Telegram: {"ok":false,"error_code":401,"description":"Unauthorized"}
    // Mastodon: {"error":"The access token is invalid"}
    #[derive(Deserialize)]
    struct Msg {
        #[serde(default)]
        description: String,
        #[serde(default)]
        error: String,
        #[serde(default)]
        message: String,
    }

    if let Ok(m) = serde_json::from_slice::<Msg>(body) {
        for candidate in [m.description, m.error, m.message] {
            if !candidate.is_empty() {
                return candidate;
            }
        }
    }
    snip_body(body)
}

fn retry_after_delay_secs(h: &HeaderMap) -> Option<u64> {
    h.get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())?
        .parse()
        .ok()
}

fn snip_body(body: &[u8]) -> String {
    let mut snip = String::from_utf8_lossy(body).to_string();
    if snip.len() > 500 {
        let mut end = 500;
        while !snip.is_char_boundary(end) {
            end -= 1;
        }
        snip.truncate(end);
        snip.push_str("...");
    }
    snip
}

fn redact_query(query: Option<&[(&str, Cow<'_, str>)]>) -> Vec<(String, String)> {
    query
        .unwrap_or_default()
        .iter()
        .map(|(k, v)| {
            let secret = SECRET_QUERY_KEYS.contains(&k.to_ascii_lowercase().as_str());
            (
                (*k).to_string(),
                if secret {
                    "<redacted>".to_string()
                } else {
                    v.to_string()
                },
            )
        })
        .collect()
}

fn sanitize_token(raw: &str) -> Result<String, HttpError> {
    let mut s = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    s.retain(|ch| !ch.is_ascii_whitespace());

    if !s.is_ascii() || s.bytes().any(|b| b < 0x20 || b == 0x7F) {
        return Err(HttpError::Build(
            "token contains non-ASCII or control characters".into(),
        ));
    }
    HeaderValue::from_str(&format!("Bearer {s}"))
        .map_err(|e| HttpError::Build(format!("invalid Authorization header: {e}")))?;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn error_message_prefers_description() {
        let body = br#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
        assert_eq!(extract_error_message(body), "Unauthorized");
        assert_eq!(extract_error_message(br#"{"error":"bad token"}"#), "bad token");
        assert_eq!(extract_error_message(b"plain"), "plain");
    }

    #[test]
    fn sanitizes_quoted_tokens() {
        assert_eq!(sanitize_token(" \"abc def\" ").unwrap(), "abcdef");
        assert!(sanitize_token("caf\u{e9}").is_err());
    }

    #[test]
    fn secret_query_values_are_redacted() {
        let q = vec![("offset", Cow::from("5")), ("access_token", Cow::from("xyz"))];
        let red = redact_query(Some(q.as_slice()));
        assert_eq!(red[0].1, "5");
        assert_eq!(red[1].1, "<redacted>");
    }

    #[tokio::test]
    async fn get_json_sends_query_and_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/timelines/home"))
            .and(query_param("limit", "20"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "1"}])))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap();
        let got: Value = client
            .get_json(
                "/api/v1/timelines/home",
                RequestOpts {
                    auth: Some(Auth::Bearer("tok")),
                    query: Some(vec![("limit", "20".into())]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(got[0]["id"], "1");
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap().with_retries(1);
        let got: Value = client.get_json("/flaky", RequestOpts::default()).await.unwrap();
        assert_eq!(got["ok"], true);
    }

    #[tokio::test]
    async fn api_errors_surface_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "invalid token"})),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap();
        let err = client
            .get_json::<Value>("/x", RequestOpts::default())
            .await
            .unwrap_err();
        match err {
            HttpError::Api { status, message } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(message, "invalid token");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn post_form_encodes_pairs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botT/setWebhook"))
            .and(body_string_contains("secret_token=s3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap();
        let form = [("url", "https://hook".to_string()), ("secret_token", "s3".to_string())];
        let got: Value = client
            .post_form("/botT/setWebhook", &form, RequestOpts::default())
            .await
            .unwrap();
        assert_eq!(got["ok"], true);
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = HttpClient::new(&server.uri()).unwrap();
        let err = client
            .get_json::<Value>("/x", RequestOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Decode(..)));
    }
}
