//! HTTP transport with bearer authentication and bounded retry.
//!
//! All API traffic goes through one [`Transport`]. A logical request is
//! attempted up to [`RetryPolicy::max_attempts`] times: transport
//! timeouts and connection failures retry immediately, mapped 5xx
//! responses retry after a randomized delay, everything else surfaces
//! on the first attempt.

use std::time::Duration;

use rand::Rng;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::error::{ClientError, HttpErrorKind};

/// Whole-request deadline, after which an attempt counts as timed out.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON:API media type expected by the server.
const CONTENT_TYPE_JSON_API: &str = "application/vnd.api+json";

/// Builds the client user agent, including the CI service when detected.
pub fn user_agent(ci_info: Option<&str>) -> String {
    let version = env!("CARGO_PKG_VERSION");
    match ci_info {
        Some(info) => format!("snapgate-client/{version} (ci={info})"),
        None => format!("snapgate-client/{version}"),
    }
}

/// Retry behavior for one logical request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Lower bound of the delay before retrying a server-side failure.
    pub min_server_delay: Duration,
    /// Upper bound of that delay.
    pub max_server_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_server_delay: Duration::from_secs(1),
            max_server_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Policy with no inter-attempt delay, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_server_delay: Duration::ZERO,
            max_server_delay: Duration::ZERO,
        }
    }

    /// Randomized delay before retrying a server-side failure. The
    /// jitter spreads out shards that fail in lockstep.
    fn server_delay(&self) -> Duration {
        if self.max_server_delay <= self.min_server_delay {
            return self.min_server_delay;
        }
        rand::thread_rng().gen_range(self.min_server_delay..=self.max_server_delay)
    }
}

/// Authenticated, retrying HTTP client for one API endpoint.
pub struct Transport {
    http: reqwest::Client,
    api_url: String,
    policy: RetryPolicy,
}

impl Transport {
    /// Creates a transport for `api_url` authenticating with `token`.
    pub fn new(token: &str, api_url: &str, user_agent: &str) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::InvalidToken)?,
        );
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            headers.insert(USER_AGENT, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            policy: RetryPolicy::default(),
        })
    }

    /// Replaces the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Performs a GET against an API path (leading slash).
    pub async fn get(&self, path: &str) -> Result<serde_json::Value, ClientError> {
        self.execute("GET", path, None).await
    }

    /// Performs a POST with a JSON:API body.
    pub async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        self.execute("POST", path, Some(body)).await
    }

    async fn execute(
        &self,
        method: &'static str,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}{}", self.api_url, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(method, &url, body).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.policy.max_attempts && err.is_retryable() => {
                    if matches!(err, ClientError::Api { .. }) {
                        let delay = self.policy.server_delay();
                        debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err,
                            "server error, retrying after delay");
                        tokio::time::sleep(delay).await;
                    } else {
                        debug!(attempt, error = %err, "transport error, retrying");
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(
        &self,
        method: &'static str,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, ClientError> {
        let request = match method {
            "GET" => self.http.get(url),
            _ => {
                let mut request = self
                    .http
                    .post(url)
                    .header(CONTENT_TYPE, CONTENT_TYPE_JSON_API);
                if let Some(body) = body {
                    request = request.body(serde_json::to_vec(body)?);
                }
                request
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport_error(method, url, e))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(method, url, e))?;

        if !status.is_success() {
            let status = status.as_u16();
            return Err(ClientError::Api {
                kind: HttpErrorKind::from_status(status),
                status,
                method,
                url: url.to_string(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        // Finalize endpoints may answer with an empty body.
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn classify_transport_error(
    method: &'static str,
    url: &str,
    err: reqwest::Error,
) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout {
            method,
            url: url.to_string(),
        }
    } else if err.is_connect() {
        ClientError::ConnectionFailed {
            method,
            url: url.to_string(),
            source: err,
        }
    } else {
        ClientError::Http(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Reads one full HTTP request (headers plus declared body).
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut tmp = [0u8; 1024];
        loop {
            match stream.read(&mut tmp).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    buf.extend_from_slice(&tmp[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        let header = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
                        let content_length = header
                            .lines()
                            .find_map(|line| line.strip_prefix("content-length:"))
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if buf.len() - (pos + 4) >= content_length {
                            break;
                        }
                    }
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Mock API server answering with the scripted responses in order.
    /// Returns the base URL, a hit counter, and the captured requests.
    async fn mock_api(
        responses: Vec<(u16, &'static str)>,
    ) -> (
        String,
        Arc<AtomicUsize>,
        Arc<Mutex<Vec<String>>>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let hits = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));

        let hits_srv = hits.clone();
        let captured_srv = captured.clone();
        let handle = tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                hits_srv.fetch_add(1, Ordering::SeqCst);
                let request = read_request(&mut stream).await;
                captured_srv.lock().unwrap().push(request);

                let reason = if status < 400 { "OK" } else { "Error" };
                let resp = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, hits, captured, handle)
    }

    fn transport(url: &str) -> Transport {
        Transport::new("test-token", url, "snapgate-client/test")
            .unwrap()
            .with_policy(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn get_parses_json() {
        let (url, hits, _, handle) = mock_api(vec![(200, r#"{"data":{"id":"1"}}"#)]).await;

        let value = transport(&url).get("/builds/1").await.unwrap();
        assert_eq!(value["data"]["id"], "1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn post_sends_auth_and_content_type() {
        let (url, _, captured, handle) = mock_api(vec![(200, "{}")]).await;

        let body = serde_json::json!({"data": {"type": "builds"}});
        transport(&url).post("/builds/", &body).await.unwrap();

        let requests = captured.lock().unwrap();
        let request = requests[0].to_ascii_lowercase();
        assert!(request.contains("authorization: bearer test-token"));
        assert!(request.contains("content-type: application/vnd.api+json"));
        assert!(request.contains("user-agent: snapgate-client/test"));
        assert!(requests[0].contains(r#""type":"builds""#));

        handle.abort();
    }

    #[tokio::test]
    async fn post_retries_502_then_succeeds() {
        let (url, hits, _, handle) = mock_api(vec![
            (502, "bad gateway"),
            (502, "bad gateway"),
            (200, r#"{"data":{"id":"7"}}"#),
        ])
        .await;

        let value = transport(&url)
            .post("/builds/", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(value["data"]["id"], "7");
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        handle.abort();
    }

    #[tokio::test]
    async fn post_gives_up_after_three_502s() {
        let (url, hits, _, handle) = mock_api(vec![
            (502, "bad gateway"),
            (502, "bad gateway"),
            (502, "bad gateway"),
        ])
        .await;

        let err = transport(&url)
            .post("/builds/", &serde_json::json!({}))
            .await
            .unwrap_err();
        match err {
            ClientError::Api { kind, status, .. } => {
                assert_eq!(kind, HttpErrorKind::BadGateway);
                assert_eq!(status, 502);
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        handle.abort();
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (url, hits, _, handle) =
            mock_api(vec![(404, r#"{"errors":["not found"]}"#), (200, "{}")]).await;

        let err = transport(&url).get("/builds/404").await.unwrap_err();
        match err {
            ClientError::Api { kind, .. } => assert_eq!(kind, HttpErrorKind::NotFound),
            other => panic!("expected Api error, got {other:?}"),
        }
        // Exactly one request: 4xx must not retry.
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn unmapped_5xx_not_retried() {
        let (url, hits, _, handle) = mock_api(vec![(501, "not implemented"), (200, "{}")]).await;

        let err = transport(&url).get("/x").await.unwrap_err();
        match err {
            ClientError::Api { kind, .. } => assert_eq!(kind, HttpErrorKind::Other),
            other => panic!("expected Api error, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn connection_refused_is_connection_failed() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = transport(&format!("http://127.0.0.1:{port}"))
            .get("/builds/1")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionFailed { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_body_becomes_null() {
        let (url, _, _, handle) = mock_api(vec![(200, "")]).await;

        let value = transport(&url)
            .post("/snapshots/5/finalize", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(value.is_null());

        handle.abort();
    }

    #[tokio::test]
    async fn api_error_carries_method_url_body() {
        let (url, _, _, handle) = mock_api(vec![(403, "forbidden project")]).await;

        let err = transport(&url)
            .post("/builds/", &serde_json::json!({}))
            .await
            .unwrap_err();
        match err {
            ClientError::Api {
                method, url, body, ..
            } => {
                assert_eq!(method, "POST");
                assert!(url.ends_with("/builds/"));
                assert_eq!(body, "forbidden project");
            }
            other => panic!("expected Api error, got {other:?}"),
        }

        handle.abort();
    }

    #[test]
    fn trailing_slash_normalized() {
        let t = Transport::new("tok", "https://snapgate.io/api/v1/", "ua").unwrap();
        assert_eq!(t.api_url(), "https://snapgate.io/api/v1");
    }

    #[test]
    fn default_policy_bounds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.min_server_delay, Duration::from_secs(1));
        assert_eq!(policy.max_server_delay, Duration::from_secs(3));

        let delay = policy.server_delay();
        assert!(delay >= policy.min_server_delay && delay <= policy.max_server_delay);
    }

    #[test]
    fn immediate_policy_has_no_delay() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.server_delay(), Duration::ZERO);
    }

    #[test]
    fn user_agent_includes_ci() {
        let plain = user_agent(None);
        assert!(plain.starts_with("snapgate-client/"));
        assert!(!plain.contains("ci="));

        let with_ci = user_agent(Some("gitlab/17.2"));
        assert!(with_ci.contains("(ci=gitlab/17.2)"));
    }
}
