use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://api.zotero.org";
pub const DEFAULT_USER_AGENT: &str = concat!("zotfeed/", env!("CARGO_PKG_VERSION"));

const API_VERSION_HEADER: &str = "zotero-api-version";
const API_VERSION: &str = "3";
const API_KEY_HEADER: &str = "zotero-api-key";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Added to every `Retry-After` wait to absorb clock skew between us and the server.
const RETRY_AFTER_MARGIN: Duration = Duration::from_millis(100);

/// Errors produced by [`ZoteroClient::get`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Non-2xx response, after the single 429 retry where it applies
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The cancellation token fired before or during a wait
    #[error("Request cancelled")]
    Cancelled,
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("Invalid header value for {0}")]
    InvalidHeader(&'static str),
}

/// Delay bookkeeping for one client.
///
/// `pause` is operator pacing applied before every request. `backoff_secs` is
/// the last `Backoff` value the server sent; it is slept off at the start of
/// the next request and then cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThrottleState {
    pause: Duration,
    backoff_secs: u64,
}

impl ThrottleState {
    pub fn new(pause: Duration) -> Self {
        Self {
            pause,
            backoff_secs: 0,
        }
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }

    pub fn backoff_secs(&self) -> u64 {
        self.backoff_secs
    }

    fn record_backoff(&mut self, secs: u64) {
        self.backoff_secs = secs;
    }

    /// One-shot: returns the pending backoff and resets it to zero.
    fn take_backoff(&mut self) -> Option<Duration> {
        match std::mem::take(&mut self.backoff_secs) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Connection settings for [`ZoteroClient`].
#[derive(Debug)]
pub struct ClientSettings {
    /// Root of the API, e.g. `https://api.zotero.org`
    pub base_url: Url,
    /// Operator-requested pause before every request
    pub pause: Duration,
    pub user_agent: String,
    /// Sent as `Zotero-API-Key` when present
    pub api_key: Option<SecretString>,
}

impl ClientSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            pause: Duration::ZERO,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            api_key: None,
        }
    }
}

/// Normalized view of a successful response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// `Last-Modified-Version` header, if present
    pub last_modified_version: Option<u64>,
    /// `Total-Results` header, if present
    pub total_results: Option<u64>,
    /// Parsed body when the server labelled it as JSON
    pub json: Option<serde_json::Value>,
    /// Raw body bytes
    pub content: Vec<u8>,
}

impl ApiResponse {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// Rate-limited GET client for the Zotero API.
///
/// `get` takes `&mut self`: the throttle state describes "the next request",
/// which only holds while requests are issued one at a time.
pub struct ZoteroClient {
    http: reqwest::Client,
    base_url: Url,
    default_headers: HeaderMap,
    throttle: ThrottleState,
    cancel: Option<CancellationToken>,
}

impl ZoteroClient {
    pub fn new(settings: ClientSettings) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().build()?;
        Self::with_http_client(http, settings)
    }

    /// Builds a client on top of an existing `reqwest::Client` (caller controls configuration).
    pub fn with_http_client(
        http: reqwest::Client,
        settings: ClientSettings,
    ) -> Result<Self, ClientError> {
        if settings.base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl(settings.base_url.to_string()));
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            HeaderName::from_static(API_VERSION_HEADER),
            HeaderValue::from_static(API_VERSION),
        );
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|_| ClientError::InvalidHeader("User-Agent"))?,
        );
        if let Some(key) = &settings.api_key {
            let mut value = HeaderValue::from_str(key.expose_secret())
                .map_err(|_| ClientError::InvalidHeader("Zotero-API-Key"))?;
            value.set_sensitive(true);
            default_headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
        }

        Ok(Self {
            http,
            base_url: settings.base_url,
            default_headers,
            throttle: ThrottleState::new(settings.pause),
            cancel: None,
        })
    }

    /// Attach a token that aborts pending waits and suppresses further requests.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn throttle(&self) -> &ThrottleState {
        &self.throttle
    }

    /// Builds `{base}/{segment}/...`. Segments may themselves contain `/`
    /// (account paths such as `users/1234`); each piece is appended separately.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ClientError::InvalidBaseUrl(self.base_url.to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.extend(segment.split('/').filter(|part| !part.is_empty()));
            }
        }
        Ok(url)
    }

    /// Issue a paced GET.
    ///
    /// # Behavior
    ///
    /// - Sleeps for the operator pause, then for any backoff learned from the previous response
    /// - Caller headers replace default headers with the same name
    /// - A `429` waits `Retry-After` + 0.1s and is retried exactly once
    /// - Any other non-2xx status fails immediately with [`ClientError::HttpStatus`]
    /// - A `Backoff` header on success is stored for the next call, not applied now
    pub async fn get(
        &mut self,
        url: &Url,
        extra_headers: &HeaderMap,
    ) -> Result<ApiResponse, ClientError> {
        self.handle_pause().await?;
        self.handle_backoff().await?;

        let headers = self.merged_headers(extra_headers);
        let mut response = self.send(url, &headers).await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let Some(delay) = retry_after(response.headers()) else {
                tracing::error!(url = %url, "Retry-After wait is too long to honor");
                return Err(ClientError::HttpStatus(StatusCode::TOO_MANY_REQUESTS.as_u16()));
            };
            tracing::warn!(
                url = %url,
                retry_after_secs = delay.as_secs_f64(),
                "Server sent 429 Too Many Requests, waiting before single retry"
            );
            self.sleep(delay.saturating_add(RETRY_AFTER_MARGIN)).await?;
            response = self.send(url, &headers).await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::HttpStatus(status.as_u16()));
        }

        let response_headers = response.headers();
        if let Some(value) = header_str(response_headers, "backoff") {
            match value.parse::<u64>() {
                Ok(secs) => {
                    tracing::info!(backoff_secs = secs, "Server requested backoff before next request");
                    self.throttle.record_backoff(secs);
                }
                Err(_) => {
                    tracing::warn!(value = %value, "Ignoring unparseable Backoff header");
                }
            }
        }

        let last_modified_version = header_u64(response_headers, "last-modified-version");
        let total_results = header_u64(response_headers, "total-results");
        let is_json = header_str(response_headers, "content-type")
            .is_some_and(|content_type| content_type.contains("json"));

        let content = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        let json = if is_json {
            serde_json::from_slice(&content).ok()
        } else {
            None
        };

        tracing::debug!(
            status = status.as_u16(),
            bytes = content.len(),
            last_modified_version = ?last_modified_version,
            total_results = ?total_results,
            "Response received"
        );

        Ok(ApiResponse {
            status: status.as_u16(),
            last_modified_version,
            total_results,
            json,
            content,
        })
    }

    async fn handle_pause(&self) -> Result<(), ClientError> {
        let pause = self.throttle.pause();
        if pause > Duration::ZERO {
            tracing::info!(
                pause_secs = pause.as_secs_f64(),
                "Pausing before request as configured"
            );
            self.sleep(pause).await?;
        }
        Ok(())
    }

    async fn handle_backoff(&mut self) -> Result<(), ClientError> {
        if let Some(delay) = self.throttle.take_backoff() {
            tracing::info!(
                backoff_secs = delay.as_secs(),
                "Honoring server backoff before request"
            );
            self.sleep(delay).await?;
        }
        Ok(())
    }

    fn merged_headers(&self, extra: &HeaderMap) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        for name in extra.keys() {
            headers.remove(name);
        }
        for (name, value) in extra {
            headers.append(name.clone(), value.clone());
        }
        headers
    }

    async fn send(&self, url: &Url, headers: &HeaderMap) -> Result<reqwest::Response, ClientError> {
        self.ensure_active()?;
        log_request(url, headers);

        let response = tokio::time::timeout(
            REQUEST_TIMEOUT,
            self.http.get(url.clone()).headers(headers.clone()).send(),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(ClientError::Transport)?;

        tracing::debug!(url = %url, status = response.status().as_u16(), "Response status");
        Ok(response)
    }

    fn ensure_active(&self) -> Result<(), ClientError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(ClientError::Cancelled),
            _ => Ok(()),
        }
    }

    async fn sleep(&self, duration: Duration) -> Result<(), ClientError> {
        self.ensure_active()?;
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(ClientError::Cancelled),
                    _ = tokio::time::sleep(duration) => Ok(()),
                }
            }
            None => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

fn log_request(url: &Url, headers: &HeaderMap) {
    tracing::debug!(url = %url, "Issuing request");
    for (name, value) in headers {
        let shown = if value.is_sensitive() {
            "[REDACTED]"
        } else {
            value.to_str().unwrap_or("<non-ascii>")
        };
        tracing::trace!(header = %name, value = shown, "Request header");
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name).and_then(|value| value.parse().ok())
}

/// `Retry-After` in (possibly fractional) seconds. Missing or unusable values
/// fall back to zero, leaving only the fixed margin. `None` when the value is
/// too large to represent as a wait.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    match header_str(headers, "retry-after").map(str::parse::<f64>) {
        Some(Ok(secs)) if secs.is_nan() || secs <= 0.0 => Some(Duration::ZERO),
        Some(Ok(secs)) => Duration::try_from_secs_f64(secs).ok(),
        Some(Err(_)) | None => {
            tracing::warn!("429 response without a usable Retry-After header");
            Some(Duration::ZERO)
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ClientError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(ClientError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ClientError::Transport)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ClientError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(ClientError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ZoteroClient {
        let base = Url::parse(&server.uri()).unwrap();
        ZoteroClient::new(ClientSettings::new(base)).unwrap()
    }

    fn url_for(server: &MockServer, p: &str) -> Url {
        Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[test]
    fn test_take_backoff_resets_to_zero() {
        let mut state = ThrottleState::new(Duration::ZERO);
        assert_eq!(state.take_backoff(), None);

        state.record_backoff(5);
        assert_eq!(state.backoff_secs(), 5);
        assert_eq!(state.take_backoff(), Some(Duration::from_secs(5)));
        assert_eq!(state.backoff_secs(), 0);
        assert_eq!(state.take_backoff(), None);
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), Some(Duration::ZERO));

        headers.insert("retry-after", HeaderValue::from_static("2"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));

        headers.insert("retry-after", HeaderValue::from_static("0.5"));
        assert_eq!(retry_after(&headers), Some(Duration::from_millis(500)));

        headers.insert("retry-after", HeaderValue::from_static("-3"));
        assert_eq!(retry_after(&headers), Some(Duration::ZERO));

        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), Some(Duration::ZERO));

        headers.insert("retry-after", HeaderValue::from_static("99999999999999999999"));
        assert_eq!(retry_after(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("1e20"));
        assert_eq!(retry_after(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("inf"));
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test]
    async fn test_unrepresentable_retry_after_fails_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("Retry-After", "99999999999999999999"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let result = client.get(&url_for(&server, "/x"), &HeaderMap::new()).await;

        match result {
            Err(ClientError::HttpStatus(429)) => {}
            other => panic!("Expected HttpStatus(429), got {:?}", other),
        }
    }

    #[test]
    fn test_endpoint_splits_account_path() {
        let base = Url::parse("https://api.zotero.org").unwrap();
        let client = ZoteroClient::new(ClientSettings::new(base)).unwrap();

        let url = client
            .endpoint(&["groups/1234", "items", "ABCD2345"])
            .unwrap();
        assert_eq!(url.as_str(), "https://api.zotero.org/groups/1234/items/ABCD2345");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base = Url::parse("http://localhost:8080/zotero/").unwrap();
        let client = ZoteroClient::new(ClientSettings::new(base)).unwrap();

        let url = client.endpoint(&["users/1", "collections", "X"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/zotero/users/1/collections/X");
    }

    #[tokio::test]
    async fn test_get_normalizes_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/1/items/K1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Last-Modified-Version", "42")
                    .insert_header("Total-Results", "3")
                    .set_body_json(serde_json::json!({ "key": "K1" })),
            )
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let response = client
            .get(&url_for(&server, "/users/1/items/K1"), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.last_modified_version, Some(42));
        assert_eq!(response.total_results, Some(3));
        assert_eq!(response.json, Some(serde_json::json!({ "key": "K1" })));
        assert!(!response.content.is_empty());
    }

    #[tokio::test]
    async fn test_plain_text_body_is_not_parsed_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("AAAA\nBBBB\n"))
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let response = client
            .get(&url_for(&server, "/keys"), &HeaderMap::new())
            .await
            .unwrap();

        assert!(response.json.is_none());
        assert_eq!(response.text(), "AAAA\nBBBB\n");
        assert_eq!(response.last_modified_version, None);
    }

    #[tokio::test]
    async fn test_default_headers_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("zotero-api-version", "3"))
            .and(header("user-agent", DEFAULT_USER_AGENT))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        client
            .get(&url_for(&server, "/x"), &HeaderMap::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_caller_headers_override_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "custom-agent/9"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let mut extra = HeaderMap::new();
        extra.insert(USER_AGENT, HeaderValue::from_static("custom-agent/9"));
        client.get(&url_for(&server, "/x"), &extra).await.unwrap();
    }

    #[tokio::test]
    async fn test_api_key_header_sent_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("zotero-api-key", "abc123"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = ClientSettings::new(Url::parse(&server.uri()).unwrap());
        settings.api_key = Some(SecretString::from("abc123".to_string()));
        let mut client = ZoteroClient::new(settings).unwrap();
        client
            .get(&url_for(&server, "/x"), &HeaderMap::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_429_then_success_waits_retry_after_plus_margin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let start = Instant::now();
        let response = client
            .get(&url_for(&server, "/x"), &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "ok");
        assert!(start.elapsed() >= Duration::from_millis(1100));
    }

    #[tokio::test]
    async fn test_second_429_fails_without_third_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .expect(2)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let result = client.get(&url_for(&server, "/x"), &HeaderMap::new()).await;

        match result {
            Err(ClientError::HttpStatus(429)) => {}
            other => panic!("Expected HttpStatus(429), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let result = client.get(&url_for(&server, "/x"), &HeaderMap::new()).await;

        match result {
            Err(ClientError::HttpStatus(503)) => {}
            other => panic!("Expected HttpStatus(503), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backoff_applies_to_next_call_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).insert_header("Backoff", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut client = client_for(&server);

        let start = Instant::now();
        client
            .get(&url_for(&server, "/first"), &HeaderMap::new())
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(client.throttle().backoff_secs(), 1);

        let start = Instant::now();
        client
            .get(&url_for(&server, "/second"), &HeaderMap::new())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(client.throttle().backoff_secs(), 0);
    }

    #[tokio::test]
    async fn test_backoff_not_recorded_from_error_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).insert_header("Backoff", "30"))
            .mount(&server)
            .await;

        let mut client = client_for(&server);
        let _ = client.get(&url_for(&server, "/x"), &HeaderMap::new()).await;
        assert_eq!(client.throttle().backoff_secs(), 0);
    }

    #[tokio::test]
    async fn test_pause_applied_before_every_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let mut settings = ClientSettings::new(Url::parse(&server.uri()).unwrap());
        settings.pause = Duration::from_millis(200);
        let mut client = ZoteroClient::new(settings).unwrap();

        let start = Instant::now();
        client
            .get(&url_for(&server, "/a"), &HeaderMap::new())
            .await
            .unwrap();
        client
            .get(&url_for(&server, "/b"), &HeaderMap::new())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_cancelled_client_issues_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        token.cancel();
        let mut client = client_for(&server).with_cancellation(token);

        let result = client.get(&url_for(&server, "/x"), &HeaderMap::new()).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff_wait() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let mut client = client_for(&server).with_cancellation(token.clone());
        client.throttle.record_backoff(60);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let start = Instant::now();
        let result = client.get(&url_for(&server, "/x"), &HeaderMap::new()).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
