//! HTTP transport.
//!
//! All network I/O goes through [`HttpBackend`], a single blocking
//! request/response seam. Production code uses [`ReqwestBackend`]; tests plug
//! in [`crate::testing::MockBackend`].
//!
//! [`Transport`] adds the only state the wire layer carries, the
//! `Authorization` header obtained during login, and [`Api`] binds a
//! transport to the application base URL so resource hrefs (always
//! `/`-rooted) can be turned into absolute URLs.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use crate::config::Config;
use crate::error::{Result, UcwaError};

/// HTTP method. UCWA only needs these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// Request body encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body at all (GET).
    None,
    /// `application/json`.
    Json(Value),
    /// `application/x-www-form-urlencoded`.
    UrlEncoded(Vec<(String, String)>),
    /// `text/plain`.
    PlainText(String),
    /// An empty POST body.
    RawEmpty,
}

/// A fully-resolved outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL, query string included.
    pub url: String,
    /// Body.
    pub body: RequestBody,
    /// `Authorization` header value, if any.
    pub authorization: Option<String>,
    /// Per-request timeout overriding the client default.
    pub timeout: Option<Duration>,
}

/// A response with its body already read.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers; names are lowercase.
    pub headers: Vec<(String, String)>,
    /// Body text.
    pub body: String,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// 2xx?
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the body is declared (or, lacking a content type, looks like) JSON.
    pub fn is_json(&self) -> bool {
        match self.header("content-type") {
            Some(ct) => ct.contains("json"),
            None => {
                let trimmed = self.body.trim_start();
                trimmed.starts_with('{') || trimmed.starts_with('[')
            }
        }
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// What a successful request produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A JSON document.
    Json(Value),
    /// A `Location` header (resource creation).
    Location(String),
    /// Neither.
    Empty,
}

/// Blocking request executor.
pub trait HttpBackend: Send + Sync + fmt::Debug {
    /// Executes one request. Non-2xx statuses are returned, not raised.
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpBackend`] on top of `reqwest::blocking`.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: Client,
}

impl ReqwestBackend {
    /// Builds a client from configuration.
    ///
    /// Certificate verification can only be turned off here, per client;
    /// nothing is changed process-wide.
    pub fn new(config: &Config) -> Result<Self> {
        if !config.verify_tls {
            log::warn!("TLS certificate verification is disabled for this session");
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpBackend for ReqwestBackend {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        let mut headers = HeaderMap::new();
        if let Some(ref auth) = request.authorization {
            let value = HeaderValue::from_str(auth)
                .map_err(|e| UcwaError::TokenExchange(format!("unusable token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        builder = match &request.body {
            RequestBody::None => builder,
            RequestBody::Json(value) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                builder.body(serde_json::to_vec(value)?)
            }
            RequestBody::UrlEncoded(pairs) => {
                let encoded = serde_urlencoded::to_string(pairs).map_err(|e| {
                    UcwaError::TokenExchange(format!("cannot encode form: {e}"))
                })?;
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
                builder.body(encoded)
            }
            RequestBody::PlainText(text) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                builder.body(text.clone())
            }
            RequestBody::RawEmpty => builder.body(Vec::new()),
        };

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.headers(headers).send()?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text()?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Backend plus the session's authorization header.
#[derive(Debug)]
pub struct Transport {
    backend: Arc<dyn HttpBackend>,
    authorization: RwLock<Option<String>>,
}

impl Transport {
    /// Wraps a backend. No authorization until [`Transport::set_authorization`].
    pub fn new(backend: Arc<dyn HttpBackend>) -> Self {
        Self {
            backend,
            authorization: RwLock::new(None),
        }
    }

    /// Current `Authorization` header value.
    pub fn authorization(&self) -> Option<String> {
        self.authorization
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replaces the `Authorization` header used for every later request.
    pub fn set_authorization(&self, value: Option<String>) {
        *self
            .authorization
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = value;
    }

    /// Sends a request without judging the status.
    pub fn send(
        &self,
        method: Method,
        url: &str,
        body: RequestBody,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        log::debug!("{method} {url}");
        let request = HttpRequest {
            method,
            url: url.to_string(),
            body,
            authorization: self.authorization(),
            timeout,
        };
        self.backend.execute(&request)
    }

    /// Sends a request and classifies a successful answer.
    pub fn request(
        &self,
        method: Method,
        url: &str,
        body: RequestBody,
        timeout: Option<Duration>,
    ) -> Result<Reply> {
        let response = self.send(method, url, body, timeout)?;
        if !response.is_success() {
            return Err(UcwaError::Status {
                method: method.to_string(),
                url: url.to_string(),
                status: response.status,
            });
        }

        if !response.body.trim().is_empty() && response.is_json() {
            return Ok(Reply::Json(response.json()?));
        }
        if let Some(location) = response.header("location") {
            return Ok(Reply::Location(location.to_string()));
        }
        Ok(Reply::Empty)
    }

    /// GET that must return JSON.
    pub fn get_json(&self, url: &str) -> Result<Value> {
        match self.request(Method::Get, url, RequestBody::None, None)? {
            Reply::Json(value) => Ok(value),
            _ => Err(UcwaError::UnexpectedResponse(url.to_string())),
        }
    }
}

/// A transport bound to the application base URL.
#[derive(Debug)]
pub struct Api {
    transport: Arc<Transport>,
    appbase: String,
}

impl Api {
    /// Binds `transport` to `appbase` (scheme and authority, no trailing slash).
    pub fn new(transport: Arc<Transport>, appbase: impl Into<String>) -> Self {
        let appbase = appbase.into().trim_end_matches('/').to_string();
        Self { transport, appbase }
    }

    /// Scheme and authority every href is resolved against.
    pub fn appbase(&self) -> &str {
        &self.appbase
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Turns a `Location` value into an href. Absolute URLs on the
    /// application base lose their base; relative ones pass through.
    pub fn href_for(&self, location: &str) -> String {
        location
            .strip_prefix(&self.appbase)
            .filter(|rest| rest.starts_with('/'))
            .unwrap_or(location)
            .to_string()
    }

    /// Absolute URL for an href, with query parameters appended.
    pub fn url_for(&self, href: &str, query: &[(&str, &str)]) -> Result<String> {
        let raw = format!("{}{}", self.appbase, href);
        if query.is_empty() {
            return Ok(raw);
        }
        let mut url = url::Url::parse(&raw).map_err(|source| UcwaError::InvalidUrl {
            url: raw.clone(),
            source,
        })?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url.into())
    }

    /// Requests `href` relative to the application base.
    pub fn request(
        &self,
        method: Method,
        href: &str,
        query: &[(&str, &str)],
        body: RequestBody,
        timeout: Option<Duration>,
    ) -> Result<Reply> {
        let url = self.url_for(href, query)?;
        self.transport.request(method, &url, body, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> Api {
        let backend = Arc::new(crate::testing::MockBackend::new());
        Api::new(Arc::new(Transport::new(backend)), "https://pool.example.com/")
    }

    #[test]
    fn test_url_for_plain_href() {
        let url = api().url_for("/ucwa/oauth/v1/applications/1", &[]).unwrap();
        assert_eq!(url, "https://pool.example.com/ucwa/oauth/v1/applications/1");
    }

    #[test]
    fn test_url_for_appends_query() {
        let url = api()
            .url_for("/ucwa/app/people/search", &[("query", "ali smith")])
            .unwrap();
        assert_eq!(
            url,
            "https://pool.example.com/ucwa/app/people/search?query=ali+smith"
        );
    }

    #[test]
    fn test_url_for_keeps_existing_query() {
        let url = api().url_for("/ucwa/app/events?ack=2", &[("timeout", "180")]).unwrap();
        assert_eq!(url, "https://pool.example.com/ucwa/app/events?ack=2&timeout=180");
    }

    #[test]
    fn test_href_for_strips_appbase() {
        let api = api();
        assert_eq!(api.href_for("https://pool.example.com/ucwa/inv/1"), "/ucwa/inv/1");
        assert_eq!(api.href_for("/ucwa/inv/1"), "/ucwa/inv/1");
    }

    #[test]
    fn test_response_header_lookup_is_case_insensitive() {
        let response = HttpResponse {
            status: 201,
            headers: vec![("location".into(), "/ucwa/x".into())],
            body: String::new(),
        };
        assert_eq!(response.header("Location"), Some("/ucwa/x"));
        assert!(response.is_success());
    }

    #[test]
    fn test_is_json_sniffs_body_without_content_type() {
        let response = HttpResponse {
            status: 200,
            headers: vec![],
            body: "  {\"a\":1}".into(),
        };
        assert!(response.is_json());
    }

    #[test]
    fn test_request_classifies_location() {
        let backend = Arc::new(crate::testing::MockBackend::new());
        backend.on_post(
            "https://h/start",
            HttpResponse {
                status: 201,
                headers: vec![("location".into(), "/inv/1".into())],
                body: String::new(),
            },
        );
        let transport = Transport::new(backend);
        let reply = transport
            .request(Method::Post, "https://h/start", RequestBody::RawEmpty, None)
            .unwrap();
        assert_eq!(reply, Reply::Location("/inv/1".into()));
    }

    #[test]
    fn test_request_rejects_error_status() {
        let backend = Arc::new(crate::testing::MockBackend::new());
        backend.on_get("https://h/x", HttpResponse { status: 500, ..Default::default() });
        let transport = Transport::new(backend);
        let err = transport.get_json("https://h/x").unwrap_err();
        assert!(matches!(err, UcwaError::Status { status: 500, .. }));
    }
}
