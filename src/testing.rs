//! Test support: a scripted in-memory [`HttpBackend`].
//!
//! Responses are registered per `(method, url)` and served in order; the
//! last response registered for a route keeps being served once the queue
//! is drained. Unrouted requests get a 404. Every request is recorded so
//! tests can assert on exactly what went over the wire.
//!
//! # Example
//!
//! ```
//! use lyncbot::testing::{json, MockBackend};
//! use serde_json::json;
//!
//! let backend = MockBackend::new();
//! backend.on_get("https://h/x", json(json!({"a": 1})));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::error::Result;
use crate::resource::Resource;
use crate::transport::{Api, HttpBackend, HttpRequest, HttpResponse, Method, Transport};

/// Base URL used by [`MockBackend::api`].
pub const APPBASE: &str = "https://pool.example.com";

/// 200 with a JSON body.
pub fn json(value: Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![("content-type".into(), "application/json".into())],
        body: value.to_string(),
    }
}

/// 201 with a `Location` header and no body.
pub fn location(href: &str) -> HttpResponse {
    HttpResponse {
        status: 201,
        headers: vec![("location".into(), href.to_string())],
        body: String::new(),
    }
}

/// Bare status, no body.
pub fn status(code: u16) -> HttpResponse {
    HttpResponse {
        status: code,
        ..HttpResponse::default()
    }
}

/// 204 No Content.
pub fn no_content() -> HttpResponse {
    status(204)
}

#[derive(Debug, Default)]
struct Script {
    routes: HashMap<(Method, String), VecDeque<HttpResponse>>,
    log: Vec<HttpRequest>,
}

/// Scripted backend.
#[derive(Debug, Default)]
pub struct MockBackend {
    script: Mutex<Script>,
}

impl MockBackend {
    /// Empty script: everything 404s.
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queues a response for `method url`.
    pub fn on(&self, method: Method, url: &str, response: HttpResponse) {
        self.script()
            .routes
            .entry((method, url.to_string()))
            .or_default()
            .push_back(response);
    }

    /// Queues a GET response.
    pub fn on_get(&self, url: &str, response: HttpResponse) {
        self.on(Method::Get, url, response);
    }

    /// Queues a POST response.
    pub fn on_post(&self, url: &str, response: HttpResponse) {
        self.on(Method::Post, url, response);
    }

    /// Every request executed so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.script().log.clone()
    }

    /// How many times `method url` was requested.
    pub fn count(&self, method: Method, url: &str) -> usize {
        self.script()
            .log
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    /// An [`Api`] over this backend rooted at [`APPBASE`].
    pub fn api(self: &Arc<Self>) -> Arc<Api> {
        let backend: Arc<dyn HttpBackend> = Arc::clone(self) as Arc<dyn HttpBackend>;
        Arc::new(Api::new(Arc::new(Transport::new(backend)), APPBASE))
    }

    /// A resolved resource built from `value` over this backend.
    pub fn resource(self: &Arc<Self>, value: Value) -> Resource {
        Resource::from_json(self.api(), value)
    }
}

impl HttpBackend for MockBackend {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut script = self.script();
        script.log.push(request.clone());
        let key = (request.method, request.url.clone());
        let response = match script.routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(response.unwrap_or_else(|| status(404)))
    }
}
