//! Lazy hypermedia resource graph.
//!
//! Every UCWA response is a JSON object carrying `_links` (relation → href)
//! and `_embedded` (relation → inlined resource or list). A [`Resource`]
//! turns that into a navigable graph without a schema:
//!
//! - `/`-rooted links become *stub* children holding only their href. The
//!   first read of anything other than the href triggers one GET that
//!   replaces the stub's content in place.
//! - `data:` links are decoded into inline [`DataHref`] values.
//! - Embedded relations are built immediately from the inlined JSON.
//! - Any other href (absolute external URLs) is recorded in the link table
//!   but not turned into a child.
//!
//! Two resources are equal when their `self` hrefs are equal, whatever the
//! freshness of their content.
//!
//! # Concurrency
//!
//! Content sits behind a per-node mutex. Resolution, [`Resource::refresh`]
//! and [`Resource::update`] swap the whole content under that lock, so a
//! reader on another thread sees either the old or the new state, never a
//! mix.

mod link;
mod pages;

pub use link::{Child, Link};
pub use pages::Pages;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::constants::{REL_NEXT, REL_SELF};
use crate::data_href::{self, DataHref};
use crate::error::{Result, UcwaError};
use crate::transport::{Api, Method, Reply, RequestBody};

/// Relation names that collide with reserved words, and the canonical name
/// each alias stands for.
const ALIASES: &[(&str, &str)] = &[
    ("from_", "from"),
    ("type_", "type"),
    ("in_", "in"),
    ("ref_", "ref"),
    ("match_", "match"),
];

/// Maps an alias like `from_` to its relation name (`from`).
pub fn canonical_name(name: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(name, |&(_, canonical)| canonical)
}

/// Whether a resource has been fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    /// Only the `self` href is known.
    Stub,
    /// Content is present.
    Resolved,
}

/// Body for [`Resource::invoke`]. `None` at the call site means GET.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// JSON-encoded POST.
    Json(Value),
    /// `text/plain` POST.
    Text(String),
    /// Empty POST (action links such as `accept`).
    Raw,
}

impl From<Body> for RequestBody {
    fn from(body: Body) -> Self {
        match body {
            Body::Json(value) => Self::Json(value),
            Body::Text(text) => Self::PlainText(text),
            Body::Raw => Self::RawEmpty,
        }
    }
}

/// Outcome of [`Resource::invoke`].
#[derive(Debug, Clone)]
pub enum Invoked {
    /// The server answered with a JSON resource.
    Resource(Resource),
    /// The server answered with a `Location` header.
    Location(String),
}

impl Invoked {
    /// The resource, or [`UcwaError::UnexpectedResponse`].
    pub fn into_resource(self) -> Result<Resource> {
        match self {
            Self::Resource(resource) => Ok(resource),
            Self::Location(location) => Err(UcwaError::UnexpectedResponse(location)),
        }
    }

    /// The location, if that is what came back.
    pub fn into_location(self) -> Option<String> {
        match self {
            Self::Location(location) => Some(location),
            Self::Resource(_) => None,
        }
    }
}

#[derive(Debug)]
struct NodeData {
    state: ResolutionState,
    fields: Map<String, Value>,
    links: BTreeMap<String, Link>,
    linked: HashMap<String, Child>,
    embedded: HashMap<String, Child>,
}

impl NodeData {
    fn stub() -> Self {
        Self {
            state: ResolutionState::Stub,
            fields: Map::new(),
            links: BTreeMap::new(),
            linked: HashMap::new(),
            embedded: HashMap::new(),
        }
    }

    /// Runs link and embed discovery over a JSON document.
    fn build(api: &Arc<Api>, value: &Value) -> Self {
        let mut data = Self::stub();
        data.state = ResolutionState::Resolved;

        let Some(object) = value.as_object() else {
            log::warn!("resource payload is not an object: {value}");
            return data;
        };

        if let Some(links) = object.get("_links").and_then(Value::as_object) {
            for (rel, raw) in links {
                if rel == REL_SELF {
                    continue;
                }
                let Some(link) = Link::from_json(rel, raw) else {
                    continue;
                };
                if link.href.starts_with('/') {
                    let stub = Resource::stub(Arc::clone(api), &link.href);
                    data.linked.insert(rel.clone(), Child::Resource(stub));
                } else if data_href::is_data_href(&link.href) {
                    match DataHref::decode(&link.href) {
                        Ok(inline) => {
                            data.linked.insert(rel.clone(), Child::Inline(inline));
                        }
                        Err(e) => log::debug!("undecodable data link '{rel}': {e}"),
                    }
                }
                data.links.insert(rel.clone(), link);
            }
        }

        if let Some(embeds) = object.get("_embedded").and_then(Value::as_object) {
            for (rel, raw) in embeds {
                let child = match raw {
                    Value::Array(items) => Child::Collection(
                        items
                            .iter()
                            .map(|item| Resource::from_json(Arc::clone(api), item.clone()))
                            .collect(),
                    ),
                    _ => Child::Resource(Resource::from_json(Arc::clone(api), raw.clone())),
                };
                data.embedded.insert(rel.clone(), child);
            }
        }

        data.fields = object
            .iter()
            .filter(|(k, _)| k.as_str() != "_links" && k.as_str() != "_embedded")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        data
    }
}

struct Node {
    api: Arc<Api>,
    href: Option<String>,
    data: Mutex<NodeData>,
}

/// A node of the hypermedia graph. Cloning shares the node.
#[derive(Clone)]
pub struct Resource {
    node: Arc<Node>,
}

impl Resource {
    /// An unresolved resource at `href`.
    pub fn stub(api: Arc<Api>, href: &str) -> Self {
        Self {
            node: Arc::new(Node {
                api,
                href: Some(href.to_string()),
                data: Mutex::new(NodeData::stub()),
            }),
        }
    }

    /// A resolved resource built from a JSON document, no network involved.
    pub fn from_json(api: Arc<Api>, value: Value) -> Self {
        let href = self_href(&value);
        let data = NodeData::build(&api, &value);
        Self {
            node: Arc::new(Node {
                api,
                href,
                data: Mutex::new(data),
            }),
        }
    }

    /// The `self` href. Never triggers resolution.
    pub fn href(&self) -> Option<&str> {
        self.node.href.as_deref()
    }

    /// Current resolution state. Never triggers resolution.
    pub fn state(&self) -> ResolutionState {
        self.lock().state
    }

    /// Shorthand for `state() == Stub`.
    pub fn is_stub(&self) -> bool {
        self.state() == ResolutionState::Stub
    }

    /// The API this resource talks through.
    pub fn api(&self) -> &Arc<Api> {
        &self.node.api
    }

    fn lock(&self) -> MutexGuard<'_, NodeData> {
        self.node
            .data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Locks the content, fetching it first if this is a stub.
    fn resolved(&self) -> Result<MutexGuard<'_, NodeData>> {
        let mut data = self.lock();
        if data.state == ResolutionState::Stub {
            let value = self.fetch(None)?;
            *data = NodeData::build(&self.node.api, &value);
        }
        Ok(data)
    }

    fn fetch(&self, timeout: Option<Duration>) -> Result<Value> {
        let href = self
            .href()
            .ok_or_else(|| UcwaError::not_found(REL_SELF, None))?;
        match self
            .node
            .api
            .request(Method::Get, href, &[], RequestBody::None, timeout)?
        {
            Reply::Json(value) => Ok(value),
            _ => Err(UcwaError::UnexpectedResponse(href.to_string())),
        }
    }

    /// Reads a raw field, resolving a stub first.
    pub fn get(&self, field: &str) -> Result<Value> {
        let field = canonical_name(field);
        self.resolved()?
            .fields
            .get(field)
            .cloned()
            .ok_or_else(|| UcwaError::not_found(field, self.href()))
    }

    /// Reads a string field.
    pub fn get_str(&self, field: &str) -> Result<String> {
        match self.get(field)? {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    /// Like [`Resource::get`] but absent fields are `None`.
    pub fn try_get(&self, field: &str) -> Result<Option<Value>> {
        Ok(self.resolved()?.fields.get(canonical_name(field)).cloned())
    }

    /// Snapshot of every raw field except `_links` and `_embedded`.
    pub fn fields(&self) -> Result<Map<String, Value>> {
        Ok(self.resolved()?.fields.clone())
    }

    /// Whether a link relation exists.
    pub fn has_link(&self, rel: &str) -> Result<bool> {
        Ok(self.resolved()?.links.contains_key(canonical_name(rel)))
    }

    /// Link table entry, including metadata such as `title`.
    pub fn link_info(&self, rel: &str) -> Result<Link> {
        let rel = canonical_name(rel);
        self.resolved()?
            .links
            .get(rel)
            .cloned()
            .ok_or_else(|| UcwaError::not_found(rel, self.href()))
    }

    /// The stub behind a `/`-rooted link. No network call for the child.
    pub fn link(&self, rel: &str) -> Result<Self> {
        let rel = canonical_name(rel);
        match self.resolved()?.linked.get(rel) {
            Some(Child::Resource(resource)) => Ok(resource.clone()),
            _ => Err(UcwaError::not_found(rel, self.href())),
        }
    }

    /// Inline content behind a `data:` link.
    pub fn inline(&self, rel: &str) -> Result<DataHref> {
        let rel = canonical_name(rel);
        match self.resolved()?.linked.get(rel) {
            Some(Child::Inline(inline)) => Ok(inline.clone()),
            _ => Err(UcwaError::not_found(rel, self.href())),
        }
    }

    /// A single embedded resource.
    pub fn embedded(&self, rel: &str) -> Result<Self> {
        let rel = canonical_name(rel);
        match self.resolved()?.embedded.get(rel) {
            Some(Child::Resource(resource)) => Ok(resource.clone()),
            _ => Err(UcwaError::not_found(rel, self.href())),
        }
    }

    /// Embedded resources under `rel`, in server order. Empty when absent;
    /// a single embed is returned as a one-element list.
    pub fn embedded_list(&self, rel: &str) -> Result<Vec<Self>> {
        Ok(match self.resolved()?.embedded.get(canonical_name(rel)) {
            Some(Child::Collection(items)) => items.clone(),
            Some(Child::Resource(resource)) => vec![resource.clone()],
            _ => Vec::new(),
        })
    }

    /// A single child resource, embedded or linked.
    pub fn follow(&self, rel: &str) -> Result<Self> {
        match self.child(rel)? {
            Child::Resource(resource) => Ok(resource),
            _ => Err(UcwaError::not_found(canonical_name(rel), self.href())),
        }
    }

    /// Any child by name; embeds shadow links of the same name.
    pub fn child(&self, name: &str) -> Result<Child> {
        let name = canonical_name(name);
        let data = self.resolved()?;
        data.embedded
            .get(name)
            .or_else(|| data.linked.get(name))
            .cloned()
            .ok_or_else(|| UcwaError::not_found(name, self.href()))
    }

    /// Requests this resource's `self` href: GET without a body, POST with one.
    ///
    /// JSON answers become a resolved [`Resource`]; a bare `Location`
    /// header is returned as [`Invoked::Location`]. Anything else is
    /// [`UcwaError::UnexpectedResponse`].
    pub fn invoke(&self, body: Option<Body>, query: &[(&str, &str)]) -> Result<Invoked> {
        self.invoke_with_timeout(body, query, None)
    }

    pub(crate) fn invoke_with_timeout(
        &self,
        body: Option<Body>,
        query: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<Invoked> {
        let href = self
            .href()
            .ok_or_else(|| UcwaError::not_found(REL_SELF, None))?;
        let (method, body) = match body {
            None => (Method::Get, RequestBody::None),
            Some(body) => (Method::Post, body.into()),
        };
        match self.node.api.request(method, href, query, body, timeout)? {
            Reply::Json(value) => Ok(Invoked::Resource(Self::from_json(
                Arc::clone(&self.node.api),
                value,
            ))),
            Reply::Location(location) => Ok(Invoked::Location(location)),
            Reply::Empty => Err(UcwaError::UnexpectedResponse(href.to_string())),
        }
    }

    /// POST that is expected to return nothing of interest (204 or an
    /// ignorable body). Used for action links like `accept` and `sendMessage`.
    pub fn post(&self, body: Body) -> Result<()> {
        let href = self
            .href()
            .ok_or_else(|| UcwaError::not_found(REL_SELF, None))?;
        self.node
            .api
            .request(Method::Post, href, &[], body.into(), None)?;
        Ok(())
    }

    /// Re-fetches `self` and replaces all content in place.
    pub fn refresh(&self) -> Result<()> {
        self.refresh_with_timeout(None)
    }

    pub(crate) fn refresh_with_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let mut data = self.lock();
        let value = self.fetch(timeout)?;
        *data = NodeData::build(&self.node.api, &value);
        Ok(())
    }

    /// Replaces content from a JSON document, rerunning discovery.
    pub fn update(&self, value: &Value) {
        if let (Some(own), Some(other)) = (self.href(), self_href(value).as_deref()) {
            if own != other {
                log::warn!("updating {own} with a payload describing {other}");
            }
        }
        let data = NodeData::build(&self.node.api, value);
        *self.lock() = data;
    }

    /// `next` link, if this page has one.
    pub fn next_page(&self) -> Result<Option<Self>> {
        if self.has_link(REL_NEXT)? {
            self.link(REL_NEXT).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Iterates this resource and every page reachable through `next`.
    pub fn pages(&self) -> Pages {
        Pages::new(self.clone(), None)
    }

    /// Like [`Resource::pages`] with a per-fetch timeout (long polls).
    pub fn pages_with_timeout(&self, timeout: Duration) -> Pages {
        Pages::new(self.clone(), Some(timeout))
    }
}

fn self_href(value: &Value) -> Option<String> {
    value
        .pointer("/_links/self/href")
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        match (self.href(), other.href()) {
            (Some(a), Some(b)) => a == b,
            _ => Arc::ptr_eq(&self.node, &other.node),
        }
    }
}

impl Eq for Resource {}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("href", &self.href())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
