//! Event subscriptions and the long-poll event loop.
//!
//! UCWA pushes state changes through the application's `events` resource.
//! Each poll answers with a batch grouped by *sender* (the resource family
//! that changed, e.g. `communication` or `conversation`):
//!
//! ```json
//! {
//!   "_links": {"next": {"href": "/ucwa/.../events?ack=2"}},
//!   "sender": [
//!     {"rel": "conversation", "href": "/ucwa/.../conversations/1",
//!      "events": [{"link": {"rel": "message", "href": "/ucwa/.../messages/9"},
//!                  "type": "added", "_embedded": {"message": {...}}}]}
//!   ]
//! }
//! ```
//!
//! Callbacks subscribe by [`SubscriptionKey`]: the sender relation alone, or
//! narrowed by the event's link relation, or further by event type. For each
//! event the callbacks of the 1-, 2- and 3-component keys run in that order,
//! each list in registration order. A callback error ends the loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, UcwaError};
use crate::resource::{Link, Resource};
use crate::session::Session;
use crate::transport::Api;

/// Identifier returned by registration, used to unregister.
pub type CallbackId = String;

/// A subscriber. Runs synchronously on the event loop thread.
pub type EventCallback = Arc<dyn Fn(&Session, &Event) -> anyhow::Result<()> + Send + Sync>;

/// Interest key: `(sender)`, `(sender, link)` or `(sender, link, type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    sender: String,
    link: Option<String>,
    event_type: Option<String>,
}

impl SubscriptionKey {
    /// Every event from `sender`.
    pub fn sender(sender: &str) -> Self {
        Self {
            sender: sender.to_string(),
            link: None,
            event_type: None,
        }
    }

    /// Events from `sender` about the `link` relation.
    pub fn link(sender: &str, link: &str) -> Self {
        Self {
            link: Some(link.to_string()),
            ..Self::sender(sender)
        }
    }

    /// Events from `sender` about `link` with the given event type.
    pub fn typed(sender: &str, link: &str, event_type: &str) -> Self {
        Self {
            event_type: Some(event_type.to_string()),
            ..Self::link(sender, link)
        }
    }
}

impl From<&str> for SubscriptionKey {
    fn from(sender: &str) -> Self {
        Self::sender(sender)
    }
}

impl From<(&str, &str)> for SubscriptionKey {
    fn from((sender, link): (&str, &str)) -> Self {
        Self::link(sender, link)
    }
}

impl From<(&str, &str, &str)> for SubscriptionKey {
    fn from((sender, link, event_type): (&str, &str, &str)) -> Self {
        Self::typed(sender, link, event_type)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.sender)?;
        if let Some(ref link) = self.link {
            write!(f, ", {link}")?;
        }
        if let Some(ref event_type) = self.event_type {
            write!(f, ", {event_type}")?;
        }
        write!(f, ")")
    }
}

/// One event from a poll batch.
#[derive(Debug, Clone)]
pub struct Event {
    sender: String,
    sender_href: Option<String>,
    link: Link,
    event_type: String,
    resource: Resource,
}

impl Event {
    /// Sender relation (`communication`, `conversation`, `me`, ...).
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Href of the sender resource, when the server gave one.
    pub fn sender_href(&self) -> Option<&str> {
        self.sender_href.as_deref()
    }

    /// Relation of the resource the event is about.
    pub fn link_rel(&self) -> &str {
        &self.link.rel
    }

    /// Href of the resource the event is about.
    pub fn link_href(&self) -> &str {
        &self.link.href
    }

    /// `added`, `updated`, `deleted`, `started`, `completed`, ...
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The raw event object as a resource.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// The resource the event is about: the copy embedded in the event when
    /// present, otherwise a stub at the event link.
    pub fn target(&self) -> Resource {
        match self.resource.embedded(&self.link.rel) {
            Ok(embedded) => embedded,
            Err(_) => Resource::stub(Arc::clone(self.resource.api()), &self.link.href),
        }
    }

    /// The keys this event matches, most general first.
    pub fn keys(&self) -> [SubscriptionKey; 3] {
        [
            SubscriptionKey::sender(&self.sender),
            SubscriptionKey::link(&self.sender, &self.link.rel),
            SubscriptionKey::typed(&self.sender, &self.link.rel, &self.event_type),
        ]
    }
}

#[derive(Debug, Deserialize)]
struct SenderGroup {
    rel: String,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct EventHeader {
    link: Value,
    #[serde(rename = "type")]
    event_type: String,
}

/// Flattens one poll page into events, in received order.
pub fn parse_batch(api: &Arc<Api>, page: &Resource) -> Result<Vec<Event>> {
    let Some(senders) = page.try_get("sender")? else {
        return Ok(Vec::new());
    };
    let groups: Vec<SenderGroup> = serde_json::from_value(senders)?;

    let mut events = Vec::new();
    for group in groups {
        for raw in group.events {
            let header: EventHeader = match serde_json::from_value(raw.clone()) {
                Ok(header) => header,
                Err(e) => {
                    log::warn!("Skipping malformed '{}' event: {e}", group.rel);
                    continue;
                }
            };
            let rel = header
                .link
                .get("rel")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let Some(link) = Link::from_json(rel, &header.link) else {
                log::warn!("Skipping '{}' event without a link href", group.rel);
                continue;
            };
            events.push(Event {
                sender: group.rel.clone(),
                sender_href: group.href.clone(),
                link,
                event_type: header.event_type,
                resource: Resource::from_json(Arc::clone(api), raw),
            });
        }
    }
    Ok(events)
}

/// Subscriptions by key, in registration order.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<SubscriptionKey, Vec<(CallbackId, EventCallback)>>,
    next_id: u64,
    dropped: u64,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("key_count", &self.callbacks.len())
            .field("total_callbacks", &self.callback_count())
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl CallbackRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `callback` under `key`.
    pub fn register(&mut self, key: SubscriptionKey, callback: EventCallback) -> CallbackId {
        let id = format!("cb_{}", self.next_id);
        self.next_id += 1;
        log::debug!("Registered callback '{id}' for {key}");
        self.callbacks.entry(key).or_default().push((id.clone(), callback));
        id
    }

    /// Removes a callback. Returns whether it existed.
    pub fn unregister(&mut self, id: &str) -> bool {
        let mut removed = false;
        self.callbacks.retain(|_, list| {
            let before = list.len();
            list.retain(|(cb_id, _)| cb_id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        if removed {
            log::debug!("Unregistered callback '{id}'");
        }
        removed
    }

    /// Callbacks for an event: 1-, 2-, then 3-component key.
    pub fn matching(&self, event: &Event) -> Vec<EventCallback> {
        event
            .keys()
            .iter()
            .filter_map(|key| self.callbacks.get(key))
            .flatten()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    /// Total registered callbacks.
    pub fn callback_count(&self) -> usize {
        self.callbacks.values().map(Vec::len).sum()
    }

    /// Events that matched no callback so far.
    pub fn dropped_events(&self) -> u64 {
        self.dropped
    }

    fn record_dropped(&mut self) {
        self.dropped += 1;
    }
}

/// Registry shared between the session, its conversations and the loop.
pub type SharedCallbacks = Arc<Mutex<CallbackRegistry>>;

pub(crate) fn lock_registry(registry: &SharedCallbacks) -> MutexGuard<'_, CallbackRegistry> {
    registry
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Runs every matching callback for one event. Returns how many ran.
///
/// The registry lock is released before the callbacks run, so callbacks
/// may register or unregister.
pub(crate) fn dispatch(
    session: &Session,
    registry: &SharedCallbacks,
    event: &Event,
) -> Result<usize> {
    let callbacks = {
        let mut registry = lock_registry(registry);
        let callbacks = registry.matching(event);
        if callbacks.is_empty() {
            registry.record_dropped();
        }
        callbacks
    };

    if callbacks.is_empty() {
        log::debug!(
            "No subscriber for {} event on ({}, {}), dropped",
            event.event_type(),
            event.sender(),
            event.link_rel()
        );
        return Ok(0);
    }

    for callback in &callbacks {
        callback(session, event).map_err(UcwaError::Callback)?;
    }
    Ok(callbacks.len())
}

/// Polls `events` and dispatches until `stop` is set or something fails.
///
/// The flag is checked between polls; a poll already in flight runs to
/// completion (or to the poll timeout) first.
pub(crate) fn run(session: &Session, stop: &AtomicBool) -> Result<()> {
    let events = session.application().link("events")?;
    let timeout = session.config().poll_timeout();
    let api = session.api();

    while !stop.load(Ordering::SeqCst) {
        let first = events
            .invoke_with_timeout(None, &[], Some(timeout))?
            .into_resource()?;
        for page in first.pages_with_timeout(timeout) {
            let page = page?;
            let batch = parse_batch(api, &page)?;
            log::debug!("Received {} event(s)", batch.len());
            for event in &batch {
                session.dispatch(event)?;
            }
            if stop.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    log::info!("Event loop stopped");
    Ok(())
}

/// Handle to an event loop running on its own thread.
pub struct EventLoop {
    stop: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<Result<()>>>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("stop", &self.stop.load(Ordering::SeqCst))
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl EventLoop {
    pub(crate) fn spawn(session: Session) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let thread_handle = thread::Builder::new()
            .name("ucwa-events".to_string())
            .spawn(move || {
                log::info!("Event loop started");
                let result = run(&session, &stop_clone);
                if let Err(ref e) = result {
                    log::error!("Event loop terminated: {e}");
                }
                result
            })
            .map_err(|e| UcwaError::EventLoop(format!("cannot spawn thread: {e}")))?;

        Ok(Self {
            stop,
            thread_handle: Some(thread_handle),
        })
    }

    /// Asks the loop to stop after the current poll.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether the loop thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the loop to exit and returns its outcome.
    pub fn join(mut self) -> Result<()> {
        let Some(handle) = self.thread_handle.take() else {
            return Ok(());
        };
        handle.join().map_err(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            UcwaError::EventLoop(format!("event loop thread panicked: {message}"))
        })?
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
