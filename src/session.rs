//! An authenticated UCWA session.
//!
//! A [`Session`] owns the transport (with its authorization header), the
//! root `application` resource returned by login, and the callback
//! registry the event loop dispatches through. It is cheap to clone; all
//! clones share the same state.
//!
//! # Example
//!
//! ```no_run
//! use lyncbot::{Config, Session};
//!
//! # fn main() -> lyncbot::Result<()> {
//! let config = Config::load()?;
//! let session = Session::login(&config, "alice@example.com", "secret")?;
//! session.set_availability(true)?;
//!
//! let bob = session.resolve_contact("bob")?;
//! let chat = session.new_conversation(vec![bob.uri()?]);
//! chat.send("Hi Bob")?;
//!
//! session.process_events()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::auth;
use crate::config::Config;
use crate::contact::Contact;
use crate::conversation::{self, Conversation};
use crate::error::{Result, UcwaError};
use crate::events::{
    self, lock_registry, CallbackId, CallbackRegistry, Event, EventLoop, SharedCallbacks,
    SubscriptionKey,
};
use crate::resource::{Body, Resource};
use crate::transport::{Api, HttpBackend, ReqwestBackend, Transport};

struct SessionInner {
    config: Config,
    api: Arc<Api>,
    application: Resource,
    callbacks: SharedCallbacks,
}

/// Authenticated session handle.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("appbase", &self.inner.api.appbase())
            .field("application", &self.inner.application.href())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Logs in over HTTPS.
    pub fn login(config: &Config, username: &str, password: &str) -> Result<Self> {
        let backend: Arc<dyn HttpBackend> = Arc::new(ReqwestBackend::new(config)?);
        Self::login_with_backend(config, backend, username, password)
    }

    /// Logs in through a caller-supplied backend.
    pub fn login_with_backend(
        config: &Config,
        backend: Arc<dyn HttpBackend>,
        username: &str,
        password: &str,
    ) -> Result<Self> {
        let transport = Arc::new(Transport::new(backend));
        let bootstrap = auth::login(&transport, config, username, password)?;
        let api = Arc::new(Api::new(transport, bootstrap.appbase));
        Ok(Self::with_application(config.clone(), api, bootstrap.application))
    }

    /// Wraps an already-registered application document.
    pub fn with_application(config: Config, api: Arc<Api>, application: Value) -> Self {
        let application = Resource::from_json(Arc::clone(&api), application);
        Self {
            inner: Arc::new(SessionInner {
                config,
                api,
                application,
                callbacks: Arc::new(Mutex::new(CallbackRegistry::new())),
            }),
        }
    }

    /// `Authorization` header value sent on every request.
    pub fn authorization(&self) -> Option<String> {
        self.inner.api.transport().authorization()
    }

    /// Root `application` resource.
    pub fn application(&self) -> &Resource {
        &self.inner.application
    }

    /// Transport bound to the application base.
    pub fn api(&self) -> &Arc<Api> {
        &self.inner.api
    }

    /// Configuration the session was created with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // ========================================================================
    // People
    // ========================================================================

    fn people(&self) -> Result<Resource> {
        self.application().follow("people")
    }

    /// Contacts on the user's list, optionally narrowed to those whose name
    /// or address contains `query` (case-insensitive).
    pub fn contacts(&self, query: Option<&str>) -> Result<Vec<Contact>> {
        let list = self.people()?.follow("myContacts")?;
        let mut contacts = Vec::new();
        for resource in list.embedded_list("contact")? {
            let contact = Contact::new(resource);
            let keep = match query {
                Some(q) => contact.matches(q)?,
                None => true,
            };
            if keep {
                contacts.push(contact);
            }
        }
        Ok(contacts)
    }

    /// Directory search, every result page.
    pub fn search(&self, query: &str) -> Result<Vec<Contact>> {
        let results = self
            .people()?
            .follow("search")?
            .invoke(None, &[("query", query)])?
            .into_resource()?;

        let mut contacts = Vec::new();
        for page in results.pages() {
            contacts.extend(page?.embedded_list("contact")?.into_iter().map(Contact::new));
        }
        log::debug!("Directory search for '{query}' returned {} contact(s)", contacts.len());
        Ok(contacts)
    }

    /// Resolves a name fragment to exactly one contact: the contact list
    /// first, then the directory.
    pub fn resolve_contact(&self, fragment: &str) -> Result<Contact> {
        let listed = self.contacts(Some(fragment))?;
        let mut candidates = if listed.is_empty() {
            log::debug!("'{fragment}' is not on the contact list, searching the directory");
            self.search(fragment)?
        } else {
            listed
        };

        match candidates.len() {
            0 => Err(UcwaError::ContactNotFound(fragment.to_string())),
            1 => Ok(candidates.remove(0)),
            _ => Err(UcwaError::AmbiguousContact {
                query: fragment.to_string(),
                matches: candidates.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    // ========================================================================
    // Presence
    // ========================================================================

    /// Signs in as Online (ready for messaging) or Away.
    pub fn set_availability(&self, available: bool) -> Result<()> {
        let (sign_in_as, modalities) = if available {
            ("Online", vec!["Messaging"])
        } else {
            ("Away", Vec::new())
        };
        let body = json!({
            "signInAs": sign_in_as,
            "supportedMessageFormats": ["Plain", "Html"],
            "supportedModalities": modalities,
        });
        self.application()
            .follow("me")?
            .follow("makeMeAvailable")?
            .post(Body::Json(body))?;
        log::info!("Availability set to {sign_in_as}");
        Ok(())
    }

    // ========================================================================
    // Conversations and events
    // ========================================================================

    /// An unbound conversation with `parties`. Nothing is sent until the
    /// first [`Conversation::send`].
    pub fn new_conversation(&self, parties: Vec<String>) -> Conversation {
        Conversation::new(self, parties)
    }

    /// Subscribes `callback` to events matching `key`.
    ///
    /// A callback that captures a clone of this session keeps the session
    /// alive until it is unregistered.
    pub fn register_callback<K, F>(&self, key: K, callback: F) -> CallbackId
    where
        K: Into<SubscriptionKey>,
        F: Fn(&Session, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock_registry(&self.inner.callbacks).register(key.into(), Arc::new(callback))
    }

    /// Removes a subscription. Returns whether it existed.
    pub fn unregister_callback(&self, id: &str) -> bool {
        lock_registry(&self.inner.callbacks).unregister(id)
    }

    /// Accepts every incoming messaging invitation and hands the resulting
    /// conversation to `handler`.
    pub fn register_invitation_callback<F>(&self, handler: F) -> CallbackId
    where
        F: Fn(&Session, Conversation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_callback(conversation::invitation_key(), move |session, event| {
            if let Some(conversation) = conversation::accept_invitation(session, event)? {
                handler(session, conversation)?;
            }
            Ok(())
        })
    }

    /// Runs the callbacks subscribed to `event`, as the event loop does.
    /// Returns how many ran.
    pub fn dispatch(&self, event: &Event) -> Result<usize> {
        events::dispatch(self, &self.inner.callbacks, event)
    }

    /// Events so far that matched no subscription.
    pub fn dropped_events(&self) -> u64 {
        lock_registry(&self.inner.callbacks).dropped_events()
    }

    /// Runs the event loop on the calling thread. Returns only on error.
    pub fn process_events(&self) -> Result<()> {
        events::run(self, &AtomicBool::new(false))
    }

    /// Runs the event loop on a background thread.
    pub fn spawn_event_loop(&self) -> Result<EventLoop> {
        EventLoop::spawn(self.clone())
    }
}
