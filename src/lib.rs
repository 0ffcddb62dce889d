//! lyncbot - client for the Lync / Skype for Business UCWA API.
//!
//! UCWA is a hypermedia API: every response carries `_links` to related
//! resources and `_embedded` copies of some of them. This crate logs in,
//! exposes the responses as a lazily resolved resource graph, long-polls the
//! server's event feed, and tracks instant-messaging conversations on top.
//!
//! # Architecture
//!
//! - **Transport** - blocking HTTP with the session's authorization header
//! - **Resource graph** - stub/resolved nodes built from `_links` and `_embedded`
//! - **Session** - login handshake, people, presence, callback registry
//! - **Event loop** - long poll of `events`, dispatch by subscription key
//! - **Conversation** - invite-or-reuse, send, inbound filtering
//!
//! # Modules
//!
//! - [`auth`] - discovery, OAuth challenge and token exchange
//! - [`resource`] - the hypermedia graph
//! - [`session`] - authenticated session handle
//! - [`events`] - subscriptions and the event loop
//! - [`conversation`] - messaging conversations
//! - [`data_href`] - `data:` URI codec
//! - [`config`] - configuration loading

pub mod auth;
pub mod config;
pub mod constants;
pub mod contact;
pub mod conversation;
pub mod data_href;
pub mod error;
pub mod events;
pub mod resource;
pub mod session;
pub mod testing;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use contact::Contact;
pub use conversation::Conversation;
pub use data_href::{DataEncoding, DataHref};
pub use error::{Result, UcwaError};
pub use events::{CallbackId, Event, EventLoop, SubscriptionKey};
pub use resource::{Body, Invoked, Resource, ResolutionState};
pub use session::Session;
pub use transport::{HttpBackend, ReqwestBackend};
