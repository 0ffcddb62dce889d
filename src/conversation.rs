//! Two-party instant-messaging conversations.
//!
//! A conversation starts *unbound*. The first [`Conversation::send`] posts
//! `startMessaging` with the text as the invitation message, follows the
//! returned invitation to the server-side conversation and binds to it.
//! Later sends post straight to the bound messaging modality.
//!
//! Conversations created from an accepted invitation start bound.
//!
//! Every conversation subscribes to `(conversation, message)` events and
//! forwards incoming messages on its own messaging modality to the inbound
//! callback as `"sender: text"`. The subscription is removed when the last
//! handle is dropped.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::{json, Value};
use uuid::Uuid;

use crate::constants::{
    DIRECTION_INCOMING, EVENT_STARTED, REL_COMMUNICATION, REL_CONVERSATION, REL_MESSAGE,
    REL_MESSAGING, REL_MESSAGING_INVITATION,
};
use crate::data_href::{self, DataEncoding};
use crate::error::{Result, UcwaError};
use crate::events::{CallbackId, Event, SubscriptionKey};
use crate::resource::{Body, Invoked, Resource};
use crate::session::Session;

/// Receives `"sender: text"` for each inbound message.
pub type InboundCallback = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

enum Binding {
    Unbound,
    Bound {
        conversation: Resource,
        messaging: Resource,
    },
}

struct ConversationInner {
    session: Session,
    parties: Vec<String>,
    binding: Mutex<Binding>,
    inbound: Mutex<Option<InboundCallback>>,
    invite_message: Option<String>,
    subscription: CallbackId,
}

impl Drop for ConversationInner {
    fn drop(&mut self) {
        self.session.unregister_callback(&self.subscription);
    }
}

impl ConversationInner {
    fn binding(&self) -> MutexGuard<'_, Binding> {
        self.binding
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn bound_messaging(&self) -> Option<Resource> {
        match &*self.binding() {
            Binding::Bound { messaging, .. } => Some(messaging.clone()),
            Binding::Unbound => None,
        }
    }

    fn inbound_callback(&self) -> Option<InboundCallback> {
        self.inbound
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn on_message(&self, event: &Event) -> anyhow::Result<()> {
        let Some(messaging) = self.bound_messaging() else {
            return Ok(());
        };
        let Some(callback) = self.inbound_callback() else {
            return Ok(());
        };
        if let Some(line) = inbound_line(&event.target(), &messaging)? {
            callback(&line)?;
        }
        Ok(())
    }
}

/// Handle to a conversation. Clones share state.
#[derive(Clone)]
pub struct Conversation {
    inner: Arc<ConversationInner>,
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("parties", &self.inner.parties)
            .field("bound", &self.is_bound())
            .field("subscription", &self.inner.subscription)
            .finish_non_exhaustive()
    }
}

impl Conversation {
    pub(crate) fn new(session: &Session, parties: Vec<String>) -> Self {
        Self::build(session, parties, Binding::Unbound, None)
    }

    fn accepted(
        session: &Session,
        parties: Vec<String>,
        conversation: Resource,
        messaging: Resource,
        invite_message: Option<String>,
    ) -> Self {
        Self::build(
            session,
            parties,
            Binding::Bound {
                conversation,
                messaging,
            },
            invite_message,
        )
    }

    fn build(
        session: &Session,
        parties: Vec<String>,
        binding: Binding,
        invite_message: Option<String>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<ConversationInner>| {
            let weak = Weak::clone(weak);
            let subscription = session.register_callback(
                (REL_CONVERSATION, REL_MESSAGE),
                move |_, event| match weak.upgrade() {
                    Some(inner) => inner.on_message(event),
                    None => Ok(()),
                },
            );
            ConversationInner {
                session: session.clone(),
                parties,
                binding: Mutex::new(binding),
                inbound: Mutex::new(None),
                invite_message,
                subscription,
            }
        });
        Self { inner }
    }

    /// Remote parties, first one is the invitee.
    pub fn parties(&self) -> &[String] {
        &self.inner.parties
    }

    /// The message that came with an accepted invitation.
    pub fn invite_message(&self) -> Option<&str> {
        self.inner.invite_message.as_deref()
    }

    /// Whether a server-side conversation is attached.
    pub fn is_bound(&self) -> bool {
        matches!(*self.inner.binding(), Binding::Bound { .. })
    }

    /// The bound server-side conversation.
    pub fn resource(&self) -> Option<Resource> {
        match &*self.inner.binding() {
            Binding::Bound { conversation, .. } => Some(conversation.clone()),
            Binding::Unbound => None,
        }
    }

    /// The bound messaging modality.
    pub fn messaging(&self) -> Option<Resource> {
        self.inner.bound_messaging()
    }

    /// Installs the callback receiving inbound messages, replacing any
    /// previous one.
    pub fn set_inbound_callback<F>(&self, callback: F)
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        *self
            .inner
            .inbound
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Sends `text`. The first send on an unbound conversation invites the
    /// first party with `text` as the invitation message.
    pub fn send(&self, text: &str) -> Result<()> {
        let mut binding = self.inner.binding();
        let messaging = match &*binding {
            Binding::Bound { messaging, .. } => messaging.clone(),
            Binding::Unbound => {
                let (conversation, messaging) = self.invite(text)?;
                log::info!(
                    "Conversation with {} bound to {}",
                    self.inner.parties.join(", "),
                    conversation.href().unwrap_or("<anonymous>")
                );
                *binding = Binding::Bound {
                    conversation,
                    messaging,
                };
                return Ok(());
            }
        };
        drop(binding);

        if !messaging.has_link("sendMessage")? {
            messaging.refresh()?;
        }
        messaging
            .follow("sendMessage")?
            .post(Body::Text(text.to_string()))
    }

    fn invite(&self, text: &str) -> Result<(Resource, Resource)> {
        let to = self
            .inner
            .parties
            .first()
            .ok_or_else(|| UcwaError::InviteFailed("conversation has no parties".to_string()))?;
        let session = &self.inner.session;
        let start = session
            .application()
            .follow(REL_COMMUNICATION)?
            .follow("startMessaging")?;

        let body = json!({
            "importance": "Normal",
            "sessionContext": Uuid::new_v4().to_string(),
            "subject": "",
            "to": to,
            "operationId": Uuid::new_v4().to_string(),
            "_links": {
                "message": {
                    "href": data_href::encode(text, "text/plain", DataEncoding::utf8()),
                },
            },
        });

        let location = match start.invoke(Some(Body::Json(body)), &[]) {
            Ok(Invoked::Location(location)) => location,
            Ok(Invoked::Resource(_)) => {
                return Err(UcwaError::InviteFailed(format!(
                    "startMessaging answered without a Location for {to}"
                )))
            }
            Err(UcwaError::UnexpectedResponse(url)) => {
                return Err(UcwaError::InviteFailed(format!("no Location from {url}")))
            }
            Err(e) => return Err(e),
        };

        let api = session.api();
        let invitation = Resource::stub(Arc::clone(api), &api.href_for(&location));
        let conversation = invitation.link(REL_CONVERSATION)?;
        let messaging = conversation.link(REL_MESSAGING)?;
        Ok((conversation, messaging))
    }
}

/// Subscription used for incoming messaging invitations.
pub(crate) fn invitation_key() -> SubscriptionKey {
    SubscriptionKey::typed(REL_COMMUNICATION, REL_MESSAGING_INVITATION, EVENT_STARTED)
}

fn is_incoming(resource: &Resource) -> Result<bool> {
    Ok(resource.try_get("direction")?.as_ref().and_then(Value::as_str) == Some(DIRECTION_INCOMING))
}

/// Accepts an incoming invitation event and returns the bound conversation.
/// Outgoing invitations (our own `startMessaging`) yield `None`.
pub(crate) fn accept_invitation(session: &Session, event: &Event) -> Result<Option<Conversation>> {
    let invitation = event.target();
    if !is_incoming(&invitation)? {
        log::debug!("Ignoring outgoing invitation {}", event.link_href());
        return Ok(None);
    }

    invitation.follow("accept")?.post(Body::Raw)?;

    let conversation = invitation.link(REL_CONVERSATION)?;
    let messaging = if invitation.has_link(REL_MESSAGING)? {
        invitation.link(REL_MESSAGING)?
    } else {
        conversation.link(REL_MESSAGING)?
    };
    let parties = invitation
        .follow("from")
        .and_then(|from| from.get_str("uri"))
        .map(|uri| vec![uri])
        .unwrap_or_default();
    let invite_message = invitation.inline(REL_MESSAGE).ok().map(|m| m.plain_text());

    log::info!("Accepted invitation from {}", parties.join(", "));
    Ok(Some(Conversation::accepted(
        session,
        parties,
        conversation,
        messaging,
        invite_message,
    )))
}

/// `"sender: text"` for an incoming message on `messaging`, `None` when the
/// message is outgoing or belongs to another conversation.
fn inbound_line(message: &Resource, messaging: &Resource) -> Result<Option<String>> {
    if !is_incoming(message)? {
        return Ok(None);
    }
    match message.link(REL_MESSAGING) {
        Ok(ref own) if own == messaging => {}
        _ => return Ok(None),
    }

    let sender = message
        .link_info("participant")
        .ok()
        .and_then(|link| link.title().map(str::to_string))
        .or_else(|| {
            message
                .follow("contact")
                .and_then(|contact| contact.get_str("name"))
                .ok()
        })
        .unwrap_or_else(|| "unknown".to_string());

    let text = if let Ok(html) = message.inline("htmlMessage") {
        html.plain_text()
    } else if let Ok(plain) = message.inline("plainMessage") {
        plain.as_text()
    } else {
        message
            .try_get(REL_MESSAGE)?
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Ok(Some(format!("{sender}: {text}")))
}
