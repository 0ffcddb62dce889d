//! Protocol constants and configuration defaults.
//!
//! # Categories
//!
//! - **Timeouts**: HTTP and long-poll timeouts
//! - **Login**: discovery template, OAuth challenge scheme, bootstrap values
//! - **Relations**: link relation names the client navigates by

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Timeout for ordinary API requests.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the `events` long poll.
///
/// UCWA holds the request for up to three minutes before answering with an
/// empty batch, so this must be comfortably longer than that.
pub const EVENT_POLL_TIMEOUT: Duration = Duration::from_secs(240);

// ============================================================================
// Login
// ============================================================================

/// Autodiscovery URL template; `{domain}` is the part of the username after `@`.
pub const DEFAULT_DISCOVERY_URL: &str = "https://lyncdiscover.{domain}/";

/// Upper bound on handshake restarts caused by domain reconciliation.
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 3;

/// Culture sent when registering the application.
pub const DEFAULT_CULTURE: &str = "en-US";

/// User agent sent when registering the application and on every request.
pub fn user_agent() -> String {
    format!("lyncbot/{} ({})", env!("CARGO_PKG_VERSION"), std::env::consts::OS)
}

// ============================================================================
// Relations
// ============================================================================

/// The relation identifying a resource's own address.
pub const REL_SELF: &str = "self";

/// Pagination relation.
pub const REL_NEXT: &str = "next";

/// Sender relation for communication (invitation) events.
pub const REL_COMMUNICATION: &str = "communication";

/// Sender relation for conversation events.
pub const REL_CONVERSATION: &str = "conversation";

/// Event link relation for instant-messaging invitations.
pub const REL_MESSAGING_INVITATION: &str = "messagingInvitation";

/// Event link relation for chat messages.
pub const REL_MESSAGE: &str = "message";

/// Event link relation / resource link to a conversation's messaging modality.
pub const REL_MESSAGING: &str = "messaging";

/// Event type emitted when a resource comes into existence.
pub const EVENT_STARTED: &str = "started";

/// Direction value for messages and invitations originated remotely.
pub const DIRECTION_INCOMING: &str = "Incoming";
