//! Error types for the UCWA client.
//!
//! Login handshake failures are fatal and surface straight to the caller.
//! Contact resolution failures are recoverable and callers are expected to
//! match on them (see [`UcwaError::is_recoverable`]).

use thiserror::Error;

/// Errors produced by the UCWA client.
#[derive(Debug, Error)]
pub enum UcwaError {
    /// The discovery endpoint was unreachable or did not expose a `user` link.
    #[error("discovery failed for {url}: {reason}")]
    Discovery {
        /// Discovery URL that was queried.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// The unauthenticated user request did not yield a usable OAuth challenge.
    #[error("authentication challenge missing or unparseable: {0}")]
    AuthChallenge(String),

    /// The OAuth token endpoint returned something other than a token.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// Domain reconciliation kept redirecting the handshake.
    #[error("login gave up after {0} domain redirects")]
    TooManyRedirects(u32),

    /// A field, link or embedded resource is absent after resolution.
    #[error("'{field}' not found on {href}")]
    NotFound {
        /// Requested field or relation name.
        field: String,
        /// `self` href of the resource that was searched.
        href: String,
    },

    /// A contact name fragment matched more than one contact.
    #[error("'{query}' matches more than one contact: {}", .matches.join(", "))]
    AmbiguousContact {
        /// The name fragment.
        query: String,
        /// Display names of every match.
        matches: Vec<String>,
    },

    /// No contact matched by listing or by directory search.
    #[error("no contact matches '{0}'")]
    ContactNotFound(String),

    /// The start-messaging call did not answer with a `Location`.
    #[error("conversation invite failed: {0}")]
    InviteFailed(String),

    /// Underlying HTTP failure (connect, TLS, timeout, body read).
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{method} {url} returned {status}")]
    Status {
        /// HTTP method.
        method: String,
        /// Request URL.
        url: String,
        /// Status code.
        status: u16,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A `data:` URI could not be decoded.
    #[error("invalid data href: {0}")]
    DataHref(String),

    /// A request produced neither JSON nor a `Location` header.
    #[error("unexpected response from {0}: neither JSON nor Location")]
    UnexpectedResponse(String),

    /// A URL could not be parsed or joined.
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        /// Offending URL text.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },

    /// The configuration file could not be read.
    #[error("configuration error: {0}")]
    Config(String),

    /// An event callback failed, which ends the event loop.
    #[error("event callback failed: {0:#}")]
    Callback(anyhow::Error),

    /// The event loop thread went away without reporting a result.
    #[error("event loop terminated abnormally: {0}")]
    EventLoop(String),
}

impl UcwaError {
    /// Whether the caller can reasonably recover (retry with a different
    /// query) as opposed to a fatal protocol or network failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AmbiguousContact { .. } | Self::ContactNotFound(_) | Self::NotFound { .. }
        )
    }

    /// Builds a [`UcwaError::NotFound`].
    pub(crate) fn not_found(field: &str, href: Option<&str>) -> Self {
        Self::NotFound {
            field: field.to_string(),
            href: href.unwrap_or("<anonymous>").to_string(),
        }
    }
}

/// Result type for UCWA operations.
pub type Result<T> = std::result::Result<T, UcwaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(UcwaError::ContactNotFound("bob".into()).is_recoverable());
        assert!(UcwaError::AmbiguousContact {
            query: "a".into(),
            matches: vec!["Alice".into(), "Adam".into()],
        }
        .is_recoverable());
        assert!(!UcwaError::AuthChallenge("no header".into()).is_recoverable());
        assert!(!UcwaError::TooManyRedirects(3).is_recoverable());
    }

    #[test]
    fn test_ambiguous_message_lists_matches() {
        let err = UcwaError::AmbiguousContact {
            query: "a".into(),
            matches: vec!["Alice Smith".into(), "Bob Jones".into()],
        };
        assert_eq!(
            err.to_string(),
            "'a' matches more than one contact: Alice Smith, Bob Jones"
        );
    }
}
