//! UCWA login handshake.
//!
//! 1. **Discover**: GET the autodiscovery URL for the user's domain and read
//!    the `user` link.
//! 2. **Challenge**: GET the user URL without credentials; the server answers
//!    401 with `WWW-Authenticate: MsRtcOAuth href="<token endpoint>"`.
//! 3. **Reconcile**: if the token endpoint lives on a different host, move the
//!    user URL to that host and go back to step 2.
//! 4. **Token exchange**: POST a password grant to the token endpoint and
//!    keep `<token_type> <access_token>` as the `Authorization` header.
//! 5. **Bootstrap**: GET the user URL (now authorized) for the
//!    `applications` link, reconcile hosts again, and POST an application
//!    registration. The response is the root `application` resource.
//!
//! Reconciliation restarts are capped by [`Config::max_login_attempts`].

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use url::{Position, Url};

use crate::config::Config;
use crate::error::{Result, UcwaError};
use crate::transport::{Method, Reply, RequestBody, Transport};

static OAUTH_CHALLENGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"MsRtcOAuth\s+href="([^"]*)""#).expect("challenge pattern is valid")
});

/// Token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,
    /// Token type (typically "Bearer").
    pub token_type: String,
}

impl TokenResponse {
    /// `Authorization` header value.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Everything the handshake produced.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    /// Final (reconciled) user URL.
    pub user_url: String,
    /// Absolute applications URL.
    pub applications_url: String,
    /// Scheme and authority of the applications URL.
    pub appbase: String,
    /// Application registration response.
    pub application: Value,
}

/// Runs the handshake. On success `transport` carries the authorization
/// header for every later request.
pub fn login(
    transport: &Transport,
    config: &Config,
    username: &str,
    password: &str,
) -> Result<Bootstrap> {
    let discovery_url = config.discovery_url_for(username);
    let mut user_url = discover(transport, &discovery_url)?;
    let max_attempts = config.max_login_attempts.max(1);

    for attempt in 1..=max_attempts {
        log::info!("Login attempt {attempt} via {user_url}");
        transport.set_authorization(None);

        let oauth_url = challenge(transport, &user_url)?;
        if !same_authority(&user_url, &oauth_url) {
            log::info!("Token endpoint is on another host, moving user URL there");
            user_url = with_authority(&user_url, &oauth_url)?;
            continue;
        }

        let token = exchange_token(transport, &oauth_url, username, password)?;
        transport.set_authorization(Some(token.authorization()));
        log::info!("Obtained {} token", token.token_type);

        let user = transport.get_json(&user_url)?;
        let applications_url = resolve_link(&user, "applications", &user_url)?;
        if !same_authority(&user_url, &applications_url) {
            log::info!("Applications live on another host, restarting login there");
            user_url = with_authority(&user_url, &applications_url)?;
            continue;
        }

        let application = register_application(transport, config, &applications_url)?;
        let appbase = origin(&applications_url)?;
        log::info!("Application registered at {appbase}");
        return Ok(Bootstrap {
            user_url,
            applications_url,
            appbase,
            application,
        });
    }

    Err(UcwaError::TooManyRedirects(max_attempts))
}

/// Step 1: returns the absolute user URL.
pub fn discover(transport: &Transport, discovery_url: &str) -> Result<String> {
    log::info!("Discovering user endpoint at {discovery_url}");
    let discovery_error = |reason: String| UcwaError::Discovery {
        url: discovery_url.to_string(),
        reason,
    };

    let document = transport
        .get_json(discovery_url)
        .map_err(|e| discovery_error(e.to_string()))?;
    resolve_link(&document, "user", discovery_url)
        .map_err(|e| discovery_error(format!("no usable 'user' link: {e}")))
}

/// Step 2: returns the token endpoint advertised by the 401 challenge.
pub fn challenge(transport: &Transport, user_url: &str) -> Result<String> {
    let response = transport.send(Method::Get, user_url, RequestBody::None, None)?;
    if response.status != 401 {
        return Err(UcwaError::AuthChallenge(format!(
            "expected 401 from {user_url}, got {}",
            response.status
        )));
    }
    let header = response.header("www-authenticate").ok_or_else(|| {
        UcwaError::AuthChallenge(format!("401 from {user_url} has no WWW-Authenticate header"))
    })?;
    parse_challenge(header)
}

/// Extracts the `MsRtcOAuth href` from a `WWW-Authenticate` header.
pub fn parse_challenge(header: &str) -> Result<String> {
    OAUTH_CHALLENGE
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| UcwaError::AuthChallenge(format!("no MsRtcOAuth href in '{header}'")))
}

/// Step 4: password grant against the token endpoint.
pub fn exchange_token(
    transport: &Transport,
    oauth_url: &str,
    username: &str,
    password: &str,
) -> Result<TokenResponse> {
    let form = vec![
        ("grant_type".to_string(), "password".to_string()),
        ("username".to_string(), username.to_string()),
        ("password".to_string(), password.to_string()),
    ];
    let response = transport.send(Method::Post, oauth_url, RequestBody::UrlEncoded(form), None)?;
    if !response.is_success() {
        return Err(UcwaError::TokenExchange(format!(
            "token endpoint returned {}",
            response.status
        )));
    }
    serde_json::from_str(&response.body)
        .map_err(|e| UcwaError::TokenExchange(format!("malformed token response: {e}")))
}

fn register_application(
    transport: &Transport,
    config: &Config,
    applications_url: &str,
) -> Result<Value> {
    let registration = json!({
        "culture": config.culture,
        "endpointId": uuid::Uuid::new_v4().to_string(),
        "userAgent": config.user_agent,
    });
    match transport.request(
        Method::Post,
        applications_url,
        RequestBody::Json(registration),
        None,
    )? {
        Reply::Json(application) => Ok(application),
        _ => Err(UcwaError::UnexpectedResponse(applications_url.to_string())),
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|source| UcwaError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

/// Reads `_links.<rel>.href` and resolves it against `base`.
fn resolve_link(document: &Value, rel: &str, base: &str) -> Result<String> {
    let href = document
        .pointer(&format!("/_links/{rel}/href"))
        .and_then(Value::as_str)
        .ok_or_else(|| UcwaError::not_found(rel, Some(base)))?;
    let joined = parse_url(base)?
        .join(href)
        .map_err(|source| UcwaError::InvalidUrl {
            url: href.to_string(),
            source,
        })?;
    Ok(joined.into())
}

/// Whether two URLs share host and port.
pub fn same_authority(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.authority() == b.authority(),
        _ => false,
    }
}

/// `url` with its authority replaced by that of `from`.
pub fn with_authority(url: &str, from: &str) -> Result<String> {
    let target = parse_url(url)?;
    let source = parse_url(from)?;
    let rebuilt = format!(
        "{}://{}{}",
        target.scheme(),
        source.authority(),
        &target[Position::BeforePath..]
    );
    Ok(parse_url(&rebuilt)?.into())
}

/// Scheme and authority of a URL, without a trailing slash.
pub fn origin(url: &str) -> Result<String> {
    let parsed = parse_url(url)?;
    Ok(format!("{}://{}", parsed.scheme(), parsed.authority()))
}
