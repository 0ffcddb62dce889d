//! End-to-end tests of [`ReqwestBackend`] against a local HTTP server.
//!
//! The client is blocking, so every call into it runs on a blocking task.

use std::sync::Arc;

use lyncbot::transport::{Api, HttpBackend, Transport};
use lyncbot::{Config, ReqwestBackend, Session, UcwaError};
use serde_json::json;
use wiremock::matchers::{body_string, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> Config {
    Config {
        discovery_url: format!("{}/", server.uri()),
        ..Config::default()
    }
}

async fn mount_handshake(server: &MockServer) {
    let challenge = format!(
        r#"Bearer trusted_issuers="", MsRtcOAuth href="{}/token",grant_type="urn:microsoft.rtc:windows,password""#,
        server.uri()
    );

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_links": {"user": {"href": "/u/1"}}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/u/1"))
        .and(header("authorization", "Bearer tok123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_links": {"applications": {"href": "/ucwa/oauth/v1/applications"}}
        })))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/u/1"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge.as_str()))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=alice%40example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok123",
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/ucwa/oauth/v1/applications"))
        .and(header("authorization", "Bearer tok123"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "_links": {
                "self": {"href": "/ucwa/oauth/v1/applications/101"},
                "events": {"href": "/ucwa/oauth/v1/applications/101/events?ack=1"}
            }
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_over_http() {
    let server = MockServer::start().await;
    mount_handshake(&server).await;

    let config = config(&server);
    let session = tokio::task::spawn_blocking(move || {
        Session::login(&config, "alice@example.com", "hunter2")
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(session.authorization().as_deref(), Some("Bearer tok123"));
    assert_eq!(session.api().appbase(), server.uri());
    assert_eq!(
        session.application().href(),
        Some("/ucwa/oauth/v1/applications/101")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_rejected_password() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_links": {"user": {"href": "/u/1"}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/u/1"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            format!(r#"MsRtcOAuth href="{}/token""#, server.uri()).as_str(),
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;

    let config = config(&server);
    let err = tokio::task::spawn_blocking(move || {
        Session::login(&config, "alice@example.com", "wrong")
    })
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, UcwaError::TokenExchange(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_conversation_wire_encodings() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/app/communication/startMessaging"))
        .and(header("content-type", "application/json"))
        .and(body_string_contains("data:text/plain;charset=utf-8,hi%20Bob"))
        .respond_with(ResponseTemplate::new(201).insert_header("Location", "/inv/1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/inv/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_links": {"self": {"href": "/inv/1"}, "conversation": {"href": "/conv/1"}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/conv/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_links": {"self": {"href": "/conv/1"}, "messaging": {"href": "/conv/1/messaging"}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/conv/1/messaging"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_links": {
                "self": {"href": "/conv/1/messaging"},
                "sendMessage": {"href": "/conv/1/messaging/sendMessage"}
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/conv/1/messaging/sendMessage"))
        .and(header("content-type", "text/plain"))
        .and(body_string("how are you?"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let appbase = server.uri();
    tokio::task::spawn_blocking(move || -> lyncbot::Result<()> {
        let config = Config::default();
        let backend: Arc<dyn HttpBackend> = Arc::new(ReqwestBackend::new(&config)?);
        let api = Arc::new(Api::new(Arc::new(Transport::new(backend)), appbase));
        let session = Session::with_application(
            config,
            api,
            json!({
                "_links": {"self": {"href": "/app"}},
                "_embedded": {"communication": {"_links": {
                    "self": {"href": "/app/communication"},
                    "startMessaging": {"href": "/app/communication/startMessaging"}
                }}}
            }),
        );
        let conversation = session.new_conversation(vec!["sip:bob@example.com".into()]);
        conversation.send("hi Bob")?;
        conversation.send("how are you?")
    })
    .await
    .unwrap()
    .unwrap();
}
