//! Integration tests for conversations: invite-and-bind, sending, inbound
//! filtering and accepting invitations.

use std::sync::{Arc, Mutex};

use lyncbot::events::parse_batch;
use lyncbot::testing::{self, MockBackend, APPBASE};
use lyncbot::transport::{Method, RequestBody};
use lyncbot::{Config, Conversation, Event, Resource, Session, UcwaError};
use serde_json::{json, Value};

const START: &str = "/app/communication/startMessaging";
const SEND: &str = "/conv/1/messaging/sendMessage";

fn url(href: &str) -> String {
    format!("{APPBASE}{href}")
}

fn session(backend: &Arc<MockBackend>) -> Session {
    Session::with_application(
        Config::default(),
        backend.api(),
        json!({
            "_links": {"self": {"href": "/app"}, "events": {"href": "/app/events"}},
            "_embedded": {
                "communication": {"_links": {
                    "self": {"href": "/app/communication"},
                    "startMessaging": {"href": START}
                }}
            }
        }),
    )
}

/// Scripts startMessaging → invitation → conversation → messaging.
fn script_invite(backend: &Arc<MockBackend>) {
    backend.on_post(&url(START), testing::location("/inv/1"));
    backend.on_get(
        &url("/inv/1"),
        testing::json(json!({
            "_links": {"self": {"href": "/inv/1"}, "conversation": {"href": "/conv/1"}},
            "direction": "Outgoing",
            "state": "Connecting"
        })),
    );
    backend.on_get(
        &url("/conv/1"),
        testing::json(json!({
            "_links": {"self": {"href": "/conv/1"}, "messaging": {"href": "/conv/1/messaging"}},
            "state": "Connecting"
        })),
    );
    backend.on_get(
        &url("/conv/1/messaging"),
        testing::json(json!({
            "_links": {"self": {"href": "/conv/1/messaging"}, "sendMessage": {"href": SEND}},
            "state": "Connected"
        })),
    );
    backend.on_post(&url(SEND), testing::no_content());
}

fn message_events(session: &Session, direction: &str, messaging: &str, text: &str) -> Vec<Event> {
    let page = Resource::from_json(
        Arc::clone(session.api()),
        json!({
            "_links": {"self": {"href": "/app/events"}},
            "sender": [{"rel": "conversation", "href": "/conv/1", "events": [{
                "link": {"rel": "message", "href": "/conv/1/messages/9"},
                "type": "added",
                "_embedded": {"message": {
                    "_links": {
                        "self": {"href": "/conv/1/messages/9"},
                        "messaging": {"href": messaging},
                        "participant": {"href": "/conv/1/participants/bob", "title": "Bob Jones"},
                        "plainMessage": {"href": format!("data:text/plain;charset=utf-8,{}", urlencoding::encode(text))}
                    },
                    "direction": direction
                }}
            }]}]
        }),
    );
    parse_batch(session.api(), &page).unwrap()
}

fn inbox(conversation: &Conversation) -> Arc<Mutex<Vec<String>>> {
    let inbox: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&inbox);
    conversation.set_inbound_callback(move |line| {
        sink.lock().unwrap().push(line.to_string());
        Ok(())
    });
    inbox
}

mod send_tests {
    use super::*;

    #[test]
    fn test_first_send_invites_once_then_reuses_binding() {
        let backend = Arc::new(MockBackend::new());
        script_invite(&backend);
        let session = session(&backend);
        let conversation = session.new_conversation(vec!["sip:bob@example.com".into()]);
        assert!(!conversation.is_bound());

        conversation.send("hello there").unwrap();
        assert!(conversation.is_bound());
        assert_eq!(conversation.resource().unwrap().href(), Some("/conv/1"));
        assert_eq!(conversation.messaging().unwrap().href(), Some("/conv/1/messaging"));

        conversation.send("again").unwrap();
        conversation.send("and again").unwrap();

        assert_eq!(backend.count(Method::Post, &url(START)), 1);
        assert_eq!(backend.count(Method::Get, &url("/inv/1")), 1);
        let sent: Vec<RequestBody> = backend
            .requests()
            .into_iter()
            .filter(|r| r.url == url(SEND))
            .map(|r| r.body)
            .collect();
        assert_eq!(
            sent,
            vec![
                RequestBody::PlainText("again".into()),
                RequestBody::PlainText("and again".into()),
            ]
        );
    }

    #[test]
    fn test_invite_carries_text_as_data_uri() {
        let backend = Arc::new(MockBackend::new());
        script_invite(&backend);
        let session = session(&backend);
        session
            .new_conversation(vec!["sip:bob@example.com".into()])
            .send("hello there")
            .unwrap();

        let invite = backend
            .requests()
            .into_iter()
            .find(|r| r.url == url(START))
            .unwrap();
        let RequestBody::Json(body) = invite.body else {
            panic!("startMessaging must be JSON");
        };
        assert_eq!(body["to"], "sip:bob@example.com");
        assert_eq!(
            body["_links"]["message"]["href"],
            "data:text/plain;charset=utf-8,hello%20there"
        );
        assert!(body["operationId"].as_str().is_some());
    }

    #[test]
    fn test_invite_without_location_fails() {
        let backend = Arc::new(MockBackend::new());
        backend.on_post(&url(START), testing::no_content());
        let session = session(&backend);
        let conversation = session.new_conversation(vec!["sip:bob@example.com".into()]);

        let err = conversation.send("hi").unwrap_err();
        assert!(matches!(err, UcwaError::InviteFailed(_)));
        assert!(!conversation.is_bound());
    }

    #[test]
    fn test_conversation_without_parties() {
        let backend = Arc::new(MockBackend::new());
        let session = session(&backend);
        let err = session.new_conversation(Vec::new()).send("hi").unwrap_err();
        assert!(matches!(err, UcwaError::InviteFailed(_)));
        assert!(backend.requests().is_empty());
    }
}

mod inbound_tests {
    use super::*;

    fn bound(backend: &Arc<MockBackend>, session: &Session) -> Conversation {
        script_invite(backend);
        let conversation = session.new_conversation(vec!["sip:bob@example.com".into()]);
        conversation.send("hello").unwrap();
        conversation
    }

    #[test]
    fn test_incoming_message_on_own_messaging_is_delivered() {
        let backend = Arc::new(MockBackend::new());
        let session = session(&backend);
        let conversation = bound(&backend, &session);
        let inbox = inbox(&conversation);

        for event in message_events(&session, "Incoming", "/conv/1/messaging", "hi back") {
            session.dispatch(&event).unwrap();
        }
        assert_eq!(*inbox.lock().unwrap(), vec!["Bob Jones: hi back"]);
    }

    #[test]
    fn test_outgoing_and_foreign_messages_are_filtered() {
        let backend = Arc::new(MockBackend::new());
        let session = session(&backend);
        let conversation = bound(&backend, &session);
        let inbox = inbox(&conversation);

        let mut events = message_events(&session, "Outgoing", "/conv/1/messaging", "echo");
        events.extend(message_events(&session, "Incoming", "/conv/2/messaging", "other chat"));
        for event in &events {
            session.dispatch(event).unwrap();
        }
        assert!(inbox.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unbound_conversation_ignores_messages() {
        let backend = Arc::new(MockBackend::new());
        let session = session(&backend);
        let conversation = session.new_conversation(vec!["sip:bob@example.com".into()]);
        let inbox = inbox(&conversation);

        for event in message_events(&session, "Incoming", "/conv/1/messaging", "early") {
            session.dispatch(&event).unwrap();
        }
        assert!(inbox.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dropping_conversation_unsubscribes() {
        let backend = Arc::new(MockBackend::new());
        let session = session(&backend);
        let events = message_events(&session, "Incoming", "/conv/1/messaging", "x");

        let conversation = session.new_conversation(vec!["sip:bob@example.com".into()]);
        let copy = conversation.clone();
        assert_eq!(session.dispatch(&events[0]).unwrap(), 1);
        drop(conversation);
        assert_eq!(session.dispatch(&events[0]).unwrap(), 1);
        drop(copy);
        assert_eq!(session.dispatch(&events[0]).unwrap(), 0);
    }
}

mod invitation_tests {
    use super::*;

    fn invitation_event(session: &Session, direction: &str) -> Event {
        let invitation: Value = json!({
            "_links": {
                "self": {"href": "/inv/9"},
                "accept": {"href": "/inv/9/accept"},
                "conversation": {"href": "/conv/9"},
                "messaging": {"href": "/conv/9/messaging"},
                "message": {"href": "data:text/plain;charset=utf-8,Hello%3F"}
            },
            "_embedded": {
                "from": {"_links": {"self": {"href": "/conv/9/participants/carol"}},
                         "name": "Carol White", "uri": "sip:carol@example.com"}
            },
            "direction": direction,
            "state": "Connecting"
        });
        let page = Resource::from_json(
            Arc::clone(session.api()),
            json!({
                "_links": {"self": {"href": "/app/events"}},
                "sender": [{"rel": "communication", "href": "/app/communication", "events": [{
                    "link": {"rel": "messagingInvitation", "href": "/inv/9"},
                    "type": "started",
                    "_embedded": {"messagingInvitation": invitation}
                }]}]
            }),
        );
        parse_batch(session.api(), &page).unwrap().remove(0)
    }

    #[test]
    fn test_incoming_invitation_is_accepted_and_bound() {
        let backend = Arc::new(MockBackend::new());
        backend.on_post(&url("/inv/9/accept"), testing::no_content());
        let session = session(&backend);

        let accepted: Arc<Mutex<Vec<Conversation>>> = Arc::default();
        let sink = Arc::clone(&accepted);
        session.register_invitation_callback(move |_, conversation| {
            sink.lock().unwrap().push(conversation);
            Ok(())
        });

        session.dispatch(&invitation_event(&session, "Incoming")).unwrap();

        let accepted = accepted.lock().unwrap();
        assert_eq!(accepted.len(), 1);
        let conversation = &accepted[0];
        assert!(conversation.is_bound());
        assert_eq!(conversation.parties(), ["sip:carol@example.com".to_string()]);
        assert_eq!(conversation.invite_message(), Some("Hello?"));
        assert_eq!(conversation.messaging().unwrap().href(), Some("/conv/9/messaging"));

        let accept = backend
            .requests()
            .into_iter()
            .find(|r| r.url == url("/inv/9/accept"))
            .unwrap();
        assert_eq!(accept.method, Method::Post);
        assert_eq!(accept.body, RequestBody::RawEmpty);
    }

    #[test]
    fn test_outgoing_invitation_is_ignored() {
        let backend = Arc::new(MockBackend::new());
        let session = session(&backend);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        session.register_invitation_callback(move |_, _| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        session.dispatch(&invitation_event(&session, "Outgoing")).unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(backend.requests().is_empty());
    }

    #[test]
    fn test_failed_accept_surfaces_as_callback_error() {
        let backend = Arc::new(MockBackend::new());
        backend.on_post(&url("/inv/9/accept"), testing::status(410));
        let session = session(&backend);
        session.register_invitation_callback(|_, _| Ok(()));

        let err = session
            .dispatch(&invitation_event(&session, "Incoming"))
            .unwrap_err();
        assert!(matches!(err, UcwaError::Callback(_)));
    }
}
