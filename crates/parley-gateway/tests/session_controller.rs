mod common;

use common::{connection, drain, fragment, streamed_text, ScriptedProvider, Step};
use futures::stream;
use parley_core::Role;
use parley_gateway::{
    ConnectionRegistry, OutboundEvent, RelayConfig, SessionController, SessionState, StreamingRelay,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

const WELCOME: &str = "Connected to chat server. How can I help you today?";
const INVALID: &str = "Invalid message format received. Please try again.";

fn setup() -> (ConnectionRegistry, Arc<ScriptedProvider>, SessionController) {
    let registry = ConnectionRegistry::new();
    let provider = Arc::new(ScriptedProvider::new());
    let config = RelayConfig {
        chunk_delay: Duration::ZERO,
        ..RelayConfig::default()
    };
    let relay = Arc::new(StreamingRelay::new(registry.clone(), provider.clone(), config));
    let controller = SessionController::new(registry.clone(), relay);
    (registry, provider, controller)
}

fn text(json: &str) -> Result<Message, WsError> {
    Ok(Message::Text(json.to_string()))
}

#[tokio::test]
async fn test_session_lifecycle() {
    let (registry, provider, controller) = setup();
    let (conn, mut rx) = connection();
    provider.push_fragments(&["Hi", " there"]);

    let session = controller
        .run(conn, stream::iter(vec![text(r#"{"text": "hello"}"#)]))
        .await;

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.messages_relayed, 1);
    let id = session.id().cloned().unwrap();
    assert!(!registry.contains(&id));
    assert!(!registry.conversations().contains(&id));

    assert_eq!(
        drain(&mut rx),
        vec![
            OutboundEvent::system(WELCOME),
            OutboundEvent::StreamStart,
            OutboundEvent::content("Hi"),
            OutboundEvent::content(" there"),
            OutboundEvent::StreamEnd,
        ]
    );
}

#[tokio::test]
async fn test_messages_are_handled_in_order() {
    let (_registry, provider, controller) = setup();
    let (conn, mut rx) = connection();
    provider.push_fragments(&["one", "!"]);
    provider.push_fragments(&["two"]);

    controller
        .run(
            conn,
            stream::iter(vec![text(r#"{"text": "first"}"#), text(r#"{"text": "second"}"#)]),
        )
        .await;

    let events = drain(&mut rx);
    let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        [
            "system",
            "stream_start",
            "stream_content",
            "stream_content",
            "stream_end",
            "stream_start",
            "stream_content",
            "stream_end",
        ]
    );
    assert_eq!(streamed_text(&events), "one!two");

    // the second request saw the completed first exchange
    let requests = provider.requests();
    let second: Vec<_> = requests[1].turns.iter().map(|t| (t.role, t.text.as_str())).collect();
    assert_eq!(
        second,
        [(Role::User, "first"), (Role::Model, "one!"), (Role::User, "second")]
    );
}

#[tokio::test]
async fn test_malformed_and_blank_input() {
    let (_registry, provider, controller) = setup();
    let (conn, mut rx) = connection();
    provider.push_fragments(&["ok"]);

    let session = controller
        .run(
            conn,
            stream::iter(vec![
                text("not json"),
                text(r#"{"text": "   "}"#),
                text("{}"),
                Ok(Message::Binary(vec![0xff, 0xfe])),
                Ok(Message::Ping(vec![1])),
                text(r#"{"text": "hello"}"#),
            ]),
        )
        .await;

    assert_eq!(session.messages_relayed, 1);
    assert_eq!(provider.requests().len(), 1);
    assert_eq!(
        drain(&mut rx),
        vec![
            OutboundEvent::system(WELCOME),
            OutboundEvent::system(INVALID),
            OutboundEvent::system(INVALID),
            OutboundEvent::StreamStart,
            OutboundEvent::content("ok"),
            OutboundEvent::StreamEnd,
        ]
    );
}

#[tokio::test]
async fn test_binary_json_is_accepted() {
    let (_registry, provider, controller) = setup();
    let (conn, mut rx) = connection();
    provider.push_fragments(&["ok"]);

    controller
        .run(
            conn,
            stream::iter(vec![Ok::<Message, WsError>(Message::Binary(br#"{"text": "hello"}"#.to_vec()))]),
        )
        .await;

    assert_eq!(streamed_text(&drain(&mut rx)), "ok");
}

#[tokio::test]
async fn test_close_frame_ends_session() {
    let (_registry, provider, controller) = setup();
    let (conn, mut rx) = connection();
    provider.push_fragments(&["unused"]);

    let session = controller
        .run(
            conn,
            stream::iter(vec![Ok(Message::Close(None)), text(r#"{"text": "too late"}"#)]),
        )
        .await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(provider.requests().is_empty());
    assert_eq!(drain(&mut rx), vec![OutboundEvent::system(WELCOME)]);
}

#[tokio::test]
async fn test_close_frame_mid_reply_stops_the_reply() {
    let (registry, provider, controller) = setup();
    let (conn, mut rx) = connection();
    let watched = conn.clone();
    let gate = Arc::new(Notify::new());
    provider.push(vec![fragment("first"), Step::Gate(gate.clone()), fragment("second")]);
    let (frames, incoming) = futures::channel::mpsc::unbounded();

    let client = async {
        frames.unbounded_send(text(r#"{"text": "hello"}"#)).unwrap();
        assert_eq!(rx.recv().await, Some(OutboundEvent::system(WELCOME)));
        assert_eq!(rx.recv().await, Some(OutboundEvent::StreamStart));
        assert_eq!(rx.recv().await, Some(OutboundEvent::content("first")));

        // the peer starts the close handshake but keeps the socket open
        frames.unbounded_send(Ok(Message::Close(None))).unwrap();
        while !watched.is_closed() {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        frames
    };
    let (session, _frames) = tokio::join!(controller.run(conn, incoming), client);

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.messages_relayed, 1);
    assert_eq!(provider.pulled(), 1);
    let id = session.id().cloned().unwrap();
    assert!(!registry.contains(&id));
    assert!(!registry.conversations().contains(&id));
    // no further content and no stream_end
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_receive_error_ends_session() {
    let (registry, provider, controller) = setup();
    let (conn, _rx) = connection();

    let session = controller
        .run(
            conn,
            stream::iter(vec![Err(WsError::ConnectionClosed), text(r#"{"text": "hello"}"#)]),
        )
        .await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(provider.requests().is_empty());
    assert_eq!(registry.count(), 0);
}

#[tokio::test]
async fn test_generator_failure_keeps_session_open() {
    let (_registry, provider, controller) = setup();
    let (conn, mut rx) = connection();
    provider.push_call_failure("boom");
    provider.push_fragments(&["recovered"]);

    let session = controller
        .run(
            conn,
            stream::iter(vec![text(r#"{"text": "first"}"#), text(r#"{"text": "second"}"#)]),
        )
        .await;

    assert_eq!(session.messages_relayed, 2);
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| e.kind() == "received"));
    assert_eq!(streamed_text(&events), "recovered");

    // the failed exchange left only its user turn behind
    let turns: Vec<_> = provider.requests()[1].turns.iter().map(|t| t.text.clone()).collect();
    assert_eq!(turns, ["first", "second"]);
}

#[tokio::test]
async fn test_peer_is_told_when_session_ends() {
    let (registry, _provider, controller) = setup();
    let (peer, mut peer_rx) = connection();
    registry.register(peer);
    drain(&mut peer_rx);

    let (conn, _rx) = connection();
    let session = controller
        .run(conn, stream::iter(Vec::<Result<Message, WsError>>::new()))
        .await;

    let id = session.id().cloned().unwrap();
    assert_eq!(
        drain(&mut peer_rx),
        vec![OutboundEvent::system(format!("Client {} has disconnected", id))]
    );
    assert_eq!(registry.count(), 1);
}
