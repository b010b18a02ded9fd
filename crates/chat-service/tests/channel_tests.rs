//! Channel end to end over a real socket.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use chat_service::repositories::ConversationStore;
use common::types::{ConversationId, Role, SubjectId};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wf_test_utils::{trip_t1, TestChatServer, TestTokenBuilder, D1, T1, U1, U2};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(server: &TestChatServer, token: &str) -> Ws {
    let url = format!("{}?token={}", server.channel_url(), token);
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Connect and consume the `ready` frame.
async fn connect_ready(server: &TestChatServer, subject: &str, role: Role) -> Ws {
    let mut ws = connect(server, &server.access_token(subject, role)).await;
    let ready = recv(&mut ws).await;
    assert_eq!(ready, json!({"type": "ready", "subjectId": subject}));
    ws
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn join(ws: &mut Ws, conversation: &str) -> Value {
    send(ws, json!({"type": "join", "conversationId": conversation})).await;
    recv(ws).await
}

#[tokio::test]
async fn test_expired_credential_rejected_before_upgrade() {
    let server = TestChatServer::spawn().await.unwrap();
    let expired = TestTokenBuilder::new(server.codec()).expired().build();

    let url = format!("{}?token={}", server.channel_url(), expired);
    match connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        Err(e) => panic!("expected HTTP 401, got {e}"),
        Ok(_) => panic!("handshake should have been rejected"),
    }

    assert_eq!(server.state().rooms.active_rooms().await, 0);
    assert!(server
        .state()
        .rooms
        .room_state(&ConversationId::new(T1))
        .await
        .is_none());
}

#[tokio::test]
async fn test_missing_credential_rejected() {
    let server = TestChatServer::spawn().await.unwrap();
    match connect_async(server.channel_url()).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        Err(e) => panic!("expected HTTP 401, got {e}"),
        Ok(_) => panic!("handshake should have been rejected"),
    }
}

#[tokio::test]
async fn test_bearer_header_handshake() {
    let server = TestChatServer::spawn().await.unwrap();
    let mut request = server.channel_url().into_client_request().unwrap();
    request.headers_mut().insert(
        "authorization",
        format!("Bearer {}", server.access_token(D1, Role::Driver))
            .parse()
            .unwrap(),
    );

    let (mut ws, _) = connect_async(request).await.unwrap();
    assert_eq!(recv(&mut ws).await["subjectId"], D1);
}

#[tokio::test]
async fn test_participants_exchange_messages_in_order() {
    let server = TestChatServer::spawn().await.unwrap();
    let mut rider = connect_ready(&server, U1, Role::Rider).await;
    let mut driver = connect_ready(&server, D1, Role::Driver).await;

    let joined = join(&mut rider, T1).await;
    assert_eq!(joined["type"], "joined");
    assert_eq!(joined["messages"], json!([]));
    assert_eq!(join(&mut driver, T1).await["type"], "joined");

    for text in ["I'm outside", "  coming down  "] {
        send(
            &mut rider,
            json!({"type": "send", "conversationId": T1, "text": text}),
        )
        .await;
    }

    for ws in [&mut rider, &mut driver] {
        let first = recv(ws).await;
        let second = recv(ws).await;
        assert_eq!(first["type"], "message");
        assert_eq!(first["message"]["text"], "I'm outside");
        assert_eq!(first["message"]["authorSubjectId"], U1);
        assert_eq!(second["message"]["text"], "coming down");
        assert!(
            first["message"]["createdAt"].as_str().unwrap()
                <= second["message"]["createdAt"].as_str().unwrap()
        );
    }

    // A later joiner sees the history.
    let mut late = connect_ready(&server, D1, Role::Driver).await;
    let joined = join(&mut late, T1).await;
    assert_eq!(joined["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_outsider_join_forbidden() {
    let server = TestChatServer::spawn().await.unwrap();
    let mut outsider = connect_ready(&server, U2, Role::Rider).await;

    let reply = join(&mut outsider, T1).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "forbidden");
    assert_eq!(reply["conversationId"], T1);

    let reply = join(&mut outsider, "T404").await;
    assert_eq!(reply["code"], "not_found");

    assert_eq!(server.state().rooms.active_rooms().await, 0);
}

#[tokio::test]
async fn test_removed_rider_stops_receiving_and_cannot_send() {
    let server = TestChatServer::spawn().await.unwrap();
    let mut rider = connect_ready(&server, U1, Role::Rider).await;
    let mut driver = connect_ready(&server, D1, Role::Driver).await;
    assert_eq!(join(&mut rider, T1).await["type"], "joined");
    assert_eq!(join(&mut driver, T1).await["type"], "joined");

    let mut trip = trip_t1();
    trip.riders.clear();
    server.conversations().upsert_trip(trip).await;

    send(
        &mut driver,
        json!({"type": "send", "conversationId": T1, "text": "gate code 4411"}),
    )
    .await;
    let delivered = recv(&mut driver).await;
    assert_eq!(delivered["type"], "message");
    assert_eq!(delivered["message"]["text"], "gate code 4411");

    let evicted = recv(&mut rider).await;
    assert_eq!(evicted["type"], "error");
    assert_eq!(evicted["code"], "forbidden");
    assert_eq!(evicted["conversationId"], T1);

    send(
        &mut rider,
        json!({"type": "send", "conversationId": T1, "text": "still here?"}),
    )
    .await;
    let refused = recv(&mut rider).await;
    assert_eq!(refused["type"], "error");
    assert_eq!(refused["code"], "forbidden");

    // Frames arrive in order, so a pong here means no message slipped through.
    send(&mut rider, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut rider).await, json!({"type": "pong"}));

    let stored = server
        .conversations()
        .list_messages(&ConversationId::new(T1))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_send_requires_join_and_bad_frames_keep_connection_open() {
    let server = TestChatServer::spawn().await.unwrap();
    let mut rider = connect_ready(&server, U1, Role::Rider).await;

    send(
        &mut rider,
        json!({"type": "send", "conversationId": T1, "text": "hello"}),
    )
    .await;
    let reply = recv(&mut rider).await;
    assert_eq!(reply["code"], "bad_request");

    rider.send(Message::Text("{not json".to_string())).await.unwrap();
    assert_eq!(recv(&mut rider).await["code"], "bad_request");

    send(&mut rider, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut rider).await, json!({"type": "pong"}));

    assert!(server
        .conversations()
        .list_messages(&ConversationId::new(T1))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_blank_send_rejected() {
    let server = TestChatServer::spawn().await.unwrap();
    let mut rider = connect_ready(&server, U1, Role::Rider).await;
    join(&mut rider, T1).await;

    send(
        &mut rider,
        json!({"type": "send", "conversationId": T1, "text": "   "}),
    )
    .await;
    let reply = recv(&mut rider).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "bad_request");
}

#[tokio::test]
async fn test_leave_stops_delivery() {
    let server = TestChatServer::spawn().await.unwrap();
    let mut rider = connect_ready(&server, U1, Role::Rider).await;
    let mut driver = connect_ready(&server, D1, Role::Driver).await;
    join(&mut rider, T1).await;
    join(&mut driver, T1).await;

    send(&mut rider, json!({"type": "leave", "conversationId": T1})).await;
    assert_eq!(
        recv(&mut rider).await,
        json!({"type": "left", "conversationId": T1})
    );

    send(
        &mut driver,
        json!({"type": "send", "conversationId": T1, "text": "where are you?"}),
    )
    .await;
    assert_eq!(recv(&mut driver).await["type"], "message");

    send(&mut rider, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut rider).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn test_history_frame() {
    let server = TestChatServer::spawn().await.unwrap();
    server
        .state()
        .rooms
        .publish(&ConversationId::new(T1), &SubjectId::new(D1), "arrived")
        .await
        .unwrap();

    let mut rider = connect_ready(&server, U1, Role::Rider).await;
    send(&mut rider, json!({"type": "history", "conversationId": T1})).await;
    let reply = recv(&mut rider).await;
    assert_eq!(reply["type"], "history");
    assert_eq!(reply["messages"][0]["text"], "arrived");
}

#[tokio::test]
async fn test_disconnect_unsubscribes() {
    let server = TestChatServer::spawn().await.unwrap();
    let mut rider = connect_ready(&server, U1, Role::Rider).await;
    join(&mut rider, T1).await;

    let t1 = ConversationId::new(T1);
    assert_eq!(
        server.state().rooms.room_state(&t1).await.unwrap().subscriber_count,
        1
    );

    rider.close(None).await.unwrap();
    drop(rider);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let count = server
            .state()
            .rooms
            .room_state(&t1)
            .await
            .map_or(0, |s| s.subscriber_count);
        if count == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "subscriber not removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_reverify_closes_channel_for_deleted_subject() {
    let server = TestChatServer::spawn_with(&[("CHAT_CHANNEL_REVERIFY_SECONDS", "1")])
        .await
        .unwrap();
    let mut rider = connect_ready(&server, U1, Role::Rider).await;

    server.identities().remove(&SubjectId::new(U1)).await;

    let reply = recv(&mut rider).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["code"], "unknown_subject");

    let next = tokio::time::timeout(Duration::from_secs(5), rider.next())
        .await
        .unwrap();
    assert!(matches!(next, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
}
