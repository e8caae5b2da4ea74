use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use roomchat::coordinator::{Coordinator, Settings};
use roomchat::moderation::WordList;
use roomchat::server;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn start_server() -> SocketAddr {
    let coordinator = Coordinator::start(Settings::default(), Arc::new(WordList::new(["darn"])));
    let routes = server::routes(coordinator, std::env::temp_dir());
    let (addr, serving) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serving);
    addr
}

async fn open(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, frame: Value) {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Reads frames until one of type `kind` arrives.
async fn expect(socket: &mut Socket, kind: &str) -> Value {
    loop {
        let message = socket.next().await.unwrap().unwrap();
        if let Message::Text(text) = message {
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["type"] == kind {
                return frame;
            }
        }
    }
}

#[tokio::test]
async fn two_clients_chat_over_websocket() {
    let addr = start_server();
    let mut alice = open(addr).await;
    let mut bob = open(addr).await;

    send(&mut alice, json!({ "type": "connect", "userId": "alice", "requestId": "1" })).await;
    let rooms = expect(&mut alice, "existingRooms").await;
    assert_eq!(rooms["replyTo"], "1");
    // Bob's round trip guarantees his session is registered before the room exists.
    send(&mut bob, json!({ "type": "listRooms" })).await;
    expect(&mut bob, "existingRooms").await;

    send(
        &mut alice,
        json!({
            "type": "createRoom",
            "displayName": "Alice",
            "locationLabel": "NYC",
            "userId": "alice",
            "roomName": "Lobby",
            "visibility": "public",
        }),
    )
    .await;
    let created = expect(&mut bob, "roomCreated").await;
    let room_id = created["room"]["id"].as_str().unwrap().to_string();

    send(
        &mut bob,
        json!({
            "type": "joinRoom",
            "roomId": room_id,
            "displayName": "Bob",
            "locationLabel": "LA",
            "userId": "bob",
        }),
    )
    .await;
    let roster = expect(&mut bob, "initializeUsers").await;
    assert_eq!(roster["members"].as_array().unwrap().len(), 2);
    let joined = expect(&mut alice, "userJoined").await;
    assert_eq!(joined["displayName"], "Bob");

    send(
        &mut bob,
        json!({ "type": "message", "roomId": room_id, "userId": "bob", "text": "hello" }),
    )
    .await;
    let relayed = expect(&mut alice, "message").await;
    assert_eq!(relayed["text"], "hello");
    assert_eq!(relayed["userId"], "bob");
}

#[tokio::test]
async fn malformed_frames_get_a_validation_error() {
    let addr = start_server();
    let mut client = open(addr).await;

    client
        .send(Message::Text("not json".into()))
        .await
        .unwrap();
    let error = expect(&mut client, "validationError").await;
    assert_eq!(error["message"], "Malformed message");

    // The connection stays usable.
    send(&mut client, json!({ "type": "listRooms" })).await;
    expect(&mut client, "existingRooms").await;
}

#[tokio::test]
async fn banned_connection_is_closed() {
    let addr = start_server();
    let mut client = open(addr).await;

    send(&mut client, json!({ "type": "connect", "userId": "mallory" })).await;
    send(
        &mut client,
        json!({ "type": "message", "roomId": "_x", "userId": "mallory", "text": "darn" }),
    )
    .await;
    expect(&mut client, "banned").await;

    loop {
        match client.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }
}
