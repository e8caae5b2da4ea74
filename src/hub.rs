//! Fan-out of server events to connected clients.
//!
//! Every connection is represented by the sending half of an unbounded
//! channel drained by that connection's writer task, so delivery never blocks
//! the caller.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, error};
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, RwLock};
use warp::ws::Message;

use crate::messages::{ServerEnvelope, ServerMessage};
use crate::room::{ConnectionId, Member, Room};
use crate::store::Counts;

pub type Outbox = mpsc::UnboundedSender<Message>;

#[derive(Default)]
pub struct Hub {
    connections: RwLock<HashMap<ConnectionId, Outbox>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection_id: &str, outbox: Outbox) {
        let mut connections = self.connections.write().await;
        connections.insert(connection_id.to_string(), outbox);
    }

    pub async fn unregister(&self, connection_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        connections.remove(connection_id).is_some()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Sends `message` to one connection, tagging it as the reply to
    /// `reply_to` when the triggering intent carried a request id.
    pub async fn reply(
        &self,
        connection_id: &str,
        reply_to: Option<&str>,
        message: &ServerMessage,
    ) {
        let Some(text) = encode(reply_to, message) else {
            return;
        };
        let connections = self.connections.read().await;
        if let Some(outbox) = connections.get(connection_id) {
            deliver(connection_id, outbox, Message::text(text));
        }
    }

    pub async fn broadcast(&self, message: &ServerMessage) {
        let Some(text) = encode(None, message) else {
            return;
        };
        let connections = self.connections.read().await;
        for (connection_id, outbox) in connections.iter() {
            deliver(connection_id, outbox, Message::text(text.clone()));
        }
    }

    /// Sends to every member connection of `room` except `except`.
    pub async fn broadcast_to_room_except(
        &self,
        room: &Room,
        message: &ServerMessage,
        except: Option<&str>,
    ) {
        let Some(text) = encode(None, message) else {
            return;
        };
        let connections = self.connections.read().await;
        for member in room.members() {
            if Some(member.connection_id.as_str()) == except {
                continue;
            }
            if let Some(outbox) = connections.get(&member.connection_id) {
                deliver(&member.connection_id, outbox, Message::text(text.clone()));
            }
        }
    }

    /// Sends a close frame to `connection_id` after `delay`, giving the client
    /// time to process whatever was sent just before.
    pub async fn close_after(&self, connection_id: &str, delay: Duration) {
        let outbox = self.connections.read().await.get(connection_id).cloned();
        let Some(outbox) = outbox else {
            return;
        };
        let connection_id = connection_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("Closing connection {connection_id}");
            let _ = outbox.send(Message::close());
        });
    }

    pub async fn room_created(&self, room: &Room) {
        if room.is_public() {
            self.broadcast(&ServerMessage::RoomCreated { room: room.clone() })
                .await;
        }
    }

    pub async fn room_updated(&self, room: &Room) {
        self.broadcast(&ServerMessage::RoomUpdated { room: room.clone() })
            .await;
    }

    pub async fn room_removed(&self, room_id: &str) {
        self.broadcast(&ServerMessage::RoomRemoved {
            room_id: room_id.to_string(),
        })
        .await;
    }

    /// Tells the rest of the room about `member`; the joiner already got its
    /// own confirmation.
    pub async fn user_joined(&self, room: &Room, member: &Member) {
        let message = ServerMessage::UserJoined {
            room_id: room.id.clone(),
            user_id: member.user_id.clone(),
            display_name: member.display_name.clone(),
            location_label: member.location_label.clone(),
        };
        self.broadcast_to_room_except(room, &message, Some(&member.connection_id))
            .await;
    }

    /// `room` is the state after removal, so the leaver is not addressed.
    pub async fn user_left(&self, room: &Room, user_id: &str) {
        let message = ServerMessage::UserLeft {
            room_id: room.id.clone(),
            user_id: user_id.to_string(),
        };
        self.broadcast_to_room_except(room, &message, None).await;
    }

    pub async fn counts_changed(&self, counts: Counts) {
        self.broadcast(&ServerMessage::CountsChanged {
            room_count: counts.room_count,
            user_count: counts.user_count,
        })
        .await;
    }

    /// Discovery snapshot, shuffled on every request so no room is always
    /// listed first.
    pub async fn existing_rooms(
        &self,
        connection_id: &str,
        reply_to: Option<&str>,
        rooms: Vec<Room>,
    ) {
        let message = ServerMessage::ExistingRooms {
            rooms: shuffled(rooms),
        };
        self.reply(connection_id, reply_to, &message).await;
    }
}

pub fn shuffled(mut rooms: Vec<Room>) -> Vec<Room> {
    rooms.shuffle(&mut rand::thread_rng());
    rooms
}

fn encode(reply_to: Option<&str>, message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(&ServerEnvelope { reply_to, message }) {
        Ok(text) => Some(text),
        Err(e) => {
            error!("Failed to encode server message: {e}");
            None
        }
    }
}

fn deliver(connection_id: &str, outbox: &Outbox, message: Message) {
    if outbox.send(message).is_err() {
        debug!("Dropping message for closed connection {connection_id}");
    }
}
