use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::room::{Room, RoomId, RosterEntry, UserId, Visibility};

/// Inbound frame: an intent plus an optional id echoed back on replies.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientEnvelope {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub message: ClientMessage,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "connect")]
    Connect { user_id: UserId },
    #[serde(rename = "disconnect")]
    Disconnect {
        #[serde(default)]
        user_id: Option<UserId>,
    },
    #[serde(rename = "createRoom")]
    CreateRoom {
        display_name: String,
        location_label: String,
        user_id: UserId,
        room_name: String,
        visibility: Visibility,
    },
    #[serde(rename = "joinRoom")]
    JoinRoom {
        room_id: RoomId,
        display_name: String,
        location_label: String,
        user_id: UserId,
    },
    #[serde(rename = "leaveRoom")]
    LeaveRoom { room_id: RoomId, user_id: UserId },
    #[serde(rename = "searchRoom")]
    SearchRoom { room_id: RoomId },
    #[serde(rename = "listRooms")]
    ListRooms,
    #[serde(rename = "message")]
    Message {
        room_id: RoomId,
        user_id: UserId,
        text: String,
    },
    #[serde(rename = "typing")]
    Typing {
        room_id: RoomId,
        user_id: UserId,
        #[serde(default)]
        text: String,
    },
}

/// Outbound frame. `reply_to` is set only on replies to the originating
/// connection.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<&'a str>,
    #[serde(flatten)]
    pub message: &'a ServerMessage,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "roomCreated")]
    RoomCreated { room: Room },
    #[serde(rename = "roomJoined")]
    RoomJoined {
        room_id: RoomId,
        room_name: String,
        room_type: Visibility,
        user_id: UserId,
        display_name: String,
        location_label: String,
    },
    #[serde(rename = "initializeUsers")]
    InitializeUsers { members: Vec<RosterEntry> },
    #[serde(rename = "roomUpdated")]
    RoomUpdated { room: Room },
    #[serde(rename = "roomRemoved")]
    RoomRemoved { room_id: RoomId },
    #[serde(rename = "userJoined")]
    UserJoined {
        room_id: RoomId,
        user_id: UserId,
        display_name: String,
        location_label: String,
    },
    #[serde(rename = "userLeft")]
    UserLeft { room_id: RoomId, user_id: UserId },
    #[serde(rename = "existingRooms")]
    ExistingRooms { rooms: Vec<Room> },
    #[serde(rename = "searchResult")]
    SearchResult { room: Option<Room> },
    #[serde(rename = "countsChanged")]
    CountsChanged { room_count: usize, user_count: usize },
    #[serde(rename = "message")]
    Message {
        room_id: RoomId,
        user_id: UserId,
        text: String,
    },
    #[serde(rename = "typing")]
    Typing {
        room_id: RoomId,
        user_id: UserId,
        text: String,
    },
    /// `expires_at` is milliseconds since the Unix epoch.
    #[serde(rename = "banned")]
    Banned { expires_at: u64 },
    #[serde(rename = "duplicateSession")]
    DuplicateSession,
    #[serde(rename = "validationError")]
    ValidationError { message: String },
    #[serde(rename = "roomFull")]
    RoomFull,
    #[serde(rename = "roomNotFound")]
    RoomNotFound,
}

pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[test]
    fn parses_create_room_with_request_id() {
        let envelope: ClientEnvelope = serde_json::from_value(json!({
            "type": "createRoom",
            "requestId": "r1",
            "displayName": "alice",
            "locationLabel": "NYC",
            "userId": "u-alice",
            "roomName": "Lobby",
            "visibility": "public"
        }))
        .unwrap();

        assert_eq!(envelope.request_id.as_deref(), Some("r1"));
        assert_eq!(
            envelope.message,
            ClientMessage::CreateRoom {
                display_name: "alice".into(),
                location_label: "NYC".into(),
                user_id: "u-alice".into(),
                room_name: "Lobby".into(),
                visibility: Visibility::Public,
            }
        );
    }

    #[test]
    fn parses_unit_intent_without_request_id() {
        let envelope: ClientEnvelope =
            serde_json::from_value(json!({ "type": "listRooms" })).unwrap();
        assert!(envelope.request_id.is_none());
        assert_eq!(envelope.message, ClientMessage::ListRooms);
    }

    #[test]
    fn rejects_unknown_visibility() {
        let result = serde_json::from_value::<ClientEnvelope>(json!({
            "type": "createRoom",
            "displayName": "alice",
            "locationLabel": "NYC",
            "userId": "u-alice",
            "roomName": "Lobby",
            "visibility": "secret"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn reply_envelope_carries_reply_to() {
        let message = ServerMessage::RoomFull;
        let value = serde_json::to_value(ServerEnvelope {
            reply_to: Some("r7"),
            message: &message,
        })
        .unwrap();
        assert_eq!(value, json!({ "type": "roomFull", "replyTo": "r7" }));

        let value = serde_json::to_value(ServerEnvelope {
            reply_to: None,
            message: &ServerMessage::CountsChanged {
                room_count: 2,
                user_count: 3,
            },
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "type": "countsChanged", "roomCount": 2, "userCount": 3 })
        );
    }

    #[test]
    fn epoch_millis_of_known_time() {
        let time = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(epoch_millis(time), 1_700_000_000_123);
    }
}
