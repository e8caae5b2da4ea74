use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Longest accepted room name, display name, location label or room id.
pub const MAX_FIELD_CHARS: usize = 20;

pub const MAX_USER_ID_CHARS: usize = 64;

pub const DEFAULT_CAPACITY: usize = 5;

const ROOM_ID_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ROOM_ID_LEN: usize = 9;

pub type RoomId = String;
pub type UserId = String;
pub type ConnectionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: UserId,
    pub display_name: String,
    pub location_label: String,
    #[serde(skip)]
    pub connection_id: ConnectionId,
}

impl Member {
    pub fn new(
        user_id: impl Into<UserId>,
        display_name: impl Into<String>,
        location_label: impl Into<String>,
        connection_id: impl Into<ConnectionId>,
    ) -> Self {
        Member {
            user_id: user_id.into(),
            display_name: display_name.into(),
            location_label: location_label.into(),
            connection_id: connection_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        check_field("User id", &self.user_id, MAX_USER_ID_CHARS)?;
        check_field("Display name", &self.display_name, MAX_FIELD_CHARS)?;
        check_field("Location", &self.location_label, MAX_FIELD_CHARS)
    }
}

/// How a member is located for removal.
#[derive(Debug, Clone, Copy)]
pub enum MemberKey<'a> {
    User(&'a str),
    Connection(&'a str),
}

impl MemberKey<'_> {
    fn matches(&self, member: &Member) -> bool {
        match self {
            MemberKey::User(id) => member.user_id == *id,
            MemberKey::Connection(id) => member.connection_id == *id,
        }
    }
}

/// One line of a room's roster, numbered from 1 in join order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub position: usize,
    pub user_id: UserId,
    pub display_name: String,
    pub location_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    #[serde(rename = "type")]
    pub visibility: Visibility,
    #[serde(rename = "users")]
    members: Vec<Member>,
    #[serde(skip)]
    capacity: usize,
}

impl Room {
    pub fn new(id: RoomId, name: String, visibility: Visibility, capacity: usize) -> Self {
        Room {
            id,
            name,
            visibility,
            members: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.capacity
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    pub fn has_connection(&self, connection_id: &str) -> bool {
        self.members.iter().any(|m| m.connection_id == connection_id)
    }

    pub(crate) fn push(&mut self, member: Member) -> Result<(), ChatError> {
        if self.is_full() {
            return Err(ChatError::RoomFull);
        }
        self.members.push(member);
        Ok(())
    }

    /// Removes the first member matching `key`, keeping the others in order.
    pub(crate) fn take(&mut self, key: MemberKey<'_>) -> Option<Member> {
        let index = self.members.iter().position(|m| key.matches(m))?;
        Some(self.members.remove(index))
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.members
            .iter()
            .enumerate()
            .map(|(index, member)| RosterEntry {
                position: index + 1,
                user_id: member.user_id.clone(),
                display_name: member.display_name.clone(),
                location_label: member.location_label.clone(),
            })
            .collect()
    }
}

/// Rejects empty (after trimming) or oversized free-text fields.
pub fn check_field(label: &str, value: &str, max_chars: usize) -> Result<(), ChatError> {
    if value.trim().is_empty() {
        return Err(ChatError::validation(format!("{label} is required")));
    }
    if value.chars().count() > max_chars {
        return Err(ChatError::validation(format!(
            "{label} exceeds {max_chars} characters"
        )));
    }
    Ok(())
}

/// `_` followed by nine random base-36 characters.
pub fn generate_room_id() -> RoomId {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ROOM_ID_LEN)
        .map(|_| char::from(ROOM_ID_CHARSET[rng.gen_range(0..ROOM_ID_CHARSET.len())]))
        .collect();
    format!("_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user: &str) -> Member {
        Member::new(user, user, "Somewhere", format!("conn-{user}"))
    }

    #[test]
    fn room_id_shape() {
        let id = generate_room_id();
        assert_eq!(id.len(), 10);
        assert!(id.starts_with('_'));
        assert!(id[1..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn push_stops_at_capacity() {
        let mut room = Room::new("_r".into(), "Lobby".into(), Visibility::Public, 2);
        room.push(member("a")).unwrap();
        room.push(member("b")).unwrap();
        assert_eq!(room.push(member("c")), Err(ChatError::RoomFull));
        assert_eq!(room.len(), 2);
    }

    #[test]
    fn take_keeps_order_and_renumbers_roster() {
        let mut room = Room::new("_r".into(), "Lobby".into(), Visibility::Public, 5);
        for user in ["a", "b", "c"] {
            room.push(member(user)).unwrap();
        }

        let removed = room.take(MemberKey::Connection("conn-b")).unwrap();
        assert_eq!(removed.user_id, "b");

        let roster = room.roster();
        assert_eq!(roster.len(), 2);
        assert_eq!((roster[0].position, roster[0].user_id.as_str()), (1, "a"));
        assert_eq!((roster[1].position, roster[1].user_id.as_str()), (2, "c"));
    }

    #[test]
    fn check_field_limits() {
        assert!(check_field("name", "Lobby", MAX_FIELD_CHARS).is_ok());
        assert!(check_field("name", "   ", MAX_FIELD_CHARS).is_err());
        assert!(check_field("name", &"x".repeat(21), MAX_FIELD_CHARS).is_err());
        assert!(check_field("name", &"é".repeat(20), MAX_FIELD_CHARS).is_ok());
    }

    #[test]
    fn serialized_room_hides_connections() {
        let mut room = Room::new("_r".into(), "Lobby".into(), Visibility::Private, 5);
        room.push(member("a")).unwrap();
        let json = serde_json::to_value(&room).unwrap();
        assert_eq!(json["type"], "private");
        assert_eq!(json["users"][0]["userId"], "a");
        assert!(json["users"][0].get("connectionId").is_none());
    }
}
