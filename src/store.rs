use std::collections::HashMap;

use serde::Serialize;

use crate::error::ChatError;
use crate::room::{
    check_field, generate_room_id, Member, MemberKey, Room, RoomId, Visibility, MAX_FIELD_CHARS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub room_count: usize,
    pub user_count: usize,
}

/// Authoritative room id -> room mapping.
#[derive(Debug)]
pub struct RoomStore {
    rooms: HashMap<RoomId, Room>,
    capacity: usize,
}

impl RoomStore {
    pub fn new(capacity: usize) -> Self {
        RoomStore {
            rooms: HashMap::new(),
            capacity,
        }
    }

    pub fn create(
        &mut self,
        name: String,
        visibility: Visibility,
        first_member: Member,
    ) -> Result<&Room, ChatError> {
        check_field("Room name", &name, MAX_FIELD_CHARS)?;
        first_member.validate()?;

        let mut id = generate_room_id();
        while self.rooms.contains_key(&id) {
            id = generate_room_id();
        }

        let mut room = Room::new(id.clone(), name, visibility, self.capacity);
        room.push(first_member)?;
        let room: &Room = self.rooms.entry(id).or_insert(room);
        Ok(room)
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn add_member(&mut self, room_id: &str, member: Member) -> Result<&Room, ChatError> {
        member.validate()?;
        let room = self.rooms.get_mut(room_id).ok_or(ChatError::RoomNotFound)?;
        room.push(member)?;
        Ok(&*room)
    }

    pub fn remove_member(
        &mut self,
        room_id: &str,
        key: MemberKey<'_>,
    ) -> Result<(&Room, Member), ChatError> {
        let room = self.rooms.get_mut(room_id).ok_or(ChatError::RoomNotFound)?;
        let removed = room.take(key).ok_or(ChatError::NotInRoom)?;
        Ok((&*room, removed))
    }

    pub fn remove(&mut self, room_id: &str) -> Option<Room> {
        self.rooms.remove(room_id)
    }

    /// Room the given connection is currently a member of, if any.
    pub fn find_by_connection(&self, connection_id: &str) -> Option<&Room> {
        self.rooms.values().find(|room| room.has_connection(connection_id))
    }

    /// Unordered; shuffle before presenting to clients.
    pub fn list_public(&self) -> Vec<Room> {
        self.rooms
            .values()
            .filter(|room| room.is_public())
            .cloned()
            .collect()
    }

    pub fn count(&self) -> Counts {
        Counts {
            room_count: self.rooms.len(),
            user_count: self.rooms.values().map(Room::len).sum(),
        }
    }
}
