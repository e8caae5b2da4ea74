//! Membership coordination: the only code path that mutates rooms.
//!
//! Every intent runs to completion while holding the room store lock, so no
//! intent observes another's partial mutation. Locks are always taken in the
//! order rooms, deletions, hub. The identity registry is never held while
//! waiting for the room store.

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use tokio::sync::{mpsc, RwLock};

use crate::error::ChatError;
use crate::hub::{Hub, Outbox};
use crate::identity::{IdentityRegistry, Session};
use crate::messages::{epoch_millis, ClientEnvelope, ClientMessage, ServerMessage};
use crate::moderation::{sanitize, ContentFilter};
use crate::room::{
    check_field, Member, MemberKey, Room, RoomId, UserId, Visibility, DEFAULT_CAPACITY,
    MAX_FIELD_CHARS, MAX_USER_ID_CHARS,
};
use crate::scheduler::{DeletionScheduler, Expired, DEFAULT_GRACE};
use crate::store::{Counts, RoomStore};

pub const MAX_MESSAGE_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct Settings {
    pub room_capacity: usize,
    pub room_grace: Duration,
    pub ban_duration: Duration,
    /// Pause between a terminal notice and closing the connection.
    pub close_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            room_capacity: DEFAULT_CAPACITY,
            room_grace: DEFAULT_GRACE,
            ban_duration: Duration::from_secs(30 * 60),
            close_delay: Duration::from_millis(100),
        }
    }
}

/// Identity fields a client supplies when creating or joining a room.
#[derive(Debug, Clone)]
struct Profile {
    user_id: UserId,
    display_name: String,
    location_label: String,
}

impl Profile {
    fn into_member(self, connection_id: &str) -> Member {
        Member::new(
            self.user_id,
            self.display_name,
            self.location_label,
            connection_id,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relay {
    Message,
    Typing,
}

pub struct Coordinator {
    rooms: RwLock<RoomStore>,
    registry: RwLock<IdentityRegistry>,
    deletions: DeletionScheduler,
    hub: Hub,
    filter: Arc<dyn ContentFilter>,
    settings: Settings,
}

impl Coordinator {
    /// Builds a coordinator and spawns the task that applies expired room
    /// deletions. Must be called inside a tokio runtime.
    pub fn start(settings: Settings, filter: Arc<dyn ContentFilter>) -> Arc<Self> {
        let (deletions, expired_rx) = DeletionScheduler::new();
        let coordinator = Arc::new(Coordinator {
            rooms: RwLock::new(RoomStore::new(settings.room_capacity)),
            registry: RwLock::new(IdentityRegistry::new()),
            deletions,
            hub: Hub::new(),
            filter,
            settings,
        });
        tokio::spawn(run_deletions(Arc::downgrade(&coordinator), expired_rx));
        coordinator
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn attach(&self, connection_id: &str, outbox: Outbox) {
        self.hub.register(connection_id, outbox).await;
    }

    /// Transport closed: forget the session and vacate any room seat.
    pub async fn detach(&self, connection_id: &str) {
        self.hub.unregister(connection_id).await;
        let released = self.registry.write().await.release_connection(connection_id);
        for session in released {
            info!("User {} disconnected ({connection_id})", session.user_id);
        }
        self.vacate(connection_id).await;
    }

    pub async fn handle(&self, connection_id: &str, envelope: ClientEnvelope) {
        let reply_to = envelope.request_id.as_deref();
        let result = match envelope.message {
            ClientMessage::Connect { user_id } => {
                self.connect(connection_id, reply_to, &user_id).await
            }
            ClientMessage::Disconnect { user_id } => {
                self.disconnect(connection_id, user_id.as_deref()).await;
                Ok(())
            }
            ClientMessage::CreateRoom {
                display_name,
                location_label,
                user_id,
                room_name,
                visibility,
            } => {
                let profile = Profile {
                    user_id,
                    display_name,
                    location_label,
                };
                self.create_room(connection_id, reply_to, profile, &room_name, visibility)
                    .await
            }
            ClientMessage::JoinRoom {
                room_id,
                display_name,
                location_label,
                user_id,
            } => {
                let profile = Profile {
                    user_id,
                    display_name,
                    location_label,
                };
                self.join_room(connection_id, reply_to, &room_id, profile)
                    .await
            }
            ClientMessage::LeaveRoom { room_id, user_id } => {
                self.leave_room(&room_id, &user_id).await
            }
            ClientMessage::SearchRoom { room_id } => {
                self.search_room(connection_id, reply_to, &room_id).await;
                Ok(())
            }
            ClientMessage::ListRooms => {
                self.list_rooms(connection_id, reply_to).await;
                Ok(())
            }
            ClientMessage::Message {
                room_id,
                user_id,
                text,
            } => {
                self.relay(connection_id, Relay::Message, room_id, &user_id, &text)
                    .await
            }
            ClientMessage::Typing {
                room_id,
                user_id,
                text,
            } => {
                self.relay(connection_id, Relay::Typing, room_id, &user_id, &text)
                    .await
            }
        };

        if let Err(e) = result {
            self.reject(connection_id, reply_to, &e).await;
        }
    }

    /// Reports `error` to the originating connection only, closing it
    /// afterwards when the error ends the session.
    pub async fn reject(&self, connection_id: &str, reply_to: Option<&str>, error: &ChatError) {
        debug!("Rejected intent from {connection_id}: {error}");
        self.hub
            .reply(connection_id, reply_to, &error.to_message())
            .await;
        if error.is_terminal() {
            self.hub
                .close_after(connection_id, self.settings.close_delay)
                .await;
        }
    }

    async fn connect(
        &self,
        connection_id: &str,
        reply_to: Option<&str>,
        user_id: &str,
    ) -> Result<(), ChatError> {
        let user_id = clean_field("User id", user_id, MAX_USER_ID_CHARS)?;
        self.ensure_not_banned(&user_id).await?;
        let active = {
            let mut registry = self.registry.write().await;
            registry.mark_connected(&user_id, connection_id, SystemTime::now())?;
            registry.active_count()
        };
        info!("User {user_id} connected ({connection_id}), {active} active");

        let rooms = self.rooms.read().await;
        self.hub
            .existing_rooms(connection_id, reply_to, rooms.list_public())
            .await;
        self.hub.counts_changed(rooms.count()).await;
        Ok(())
    }

    async fn disconnect(&self, connection_id: &str, user_id: Option<&str>) {
        let released: Vec<Session> = {
            let mut registry = self.registry.write().await;
            match user_id {
                // Only the user this connection signed in as may be signed out.
                Some(user_id)
                    if registry
                        .user_for_connection(connection_id)
                        .is_some_and(|bound| bound == user_id) =>
                {
                    registry.mark_disconnected(user_id).into_iter().collect()
                }
                Some(user_id) => {
                    debug!("Ignoring sign out of {user_id} from {connection_id}");
                    Vec::new()
                }
                None => registry.release_connection(connection_id),
            }
        };
        for session in released {
            info!("User {} signed out", session.user_id);
        }
        self.vacate(connection_id).await;
    }

    async fn create_room(
        &self,
        connection_id: &str,
        reply_to: Option<&str>,
        profile: Profile,
        room_name: &str,
        visibility: Visibility,
    ) -> Result<(), ChatError> {
        let profile = self.screen_profile(profile)?;
        self.ensure_not_banned(&profile.user_id).await?;
        let room_name = self.screen("Room name", room_name)?;

        let mut rooms = self.rooms.write().await;
        ensure_unseated(&rooms, connection_id)?;
        let member = profile.into_member(connection_id);
        let room = rooms.create(room_name, visibility, member.clone())?.clone();
        info!(
            "Room {} ({:?}) created by {}",
            room.id, room.visibility, member.user_id
        );

        self.hub.room_created(&room).await;
        self.confirm_joined(connection_id, reply_to, &room, &member)
            .await;
        self.hub.counts_changed(rooms.count()).await;
        Ok(())
    }

    async fn join_room(
        &self,
        connection_id: &str,
        reply_to: Option<&str>,
        room_id: &str,
        profile: Profile,
    ) -> Result<(), ChatError> {
        check_field("Room id", room_id, MAX_FIELD_CHARS)?;
        let profile = self.screen_profile(profile)?;
        self.ensure_not_banned(&profile.user_id).await?;

        let mut rooms = self.rooms.write().await;
        ensure_unseated(&rooms, connection_id)?;
        let member = profile.into_member(connection_id);
        let room = rooms.add_member(room_id, member.clone())?.clone();
        if self.deletions.cancel(&room.id).await {
            info!("Room {} repopulated during its grace period", room.id);
        }
        debug!("User {} joined room {}", member.user_id, room.id);

        self.hub.room_updated(&room).await;
        self.confirm_joined(connection_id, reply_to, &room, &member)
            .await;
        self.hub.user_joined(&room, &member).await;
        self.hub.counts_changed(rooms.count()).await;
        Ok(())
    }

    async fn leave_room(&self, room_id: &str, user_id: &str) -> Result<(), ChatError> {
        let user_id = sanitize(user_id);
        let mut rooms = self.rooms.write().await;
        let (room, member) = rooms
            .remove_member(room_id, MemberKey::User(&user_id))
            .map(|(room, member)| (room.clone(), member))?;
        debug!("User {} left room {}", member.user_id, room.id);
        self.after_removal(&rooms, &room, &member).await;
        Ok(())
    }

    async fn search_room(&self, connection_id: &str, reply_to: Option<&str>, room_id: &str) {
        let room = self.rooms.read().await.get(room_id).cloned();
        self.hub
            .reply(connection_id, reply_to, &ServerMessage::SearchResult { room })
            .await;
    }

    async fn list_rooms(&self, connection_id: &str, reply_to: Option<&str>) {
        let public = self.rooms.read().await.list_public();
        self.hub
            .existing_rooms(connection_id, reply_to, public)
            .await;
    }

    /// Relays chat text to the rest of the sender's room. Offensive text bans
    /// the sender instead and is never relayed.
    async fn relay(
        &self,
        connection_id: &str,
        kind: Relay,
        room_id: RoomId,
        user_id: &str,
        text: &str,
    ) -> Result<(), ChatError> {
        let user_id = clean_field("User id", user_id, MAX_USER_ID_CHARS)?;
        self.ensure_not_banned(&user_id).await?;

        let text = sanitize(text);
        if self.filter.contains_offensive_word(&text) {
            debug!("Offensive {kind:?} from {user_id} in room {room_id}");
            return Err(self.ban(connection_id, &user_id).await);
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::validation(format!(
                "Message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }
        if kind == Relay::Message && text.trim().is_empty() {
            return Err(ChatError::validation("Message is required"));
        }
        debug!("{kind:?} from {user_id} in room {room_id}: {text}");

        let rooms = self.rooms.read().await;
        let room = rooms.get(&room_id).ok_or(ChatError::RoomNotFound)?;
        if !room.has_connection(connection_id) {
            return Err(ChatError::NotInRoom);
        }
        let message = match kind {
            Relay::Message => ServerMessage::Message {
                room_id,
                user_id,
                text,
            },
            Relay::Typing => ServerMessage::Typing {
                room_id,
                user_id,
                text,
            },
        };
        self.hub
            .broadcast_to_room_except(room, &message, Some(connection_id))
            .await;
        Ok(())
    }

    /// Bans the claimed user id, and the id bound to the connection if that
    /// differs, returning the error that reports the ban.
    async fn ban(&self, connection_id: &str, user_id: &str) -> ChatError {
        let now = SystemTime::now();
        let duration = self.settings.ban_duration;
        let mut registry = self.registry.write().await;
        let expires_at = registry.ban(user_id, now, duration);
        if let Some(bound) = registry.user_for_connection(connection_id).cloned() {
            if bound != user_id {
                registry.ban(&bound, now, duration);
            }
        }
        warn!(
            "Banned {user_id} until {} for offensive content",
            epoch_millis(expires_at)
        );
        ChatError::Banned { expires_at }
    }

    async fn ensure_not_banned(&self, user_id: &str) -> Result<(), ChatError> {
        let now = SystemTime::now();
        let mut registry = self.registry.write().await;
        if registry.is_banned(user_id, now) {
            let expires_at = registry.ban_expiry(user_id, now).unwrap_or(now);
            return Err(ChatError::Banned { expires_at });
        }
        Ok(())
    }

    /// Removes whatever seat `connection_id` holds. A connection holds at most
    /// one, so at most one room is touched.
    async fn vacate(&self, connection_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room_id) = rooms.find_by_connection(connection_id).map(|r| r.id.clone()) else {
            return false;
        };
        let Ok((room, member)) = rooms
            .remove_member(&room_id, MemberKey::Connection(connection_id))
            .map(|(room, member)| (room.clone(), member))
        else {
            return false;
        };
        debug!("User {} dropped from room {}", member.user_id, room.id);
        self.after_removal(&rooms, &room, &member).await;
        true
    }

    /// Shared tail of leave and disconnect. `room` is the post-removal state.
    async fn after_removal(&self, rooms: &RoomStore, room: &Room, member: &Member) {
        self.hub.room_updated(room).await;
        self.hub.user_left(room, &member.user_id).await;
        if room.is_empty() {
            self.deletions
                .arm(&room.id, self.settings.room_grace)
                .await;
            info!(
                "Room {} is empty; deleting in {:?} unless rejoined",
                room.id, self.settings.room_grace
            );
        }
        self.hub.counts_changed(rooms.count()).await;
    }

    async fn confirm_joined(
        &self,
        connection_id: &str,
        reply_to: Option<&str>,
        room: &Room,
        member: &Member,
    ) {
        let joined = ServerMessage::RoomJoined {
            room_id: room.id.clone(),
            room_name: room.name.clone(),
            room_type: room.visibility,
            user_id: member.user_id.clone(),
            display_name: member.display_name.clone(),
            location_label: member.location_label.clone(),
        };
        self.hub.reply(connection_id, reply_to, &joined).await;
        let roster = ServerMessage::InitializeUsers {
            members: room.roster(),
        };
        self.hub.reply(connection_id, reply_to, &roster).await;
    }

    /// Applies an expired deletion if it is still current and the room is
    /// still empty.
    async fn expire(&self, expired: Expired) {
        let mut rooms = self.rooms.write().await;
        if !self.deletions.claim(&expired).await {
            debug!("Ignoring superseded deletion of room {}", expired.room_id);
            return;
        }
        match rooms.get(&expired.room_id) {
            Some(room) if room.is_empty() => {}
            Some(_) => {
                debug!("Room {} is occupied again; keeping it", expired.room_id);
                return;
            }
            None => return,
        }
        rooms.remove(&expired.room_id);
        info!("Room {} deleted", expired.room_id);
        self.hub.room_removed(&expired.room_id).await;
        self.hub.counts_changed(rooms.count()).await;
    }

    fn screen_profile(&self, profile: Profile) -> Result<Profile, ChatError> {
        Ok(Profile {
            user_id: clean_field("User id", &profile.user_id, MAX_USER_ID_CHARS)?,
            display_name: self.screen("Display name", &profile.display_name)?,
            location_label: self.screen("Location", &profile.location_label)?,
        })
    }

    /// Length and word-list checks for a display field, then sanitization.
    /// Offensive field values are rejected without a ban.
    fn screen(&self, label: &str, value: &str) -> Result<String, ChatError> {
        check_field(label, value, MAX_FIELD_CHARS)?;
        if self.filter.contains_offensive_word(value) {
            return Err(ChatError::validation(format!(
                "{label} contains offensive words"
            )));
        }
        clean_field(label, value, MAX_FIELD_CHARS)
    }

    pub async fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn counts(&self) -> Counts {
        self.rooms.read().await.count()
    }

    pub async fn is_deletion_armed(&self, room_id: &str) -> bool {
        self.deletions.is_armed(room_id).await
    }

    pub async fn is_banned(&self, user_id: &str) -> bool {
        self.registry
            .write()
            .await
            .is_banned(user_id, SystemTime::now())
    }

    pub async fn ban_expiry(&self, user_id: &str) -> Option<SystemTime> {
        self.registry
            .read()
            .await
            .ban_expiry(user_id, SystemTime::now())
    }

    pub async fn is_active(&self, user_id: &str) -> bool {
        self.registry.read().await.is_active(user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.hub.connection_count().await
    }
}

fn ensure_unseated(rooms: &RoomStore, connection_id: &str) -> Result<(), ChatError> {
    match rooms.find_by_connection(connection_id) {
        Some(room) => Err(ChatError::validation(format!(
            "Already in room {}; leave it first",
            room.id
        ))),
        None => Ok(()),
    }
}

/// Validates, sanitizes, then re-validates so markup-only input is refused.
fn clean_field(label: &str, value: &str, max_chars: usize) -> Result<String, ChatError> {
    check_field(label, value, max_chars)?;
    let clean = sanitize(value);
    check_field(label, &clean, max_chars)?;
    Ok(clean)
}

async fn run_deletions(
    coordinator: Weak<Coordinator>,
    mut expired_rx: mpsc::UnboundedReceiver<Expired>,
) {
    while let Some(expired) = expired_rx.recv().await {
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        coordinator.expire(expired).await;
    }
}
