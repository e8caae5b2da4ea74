use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::error::ChatError;
use crate::room::{ConnectionId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub active_since: SystemTime,
}

/// Active sessions and temporary bans, keyed by the client-supplied user id.
///
/// Bans expire lazily: an entry whose expiry has passed is treated as absent
/// and dropped the next time it is looked at.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    sessions: HashMap<UserId, Session>,
    bans: HashMap<UserId, SystemTime>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `user_id` as active on `connection_id`.
    ///
    /// Repeating the call from the same connection is a no-op. A second
    /// connection claiming an already active user id is refused, as is a
    /// connection that is already signed in under another user id.
    pub fn mark_connected(
        &mut self,
        user_id: &str,
        connection_id: &str,
        now: SystemTime,
    ) -> Result<&Session, ChatError> {
        if let Some(existing) = self.sessions.get(user_id) {
            if existing.connection_id != connection_id {
                return Err(ChatError::DuplicateSession);
            }
        }
        if let Some(bound) = self.user_for_connection(connection_id) {
            if bound != user_id {
                return Err(ChatError::validation(format!(
                    "Connection is already signed in as {bound}"
                )));
            }
        }
        let session = self
            .sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Session {
                user_id: user_id.to_string(),
                connection_id: connection_id.to_string(),
                active_since: now,
            });
        Ok(&*session)
    }

    pub fn mark_disconnected(&mut self, user_id: &str) -> Option<Session> {
        self.sessions.remove(user_id)
    }

    /// Drops every session bound to a closed connection.
    pub fn release_connection(&mut self, connection_id: &str) -> Vec<Session> {
        let user_ids: Vec<UserId> = self
            .sessions
            .values()
            .filter(|session| session.connection_id == connection_id)
            .map(|session| session.user_id.clone())
            .collect();
        user_ids
            .iter()
            .filter_map(|user_id| self.sessions.remove(user_id))
            .collect()
    }

    pub fn user_for_connection(&self, connection_id: &str) -> Option<&UserId> {
        self.sessions
            .values()
            .find(|session| session.connection_id == connection_id)
            .map(|session| &session.user_id)
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        self.sessions.contains_key(user_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_banned(&mut self, user_id: &str, now: SystemTime) -> bool {
        match self.bans.get(user_id) {
            Some(expires_at) if *expires_at > now => true,
            Some(_) => {
                self.bans.remove(user_id);
                false
            }
            None => false,
        }
    }

    /// Bans `user_id` until `now + duration`, replacing any earlier ban.
    pub fn ban(&mut self, user_id: &str, now: SystemTime, duration: Duration) -> SystemTime {
        let expires_at = now + duration;
        self.bans.insert(user_id.to_string(), expires_at);
        expires_at
    }

    /// Expiry of a ban still in force at `now`; lapsed bans read as absent.
    pub fn ban_expiry(&self, user_id: &str, now: SystemTime) -> Option<SystemTime> {
        self.bans
            .get(user_id)
            .copied()
            .filter(|expires_at| *expires_at > now)
    }
}
