use std::time::SystemTime;

use thiserror::Error;

use crate::messages::{epoch_millis, ServerMessage};

/// Errors reported back to the connection that issued an intent.
///
/// None of these alter shared state: a rejected intent leaves the room store
/// and the identity registry exactly as they were.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("Room is full")]
    RoomFull,
    #[error("Room not found")]
    RoomNotFound,
    #[error("User is banned")]
    Banned { expires_at: SystemTime },
    #[error("User already has an active session")]
    DuplicateSession,
    #[error("Not a member of this room")]
    NotInRoom,
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    /// Bans and duplicate sessions end the connection.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatError::Banned { .. } | ChatError::DuplicateSession)
    }

    pub fn to_message(&self) -> ServerMessage {
        match self {
            ChatError::Validation(message) => ServerMessage::ValidationError {
                message: message.clone(),
            },
            ChatError::NotInRoom => ServerMessage::ValidationError {
                message: self.to_string(),
            },
            ChatError::RoomFull => ServerMessage::RoomFull,
            ChatError::RoomNotFound => ServerMessage::RoomNotFound,
            ChatError::Banned { expires_at } => ServerMessage::Banned {
                expires_at: epoch_millis(*expires_at),
            },
            ChatError::DuplicateSession => ServerMessage::DuplicateSession,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Failed to read word list {path}: {source}")]
    WordList {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
