//! Multi-room chat coordination server.
//!
//! Clients talk JSON over a WebSocket at `/ws`; the [`coordinator`] owns all
//! room and identity state and fans events out through the [`hub`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod identity;
pub mod messages;
pub mod moderation;
pub mod room;
pub mod scheduler;
pub mod server;
pub mod store;
