//! Delayed deletion of rooms that became empty.
//!
//! Each armed room owns one sleeping task. When the sleep finishes the task
//! does not touch the room store itself; it posts an [`Expired`] notice on a
//! channel and the coordinator, holding the store lock, decides whether the
//! deletion still applies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::room::RoomId;

/// Grace period between a room emptying and its deletion.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub room_id: RoomId,
    token: u64,
}

struct PendingDeletion {
    token: u64,
    handle: JoinHandle<()>,
}

pub struct DeletionScheduler {
    pending: Mutex<HashMap<RoomId, PendingDeletion>>,
    next_token: AtomicU64,
    expired_tx: mpsc::UnboundedSender<Expired>,
}

impl DeletionScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expired>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let scheduler = DeletionScheduler {
            pending: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
            expired_tx,
        };
        (scheduler, expired_rx)
    }

    /// Arms deletion of `room_id` after `delay`, replacing any timer already
    /// armed for it.
    pub async fn arm(&self, room_id: &str, delay: Duration) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let expired = Expired {
            room_id: room_id.to_string(),
            token,
        };
        let expired_tx = self.expired_tx.clone();
        // Held across the spawn so a zero delay cannot be claimed before insert.
        let mut armed = self.pending.lock().await;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = expired_tx.send(expired);
        });

        let pending = PendingDeletion {
            token,
            handle,
        };
        if let Some(previous) = armed.insert(room_id.to_string(), pending) {
            previous.handle.abort();
            debug!("Re-armed deletion for room {room_id}");
        }
    }

    pub async fn cancel(&self, room_id: &str) -> bool {
        let mut armed = self.pending.lock().await;
        match armed.remove(room_id) {
            Some(pending) => {
                pending.handle.abort();
                debug!("Cancelled deletion for room {room_id}");
                true
            }
            None => false,
        }
    }

    /// Consumes the pending entry `expired` was issued for. Returns false if
    /// that timer was cancelled or superseded in the meantime.
    pub async fn claim(&self, expired: &Expired) -> bool {
        let mut armed = self.pending.lock().await;
        match armed.get(&expired.room_id) {
            Some(pending) if pending.token == expired.token => {
                armed.remove(&expired.room_id);
                true
            }
            _ => false,
        }
    }

    pub async fn is_armed(&self, room_id: &str) -> bool {
        self.pending.lock().await.contains_key(room_id)
    }
}

impl Drop for DeletionScheduler {
    fn drop(&mut self) {
        for (_, pending) in self.pending.get_mut().drain() {
            pending.handle.abort();
        }
    }
}
