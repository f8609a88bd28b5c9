//! Live connection registry
//!
//! Two lock levels: the outer map of sessions and one peer map per session.
//! Broadcasts only take the outer lock long enough to clone the session's
//! `Arc`, so fan-out in one session never blocks registration in another.
//! Locks are `parking_lot` and are never held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

pub type ConnectionId = u64;

/// Outbound side of one connection's frame queue.
pub type Outbound = mpsc::Sender<Arc<str>>;

struct PeerHandle {
    id: ConnectionId,
    tx: Outbound,
}

#[derive(Default)]
struct SessionPeers {
    peers: RwLock<HashMap<String, PeerHandle>>,
}

/// Result of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionPeers>>>,
    next_id: AtomicU64,
    peer_buffer: usize,
}

impl ConnectionRegistry {
    pub fn new(peer_buffer: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            peer_buffer: peer_buffer.max(1),
        }
    }

    /// A bounded frame queue sized for one connection.
    pub fn channel(&self) -> (Outbound, mpsc::Receiver<Arc<str>>) {
        mpsc::channel(self.peer_buffer)
    }

    /// Register `participant_id` in `session_id`. An existing entry for the
    /// same participant is replaced and stops receiving broadcasts.
    pub fn register(&self, session_id: &str, participant_id: &str, tx: Outbound) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut sessions = self.sessions.write();
        let peers = sessions.entry(session_id.to_string()).or_default();
        let replaced = peers
            .peers
            .write()
            .insert(participant_id.to_string(), PeerHandle { id, tx });

        match replaced {
            Some(old) => info!(
                "[Relay] {} reconnected to session {} (connection {} replaced by {})",
                participant_id, session_id, old.id, id
            ),
            None => info!(
                "[Relay] {} joined session {} (connection {})",
                participant_id, session_id, id
            ),
        }
        id
    }

    /// Remove whatever connection is registered for the participant.
    pub fn unregister(&self, session_id: &str, participant_id: &str) -> bool {
        self.remove_where(session_id, participant_id, |_| true)
    }

    /// Remove the participant only if `id` is still the registered connection,
    /// so a replaced connection closing late cannot evict its replacement.
    pub fn release(&self, session_id: &str, participant_id: &str, id: ConnectionId) -> bool {
        self.remove_where(session_id, participant_id, |handle| handle.id == id)
    }

    fn remove_where(
        &self,
        session_id: &str,
        participant_id: &str,
        matches: impl Fn(&PeerHandle) -> bool,
    ) -> bool {
        let mut sessions = self.sessions.write();
        let Some(peers) = sessions.get(session_id) else {
            return false;
        };

        let (removed, now_empty) = {
            let mut map = peers.peers.write();
            let removed = match map.get(participant_id) {
                Some(handle) if matches(handle) => map.remove(participant_id).is_some(),
                _ => false,
            };
            (removed, map.is_empty())
        };

        if now_empty {
            sessions.remove(session_id);
        }
        if removed {
            info!("[Relay] {} left session {}", participant_id, session_id);
        }
        removed
    }

    /// Queue `payload` for every participant in the session except `sender_id`.
    /// A peer whose queue is full misses this frame; the sender never waits.
    pub fn broadcast(&self, session_id: &str, sender_id: &str, payload: Arc<str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let Some(peers) = self.sessions.read().get(session_id).cloned() else {
            return report;
        };

        let map = peers.peers.read();
        for (participant, handle) in map.iter() {
            if participant == sender_id {
                continue;
            }
            match handle.tx.try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    warn!(
                        "[Relay] Outbound queue full for {} in session {}; frame dropped",
                        participant, session_id
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    report.dropped += 1;
                    debug!("[Relay] {} in session {} is closing", participant, session_id);
                }
            }
        }
        report
    }

    /// Participant ids currently connected to the session, sorted.
    pub fn participants(&self, session_id: &str) -> Vec<String> {
        let Some(peers) = self.sessions.read().get(session_id).cloned() else {
            return Vec::new();
        };
        let mut ids: Vec<String> = peers.peers.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn connection_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .get(session_id)
            .map(|peers| peers.peers.read().len())
            .unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}
