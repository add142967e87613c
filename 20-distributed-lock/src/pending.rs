//! Follower-side correlation of forwarded writes with their verdicts.
//!
//! A follower cannot decide LOCK/UNLOCK itself. It parks the client's
//! connection behind a [`PendingRequests`] entry keyed by the request triple,
//! forwards the request to the leader, and waits. The verdict arrives by one
//! of several racing paths:
//!
//! - a SYNC from the leader carrying the same triple (resolved by key),
//! - an immediate FAIL / ERROR / TIMEOUT from the forwarding exchange,
//! - the watchdog on the parked connection.
//!
//! Resolution removes the entry and sends on its oneshot channel while the
//! map lock is held, so exactly one path wins and later attempts see no entry.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::{Mutex, oneshot};

use crate::message::{LockRequest, Reply};

/// Identifies one registration of a request. Forwarder and watchdog resolve
/// through the ticket so they can never settle a later request that reuses
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTicket {
    request: LockRequest,
    id: u64,
}

struct PendingEntry {
    id: u64,
    respond_to: oneshot::Sender<Reply>,
}

#[derive(Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<LockRequest, PendingEntry>>,
    next_id: AtomicU64,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `request`. Returns `None` when an identical request is already
    /// waiting; the caller answers the duplicate itself.
    pub async fn register(
        &self,
        request: LockRequest,
    ) -> Option<(PendingTicket, oneshot::Receiver<Reply>)> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&request) {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (respond_to, verdict) = oneshot::channel();
        entries.insert(request.clone(), PendingEntry { id, respond_to });
        Some((PendingTicket { request, id }, verdict))
    }

    /// Resolves the entry registered under `ticket`, if it is still there.
    pub async fn resolve(&self, ticket: &PendingTicket, reply: Reply) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.get(&ticket.request).map(|entry| entry.id) != Some(ticket.id) {
            return false;
        }
        match entries.remove(&ticket.request) {
            Some(entry) => {
                // The parked connection may already be gone; nothing to do then.
                let _ = entry.respond_to.send(reply);
                true
            }
            None => false,
        }
    }

    /// Resolves whichever entry waits on `request`. Used when a SYNC arrives.
    pub async fn resolve_request(&self, request: &LockRequest, reply: Reply) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.remove(request) {
            Some(entry) => {
                let _ = entry.respond_to.send(reply);
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
