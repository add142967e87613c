//! In-memory map of lock name to owning client.
//!
//! On the leader this is the single source of truth. On a follower it is a
//! mirror that only changes through SYNC messages from the leader.

use std::collections::{BTreeMap, HashMap};

use crate::message::{Command, LockRequest};

/// Lock name → client id. A missing entry means the lock is free.
#[derive(Debug, Default, Clone)]
pub struct LockTable {
    owners: HashMap<String, String>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self, lock_name: &str) -> Option<&str> {
        self.owners.get(lock_name).map(String::as_str)
    }

    /// Inserts `lock_name → client_id` only if the lock is free.
    pub fn try_acquire(&mut self, lock_name: &str, client_id: &str) -> bool {
        if self.owners.contains_key(lock_name) {
            return false;
        }
        self.owners
            .insert(lock_name.to_string(), client_id.to_string());
        true
    }

    /// Removes the entry only if `client_id` currently holds it.
    pub fn try_release(&mut self, lock_name: &str, client_id: &str) -> bool {
        if self.owner(lock_name) != Some(client_id) {
            return false;
        }
        self.owners.remove(lock_name);
        true
    }

    /// Applies a leader-decided mutation verbatim, without ownership checks.
    pub fn mirror(&mut self, mutation: &LockRequest) {
        match mutation.command {
            Command::Lock => {
                self.owners
                    .insert(mutation.lock_name.clone(), mutation.client_id.clone());
            }
            Command::Unlock => {
                self.owners.remove(&mutation.lock_name);
            }
            Command::Own => {}
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Ordered copy of every held lock.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.owners
            .iter()
            .map(|(lock, owner)| (lock.clone(), owner.clone()))
            .collect()
    }
}
