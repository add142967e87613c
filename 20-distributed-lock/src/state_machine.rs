//! Decision logic for LOCK / UNLOCK / OWN.
//!
//! Leader and follower run the same function. Only the leader calls it with
//! a write command; a follower uses it for local OWN reads.

use crate::message::{Command, LockRequest, Reply};
use crate::table::LockTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Fail,
    /// Answer to OWN: the holder, or `None` when the lock is free.
    Owner(Option<String>),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl From<Outcome> for Reply {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => Reply::Success,
            Outcome::Fail => Reply::Fail,
            Outcome::Owner(Some(owner)) => Reply::Owner(owner),
            Outcome::Owner(None) => Reply::Unowned,
        }
    }
}

/// Applies `request` to `table`. The table is untouched unless the outcome
/// is `Success`. Locks are not reentrant: LOCK on a held lock fails even
/// for the current holder.
pub fn apply(table: &mut LockTable, request: &LockRequest) -> Outcome {
    let LockRequest {
        command,
        lock_name,
        client_id,
    } = request;

    match command {
        Command::Lock if table.try_acquire(lock_name, client_id) => Outcome::Success,
        Command::Unlock if table.try_release(lock_name, client_id) => Outcome::Success,
        Command::Lock | Command::Unlock => Outcome::Fail,
        Command::Own => Outcome::Owner(table.owner(lock_name).map(str::to_string)),
    }
}
