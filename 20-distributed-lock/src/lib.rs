//! Leader/follower distributed lock service.
//!
//! One leader owns the authoritative lock table. Followers mirror it and
//! forward writes they cannot decide. Every message is a single
//! comma-separated line over a fresh TCP connection.
//!
//! - [`message`] parses and renders the line protocol and runs one-shot
//!   request/reply exchanges.
//! - [`table`] and [`state_machine`] hold the lock map and the LOCK /
//!   UNLOCK / OWN rules shared by both roles.
//! - [`registry`] and [`replication`] are the leader's follower list and
//!   its synchronous SYNC barrier.
//! - [`forward`] and [`pending`] are the follower's link to the leader and
//!   the table of parked client connections awaiting a verdict.
//! - [`node`] accepts connections and routes each message.
//! - [`cli`], [`config`] and [`client`] wire up the binary.

pub mod cli;
pub mod client;
pub mod config;
pub mod forward;
pub mod message;
pub mod node;
pub mod pending;
pub mod registry;
pub mod replication;
pub mod state_machine;
pub mod table;
