//! Leader-side synchronous replication barrier.
//!
//! After a successful local mutation the leader sends `SYNC,<mutation>` to
//! every registered follower in parallel and waits until all of them have
//! answered or the barrier deadline passes. Failures are reported, never
//! rolled back: the local mutation stays committed and the client still gets
//! `SUCCESS`. Sends that outlive the deadline keep running detached and
//! their results are dropped.

use std::{collections::HashSet, time::Duration};

use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{Instant, timeout_at},
};
use tracing::{debug, warn};

use crate::message::{ExchangeError, LockRequest, Reply, Request, exchange};
use crate::registry::FollowerRegistry;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("expected ACK, got '{0}'")]
    UnexpectedReply(Reply),
}

/// What happened to one mutation's fan-out.
#[derive(Debug, Default)]
pub struct ReplicationReport {
    pub acknowledged: Vec<String>,
    pub failed: Vec<(String, SyncError)>,
    /// Followers that had not answered when the barrier deadline passed.
    pub unanswered: Vec<String>,
}

impl ReplicationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.unanswered.is_empty()
    }
}

pub struct ReplicationCoordinator {
    registry: FollowerRegistry,
    ack_timeout: Duration,
    barrier_timeout: Duration,
}

impl ReplicationCoordinator {
    pub fn new(registry: FollowerRegistry, ack_timeout: Duration, barrier_timeout: Duration) -> Self {
        Self {
            registry,
            ack_timeout,
            barrier_timeout,
        }
    }

    pub fn registry(&self) -> &FollowerRegistry {
        &self.registry
    }

    /// Sends `mutation` to every follower known right now and waits for the
    /// acknowledgements, bounded by the barrier timeout.
    pub async fn replicate(&self, mutation: &LockRequest) -> ReplicationReport {
        let followers = self.registry.snapshot().await;
        let mut report = ReplicationReport::default();
        if followers.is_empty() {
            return report;
        }

        let deadline = Instant::now() + self.barrier_timeout;
        let (results_tx, mut results_rx) = mpsc::channel(followers.len());
        for endpoint in &followers {
            let results_tx = results_tx.clone();
            let endpoint = endpoint.clone();
            let message = Request::Sync(mutation.clone());
            let ack_timeout = self.ack_timeout;
            tokio::spawn(async move {
                let result = send_sync(&endpoint, &message, ack_timeout).await;
                // The barrier may have given up on us already.
                let _ = results_tx.send((endpoint, result)).await;
            });
        }
        drop(results_tx);

        let mut outstanding: HashSet<String> = followers.into_iter().collect();
        while !outstanding.is_empty() {
            match timeout_at(deadline, results_rx.recv()).await {
                Ok(Some((endpoint, Ok(())))) => {
                    debug!(follower = %endpoint, %mutation, "follower acknowledged sync");
                    outstanding.remove(&endpoint);
                    report.acknowledged.push(endpoint);
                }
                Ok(Some((endpoint, Err(err)))) => {
                    warn!(follower = %endpoint, %mutation, error = %err, "failed to replicate to follower");
                    outstanding.remove(&endpoint);
                    report.failed.push((endpoint, err));
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        %mutation,
                        unanswered = outstanding.len(),
                        "replication barrier expired"
                    );
                    break;
                }
            }
        }

        report.unanswered = outstanding.into_iter().collect();
        report
    }
}

async fn send_sync(endpoint: &str, message: &Request, ack_timeout: Duration) -> Result<(), SyncError> {
    match exchange(endpoint, message, ack_timeout).await? {
        Reply::Ack => Ok(()),
        other => Err(SyncError::UnexpectedReply(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Command, read_line, write_line};
    use tokio::{io::BufReader, net::TcpListener};

    /// Accepts one connection, records the line it received and answers
    /// with `answer`.
    async fn fake_follower(answer: &'static str) -> (String, tokio::task::JoinHandle<Option<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake follower");
        let addr = listener.local_addr().expect("local addr").to_string();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.ok()?;
            let (reader, mut writer) = stream.into_split();
            let line = read_line(&mut BufReader::new(reader)).await.ok()??;
            write_line(&mut writer, &answer).await.ok()?;
            Some(line)
        });
        (addr, task)
    }

    #[tokio::test]
    async fn no_followers_is_trivially_complete() {
        let coordinator =
            ReplicationCoordinator::new(FollowerRegistry::new(), Duration::from_secs(1), Duration::from_secs(1));
        let report = coordinator
            .replicate(&LockRequest::new(Command::Lock, "L", "A"))
            .await;
        assert!(report.is_complete());
        assert!(report.acknowledged.is_empty());
    }

    #[tokio::test]
    async fn collects_acks_and_failures() {
        let (good, good_task) = fake_follower("ACK").await;
        let (odd, _odd_task) = fake_follower("NOPE").await;
        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            listener.local_addr().expect("addr").to_string()
        };

        let registry = FollowerRegistry::with_followers(vec![good.clone(), odd.clone(), closed.clone()]);
        let coordinator = ReplicationCoordinator::new(registry, Duration::from_secs(1), Duration::from_secs(2));
        let report = coordinator
            .replicate(&LockRequest::new(Command::Lock, "L", "A"))
            .await;

        assert_eq!(report.acknowledged, vec![good]);
        assert_eq!(report.failed.len(), 2);
        assert!(!report.is_complete());
        assert_eq!(
            good_task.await.expect("follower task"),
            Some("SYNC,LOCK,L,A".to_string())
        );
    }

    #[tokio::test]
    async fn silent_follower_does_not_hold_the_barrier() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind silent follower");
        let silent = listener.local_addr().expect("addr").to_string();
        // Accept and never answer.
        let _hold = tokio::spawn(async move {
            let connection = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(connection);
        });

        let registry = FollowerRegistry::with_followers(vec![silent.clone()]);
        let coordinator =
            ReplicationCoordinator::new(registry, Duration::from_secs(10), Duration::from_millis(200));

        let started = Instant::now();
        let report = coordinator
            .replicate(&LockRequest::new(Command::Unlock, "L", "A"))
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.unanswered, vec![silent]);
    }
}
