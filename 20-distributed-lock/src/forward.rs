use std::time::Duration;

use tracing::{debug, warn};

use crate::message::{ExchangeError, LockRequest, Reply, Request, exchange};

/// How the leader answered a forwarded write.
#[derive(Debug, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Leader said SUCCESS. The verdict reaches the client through the SYNC
    /// that the leader sends before answering.
    Approved,
    /// Leader said FAIL.
    Rejected,
    /// Connection or I/O failure, or a reply that makes no sense for a write.
    Unreachable,
    TimedOut,
}

impl ForwardOutcome {
    /// The reply that settles the parked client right away, if any.
    pub fn immediate_reply(&self) -> Option<Reply> {
        match self {
            ForwardOutcome::Approved => None,
            ForwardOutcome::Rejected => Some(Reply::Fail),
            ForwardOutcome::Unreachable => Some(Reply::Error),
            ForwardOutcome::TimedOut => Some(Reply::Timeout),
        }
    }
}

/// Follower's link to the statically configured leader.
#[derive(Debug, Clone)]
pub struct Forwarder {
    leader: String,
    forward_timeout: Duration,
    register_timeout: Duration,
}

impl Forwarder {
    pub fn new(leader: impl Into<String>, forward_timeout: Duration, register_timeout: Duration) -> Self {
        Self {
            leader: leader.into(),
            forward_timeout,
            register_timeout,
        }
    }

    pub fn leader(&self) -> &str {
        &self.leader
    }

    /// Relays a LOCK/UNLOCK to the leader over a new connection.
    pub async fn forward(&self, request: &LockRequest) -> ForwardOutcome {
        let message = Request::Client(request.clone());
        match exchange(&self.leader, &message, self.forward_timeout).await {
            Ok(Reply::Success) => {
                debug!(%request, "leader approved forwarded request");
                ForwardOutcome::Approved
            }
            Ok(Reply::Fail) => ForwardOutcome::Rejected,
            Ok(other) => {
                warn!(%request, reply = %other, "unexpected reply from leader");
                ForwardOutcome::Unreachable
            }
            Err(ExchangeError::TimedOut(limit)) => {
                warn!(%request, ?limit, "timed out forwarding to leader");
                ForwardOutcome::TimedOut
            }
            Err(err) => {
                warn!(%request, leader = %self.leader, error = %err, "failed to forward to leader");
                ForwardOutcome::Unreachable
            }
        }
    }

    /// Sends `REGISTER,<advertise>` and returns the leader's answer.
    pub async fn register(&self, advertise: &str) -> Result<Reply, ExchangeError> {
        exchange(
            &self.leader,
            &Request::Register(advertise.to_string()),
            self.register_timeout,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Command, read_line, write_line};
    use tokio::{io::BufReader, net::TcpListener};

    async fn fake_leader(answer: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake leader");
        let addr = listener.local_addr().expect("addr").to_string();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let (reader, mut writer) = stream.into_split();
                let _ = read_line(&mut BufReader::new(reader)).await;
                let _ = write_line(&mut writer, &answer).await;
            }
        });
        addr
    }

    fn forwarder(leader: String, timeout: Duration) -> Forwarder {
        Forwarder::new(leader, timeout, timeout)
    }

    #[tokio::test]
    async fn maps_leader_verdicts() {
        let request = LockRequest::new(Command::Lock, "L", "A");

        let approved = forwarder(fake_leader("SUCCESS").await, Duration::from_secs(1));
        assert_eq!(approved.forward(&request).await, ForwardOutcome::Approved);

        let rejected = forwarder(fake_leader("FAIL").await, Duration::from_secs(1));
        let outcome = rejected.forward(&request).await;
        assert_eq!(outcome, ForwardOutcome::Rejected);
        assert_eq!(outcome.immediate_reply(), Some(Reply::Fail));

        let confused = forwarder(fake_leader("INVALID_FORMAT").await, Duration::from_secs(1));
        assert_eq!(confused.forward(&request).await, ForwardOutcome::Unreachable);
    }

    #[tokio::test]
    async fn unreachable_leader_is_an_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            listener.local_addr().expect("addr").to_string()
        };
        let outcome = forwarder(addr, Duration::from_secs(1))
            .forward(&LockRequest::new(Command::Unlock, "L", "A"))
            .await;
        assert_eq!(outcome.immediate_reply(), Some(Reply::Error));
    }

    #[tokio::test]
    async fn silent_leader_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let _hold = tokio::spawn(async move {
            let connection = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(connection);
        });

        let outcome = forwarder(addr, Duration::from_millis(150))
            .forward(&LockRequest::new(Command::Lock, "L", "A"))
            .await;
        assert_eq!(outcome, ForwardOutcome::TimedOut);
    }
}
