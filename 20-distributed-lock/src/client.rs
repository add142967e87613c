use std::time::Duration;

use anyhow::Result;
use tokio::io::{self, AsyncWriteExt};
use tracing::warn;

use crate::{
    cli::ClientArgs,
    message::{Command, ExchangeError, LockRequest, Reply, Request, exchange},
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Issues one request per connection against any node of the cluster.
#[derive(Debug, Clone)]
pub struct LockClient {
    server: String,
    client_id: String,
    timeout: Duration,
}

impl LockClient {
    pub fn new(server: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            client_id: client_id.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Upper bound on one request. Should exceed the follower's pending
    /// timeout, or the client gives up before the node does.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn lock(&self, lock_name: &str) -> Reply {
        self.send(Command::Lock, lock_name).await
    }

    pub async fn unlock(&self, lock_name: &str) -> Reply {
        self.send(Command::Unlock, lock_name).await
    }

    pub async fn owner(&self, lock_name: &str) -> Reply {
        self.send(Command::Own, lock_name).await
    }

    /// Transport failures come back as `ERROR` or `TIMEOUT`, the same
    /// sentinels a node would answer.
    pub async fn send(&self, command: Command, lock_name: &str) -> Reply {
        let request = Request::Client(LockRequest::new(command, lock_name, self.client_id.as_str()));
        match exchange(&self.server, &request, self.timeout).await {
            Ok(reply) => reply,
            Err(ExchangeError::TimedOut(_)) => Reply::Timeout,
            Err(err) => {
                warn!(server = %self.server, error = %err, "request failed");
                Reply::Error
            }
        }
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let client = LockClient::new(args.server.clone(), args.id.clone())
        .with_timeout(Duration::from_millis(args.timeout_ms));
    let reply = client.send(args.command.into(), &args.lock).await;
    write_stdout(&reply.to_string()).await?;
    Ok(())
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
