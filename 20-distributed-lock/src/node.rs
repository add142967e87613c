use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    future::Future,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
    sync::Mutex,
    time::{Instant, timeout_at},
};
use tracing::{debug, info, warn};

use crate::{
    config::{NodeConfig, Role},
    forward::Forwarder,
    message::{LockRequest, Reply, Request, read_frame, validate_endpoint, write_line},
    pending::PendingRequests,
    registry::FollowerRegistry,
    replication::ReplicationCoordinator,
    state_machine,
    table::LockTable,
};

/// A lock coordinator bound to a listening socket.
pub struct Node {
    listener: TcpListener,
    state: Arc<NodeState>,
}

impl Node {
    pub fn new(listener: TcpListener, config: NodeConfig) -> std::io::Result<Self> {
        let address = match config.advertise {
            Some(advertise) => advertise,
            None => listener.local_addr()?.to_string(),
        };
        let timeouts = config.timeouts;

        let role = match config.role {
            Role::Leader { followers } => RoleState::Leader(LeaderState {
                replicator: ReplicationCoordinator::new(
                    FollowerRegistry::with_followers(followers),
                    timeouts.ack,
                    timeouts.replication,
                ),
                write_order: WriteGates::default(),
            }),
            Role::Follower { leader } => RoleState::Follower(FollowerState {
                forwarder: Forwarder::new(leader, timeouts.forward, timeouts.register),
                pending: PendingRequests::new(),
                pending_timeout: timeouts.pending,
            }),
        };

        Ok(Self {
            listener,
            state: Arc::new(NodeState {
                address,
                table: Mutex::new(LockTable::new()),
                role,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Announces this follower to its leader. A leader has nothing to do.
    pub async fn register_with_leader(&self) -> Result<()> {
        let RoleState::Follower(follower) = &self.state.role else {
            debug!("leader does not register with anyone");
            return Ok(());
        };

        let leader = follower.forwarder.leader();
        let reply = follower
            .forwarder
            .register(&self.state.address)
            .await
            .with_context(|| format!("failed to register with leader {leader}"))?;

        match reply {
            Reply::Registered => {
                info!(%leader, advertise = %self.state.address, "registered with leader");
                Ok(())
            }
            other => bail!("leader {leader} refused registration: {other}"),
        }
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Node { listener, state } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&state).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(state: &NodeState) {
    info!("node shutting down");
    log_status(&state.status().await);
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<NodeState>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, state),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<NodeState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}

/// Reads one request line, answers it once, and closes. A forwarded write
/// on a follower keeps the connection open until its verdict is known.
async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<NodeState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let Some(frame) = read_frame(&mut reader).await? else {
        return Ok(());
    };
    let line = String::from_utf8_lossy(&frame);
    debug!(%peer, %line, "received message");

    let request = match Request::decode(&frame) {
        Ok(request) => request,
        Err(err) => {
            debug!(%peer, %line, error = %err, "rejecting malformed message");
            write_line(&mut writer, &err.reply())
                .await
                .context("failed to reject malformed message")?;
            return Ok(());
        }
    };

    match request {
        Request::Sync(mutation) => {
            state.mirror(&mutation).await;
            let acked = write_line(&mut writer, &Reply::Ack).await;
            state.settle_pending(&mutation).await;
            acked.context("failed to acknowledge sync")?;
        }
        Request::Register(endpoint) => {
            let reply = state.register_follower(&endpoint).await;
            write_line(&mut writer, &reply)
                .await
                .context("failed to answer registration")?;
        }
        Request::Client(request) => {
            let reply = state.handle_client(request).await;
            write_line(&mut writer, &reply)
                .await
                .context("failed to send reply")?;
        }
    }

    Ok(())
}

struct NodeState {
    address: String,
    table: Mutex<LockTable>,
    role: RoleState,
}

enum RoleState {
    Leader(LeaderState),
    Follower(FollowerState),
}

struct LeaderState {
    replicator: ReplicationCoordinator,
    /// Held per lock across decide + replicate so followers see the SYNCs
    /// for one lock in decision order.
    write_order: WriteGates,
}

/// One ordering gate per lock name with a write in flight. Writes on
/// different locks never wait for each other's replication barrier.
#[derive(Default)]
struct WriteGates {
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WriteGates {
    async fn ordered<F, T>(&self, lock_name: &str, write: F) -> T
    where
        F: Future<Output = T>,
    {
        let gate = {
            let mut gates = self.gates.lock().await;
            Arc::clone(gates.entry(lock_name.to_string()).or_default())
        };

        let output = {
            let _turn = gate.lock().await;
            write.await
        };

        // Gates are only cloned under the map lock, so a count of two means
        // no writer is queued behind this one.
        let mut gates = self.gates.lock().await;
        if Arc::strong_count(&gate) == 2 {
            gates.remove(lock_name);
        }
        output
    }

    async fn len(&self) -> usize {
        self.gates.lock().await.len()
    }
}

struct FollowerState {
    forwarder: Forwarder,
    pending: PendingRequests,
    pending_timeout: Duration,
}

impl NodeState {
    async fn handle_client(&self, request: LockRequest) -> Reply {
        if !request.command.is_write() {
            let mut table = self.table.lock().await;
            return state_machine::apply(&mut table, &request).into();
        }

        match &self.role {
            RoleState::Leader(leader) => leader.decide(&self.table, request).await,
            RoleState::Follower(follower) => follower.relay(request).await,
        }
    }

    /// Applies a SYNC verbatim. A leader should never be sent one, but it
    /// applies it all the same.
    async fn mirror(&self, mutation: &LockRequest) {
        self.table.lock().await.mirror(mutation);
        match &self.role {
            RoleState::Follower(_) => info!(%mutation, "applied sync from leader"),
            RoleState::Leader(_) => warn!(%mutation, "leader applied a misrouted sync"),
        }
    }

    async fn settle_pending(&self, mutation: &LockRequest) {
        if let RoleState::Follower(follower) = &self.role {
            if follower.pending.resolve_request(mutation, Reply::Success).await {
                debug!(%mutation, "sync resolved a pending request");
            }
        }
    }

    async fn register_follower(&self, endpoint: &str) -> Reply {
        match &self.role {
            RoleState::Leader(leader) => {
                if let Err(err) = validate_endpoint(endpoint) {
                    debug!(follower = %endpoint, error = %err, "rejecting registration");
                    return err.reply();
                }
                if leader.replicator.registry().register(endpoint).await {
                    info!(follower = %endpoint, "follower registered");
                } else {
                    debug!(follower = %endpoint, "follower already registered");
                }
                Reply::Registered
            }
            RoleState::Follower(_) => Reply::NotLeader,
        }
    }

    async fn status(&self) -> NodeStatus {
        let locks = self.table.lock().await.snapshot();
        let (role, followers, pending) = match &self.role {
            RoleState::Leader(leader) => (
                RoleKind::Leader,
                leader.replicator.registry().snapshot().await,
                0,
            ),
            RoleState::Follower(follower) => {
                (RoleKind::Follower, Vec::new(), follower.pending.len().await)
            }
        };

        NodeStatus {
            role,
            address: self.address.clone(),
            locks,
            followers,
            pending,
        }
    }
}

impl LeaderState {
    async fn decide(&self, table: &Mutex<LockTable>, request: LockRequest) -> Reply {
        self.write_order
            .ordered(&request.lock_name, self.apply_and_replicate(table, &request))
            .await
    }

    async fn apply_and_replicate(&self, table: &Mutex<LockTable>, request: &LockRequest) -> Reply {
        let outcome = {
            let mut table = table.lock().await;
            state_machine::apply(&mut table, request)
        };
        info!(%request, ?outcome, "leader decided");

        if outcome.is_success() {
            let report = self.replicator.replicate(request).await;
            if !report.is_complete() {
                // The mutation stays committed; followers that missed it stay stale.
                warn!(
                    %request,
                    acknowledged = report.acknowledged.len(),
                    failed = report.failed.len(),
                    unanswered = report.unanswered.len(),
                    "replication incomplete"
                );
            }
        }

        outcome.into()
    }
}

impl FollowerState {
    async fn relay(&self, request: LockRequest) -> Reply {
        let deadline = Instant::now() + self.pending_timeout;
        let Some((ticket, mut verdict)) = self.pending.register(request.clone()).await else {
            warn!(%request, "identical request already pending");
            return Reply::Fail;
        };

        let forwarding = async {
            if let Ok(outcome) = timeout_at(deadline, self.forwarder.forward(&request)).await {
                if let Some(reply) = outcome.immediate_reply() {
                    self.pending.resolve(&ticket, reply).await;
                }
            }
        };
        tokio::pin!(forwarding);

        // A SYNC can settle the request while the forward is still open.
        let settled = timeout_at(deadline, async {
            let mut forwarded = false;
            loop {
                select! {
                    received = &mut verdict => return received.unwrap_or(Reply::Error),
                    _ = &mut forwarding, if !forwarded => forwarded = true,
                }
            }
        })
        .await;

        match settled {
            Ok(reply) => reply,
            Err(_) => {
                if self.pending.resolve(&ticket, Reply::Timeout).await {
                    warn!(%request, "no verdict before the watchdog fired");
                }
                verdict.await.unwrap_or(Reply::Timeout)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Leader,
    Follower,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Leader => f.write_str("LEADER"),
            RoleKind::Follower => f.write_str("FOLLOWER"),
        }
    }
}

/// Point-in-time view of a node.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub role: RoleKind,
    /// Address advertised to peers.
    pub address: String,
    pub locks: BTreeMap<String, String>,
    /// Registered followers; always empty on a follower.
    pub followers: Vec<String>,
    /// Parked client requests; always zero on a leader.
    pub pending: usize,
}

/// Cheap handle for inspecting a running node.
#[derive(Clone)]
pub struct NodeHandle {
    state: Arc<NodeState>,
}

impl NodeHandle {
    pub async fn status(&self) -> NodeStatus {
        self.state.status().await
    }
}

pub fn log_status(status: &NodeStatus) {
    info!(
        role = %status.role,
        address = %status.address,
        locks = status.locks.len(),
        followers = status.followers.len(),
        pending = status.pending,
        "node status"
    );
    for (lock, owner) in &status.locks {
        info!(%lock, %owner, "held lock");
    }
    for follower in &status.followers {
        info!(%follower, "registered follower");
    }
}
