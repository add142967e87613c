use std::time::Duration;

pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REPLICATION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounds for every blocking network step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Follower → leader forward, connect through reply.
    pub forward: Duration,
    /// One follower's SYNC exchange.
    pub ack: Duration,
    /// Whole replication barrier on the leader.
    pub replication: Duration,
    /// Watchdog on a parked follower client.
    pub pending: Duration,
    /// Follower's REGISTER handshake at startup.
    pub register: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            forward: DEFAULT_FORWARD_TIMEOUT,
            ack: DEFAULT_ACK_TIMEOUT,
            replication: DEFAULT_REPLICATION_TIMEOUT,
            pending: DEFAULT_PENDING_TIMEOUT,
            register: DEFAULT_REGISTER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Authoritative node. `followers` seeds the registry before any REGISTER.
    Leader { followers: Vec<String> },
    /// Mirror node that forwards writes to `leader` (`host:port`).
    Follower { leader: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub role: Role,
    /// Address sent in REGISTER. Defaults to the bound listen address.
    pub advertise: Option<String>,
    pub timeouts: Timeouts,
}

impl NodeConfig {
    pub fn leader() -> Self {
        Self {
            role: Role::Leader {
                followers: Vec::new(),
            },
            advertise: None,
            timeouts: Timeouts::default(),
        }
    }

    pub fn follower(leader: impl Into<String>) -> Self {
        Self {
            role: Role::Follower {
                leader: leader.into(),
            },
            advertise: None,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}
