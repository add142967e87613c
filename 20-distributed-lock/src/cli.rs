use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{
    config::{NodeConfig, Role, Timeouts},
    message::Command as LockCommand,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the authoritative lock coordinator.
    Leader(LeaderArgs),
    /// Run a read replica that forwards writes to the leader.
    Follower(FollowerArgs),
    /// Send a single LOCK / UNLOCK / OWN request and print the reply.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LeaderArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub listen: SocketAddr,

    /// Follower known before it registers (host:port). Repeatable.
    #[arg(long = "follower")]
    pub followers: Vec<String>,

    #[command(flatten)]
    pub timeouts: TimeoutArgs,
}

#[derive(Args, Debug, Clone)]
pub struct FollowerArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:5001")]
    pub listen: SocketAddr,

    /// Leader address (host:port).
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub leader: String,

    /// Address the leader should use to reach this node. Defaults to the bound address.
    #[arg(long)]
    pub advertise: Option<String>,

    #[command(flatten)]
    pub timeouts: TimeoutArgs,
}

#[derive(Args, Debug, Clone)]
pub struct TimeoutArgs {
    /// Follower → leader forward bound, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub forward_timeout_ms: u64,

    /// Per-follower SYNC acknowledgement bound, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub ack_timeout_ms: u64,

    /// Whole replication barrier bound on the leader, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub replication_timeout_ms: u64,

    /// How long a follower holds a forwarded client before answering TIMEOUT.
    #[arg(long, default_value_t = 30_000)]
    pub pending_timeout_ms: u64,

    /// Bound on the follower's REGISTER handshake, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    pub register_timeout_ms: u64,
}

impl From<&TimeoutArgs> for Timeouts {
    fn from(args: &TimeoutArgs) -> Self {
        Self {
            forward: Duration::from_millis(args.forward_timeout_ms),
            ack: Duration::from_millis(args.ack_timeout_ms),
            replication: Duration::from_millis(args.replication_timeout_ms),
            pending: Duration::from_millis(args.pending_timeout_ms),
            register: Duration::from_millis(args.register_timeout_ms),
        }
    }
}

impl From<&LeaderArgs> for NodeConfig {
    fn from(args: &LeaderArgs) -> Self {
        NodeConfig {
            role: Role::Leader {
                followers: args.followers.clone(),
            },
            advertise: None,
            timeouts: (&args.timeouts).into(),
        }
    }
}

impl From<&FollowerArgs> for NodeConfig {
    fn from(args: &FollowerArgs) -> Self {
        NodeConfig {
            role: Role::Follower {
                leader: args.leader.clone(),
            },
            advertise: args.advertise.clone(),
            timeouts: (&args.timeouts).into(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Node to send the request to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: String,

    /// Client id recorded as the lock owner.
    #[arg(long)]
    pub id: String,

    /// Give up after this many milliseconds.
    #[arg(long, default_value_t = 60_000)]
    pub timeout_ms: u64,

    pub command: ClientCommand,

    /// Name of the lock.
    pub lock: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Lock,
    Unlock,
    Own,
}

impl From<ClientCommand> for LockCommand {
    fn from(command: ClientCommand) -> Self {
        match command {
            ClientCommand::Lock => LockCommand::Lock,
            ClientCommand::Unlock => LockCommand::Unlock,
            ClientCommand::Own => LockCommand::Own,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follower_args_build_config() {
        let cli = Cli::try_parse_from([
            "distributed_lock",
            "follower",
            "--listen",
            "127.0.0.1:0",
            "--leader",
            "10.0.2.3:5000",
            "--pending-timeout-ms",
            "250",
        ])
        .expect("parse follower args");

        let Command::Follower(args) = cli.command else {
            panic!("expected follower subcommand");
        };
        let config = NodeConfig::from(&args);
        assert_eq!(
            config.role,
            Role::Follower {
                leader: "10.0.2.3:5000".into()
            }
        );
        assert_eq!(config.timeouts.pending, Duration::from_millis(250));
        assert_eq!(config.timeouts.forward, crate::config::DEFAULT_FORWARD_TIMEOUT);
    }

    #[test]
    fn leader_accepts_repeated_followers() {
        let cli = Cli::try_parse_from([
            "distributed_lock",
            "leader",
            "--follower",
            "10.0.2.4:5000",
            "--follower",
            "10.0.2.5:5000",
        ])
        .expect("parse leader args");

        let Command::Leader(args) = cli.command else {
            panic!("expected leader subcommand");
        };
        assert_eq!(
            NodeConfig::from(&args).role,
            Role::Leader {
                followers: vec!["10.0.2.4:5000".into(), "10.0.2.5:5000".into()]
            }
        );
    }

    #[test]
    fn client_parses_command_and_lock() {
        let cli = Cli::try_parse_from(["distributed_lock", "client", "--id", "alice", "own", "printer"])
            .expect("parse client args");
        let Command::Client(args) = cli.command else {
            panic!("expected client subcommand");
        };
        assert_eq!(args.command, ClientCommand::Own);
        assert_eq!(args.lock, "printer");
    }
}
