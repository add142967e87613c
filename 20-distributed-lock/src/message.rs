use std::{fmt, io, str::FromStr, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};

const LINE_ENDINGS: &[u8] = b"\r\n";
const SYNC_PREFIX: &str = "SYNC,";
const REGISTER_PREFIX: &str = "REGISTER,";

/// Lock operations a client can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Lock,
    Unlock,
    Own,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Lock => "LOCK",
            Command::Unlock => "UNLOCK",
            Command::Own => "OWN",
        }
    }

    /// LOCK and UNLOCK change the table; OWN only reads it.
    pub fn is_write(self) -> bool {
        !matches!(self, Command::Own)
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "LOCK" => Ok(Command::Lock),
            "UNLOCK" => Ok(Command::Unlock),
            "OWN" => Ok(Command::Own),
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `<CMD>,<lockName>,<clientId>` triple. Also the correlation key for
/// pending follower requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockRequest {
    pub command: Command,
    pub lock_name: String,
    pub client_id: String,
}

impl LockRequest {
    pub fn new(command: Command, lock_name: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            command,
            lock_name: lock_name.into(),
            client_id: client_id.into(),
        }
    }

    fn parse_fields(body: &str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = body.split(',').collect();
        if fields.len() != 3 {
            return Err(ParseError::FieldCount {
                expected: 3,
                found: fields.len(),
            });
        }
        if let Some(position) = fields.iter().position(|field| field.is_empty()) {
            return Err(ParseError::EmptyField(position));
        }

        Ok(Self {
            command: fields[0].parse()?,
            lock_name: fields[1].to_string(),
            client_id: fields[2].to_string(),
        })
    }
}

impl fmt::Display for LockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.command, self.lock_name, self.client_id)
    }
}

/// Every message a node accepts on its listening socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// LOCK / UNLOCK / OWN from a client or a forwarding follower.
    Client(LockRequest),
    /// A mutation decided by the leader. Only LOCK and UNLOCK are carried.
    Sync(LockRequest),
    /// Follower announcing its `host:port` to the leader.
    Register(String),
}

impl Request {
    /// Parses a raw frame as read off the socket. Bytes that are not UTF-8
    /// are a format error like any other malformed line.
    pub fn decode(frame: &[u8]) -> Result<Self, ParseError> {
        let line = std::str::from_utf8(frame).map_err(|_| ParseError::NotText)?;
        Self::parse(line)
    }

    pub fn parse(line: &str) -> Result<Self, ParseError> {
        if let Some(body) = line.strip_prefix(SYNC_PREFIX) {
            let mutation = LockRequest::parse_fields(body)?;
            if !mutation.command.is_write() {
                return Err(ParseError::NotReplicable(mutation.command));
            }
            return Ok(Request::Sync(mutation));
        }

        // The endpoint is checked by the leader; any REGISTER reaching a
        // follower is answered NOT_LEADER.
        if let Some(endpoint) = line.strip_prefix(REGISTER_PREFIX) {
            return Ok(Request::Register(endpoint.to_string()));
        }

        LockRequest::parse_fields(line).map(Request::Client)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Client(request) => write!(f, "{request}"),
            Request::Sync(mutation) => write!(f, "{SYNC_PREFIX}{mutation}"),
            Request::Register(endpoint) => write!(f, "{REGISTER_PREFIX}{endpoint}"),
        }
    }
}

/// Accepts `host:port` with a non-empty host and a numeric port.
pub fn validate_endpoint(endpoint: &str) -> Result<(), ParseError> {
    let invalid = || ParseError::InvalidEndpoint(endpoint.to_string());
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.contains(',') {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;
    Ok(())
}

/// Single-line answers sent back on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success,
    Fail,
    Timeout,
    Error,
    /// Current holder of a lock, answered to OWN.
    Owner(String),
    /// `NONE`: the lock is free.
    Unowned,
    Ack,
    Registered,
    NotLeader,
    InvalidFormat,
    InvalidCommand,
}

impl Reply {
    /// Reads a reply line. Anything that is not a sentinel is an owner id.
    pub fn parse(line: &str) -> Self {
        match line {
            "SUCCESS" => Reply::Success,
            "FAIL" => Reply::Fail,
            "TIMEOUT" => Reply::Timeout,
            "ERROR" | "" => Reply::Error,
            "NONE" => Reply::Unowned,
            "ACK" => Reply::Ack,
            "REGISTERED" => Reply::Registered,
            "NOT_LEADER" => Reply::NotLeader,
            "INVALID_FORMAT" => Reply::InvalidFormat,
            "INVALID_COMMAND" => Reply::InvalidCommand,
            owner => Reply::Owner(owner.to_string()),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Reply::Success => "SUCCESS",
            Reply::Fail => "FAIL",
            Reply::Timeout => "TIMEOUT",
            Reply::Error => "ERROR",
            Reply::Owner(owner) => owner.as_str(),
            Reply::Unowned => "NONE",
            Reply::Ack => "ACK",
            Reply::Registered => "REGISTERED",
            Reply::NotLeader => "NOT_LEADER",
            Reply::InvalidFormat => "INVALID_FORMAT",
            Reply::InvalidCommand => "INVALID_COMMAND",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected {expected} comma-separated fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("field {0} is empty")]
    EmptyField(usize),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{0} cannot be replicated")]
    NotReplicable(Command),
    #[error("invalid follower endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("message is not valid UTF-8")]
    NotText,
}

impl ParseError {
    /// The sentinel answered to the peer that sent the malformed line.
    pub fn reply(&self) -> Reply {
        match self {
            ParseError::UnknownCommand(_) | ParseError::NotReplicable(_) => Reply::InvalidCommand,
            ParseError::FieldCount { .. }
            | ParseError::EmptyField(_)
            | ParseError::InvalidEndpoint(_)
            | ParseError::NotText => Reply::InvalidFormat,
        }
    }
}

/// Failure of a one-request, one-reply exchange with another node.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("no reply within {0:?}")]
    TimedOut(Duration),
    #[error("connection closed before a reply arrived")]
    Closed,
}

/// Reads one `\n`-terminated frame without its line ending. `None` on EOF.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::new();
    if reader.read_until(b'\n', &mut frame).await? == 0 {
        return Ok(None);
    }
    while frame.last().is_some_and(|byte| LINE_ENDINGS.contains(byte)) {
        frame.pop();
    }
    Ok(Some(frame))
}

pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let frame = read_frame(reader).await?;
    Ok(frame.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

pub async fn write_line<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: fmt::Display,
{
    let mut encoded = message.to_string().into_bytes();
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Opens a fresh connection to `addr`, sends one line and waits for one
/// reply line. The whole exchange, connect included, is bounded by `limit`.
pub async fn exchange<T>(addr: &str, message: &T, limit: Duration) -> Result<Reply, ExchangeError>
where
    T: fmt::Display,
{
    let round_trip = async {
        let stream = TcpStream::connect(addr).await?;
        let (reader, mut writer) = stream.into_split();
        write_line(&mut writer, message).await?;
        let mut reader = BufReader::new(reader);
        read_line(&mut reader).await
    };

    match timeout(limit, round_trip).await {
        Ok(Ok(Some(line))) => Ok(Reply::parse(&line)),
        Ok(Ok(None)) => Err(ExchangeError::Closed),
        Ok(Err(err)) => Err(ExchangeError::Io(err)),
        Err(_) => Err(ExchangeError::TimedOut(limit)),
    }
}
