//! The connection seam between the adapter and a running broker.
//!
//! A [`Broker`] exposes exactly the four stream primitives the adapter needs. Each call is a
//! single round-trip that either yields a structured [`Reply`] or fails with a [`BrokerError`];
//! nothing here retries. [`RedisBroker`] is the production implementation. With the
//! `test_helpers` feature, `mock::MockBroker` scripts replies and records calls for tests.
use std::fmt::{Debug, Display};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::trace;

/// The stream commands issued against the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `XGROUP`, used with the `CREATE` sub-command
    XGroup,
    /// `XREAD`, a plain read without group bookkeeping
    XRead,
    /// `XREADGROUP`, a read that participates in a consumer group
    XReadGroup,
    /// `XACK`
    XAck,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::XGroup => "XGROUP",
            Self::XRead => "XREAD",
            Self::XReadGroup => "XREADGROUP",
            Self::XAck => "XACK",
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A reply frame as sent back by the broker.
///
/// This mirrors the wire protocol closely enough to represent the nested stream reply, but is
/// independent of any particular client library so replies can be scripted in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Integer(i64),
    Bytes(Vec<u8>),
    Status(String),
    Array(Vec<Reply>),
}

impl Reply {
    /// Short name of the frame type, used in parse errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Integer(_) => "integer",
            Self::Bytes(_) => "bulk string",
            Self::Status(_) => "status",
            Self::Array(_) => "array",
        }
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Self::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Self::Bytes(s.into_bytes())
    }
}

impl From<i64> for Reply {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<Vec<Reply>> for Reply {
    fn from(frames: Vec<Reply>) -> Self {
        Self::Array(frames)
    }
}

impl From<redis::Value> for Reply {
    fn from(value: redis::Value) -> Self {
        match value {
            redis::Value::Nil => Self::Nil,
            redis::Value::Int(n) => Self::Integer(n),
            redis::Value::Data(bytes) => Self::Bytes(bytes),
            redis::Value::Bulk(values) => Self::Array(values.into_iter().map(Self::from).collect()),
            redis::Value::Status(status) => Self::Status(status),
            redis::Value::Okay => Self::Status("OK".to_string()),
        }
    }
}

/// A failed broker round-trip.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker answered the command with an error reply, e.g. `BUSYGROUP`.
    #[error("{code} {message}")]
    Reply { code: String, message: String },

    /// The command never produced a reply: the connection failed, was closed, or the client is
    /// misconfigured.
    #[error("broker connection error: {0}")]
    Transport(#[source] redis::RedisError),
}

impl BrokerError {
    /// Build an error reply, as the broker would send for a rejected command
    pub fn reply(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reply {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The error code of a broker error reply, if the broker replied at all
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Reply { code, .. } => Some(code.as_str()),
            Self::Transport(_) => None,
        }
    }

    /// Whether the broker refused to create a consumer group because it already exists
    pub fn is_busy_group(&self) -> bool {
        match self {
            Self::Reply { code, message } => code == "BUSYGROUP" || message.contains("BUSYGROUP"),
            Self::Transport(_) => false,
        }
    }
}

impl From<redis::RedisError> for BrokerError {
    fn from(e: redis::RedisError) -> Self {
        // only server-side error replies carry a code
        match e.code().map(str::to_owned) {
            Some(code) => {
                let message = e.detail().unwrap_or_default().to_owned();
                Self::Reply { code, message }
            }
            None => Self::Transport(e),
        }
    }
}

/// The four stream primitives a broker connection must provide.
///
/// Arguments are passed exactly as they go on the wire, after the command name.
#[async_trait]
pub trait Broker: Debug + Send + Sync + 'static {
    /// `XGROUP <args>`
    async fn create_group(&self, args: &[String]) -> Result<Reply, BrokerError>;

    /// `XREAD <args>`
    async fn read(&self, args: &[String]) -> Result<Reply, BrokerError>;

    /// `XREADGROUP <args>`
    async fn read_group(&self, args: &[String]) -> Result<Reply, BrokerError>;

    /// `XACK <args>`
    async fn acknowledge(&self, args: &[String]) -> Result<Reply, BrokerError>;
}

/// A [`Broker`] backed by a multiplexed Redis connection.
///
/// Cloning is cheap and clones share the underlying connection. A blocking read holds the
/// connection until it returns, so engines that block should not share one `RedisBroker`.
#[derive(Clone)]
pub struct RedisBroker {
    connection: MultiplexedConnection,
}

impl RedisBroker {
    /// Open a connection to the Redis server at `url`, e.g. `redis://127.0.0.1:6379`
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { connection })
    }

    async fn execute(&self, command: Command, args: &[String]) -> Result<Reply, BrokerError> {
        trace!(%command, ?args, "issuing broker command");
        let mut connection = self.connection.clone();
        let mut cmd = redis::cmd(command.name());
        for arg in args {
            cmd.arg(arg);
        }
        let value: redis::Value = cmd.query_async(&mut connection).await?;
        Ok(value.into())
    }
}

impl Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker").finish_non_exhaustive()
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn create_group(&self, args: &[String]) -> Result<Reply, BrokerError> {
        self.execute(Command::XGroup, args).await
    }

    async fn read(&self, args: &[String]) -> Result<Reply, BrokerError> {
        self.execute(Command::XRead, args).await
    }

    async fn read_group(&self, args: &[String]) -> Result<Reply, BrokerError> {
        self.execute(Command::XReadGroup, args).await
    }

    async fn acknowledge(&self, args: &[String]) -> Result<Reply, BrokerError> {
        self.execute(Command::XAck, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_nested_redis_values() {
        let value = redis::Value::Bulk(vec![
            redis::Value::Data(b"S".to_vec()),
            redis::Value::Bulk(vec![redis::Value::Nil, redis::Value::Int(3)]),
            redis::Value::Okay,
        ]);

        assert_eq!(
            Reply::from(value),
            Reply::Array(vec![
                Reply::from("S"),
                Reply::Array(vec![Reply::Nil, Reply::Integer(3)]),
                Reply::Status("OK".to_string()),
            ])
        );
    }

    #[test]
    fn busy_group_is_recognised_by_code_or_message() {
        assert!(BrokerError::reply("BUSYGROUP", "Consumer Group name already exists").is_busy_group());
        assert!(BrokerError::reply("ERR", "it is a BUSYGROUP error").is_busy_group());
        assert!(!BrokerError::reply("ERR", "syntax error").is_busy_group());
    }

    #[test]
    fn server_errors_keep_their_code() {
        let err = redis::RedisError::from((redis::ErrorKind::ResponseError, "bad", "detail".into()));
        let err = BrokerError::from(err);
        assert_eq!(err.code(), Some("ERR"));

        let err = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        let err = BrokerError::from(err);
        assert_eq!(err.code(), None);
        assert!(matches!(err, BrokerError::Transport(_)));
    }
}
