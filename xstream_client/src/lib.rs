//! Stream adapter for consuming a Redis stream, alone or as part of a consumer group.
//!
//! [`StreamClient`] turns a [`ReadRequest`] into the matching `XGROUP`, `XREAD`, `XREADGROUP` or
//! `XACK` command, sends it through a [`Broker`], and parses the reply into typed [`Item`]s. It
//! holds no state of its own: the request passed to each call decides what is read and where.
//!
//! ```no_run
//! # use xstream_client::{RedisBroker, ReadRequest, StreamClient};
//! # use std::sync::Arc;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let broker = RedisBroker::connect("redis://127.0.0.1:6379").await?;
//! let client = StreamClient::new(Arc::new(broker));
//!
//! let request = ReadRequest::group("orders", "billing", "billing-0");
//! if let Err(e) = client.ensure_group(&request).await {
//!     if !e.is_group_exists() {
//!         return Err(e.into());
//!     }
//! }
//!
//! for item in client.read(&request).await? {
//!     println!("{} {:?}", item.id, item.payload);
//!     client.acknowledge(&request, &item).await?;
//! }
//! # Ok(())
//! # }
//! ```
use std::{fmt::Display, sync::Arc};

use tracing::debug;

pub mod broker;
#[cfg(any(test, feature = "test_helpers"))]
pub mod mock;
pub mod request;
pub mod wire;

pub use broker::{Broker, BrokerError, Command, RedisBroker, Reply};
pub use request::{
    AnonymousCatchupError, Cursor, EntryId, Item, LIVE_SENTINEL, Payload, ReadMode, ReadRequest,
    ReadTarget, TAIL_SENTINEL,
};
pub use wire::ParseError;

/// The adapter operation an [`Error`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    EnsureGroup,
    Read,
    Acknowledge,
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnsureGroup => f.write_str("ensure group"),
            Self::Read => f.write_str("read"),
            Self::Acknowledge => f.write_str("acknowledge"),
        }
    }
}

/// Primary error type for the [`StreamClient`]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("consumer group '{group}' already exists on stream '{stream}'")]
    GroupExists { stream: String, group: String },

    #[error("failed to create consumer group '{group}' on stream '{stream}': {source}")]
    CreateGroup {
        stream: String,
        group: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to read from stream '{stream}': {source}")]
    Read {
        stream: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to acknowledge entries of stream '{stream}' for group '{group}': {source}")]
    Acknowledge {
        stream: String,
        group: String,
        #[source]
        source: BrokerError,
    },

    #[error("malformed {operation} reply for stream '{stream}': {source}")]
    MalformedReply {
        operation: Operation,
        stream: String,
        #[source]
        source: ParseError,
    },

    #[error("cannot {operation} on stream '{stream}' without a consumer group")]
    NotGroupRead { operation: Operation, stream: String },
}

impl Error {
    /// The operation that failed
    pub fn operation(&self) -> Operation {
        match self {
            Self::GroupExists { .. } | Self::CreateGroup { .. } => Operation::EnsureGroup,
            Self::Read { .. } => Operation::Read,
            Self::Acknowledge { .. } => Operation::Acknowledge,
            Self::MalformedReply { operation, .. } | Self::NotGroupRead { operation, .. } => {
                *operation
            }
        }
    }

    /// Whether this is the expected outcome of bootstrapping a group that was bootstrapped before
    pub fn is_group_exists(&self) -> bool {
        matches!(self, Self::GroupExists { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What to acknowledge.
#[derive(Debug, Clone, Copy)]
pub enum AckTarget<'a> {
    /// One item, acknowledged against the stream it was read from
    Item(&'a Item),
    /// A list of ids, acknowledged in order against the stream of the request
    Ids(&'a [EntryId]),
}

impl<'a> From<&'a Item> for AckTarget<'a> {
    fn from(item: &'a Item) -> Self {
        Self::Item(item)
    }
}

impl<'a> From<&'a [EntryId]> for AckTarget<'a> {
    fn from(ids: &'a [EntryId]) -> Self {
        Self::Ids(ids)
    }
}

impl<'a> From<&'a Vec<EntryId>> for AckTarget<'a> {
    fn from(ids: &'a Vec<EntryId>) -> Self {
        Self::Ids(ids.as_slice())
    }
}

/// Translates read requests into broker commands.
///
/// Every method is a single round-trip and nothing is retried; broker errors are returned tagged
/// with the [`Operation`] that produced them.
#[derive(Debug, Clone)]
pub struct StreamClient {
    broker: Arc<dyn Broker>,
}

impl StreamClient {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Create the consumer group of `request`, and the stream itself if it does not exist yet.
    ///
    /// The group starts at the tail of the stream. Fails with [`Error::GroupExists`] when the
    /// group was created before, which callers bootstrapping on startup should treat as success.
    pub async fn ensure_group(&self, request: &ReadRequest) -> Result<()> {
        let stream = request.stream();
        let ReadTarget::Group { group, .. } = request.target() else {
            return Err(Error::NotGroupRead {
                operation: Operation::EnsureGroup,
                stream: stream.to_string(),
            });
        };

        let args = wire::create_group_args(stream, group);
        match self.broker.create_group(&args).await {
            Ok(_) => {
                debug!(stream, group, "created consumer group");
                Ok(())
            }
            Err(e) if e.is_busy_group() => Err(Error::GroupExists {
                stream: stream.to_string(),
                group: group.clone(),
            }),
            Err(source) => Err(Error::CreateGroup {
                stream: stream.to_string(),
                group: group.clone(),
                source,
            }),
        }
    }

    /// Read the next batch for `request`.
    ///
    /// A group-scoped request issues `XREADGROUP` and reads `>` while live; an anonymous request
    /// issues `XREAD` and tails the stream. Returns an empty batch when nothing arrived within the
    /// request's block time.
    pub async fn read(&self, request: &ReadRequest) -> Result<Vec<Item>> {
        let args = wire::read_args(request);
        let reply = match request.target() {
            ReadTarget::Group { .. } => self.broker.read_group(&args).await,
            ReadTarget::Anonymous => self.broker.read(&args).await,
        }
        .map_err(|source| Error::Read {
            stream: request.stream().to_string(),
            source,
        })?;

        wire::parse_batch(reply).map_err(|source| Error::MalformedReply {
            operation: Operation::Read,
            stream: request.stream().to_string(),
            source,
        })
    }

    /// Acknowledge one item or a list of ids within the group of `request`.
    ///
    /// A single item is acknowledged against its own stream, a list of ids against the stream of
    /// `request`, so a list must not mix entries of different streams. Returns how many ids the
    /// broker newly acknowledged; ids that were already acknowledged or are unknown are not
    /// counted. An empty list is not sent at all.
    pub async fn acknowledge<'a>(
        &self,
        request: &ReadRequest,
        target: impl Into<AckTarget<'a>>,
    ) -> Result<u64> {
        let Some(group) = request.group_name() else {
            return Err(Error::NotGroupRead {
                operation: Operation::Acknowledge,
                stream: request.stream().to_string(),
            });
        };

        let (stream, args) = match target.into() {
            AckTarget::Item(item) => (
                item.stream.as_str(),
                wire::ack_args(&item.stream, group, [&item.id]),
            ),
            AckTarget::Ids([]) => return Ok(0),
            AckTarget::Ids(ids) => (
                request.stream(),
                wire::ack_args(request.stream(), group, ids),
            ),
        };

        let reply = self
            .broker
            .acknowledge(&args)
            .await
            .map_err(|source| Error::Acknowledge {
                stream: stream.to_string(),
                group: group.to_string(),
                source,
            })?;

        wire::parse_count(reply).map_err(|source| Error::MalformedReply {
            operation: Operation::Acknowledge,
            stream: stream.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockBroker};
    use pretty_assertions::assert_eq;
    use std::{num::NonZeroUsize, time::Duration};

    fn client() -> (Arc<MockBroker>, StreamClient) {
        let broker = Arc::new(MockBroker::new());
        let client = StreamClient::new(Arc::clone(&broker) as _);
        (broker, client)
    }

    fn request() -> ReadRequest {
        ReadRequest::group("TEST:STREAM", "TEST:GROUP", "TEST:CONSUMER:0")
            .with_batch_size(NonZeroUsize::new(1).unwrap())
            .with_block(Duration::from_millis(2000))
    }

    #[tokio::test]
    async fn ensure_group_creates_group_and_stream() {
        let (broker, client) = client();

        client.ensure_group(&request()).await.unwrap();

        assert_eq!(
            broker.calls(),
            vec![Call::new(
                Command::XGroup,
                ["CREATE", "TEST:STREAM", "TEST:GROUP", "$", "MKSTREAM"]
            )]
        );
    }

    #[test_log::test(tokio::test)]
    async fn ensure_group_twice_reports_existing_group() {
        let (broker, client) = client();
        client.ensure_group(&request()).await.unwrap();

        broker.push_busy_group();
        let err = client.ensure_group(&request()).await.unwrap_err();
        assert!(err.is_group_exists(), "{err}");
        assert_eq!(err.operation(), Operation::EnsureGroup);
        assert_eq!(broker.calls_for(Command::XGroup).len(), 2);
    }

    #[tokio::test]
    async fn ensure_group_surfaces_other_failures() {
        let (broker, client) = client();
        broker.push_create_group(Err(BrokerError::reply(
            "WRONGTYPE",
            "Operation against a key holding the wrong kind of value",
        )));

        let err = client.ensure_group(&request()).await.unwrap_err();
        assert!(!err.is_group_exists());
        assert!(matches!(err, Error::CreateGroup { .. }));
        assert_eq!(
            err.to_string(),
            "failed to create consumer group 'TEST:GROUP' on stream 'TEST:STREAM': \
            WRONGTYPE Operation against a key holding the wrong kind of value"
        );
    }

    #[tokio::test]
    async fn ensure_group_requires_a_group() {
        let (broker, client) = client();

        let err = client
            .ensure_group(&ReadRequest::anonymous("S"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotGroupRead {
                operation: Operation::EnsureGroup,
                ..
            }
        ));
        assert!(broker.calls().is_empty());
    }

    #[tokio::test]
    async fn group_read_without_data_is_empty() {
        let (broker, client) = client();

        let items = client.read(&request()).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(
            broker.calls(),
            vec![Call::new(
                Command::XReadGroup,
                [
                    "GROUP",
                    "TEST:GROUP",
                    "TEST:CONSUMER:0",
                    "COUNT",
                    "1",
                    "BLOCK",
                    "2000",
                    "STREAMS",
                    "TEST:STREAM",
                    ">"
                ]
            )]
        );
    }

    #[tokio::test]
    async fn group_read_parses_entries() {
        let (broker, client) = client();
        broker.push_entries("TEST:STREAM", &[("1-1", Some(&["test", "1", "foo", "bar"]))]);
        broker.push_entries(
            "TEST:STREAM",
            &[("1-2", None), ("1-3", Some(&["test", "3", "foo", "baz"]))],
        );

        let items = client.read(&request()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].stream, "TEST:STREAM");
        assert_eq!(items[0].id, "1-1");
        assert_eq!(items[0].field("test"), Some("1"));
        assert_eq!(items[0].field("foo"), Some("bar"));

        let items = client.read(&request()).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].payload.is_empty());
        assert_eq!(items[1].field("foo"), Some("baz"));
    }

    #[tokio::test]
    async fn catchup_reads_use_the_stored_cursor() {
        let (broker, client) = client();
        let request = request().starting_at("1-5").unwrap();

        client.read(&request).await.unwrap();

        let call = broker.calls().pop().unwrap();
        assert_eq!(call.args.last().map(String::as_str), Some("1-5"));
    }

    #[tokio::test]
    async fn anonymous_read_uses_xread() {
        let (broker, client) = client();
        let request = ReadRequest::anonymous("TEST:STREAM")
            .with_batch_size(NonZeroUsize::new(1).unwrap())
            .with_block(Duration::from_millis(1));

        assert!(client.read(&request).await.unwrap().is_empty());
        assert_eq!(
            broker.calls(),
            vec![Call::new(
                Command::XRead,
                ["COUNT", "1", "BLOCK", "1", "STREAMS", "TEST:STREAM", "$"]
            )]
        );
    }

    #[tokio::test]
    async fn read_errors_are_tagged() {
        let (broker, client) = client();
        broker.push_read_error(BrokerError::reply("NOGROUP", "No such consumer group"));

        let err = client.read(&request()).await.unwrap_err();
        assert_eq!(err.operation(), Operation::Read);
        assert!(matches!(err, Error::Read { .. }));

        broker.push_read(Reply::Integer(7));
        let err = client.read(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedReply {
                operation: Operation::Read,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn acknowledge_single_item() {
        let (broker, client) = client();
        let item = Item::new("TEST:STREAM", "1-1", Payload::new());

        assert_eq!(client.acknowledge(&request(), &item).await.unwrap(), 1);
        assert_eq!(
            broker.calls(),
            vec![Call::new(
                Command::XAck,
                ["TEST:STREAM", "TEST:GROUP", "1-1"]
            )]
        );

        // already acknowledged ids are not counted
        assert_eq!(client.acknowledge(&request(), &item).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn acknowledge_item_uses_its_own_stream() {
        let (broker, client) = client();
        let item = Item::new("OTHER:STREAM", "1-1", Payload::new());

        client.acknowledge(&request(), &item).await.unwrap();
        assert_eq!(
            broker.calls()[0].args,
            vec!["OTHER:STREAM", "TEST:GROUP", "1-1"]
        );
    }

    #[tokio::test]
    async fn acknowledge_list_of_ids() {
        let (broker, client) = client();
        let ids = vec![EntryId::new("1-1"), EntryId::new("1-2"), EntryId::new("1-3")];

        assert_eq!(client.acknowledge(&request(), &ids).await.unwrap(), 3);
        assert_eq!(
            broker.calls(),
            vec![Call::new(
                Command::XAck,
                ["TEST:STREAM", "TEST:GROUP", "1-1", "1-2", "1-3"]
            )]
        );

        assert_eq!(
            client
                .acknowledge(&request(), &Vec::<EntryId>::new())
                .await
                .unwrap(),
            0
        );
        assert_eq!(broker.calls().len(), 1);
    }

    #[tokio::test]
    async fn acknowledge_failures_are_tagged() {
        let (broker, client) = client();
        broker.fail_ack_for("1-2");

        let err = client
            .acknowledge(&request(), &Item::new("TEST:STREAM", "1-2", Payload::new()))
            .await
            .unwrap_err();
        assert_eq!(err.operation(), Operation::Acknowledge);

        let err = client
            .acknowledge(
                &ReadRequest::anonymous("TEST:STREAM"),
                &Item::new("TEST:STREAM", "1-1", Payload::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotGroupRead { .. }));
    }
}
