//! Read requests, cursors and the items a read yields.
use std::{convert::Infallible, fmt::Display, num::NonZeroUsize, str::FromStr, time::Duration};

use indexmap::IndexMap;

/// Cursor token meaning "only entries never delivered to this group".
pub const LIVE_SENTINEL: &str = ">";

/// Cursor token meaning "only entries appended after this read started", used for reads outside
/// of a consumer group, which do not accept [`LIVE_SENTINEL`].
pub const TAIL_SENTINEL: &str = "$";

/// Default number of entries fetched per read.
pub const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(100).unwrap();

/// Default time a read may wait for at least one entry.
pub const DEFAULT_BLOCK: Duration = Duration::from_millis(2000);

static LIVE_CURSOR: Cursor = Cursor::Live;

/// The broker-assigned position of an entry within its stream, e.g. `1526919030474-55`.
///
/// Treated as opaque: ids are only compared for equality and echoed back to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(String);

impl EntryId {
    /// The position before the first entry of any stream. Catching up from here replays the
    /// consumer's whole pending backlog.
    pub const ORIGIN: &'static str = "0-0";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn origin() -> Self {
        Self::new(Self::ORIGIN)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl FromStr for EntryId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl AsRef<str> for EntryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for EntryId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Entry body: field name to value.
pub type Payload = IndexMap<String, String>;

/// One stream entry as delivered by a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Name of the stream the entry was read from
    pub stream: String,
    pub id: EntryId,
    /// Empty when the broker no longer holds the entry body, e.g. after trimming
    pub payload: Payload,
}

impl Item {
    pub fn new(stream: impl Into<String>, id: impl Into<EntryId>, payload: Payload) -> Self {
        Self {
            stream: stream.into(),
            id: id.into(),
            payload,
        }
    }

    /// Value of a single payload field
    pub fn field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).map(String::as_str)
    }
}

/// Which part of the stream a consumer reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Only entries that were never delivered before
    Live,
    /// Replay strictly after this position, including the consumer's own pending entries
    At(EntryId),
}

impl Cursor {
    /// Interpret a textual cursor, mapping [`LIVE_SENTINEL`] to [`Cursor::Live`]
    pub fn from_token(token: &str) -> Self {
        if token == LIVE_SENTINEL {
            Self::Live
        } else {
            Self::At(EntryId::new(token))
        }
    }

    pub fn mode(&self) -> ReadMode {
        match self {
            Self::Live => ReadMode::Live,
            Self::At(_) => ReadMode::Catchup,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Fold a position spelled as [`LIVE_SENTINEL`] into [`Cursor::Live`]
    fn normalized(self) -> Self {
        match self {
            Self::At(id) if id.as_str() == LIVE_SENTINEL => Self::Live,
            cursor => cursor,
        }
    }
}

impl From<EntryId> for Cursor {
    fn from(position: EntryId) -> Self {
        Self::At(position).normalized()
    }
}

impl Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => f.write_str(LIVE_SENTINEL),
            Self::At(id) => id.fmt(f),
        }
    }
}

/// Consumption mode, derived from the cursor so the two can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Tail new entries
    Live,
    /// Replay the pending backlog from a concrete position
    Catchup,
}

impl Display for ReadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => f.write_str("live"),
            Self::Catchup => f.write_str("catch-up"),
        }
    }
}

/// Whether a read participates in a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadTarget {
    /// Group-scoped read: delivered entries are tracked per consumer and must be acknowledged
    Group {
        group: String,
        consumer: String,
        cursor: Cursor,
    },
    /// Plain read without group bookkeeping. Always tails the stream from [`TAIL_SENTINEL`], so
    /// entries appended between two reads are never delivered.
    Anonymous,
}

/// Returned when a catch-up position is requested for a read outside of a consumer group.
#[derive(Debug, thiserror::Error)]
#[error("stream '{stream}' is read without a consumer group and has no pending entries to catch up on")]
pub struct AnonymousCatchupError {
    pub stream: String,
}

/// Everything needed to issue one read against one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    stream: String,
    target: ReadTarget,
    batch_size: NonZeroUsize,
    block: Duration,
}

impl ReadRequest {
    /// A live, group-scoped read for `consumer` within `group`
    pub fn group(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self::with_target(
            stream,
            ReadTarget::Group {
                group: group.into(),
                consumer: consumer.into(),
                cursor: Cursor::Live,
            },
        )
    }

    /// A plain read of `stream`, outside of any consumer group
    pub fn anonymous(stream: impl Into<String>) -> Self {
        Self::with_target(stream, ReadTarget::Anonymous)
    }

    /// A group-scoped read when both `group` and `consumer` are given, an anonymous read otherwise
    pub fn from_parts(
        stream: impl Into<String>,
        group: Option<String>,
        consumer: Option<String>,
    ) -> Self {
        match (group, consumer) {
            (Some(group), Some(consumer)) => Self::group(stream, group, consumer),
            _ => Self::anonymous(stream),
        }
    }

    fn with_target(stream: impl Into<String>, target: ReadTarget) -> Self {
        Self {
            stream: stream.into(),
            target,
            batch_size: DEFAULT_BATCH_SIZE,
            block: DEFAULT_BLOCK,
        }
    }

    pub fn with_batch_size(self, batch_size: NonZeroUsize) -> Self {
        Self { batch_size, ..self }
    }

    pub fn with_block(self, block: Duration) -> Self {
        Self { block, ..self }
    }

    /// Start in catch-up mode, replaying this consumer's pending entries after `position`.
    ///
    /// A `position` of [`LIVE_SENTINEL`] starts live instead.
    pub fn starting_at(
        mut self,
        position: impl Into<EntryId>,
    ) -> Result<Self, AnonymousCatchupError> {
        self.set_cursor(Cursor::from(position.into()))?;
        Ok(self)
    }

    /// Move the cursor of a group-scoped read. The mode follows the cursor, and a position spelled
    /// as [`LIVE_SENTINEL`] is stored as [`Cursor::Live`].
    pub fn set_cursor(&mut self, cursor: Cursor) -> Result<(), AnonymousCatchupError> {
        let cursor = cursor.normalized();
        match &mut self.target {
            ReadTarget::Group { cursor: current, .. } => {
                *current = cursor;
                Ok(())
            }
            // tailing is the only thing an anonymous read does
            ReadTarget::Anonymous if cursor.is_live() => Ok(()),
            ReadTarget::Anonymous => Err(AnonymousCatchupError {
                stream: self.stream.clone(),
            }),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn target(&self) -> &ReadTarget {
        &self.target
    }

    pub fn is_group(&self) -> bool {
        matches!(self.target, ReadTarget::Group { .. })
    }

    pub fn group_name(&self) -> Option<&str> {
        match &self.target {
            ReadTarget::Group { group, .. } => Some(group.as_str()),
            ReadTarget::Anonymous => None,
        }
    }

    pub fn consumer_name(&self) -> Option<&str> {
        match &self.target {
            ReadTarget::Group { consumer, .. } => Some(consumer.as_str()),
            ReadTarget::Anonymous => None,
        }
    }

    pub fn batch_size(&self) -> NonZeroUsize {
        self.batch_size
    }

    pub fn block(&self) -> Duration {
        self.block
    }

    /// The stored cursor. Anonymous reads are always live.
    pub fn cursor(&self) -> &Cursor {
        match &self.target {
            ReadTarget::Group { cursor, .. } => cursor,
            ReadTarget::Anonymous => &LIVE_CURSOR,
        }
    }

    pub fn mode(&self) -> ReadMode {
        self.cursor().mode()
    }

    /// The id argument sent with the next read
    pub fn cursor_token(&self) -> &str {
        match &self.target {
            ReadTarget::Group {
                cursor: Cursor::Live,
                ..
            } => LIVE_SENTINEL,
            ReadTarget::Group {
                cursor: Cursor::At(id),
                ..
            } => id.as_str(),
            ReadTarget::Anonymous => TAIL_SENTINEL,
        }
    }
}
