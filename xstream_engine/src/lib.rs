//! Consumption engine: a long-running read, process, acknowledge, advance loop over one stream.
//!
//! The embedding application implements [`Worker`]: it supplies the initial [`ReadRequest`] and
//! decides per item whether it was handled. The [`Engine`] bootstraps the consumer group, reads
//! batches through a [`StreamClient`](xstream_client::StreamClient), hands every item of a batch
//! to the worker concurrently, acknowledges what the worker approved, and then moves its cursor.
//!
//! A group-scoped request is always in one of two modes:
//!
//! * live: the cursor is pinned to the "never delivered" sentinel and only new entries arrive.
//! * catch-up: the cursor is a concrete position and reads replay this consumer's own pending
//!   entries after it. Each batch moves the cursor to its last entry; the first empty batch
//!   switches the request to live for good.
//!
//! A live request only goes back to catch-up through [`EngineHandle::request_catchup`].
use std::fmt::Debug;

use async_trait::async_trait;
use xstream_client::{AnonymousCatchupError, Item, ReadRequest};

mod batch;
mod engine;

pub use batch::BatchReport;
pub use engine::{Engine, EngineHandle, EngineOptions};

/// Outcome of handling one item: `Ok(true)` to acknowledge it, `Ok(false)` to leave it pending.
/// Errors leave the item pending as well.
pub type HandlerResult = anyhow::Result<bool>;

/// The application side of an [`Engine`].
#[async_trait]
pub trait Worker: Debug + Send + Sync + 'static {
    /// The request a run starts from. Called once at the start of every run.
    fn read_request(&self) -> ReadRequest;

    /// Handle one item. Items of the same batch are handed over concurrently.
    async fn consume(&self, item: &Item) -> HandlerResult;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bootstrap consumer group: {0}")]
    GroupBootstrap(#[source] xstream_client::Error),

    #[error("failed to read batch: {0}")]
    Read(#[source] xstream_client::Error),

    #[error("engine must be started before stepping")]
    NotStarted,

    #[error(transparent)]
    CatchupUnsupported(#[from] AnonymousCatchupError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
