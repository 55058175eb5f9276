//! Config for the identity and tuning of stream consumers.
use std::{num::NonZeroUsize, time::Duration};

/// CLI config for which stream to consume, and how.
#[derive(Debug, Clone, clap::Parser)]
pub struct ConsumerConfig {
    /// Name of the stream to consume.
    #[clap(long = "stream", env = "XSTREAM_STREAM", action)]
    pub stream: String,

    /// Consumer group to read as a member of.
    ///
    /// Reads are anonymous, i.e. they only tail the stream and never acknowledge, unless both
    /// `--group` and `--consumer` are given.
    #[clap(long = "group", env = "XSTREAM_GROUP", action)]
    pub group: Option<String>,

    /// Name of this consumer within its group.
    #[clap(long = "consumer", env = "XSTREAM_CONSUMER", action)]
    pub consumer: Option<String>,

    /// Maximum number of entries fetched per read.
    #[clap(
        long = "batch-size",
        env = "XSTREAM_BATCH_SIZE",
        default_value = "100",
        action
    )]
    pub batch_size: NonZeroUsize,

    /// Maximum time a read waits for new entries before returning empty.
    #[clap(
        long = "block",
        env = "XSTREAM_BLOCK",
        default_value = "2s",
        value_parser = humantime::parse_duration
    )]
    pub block: Duration,

    /// Start by replaying this consumer's pending entries after the given entry id, e.g. `0-0`
    /// for the whole backlog, and go live once they are drained.
    #[clap(long = "start-id", env = "XSTREAM_START_ID", action)]
    pub start_id: Option<String>,

    /// Pause between reads while replaying pending entries.
    #[clap(
        long = "catchup-pause",
        env = "XSTREAM_CATCHUP_PAUSE",
        value_parser = humantime::parse_duration
    )]
    pub catchup_pause: Option<Duration>,

    /// Number of consumers to run side by side.
    ///
    /// With more than one, every consumer name gets its index appended, e.g. `billing-0`.
    #[clap(
        long = "workers",
        env = "XSTREAM_WORKERS",
        default_value = "1",
        action
    )]
    pub workers: NonZeroUsize,
}

impl ConsumerConfig {
    /// Whether reads happen as part of a consumer group
    pub fn is_group(&self) -> bool {
        self.group.is_some() && self.consumer.is_some()
    }

    /// The consumer name of the worker at `index`
    pub fn consumer_name(&self, index: usize) -> Option<String> {
        let consumer = self.consumer.as_deref()?;
        if self.workers.get() == 1 {
            Some(consumer.to_string())
        } else {
            Some(format!("{consumer}-{index}"))
        }
    }
}
