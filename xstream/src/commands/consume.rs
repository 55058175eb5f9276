use std::{io::Write, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};
use xstream_clap_blocks::{consumer::ConsumerConfig, logging::LoggingConfig, redis::RedisConfig};
use xstream_client::{AnonymousCatchupError, EntryId, Item, Payload, ReadRequest};
use xstream_engine::{Engine, EngineHandle, EngineOptions, HandlerResult, Worker};
use xstream_shutdown::{Hangups, ShutdownManager, wait_for_signal};

use super::common::connect;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Broker(#[from] xstream_client::BrokerError),

    #[error(transparent)]
    Engine(#[from] xstream_engine::Error),

    #[error(transparent)]
    Catchup(#[from] AnonymousCatchupError),

    #[error("failed to listen for signals: {0}")]
    Signal(#[from] std::io::Error),

    #[error("consumer task failed: {0}")]
    Task(#[from] JoinError),
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    #[clap(flatten)]
    redis_config: RedisConfig,

    #[clap(flatten)]
    consumer_config: ConsumerConfig,

    /// Leave consumed entries pending instead of acknowledging them
    #[clap(long = "no-ack", env = "XSTREAM_NO_ACK")]
    no_ack: bool,

    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,
}

/// Prints every entry as one line of JSON on stdout.
#[derive(Debug)]
struct PrintWorker {
    request: ReadRequest,
    acknowledge: bool,
}

#[derive(Debug, Serialize)]
struct EntryLine<'a> {
    stream: &'a str,
    id: &'a str,
    payload: &'a Payload,
}

impl PrintWorker {
    fn line(item: &Item) -> serde_json::Result<String> {
        serde_json::to_string(&EntryLine {
            stream: &item.stream,
            id: item.id.as_str(),
            payload: &item.payload,
        })
    }
}

#[async_trait]
impl Worker for PrintWorker {
    fn read_request(&self) -> ReadRequest {
        self.request.clone()
    }

    async fn consume(&self, item: &Item) -> HandlerResult {
        let line = Self::line(item)?;
        writeln!(std::io::stdout().lock(), "{line}")?;
        Ok(self.acknowledge)
    }
}

/// The request the worker at `index` starts from
fn read_request(config: &ConsumerConfig, index: usize) -> Result<ReadRequest> {
    let request = ReadRequest::from_parts(
        &config.stream,
        config.group.clone(),
        config.consumer_name(index),
    )
    .with_batch_size(config.batch_size)
    .with_block(config.block);

    Ok(match &config.start_id {
        Some(position) => request.starting_at(position.as_str())?,
        None => request,
    })
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let consumer_config = &config.consumer_config;
    if consumer_config.group.is_some() != consumer_config.consumer.is_some() {
        warn!("both --group and --consumer are needed to consume as a group, reading anonymously");
    }

    let shutdown = ShutdownManager::new();
    let options = EngineOptions {
        catchup_pause: consumer_config.catchup_pause,
    };

    let mut handles = Vec::with_capacity(consumer_config.workers.get());
    let mut runs: Vec<JoinHandle<xstream_engine::Result<()>>> = Vec::new();
    for index in 0..consumer_config.workers.get() {
        let request = read_request(consumer_config, index)?;
        let name = request
            .consumer_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("anonymous-{index}"));

        let client = connect(&config.redis_config.redis_url).await?;
        let worker = Arc::new(PrintWorker {
            request,
            acknowledge: !config.no_ack,
        });
        let mut engine = Engine::new(client, worker).with_options(options);
        let handle = engine.handle();
        let token = shutdown.register(name);

        tokio::spawn({
            let token = token.clone();
            let handle = handle.clone();
            async move {
                token.wait_for_shutdown().await;
                handle.set_running(false);
            }
        });

        runs.push(tokio::spawn(async move {
            let result = engine.run().await;
            if let Err(e) = &result {
                error!(consumer = token.name(), error = %e, "consumer failed");
                token.trigger_shutdown();
            }
            token.complete();
            result
        }));
        handles.push(handle);
    }
    info!(
        stream = %consumer_config.stream,
        workers = handles.len(),
        "consuming"
    );

    let mut hangups = Hangups::new()?;
    // registered once so a stop signal arriving while a hangup is handled is not lost
    let stop = wait_for_signal();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            signal = &mut stop => {
                signal?;
                shutdown.shutdown();
                break;
            }
            _ = shutdown.wait_for_shutdown() => break,
            Some(()) = hangups.recv() => request_catchup(&handles),
        }
    }

    shutdown.join().await;
    for run in runs {
        run.await??;
    }
    Ok(())
}

/// Make every group consumer replay its whole backlog
fn request_catchup(handles: &[EngineHandle]) {
    for handle in handles {
        if let Err(e) = handle.request_catchup(EntryId::origin()) {
            warn!(error = %e, "cannot catch up");
        }
    }
}
