use xstream_clap_blocks::redis::RedisConfig;
use xstream_client::{EntryId, ReadRequest};

use super::common::{CLI_CONSUMER, SeparatedList, connect};

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Broker(#[from] xstream_client::BrokerError),

    #[error(transparent)]
    Client(#[from] xstream_client::Error),
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    #[clap(flatten)]
    redis_config: RedisConfig,

    /// Stream the entries belong to
    #[clap(long = "stream", env = "XSTREAM_STREAM")]
    stream: String,

    /// Consumer group to acknowledge the entries for
    #[clap(long = "group", env = "XSTREAM_GROUP")]
    group: String,

    /// Comma separated list of entry ids, acknowledged in the given order
    #[clap(long = "ids", required = true)]
    ids: SeparatedList<EntryId>,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let client = connect(&config.redis_config.redis_url).await?;
    let request = ReadRequest::group(&config.stream, &config.group, CLI_CONSUMER);
    let ids = config.ids.into_iter().collect::<Vec<_>>();

    let acknowledged = client.acknowledge(&request, &ids).await?;
    println!("acknowledged {acknowledged} of {} entries", ids.len());

    Ok(())
}
