use xstream_clap_blocks::redis::RedisConfig;
use xstream_client::ReadRequest;

use super::common::{CLI_CONSUMER, connect};

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

    /// Stream to create the group on. Created as well if it does not exist.
    #[clap(long = "stream", env = "XSTREAM_STREAM")]
    stream: String,

    /// Name of the consumer group
    #[clap(long = "group", env = "XSTREAM_GROUP")]
    group: String,
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let client = connect(&config.redis_config.redis_url).await?;
    let request = ReadRequest::group(&config.stream, &config.group, CLI_CONSUMER);

    match client.ensure_group(&request).await {
        Ok(()) => println!(
            "created consumer group '{}' on stream '{}'",
            config.group, config.stream
        ),
        Err(e) if e.is_group_exists() => println!("{e}"),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
