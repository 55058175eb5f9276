use std::{str::FromStr, sync::Arc};

use xstream_client::{BrokerError, RedisBroker, StreamClient};

/// Consumer name used for commands that act on a group as a whole
pub(crate) const CLI_CONSUMER: &str = "xstream-cli";

/// Open a dedicated broker connection.
///
/// Blocking reads hold their connection until they return, so every engine gets its own.
pub(crate) async fn connect(redis_url: &str) -> Result<StreamClient, BrokerError> {
    let broker = RedisBroker::connect(redis_url).await?;
    Ok(StreamClient::new(Arc::new(broker)))
}

/// A clap argument provided as a list of items separated by `SEPARATOR`, which by default is a ','
#[derive(Debug, Clone)]
pub(crate) struct SeparatedList<T, const SEPARATOR: char = ','>(pub(crate) Vec<T>);

impl<T, const SEPARATOR: char> FromStr for SeparatedList<T, SEPARATOR>
where
    T: FromStr<Err: Into<anyhow::Error>>,
{
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(
            s.split(SEPARATOR)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<T>().map_err(Into::into))
                .collect::<Result<Vec<T>, Self::Err>>()?,
        ))
    }
}

impl<T, const SEPARATOR: char> IntoIterator for SeparatedList<T, SEPARATOR> {
    type Item = T;

    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
