//! Common CLI flags for logging.
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt::writer::BoxMakeWriter, layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Filter used when neither `--log-filter` nor `-v` is given
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to install global log subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Logs: destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogDestination {
    Stdout,
    /// Keeps stdout free for command output
    #[default]
    Stderr,
}

/// Logs: message format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable, single line
    #[default]
    Full,
    /// Human-readable, multi line
    Pretty,
    /// Machine-parseable, one JSON object per line
    Json,
    /// Human-readable, single line, with fewer details
    Compact,
}

/// CLI config for the logging related subset of options.
#[derive(Debug, Clone, clap::Parser)]
pub struct LoggingConfig {
    /// Logs: filter directive
    ///
    /// Configures log severity level filter, by target.
    ///
    /// Simplest options: error, warn, info, debug, trace
    ///
    /// Levels for different modules can be specified. For example
    /// `debug,redis=info` specifies debug logging for all modules
    /// except for the `redis` crate which will only display info level logging.
    ///
    /// Overridden by `-v`.
    #[clap(long = "log-filter", env = "LOG_FILTER", action)]
    pub log_filter: Option<String>,

    /// Logs: filter short-hand
    ///
    /// Convenient way to set log severity level filter.
    /// Overrides `--log-filter`.
    ///
    /// -v   'info'
    ///
    /// -vv  'debug,redis=info'
    ///
    /// -vvv 'trace,redis=info'
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count, verbatim_doc_comment)]
    pub log_verbose_count: u8,

    /// Logs: destination
    #[clap(
        long = "log-destination",
        env = "LOG_DESTINATION",
        default_value_t = LogDestination::default(),
        value_enum,
        action
    )]
    pub log_destination: LogDestination,

    /// Logs: message format
    #[clap(
        long = "log-format",
        env = "LOG_FORMAT",
        default_value_t = LogFormat::default(),
        value_enum,
        action
    )]
    pub log_format: LogFormat,
}

impl LoggingConfig {
    /// The effective filter directive
    pub fn filter_directive(&self) -> &str {
        match self.log_verbose_count {
            0 => self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER),
            1 => "info",
            2 => "debug,redis=info",
            _ => "trace,redis=info",
        }
    }

    pub fn env_filter(&self) -> Result<EnvFilter, Error> {
        let filter = self.filter_directive();
        EnvFilter::try_new(filter).map_err(|source| Error::InvalidFilter {
            filter: filter.to_string(),
            source,
        })
    }

    /// Install the global log subscriber. Fails when one was installed before.
    pub fn install_global_subscriber(&self) -> Result<(), Error> {
        let filter = self.env_filter()?;
        tracing_subscriber::registry()
            .with(self.layer())
            .with(filter)
            .try_init()?;
        Ok(())
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync + 'static> {
        let writer = match self.log_destination {
            LogDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogDestination::Stderr => BoxMakeWriter::new(std::io::stderr),
        };
        let layer = tracing_subscriber::fmt::layer().with_writer(writer);

        match self.log_format {
            LogFormat::Full => layer.boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
        }
    }
}
