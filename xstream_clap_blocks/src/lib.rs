//! Building blocks for [`clap`]-driven configuration options.
pub mod consumer;
pub mod logging;
pub mod redis;
pub mod tokio;
