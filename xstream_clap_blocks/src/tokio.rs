//! Config for the tokio runtime that drives the consumers.
use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Tokio runtime type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TokioRuntimeType {
    /// Current-thread runtime.
    CurrentThread,

    /// Multi-thread runtime.
    #[default]
    MultiThread,
}

/// CLI config for the tokio IO runtime.
#[derive(Debug, Clone, clap::Parser)]
#[allow(missing_copy_implementations)]
pub struct TokioIoConfig {
    /// Set the maximum number of IO runtime threads to use.
    ///
    /// Defaults to the number of logical cores on the system.
    #[clap(long = "num-io-threads", env = "XSTREAM_NUM_IO_THREADS", action)]
    pub num_threads: Option<NonZeroUsize>,

    /// IO tokio runtime type.
    #[clap(
        long = "io-runtime-type",
        env = "XSTREAM_IO_RUNTIME_TYPE",
        default_value_t = TokioRuntimeType::default(),
        value_enum,
        action
    )]
    pub runtime_type: TokioRuntimeType,

    /// Specifies the limit for additional threads spawned by the IO runtime.
    #[clap(
        long = "io-runtime-max-blocking-threads",
        env = "XSTREAM_IO_RUNTIME_MAX_BLOCKING_THREADS",
        action
    )]
    pub max_blocking_threads: Option<NonZeroUsize>,

    /// Sets a custom timeout for a thread in the blocking pool of the IO runtime.
    #[clap(
        long = "io-runtime-thread-keep-alive",
        env = "XSTREAM_IO_RUNTIME_THREAD_KEEP_ALIVE",
        value_parser = humantime::parse_duration
    )]
    pub thread_keep_alive: Option<Duration>,
}

impl TokioIoConfig {
    /// Creates the tokio runtime builder.
    pub fn builder(&self) -> Result<tokio::runtime::Builder, std::io::Error> {
        self.builder_with_name("IO")
    }

    /// Creates the tokio runtime builder with threads named after `name`.
    pub fn builder_with_name(&self, name: &str) -> Result<tokio::runtime::Builder, std::io::Error> {
        // NOTE: no log macros will work here!
        //
        // The log subscriber is installed once the runtime is up, so use eprintln!() instead.
        let mut builder = match self.runtime_type {
            TokioRuntimeType::CurrentThread => tokio::runtime::Builder::new_current_thread(),
            TokioRuntimeType::MultiThread => {
                let mut builder = tokio::runtime::Builder::new_multi_thread();
                let num_threads = match self.num_threads {
                    None => std::thread::available_parallelism()?,
                    Some(n) => n,
                };
                builder.worker_threads(num_threads.get());
                builder
            }
        };

        builder.enable_time();
        builder.enable_io();

        let thread_counter = Arc::new(AtomicUsize::new(1));
        let name = name.to_owned();
        builder.thread_name_fn(move || {
            format!(
                "xstream tokio {} {}",
                name,
                thread_counter.fetch_add(1, Ordering::SeqCst)
            )
        });

        if let Some(x) = self.max_blocking_threads {
            builder.max_blocking_threads(x.get());
        }

        if let Some(x) = self.thread_keep_alive {
            builder.thread_keep_alive(x);
        }

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;
    use futures::FutureExt;
    use std::{ffi::OsString, future::Future};
    use tokio::net::TcpListener;

    #[test]
    fn test_thread_name() {
        assert_runtime_thread_property(
            TokioIoConfig::parse_from(std::iter::empty::<OsString>())
                .builder()
                .unwrap(),
            || {
                assert_thread_name("xstream tokio IO");
            },
        );
        assert_runtime_thread_property(
            TokioIoConfig::parse_from(["", "--num-io-threads", "2"])
                .builder_with_name("consumers")
                .unwrap(),
            || {
                assert_thread_name("xstream tokio consumers");
            },
        );
    }

    #[test]
    fn test_io() {
        assert_runtime_thread_property_async(
            TokioIoConfig::parse_from(std::iter::empty::<OsString>())
                .builder()
                .unwrap(),
            || async move {
                assert!(is_io_enabled().await);
            },
        );
        assert_runtime_thread_property_async(
            TokioIoConfig::parse_from(["", "--io-runtime-type", "current-thread"])
                .builder()
                .unwrap(),
            || async move {
                assert!(is_io_enabled().await);
            },
        );
    }

    #[track_caller]
    fn assert_runtime_thread_property<F>(builder: tokio::runtime::Builder, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        assert_runtime_thread_property_async(builder, || async move { f() });
    }

    #[track_caller]
    fn assert_runtime_thread_property_async<F, Fut>(mut builder: tokio::runtime::Builder, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rt = builder.build().unwrap();
        rt.block_on(async move {
            tokio::spawn(async move { f().await }).await.unwrap();
        });
    }

    #[track_caller]
    fn assert_thread_name(prefix: &'static str) {
        let thread = std::thread::current();
        let tname = thread.name().expect("thread is named");

        assert!(tname.starts_with(prefix), "Invalid thread name: {tname}",);
    }

    async fn is_io_enabled() -> bool {
        // the only way to tell if IO is enabled is to use it and observe whether tokio panics
        TcpListener::bind("127.0.0.1:0")
            .catch_unwind()
            .await
            .is_ok()
    }
}
