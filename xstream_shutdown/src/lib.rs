//! Manage consumer shutdown
//!
//! A process may run several consumers side by side. When the process is told to stop, e.g.
//! `ctrl+c`, or when one consumer fails, every consumer should finish the batch it is working on
//! and stop before the process exits.
//!
//! # Coordinate shutdown with the [`ShutdownManager`] type
//!
//! Each consumer [`register`][ShutdownManager::register]s to receive a [`ShutdownToken`]. It can
//! [`wait_for_shutdown`][ShutdownToken::wait_for_shutdown] to learn that it should stop, and
//! signals back via [`complete`][ShutdownToken::complete] (or by dropping the token) once it has.
//! A consumer that cannot continue calls [`trigger_shutdown`][ShutdownToken::trigger_shutdown] to
//! stop its siblings as well.
use std::{io, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info};

/// A signal asking the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

/// Wait for a `SIGTERM` or `SIGINT` to stop the process on UNIX systems
#[cfg(unix)]
pub async fn wait_for_signal() -> io::Result<Signal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    let signal = tokio::select! {
        _ = term.recv() => Signal::Terminate,
        _ = int.recv() => Signal::Interrupt,
    };
    info!(?signal, "received stop signal");
    Ok(signal)
}

/// Wait for a `ctrl+c` to stop the process on Windows systems
#[cfg(windows)]
pub async fn wait_for_signal() -> io::Result<Signal> {
    tokio::signal::ctrl_c().await?;
    info!(signal = ?Signal::Interrupt, "received stop signal");
    Ok(Signal::Interrupt)
}

/// Stream of `SIGHUP`s, which ask consumers to replay their pending entries.
#[cfg(unix)]
#[derive(Debug)]
pub struct Hangups {
    signal: tokio::signal::unix::Signal,
}

/// There is no `SIGHUP` outside of UNIX systems, so this never yields.
#[cfg(not(unix))]
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Hangups {}

#[cfg(not(unix))]
impl Hangups {
    pub fn new() -> io::Result<Self> {
        Ok(Self {})
    }

    pub async fn recv(&mut self) -> Option<()> {
        std::future::pending().await
    }
}

#[cfg(unix)]
impl Hangups {
    pub fn new() -> io::Result<Self> {
        let signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;
        Ok(Self { signal })
    }

    /// Wait for the next `SIGHUP`. Returns `None` once no more signals can be received.
    pub async fn recv(&mut self) -> Option<()> {
        let received = self.signal.recv().await;
        if received.is_some() {
            info!("received SIGHUP");
        }
        received
    }
}

/// Coordinate the shutdown of registered consumers
#[derive(Debug, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    consumers: TaskTracker,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer that needs to stop before the process may exit
    ///
    /// The caller must [`complete`][ShutdownToken::complete] or drop the returned token once the
    /// consumer has stopped, otherwise [`join`][Self::join] never returns.
    pub fn register(&self, name: impl Into<String>) -> ShutdownToken {
        let name: Arc<str> = name.into().into();
        let (tx, rx) = oneshot::channel();

        let consumer = Arc::clone(&name);
        self.consumers.spawn(async move {
            // a dropped sender counts as completion
            let _ = rx.await;
            debug!(%consumer, "consumer stopped");
        });

        ShutdownToken {
            name,
            token: self.token.clone(),
            complete_tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Ask every registered consumer to stop
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Future that completes when shutdown was requested, by a signal or by a consumer
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Wait for every registered consumer to signal completion
    ///
    /// No consumers can register once this was called.
    pub async fn join(&self) {
        self.consumers.close();
        self.consumers.wait().await;
        info!("all consumers stopped");
    }
}

/// A token that a consumer obtains via [`register`][ShutdownManager::register]
///
/// This implements [`Clone`] so that the task running the consumer and the task watching for
/// shutdown can each hold a copy.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    name: Arc<str>,
    token: CancellationToken,
    complete_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ShutdownToken {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop every consumer of the process due to some unrecoverable state
    pub fn trigger_shutdown(&self) {
        info!(consumer = %self.name, "consumer triggered shutdown");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Future that completes when the [`ShutdownManager`] that issued this token is shutdown
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Signal back to the [`ShutdownManager`] that the consumer has stopped
    pub fn complete(&self) {
        if let Some(s) = self.complete_tx.lock().take() {
            let _ = s.send(());
        }
    }
}
