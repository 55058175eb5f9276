use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use xstream_client::{AnonymousCatchupError, Cursor, EntryId, ReadMode, ReadRequest, StreamClient};

use crate::{BatchReport, Error, Result, Worker, batch};

/// Tuning knobs of an [`Engine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Wait this long after every batch read in catch-up mode before reading the next one
    pub catchup_pause: Option<Duration>,
}

#[derive(Debug)]
struct Shared {
    running: AtomicBool,
    stopped: Notify,
    pending_catchup: Mutex<Option<EntryId>>,
    /// Copy of the engine's request as of the last completed start or step
    request: Mutex<Option<ReadRequest>>,
}

/// Controls a running [`Engine`] from other tasks, e.g. a signal handler.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(true),
                stopped: Notify::new(),
                pending_catchup: Mutex::new(None),
                request: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Clearing the flag makes the engine return once the batch in flight has settled.
    pub fn set_running(&self, running: bool) {
        self.shared.running.store(running, Ordering::Release);
        if !running {
            self.shared.stopped.notify_waiters();
        }
    }

    /// Replay this consumer's pending entries after `position`, starting with the next read.
    ///
    /// Takes effect at the end of the batch in flight. A later request replaces an earlier one
    /// that was not applied yet. Refused for engines that read without a consumer group.
    pub fn request_catchup(&self, position: impl Into<EntryId>) -> Result<()> {
        if let Some(request) = self.shared.request.lock().as_ref().filter(|r| !r.is_group()) {
            return Err(AnonymousCatchupError {
                stream: request.stream().to_string(),
            }
            .into());
        }

        *self.shared.pending_catchup.lock() = Some(position.into());
        Ok(())
    }

    /// The engine's current request, or `None` before it was started
    pub fn read_request(&self) -> Option<ReadRequest> {
        self.shared.request.lock().clone()
    }

    fn take_pending_catchup(&self) -> Option<EntryId> {
        self.shared.pending_catchup.lock().take()
    }

    fn publish(&self, request: &ReadRequest) {
        *self.shared.request.lock() = Some(request.clone());
    }
}

/// Drives one [`Worker`] over one stream.
///
/// The engine owns its [`ReadRequest`] for the duration of a run. It reads one batch at a time,
/// waits for every item of the batch to settle, and only then moves the cursor and checks the run
/// flag, so stopping never abandons a batch halfway.
#[derive(Debug)]
pub struct Engine {
    client: StreamClient,
    worker: Arc<dyn Worker>,
    options: EngineOptions,
    request: Option<ReadRequest>,
    handle: EngineHandle,
}

impl Engine {
    pub fn new(client: StreamClient, worker: Arc<dyn Worker>) -> Self {
        Self {
            client,
            worker,
            options: EngineOptions::default(),
            request: None,
            handle: EngineHandle::new(),
        }
    }

    pub fn with_options(self, options: EngineOptions) -> Self {
        Self { options, ..self }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn set_running(&self, running: bool) {
        self.handle.set_running(running)
    }

    /// The current request, or `None` before [`start`](Self::start)
    pub fn read_request(&self) -> Option<&ReadRequest> {
        self.request.as_ref()
    }

    /// Start a run and keep stepping until the run flag is cleared.
    ///
    /// The consumer group is bootstrapped even when the flag is already clear. Returns the first
    /// bootstrap or read failure.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        while self.is_running() {
            self.step().await?;
        }

        if let Some(request) = &self.request {
            info!(stream = request.stream(), mode = %request.mode(), "engine stopped");
        }
        Ok(())
    }

    /// Ask the worker for the initial request and bootstrap its consumer group.
    ///
    /// An existing group is fine. Anonymous requests have no group to bootstrap.
    pub async fn start(&mut self) -> Result<()> {
        let request = self.worker.read_request();

        if let Some(group) = request.group_name() {
            match self.client.ensure_group(&request).await {
                Ok(()) => {}
                Err(e) if e.is_group_exists() => {
                    debug!(stream = request.stream(), group, "consumer group already exists");
                }
                Err(e) => return Err(Error::GroupBootstrap(e)),
            }
        }

        info!(
            stream = request.stream(),
            group = request.group_name(),
            consumer = request.consumer_name(),
            mode = %request.mode(),
            "engine started"
        );
        self.handle.publish(&request);
        self.request = Some(request);
        Ok(())
    }

    /// Read and process one batch, then move the cursor.
    pub async fn step(&mut self) -> Result<BatchReport> {
        let Some(request) = self.request.as_mut() else {
            return Err(Error::NotStarted);
        };

        let mut report = BatchReport::new(request.mode());
        let items = self.client.read(request).await.map_err(Error::Read)?;
        report.read = items.len();

        let last = items.last().map(|item| item.id.clone());
        for outcome in batch::process(&self.client, &self.worker, request, items).await {
            report.record(&outcome);
        }

        batch::advance(request, last);
        if let Some(position) = self.handle.take_pending_catchup() {
            match request.set_cursor(Cursor::from(position)) {
                Ok(()) => info!(
                    stream = request.stream(),
                    position = %request.cursor(),
                    mode = %request.mode(),
                    "applied catch-up request"
                ),
                Err(e) => warn!(error = %e, "ignoring catch-up request"),
            }
        }
        report.mode_after = request.mode();
        self.handle.publish(request);

        debug!(
            stream = request.stream(),
            read = report.read,
            acknowledged = report.acknowledged,
            left_pending = report.left_pending(),
            mode_before = %report.mode_before,
            mode_after = %report.mode_after,
            "processed batch"
        );

        if let (ReadMode::Catchup, Some(pause)) = (report.mode_before, self.options.catchup_pause) {
            self.pause(pause).await;
        }

        Ok(report)
    }

    /// Sleep for `duration`, or until the run flag is cleared.
    async fn pause(&self, duration: Duration) {
        let stopped = self.handle.shared.stopped.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();

        if !self.is_running() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = stopped => {}
        }
    }
}
