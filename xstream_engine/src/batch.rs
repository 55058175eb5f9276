//! Processing of one read batch: concurrent handling, acknowledgment, and the cursor transition.
use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, warn};
use xstream_client::{Cursor, EntryId, Item, ReadMode, ReadRequest, StreamClient};

use crate::Worker;

/// What happened to a single item of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemOutcome {
    /// The handler approved the item and the broker acknowledged it
    Acknowledged,
    /// The handler approved the item, but the broker did not count it as newly acknowledged
    Unconfirmed,
    /// The handler approved the item of an anonymous read, which has nothing to acknowledge
    Handled,
    /// The handler asked to leave the item pending
    Declined,
    /// The handler returned an error or panicked
    HandlerFault,
    /// The acknowledgment round-trip failed
    AckFailed,
}

/// Summary of one engine iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Items returned by the read
    pub read: usize,
    /// Items acknowledged by this iteration
    pub acknowledged: usize,
    /// Items approved by the handler that the broker did not count, e.g. already acknowledged
    pub unconfirmed: usize,
    /// Items of an anonymous read approved by the handler
    pub handled: usize,
    /// Items the handler left pending
    pub declined: usize,
    pub handler_faults: usize,
    pub ack_failures: usize,
    /// Mode the batch was read in
    pub mode_before: ReadMode,
    /// Mode the next batch will be read in
    pub mode_after: ReadMode,
}

impl BatchReport {
    pub(crate) fn new(mode: ReadMode) -> Self {
        Self {
            read: 0,
            acknowledged: 0,
            unconfirmed: 0,
            handled: 0,
            declined: 0,
            handler_faults: 0,
            ack_failures: 0,
            mode_before: mode,
            mode_after: mode,
        }
    }

    pub(crate) fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Acknowledged => self.acknowledged += 1,
            ItemOutcome::Unconfirmed => self.unconfirmed += 1,
            ItemOutcome::Handled => self.handled += 1,
            ItemOutcome::Declined => self.declined += 1,
            ItemOutcome::HandlerFault => self.handler_faults += 1,
            ItemOutcome::AckFailed => self.ack_failures += 1,
        }
    }

    /// Items that are still pending after this iteration
    pub fn left_pending(&self) -> usize {
        self.declined + self.handler_faults + self.ack_failures
    }
}

/// Hand every item to the worker concurrently and wait for all of them to settle.
///
/// Outcomes are returned in completion order. A fault in one item never affects its siblings.
pub(crate) async fn process(
    client: &StreamClient,
    worker: &Arc<dyn Worker>,
    request: &ReadRequest,
    items: Vec<Item>,
) -> Vec<ItemOutcome> {
    let request = Arc::new(request.clone());
    let mut tasks = JoinSet::new();
    for item in items {
        let client = client.clone();
        let worker = Arc::clone(worker);
        let request = Arc::clone(&request);
        tasks.spawn(async move { process_item(&client, worker.as_ref(), &request, item).await });
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    while let Some(outcome) = tasks.join_next().await {
        match outcome {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                error!(error = %e, "item task did not complete");
                outcomes.push(ItemOutcome::HandlerFault);
            }
        }
    }
    outcomes
}

async fn process_item(
    client: &StreamClient,
    worker: &dyn Worker,
    request: &ReadRequest,
    item: Item,
) -> ItemOutcome {
    let approved = match AssertUnwindSafe(worker.consume(&item)).catch_unwind().await {
        Ok(Ok(approved)) => approved,
        Ok(Err(e)) => {
            error!(stream = %item.stream, id = %item.id, error = ?e, "item handler failed");
            return ItemOutcome::HandlerFault;
        }
        Err(panic) => {
            error!(
                stream = %item.stream,
                id = %item.id,
                panic = panic_message(panic.as_ref()),
                "item handler panicked"
            );
            return ItemOutcome::HandlerFault;
        }
    };

    if !approved {
        return ItemOutcome::Declined;
    }
    if !request.is_group() {
        return ItemOutcome::Handled;
    }

    match client.acknowledge(request, &item).await {
        Ok(0) => {
            warn!(stream = %item.stream, id = %item.id, "entry was not newly acknowledged");
            ItemOutcome::Unconfirmed
        }
        Ok(_) => ItemOutcome::Acknowledged,
        Err(e) => {
            error!(stream = %item.stream, id = %item.id, error = %e, "failed to acknowledge entry");
            ItemOutcome::AckFailed
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Move the cursor after a batch was processed.
///
/// While catching up, the cursor follows the last entry of the batch, and an empty batch means
/// the backlog is drained so the request goes live. Live requests are left alone.
pub(crate) fn advance(request: &mut ReadRequest, last: Option<EntryId>) {
    if request.mode() != ReadMode::Catchup {
        return;
    }

    let cursor = match last {
        Some(id) => Cursor::At(id),
        None => Cursor::Live,
    };
    // only group reads can be in catch-up mode, so this is never refused
    if let Err(e) = request.set_cursor(cursor) {
        warn!(error = %e, "cannot move cursor");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catchup_follows_the_last_entry() {
        let mut request = ReadRequest::group("S", "G", "C").starting_at("0").unwrap();

        advance(&mut request, Some(EntryId::new("1-2")));
        assert_eq!(request.cursor(), &Cursor::At(EntryId::new("1-2")));
        assert_eq!(request.mode(), ReadMode::Catchup);

        advance(&mut request, None);
        assert_eq!(request.cursor(), &Cursor::Live);
        assert_eq!(request.mode(), ReadMode::Live);
    }

    #[test]
    fn live_requests_stay_live() {
        let mut request = ReadRequest::group("S", "G", "C");
        advance(&mut request, Some(EntryId::new("1-2")));
        assert_eq!(request.cursor(), &Cursor::Live);

        let mut request = ReadRequest::anonymous("S");
        advance(&mut request, Some(EntryId::new("1-2")));
        assert_eq!(request.mode(), ReadMode::Live);
    }

    #[test]
    fn report_counts_outcomes() {
        let mut report = BatchReport::new(ReadMode::Live);
        for outcome in [
            ItemOutcome::Acknowledged,
            ItemOutcome::Acknowledged,
            ItemOutcome::Declined,
            ItemOutcome::HandlerFault,
            ItemOutcome::AckFailed,
            ItemOutcome::Unconfirmed,
        ] {
            report.record(&outcome);
        }

        assert_eq!(report.acknowledged, 2);
        assert_eq!(report.unconfirmed, 1);
        assert_eq!(report.left_pending(), 3);
    }
}
