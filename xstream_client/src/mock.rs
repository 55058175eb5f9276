//! An in-memory [`Broker`] for tests.
//!
//! [`MockBroker`] records every command it receives along with its arguments, answers reads from
//! a queue of scripted replies, and keeps a set of acknowledged ids so that acknowledging twice
//! behaves like the real broker and reports zero.
use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::broker::{Broker, BrokerError, Command, Reply};

/// A command as received by the [`MockBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub command: Command,
    pub args: Vec<String>,
}

impl Call {
    pub fn new<S: Into<String>>(command: Command, args: impl IntoIterator<Item = S>) -> Self {
        Self {
            command,
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockBroker {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    create_group: VecDeque<Result<Reply, BrokerError>>,
    reads: VecDeque<Result<Reply, BrokerError>>,
    fail_reads_when_drained: bool,
    acknowledged: HashSet<String>,
    failing_acks: HashSet<String>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next `XGROUP CREATE`. Unscripted calls succeed.
    pub fn push_create_group(&self, result: Result<Reply, BrokerError>) {
        self.state.lock().create_group.push_back(result);
    }

    /// Make the next `XGROUP CREATE` fail the way it does for an existing group
    pub fn push_busy_group(&self) {
        self.push_create_group(Err(BrokerError::reply(
            "BUSYGROUP",
            "Consumer Group name already exists",
        )));
    }

    /// Queue the reply for the next read. Unscripted reads return nil, i.e. an empty batch.
    pub fn push_read(&self, reply: Reply) {
        self.state.lock().reads.push_back(Ok(reply));
    }

    /// Queue one batch of entries on `stream` for the next read
    pub fn push_entries(&self, stream: &str, entries: &[(&str, Option<&[&str]>)]) {
        self.push_read(raw_batch(stream, entries));
    }

    pub fn push_read_error(&self, error: BrokerError) {
        self.state.lock().reads.push_back(Err(error));
    }

    /// Once every scripted read was consumed, fail further reads instead of returning nil
    pub fn fail_reads_when_drained(&self) {
        self.state.lock().fail_reads_when_drained = true;
    }

    /// Fail any acknowledgment that includes `id`
    pub fn fail_ack_for(&self, id: &str) {
        self.state.lock().failing_acks.insert(id.to_string());
    }

    /// Every command received so far, in arrival order
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn calls_for(&self, command: Command) -> Vec<Call> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.command == command)
            .cloned()
            .collect()
    }

    /// Ids acknowledged so far, sorted
    pub fn acknowledged(&self) -> Vec<String> {
        let mut ids = self
            .state
            .lock()
            .acknowledged
            .iter()
            .cloned()
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }

    pub fn reads_remaining(&self) -> usize {
        self.state.lock().reads.len()
    }

    fn record(&self, command: Command, args: &[String]) -> parking_lot::MutexGuard<'_, State> {
        let mut state = self.state.lock();
        state.calls.push(Call::new(command, args.iter().cloned()));
        state
    }

    fn next_read(&self, command: Command, args: &[String]) -> Result<Reply, BrokerError> {
        let mut state = self.record(command, args);
        match state.reads.pop_front() {
            Some(result) => result,
            None if state.fail_reads_when_drained => {
                Err(BrokerError::reply("ERR", "connection closed by mock broker"))
            }
            None => Ok(Reply::Nil),
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn create_group(&self, args: &[String]) -> Result<Reply, BrokerError> {
        let mut state = self.record(Command::XGroup, args);
        state
            .create_group
            .pop_front()
            .unwrap_or_else(|| Ok(Reply::Status("OK".to_string())))
    }

    async fn read(&self, args: &[String]) -> Result<Reply, BrokerError> {
        let reply = self.next_read(Command::XRead, args);
        // real reads suspend, so give other tasks a chance to run
        tokio::task::yield_now().await;
        reply
    }

    async fn read_group(&self, args: &[String]) -> Result<Reply, BrokerError> {
        let reply = self.next_read(Command::XReadGroup, args);
        tokio::task::yield_now().await;
        reply
    }

    async fn acknowledge(&self, args: &[String]) -> Result<Reply, BrokerError> {
        let mut state = self.record(Command::XAck, args);
        let ids = args.get(2..).unwrap_or_default();
        if let Some(id) = ids.iter().find(|id| state.failing_acks.contains(*id)) {
            return Err(BrokerError::reply(
                "ERR",
                format!("mock broker refused to acknowledge {id}"),
            ));
        }

        let mut newly_acknowledged = 0;
        for id in ids {
            if state.acknowledged.insert(id.clone()) {
                newly_acknowledged += 1;
            }
        }
        Ok(Reply::Integer(newly_acknowledged))
    }
}

/// Build the reply of a read that returned `entries` from `stream`.
///
/// A `None` field list stands for an entry whose body was trimmed.
pub fn raw_batch(stream: &str, entries: &[(&str, Option<&[&str]>)]) -> Reply {
    let entries = entries
        .iter()
        .map(|(id, fields)| {
            let fields = match fields {
                Some(fields) => Reply::Array(fields.iter().map(|f| Reply::from(*f)).collect()),
                None => Reply::Nil,
            };
            Reply::Array(vec![Reply::from(*id), fields])
        })
        .collect();

    Reply::Array(vec![Reply::Array(vec![
        Reply::from(stream),
        Reply::Array(entries),
    ])])
}
