//! Correlation of inbound `Return`/`Yield` messages with blocked callers.

use std::collections::HashMap;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{RpcError, RpcResult};
use crate::value::Value;
use crate::wire::CallId;

/// What a blocked caller wakes up with.
#[derive(Debug)]
pub(crate) enum Reply {
    /// Final result of the call
    Return(RpcResult<Value>),
    /// The peer wants the caller's block run
    Yield {
        yield_id: CallId,
        args: RpcResult<Vec<Value>>,
    },
    /// The connection died before a reply arrived
    Closed(RpcError),
}

#[derive(Default)]
struct PendingState {
    waiters: HashMap<CallId, Sender<Reply>>,
    closed: Option<RpcError>,
}

/// One-shot mailboxes keyed by correlation id.
///
/// A caller registers before its request is sent, so a reply can never
/// arrive ahead of its mailbox.
#[derive(Default)]
pub(crate) struct PendingCalls {
    state: Mutex<PendingState>,
}

/// Receiving end of a registered mailbox.
pub(crate) struct Waiter {
    id: CallId,
    rx: Receiver<Reply>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Open a mailbox for `id`; fails once the connection is closed.
    pub(crate) fn register(&self, id: CallId) -> RpcResult<Waiter> {
        let mut state = self.state.lock();
        if let Some(err) = &state.closed {
            return Err(err.clone());
        }
        let (tx, rx) = channel::bounded(1);
        if state.waiters.insert(id, tx).is_some() {
            return Err(RpcError::protocol(format!("{id} is already waiting")));
        }
        Ok(Waiter { id, rx })
    }

    pub(crate) fn cancel(&self, id: CallId) {
        self.state.lock().waiters.remove(&id);
    }

    /// Hand `reply` to the caller waiting on `id`.
    ///
    /// The mailbox is consumed; returns `false` if nobody was waiting.
    pub(crate) fn deliver(&self, id: CallId, reply: Reply) -> bool {
        let tx = self.state.lock().waiters.remove(&id);
        tx.is_some_and(|tx| tx.send(reply).is_ok())
    }

    /// Fail every outstanding and future registration with `err`.
    pub(crate) fn close(&self, err: &RpcError) -> usize {
        let waiters = {
            let mut state = self.state.lock();
            state.closed.get_or_insert_with(|| err.clone());
            std::mem::take(&mut state.waiters)
        };
        let woken = waiters.len();
        for tx in waiters.into_values() {
            if tx.send(Reply::Closed(err.clone())).is_err() {
                trace!("caller gave up before the connection closed");
            }
        }
        woken
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Waiter {
    /// Block until the reply arrives.
    pub(crate) fn wait(self) -> Reply {
        self.rx.recv().unwrap_or_else(|_| {
            Reply::Closed(RpcError::connection(format!(
                "mailbox for {} dropped without a reply",
                self.id
            )))
        })
    }
}
