//! Worker threads executing inbound calls.
//!
//! Up to `capacity` workers are kept idle between jobs. When none is idle a
//! new worker is spawned, so a call is never queued behind another call; this
//! is what lets a call whose method calls back into the peer make progress
//! while older calls are blocked.

use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::Shared;
use super::InboundCall;
use crate::error::{RpcError, RpcResult};

/// A call plus the connection it arrived on.
pub(crate) struct Job {
    pub(crate) conn: Arc<Shared>,
    pub(crate) call: InboundCall,
}

struct PoolState {
    idle: usize,
    spawned: u64,
    /// `None` once the connection is torn down
    tx: Option<Sender<Job>>,
}

pub(crate) struct WorkerPool {
    capacity: usize,
    name: String,
    rx: Receiver<Job>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    pub(crate) fn new(capacity: usize, name: String) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            capacity,
            name,
            rx,
            state: Mutex::new(PoolState {
                idle: 0,
                spawned: 0,
                tx: Some(tx),
            }),
        }
    }

    /// Hand `job` to an idle worker, spawning one if needed.
    pub(crate) fn dispatch(&self, job: Job) -> RpcResult<()> {
        let mut state = self.state.lock();
        let Some(tx) = state.tx.clone() else {
            return Err(RpcError::connection("worker pool is shut down"));
        };

        if state.idle > 0 {
            state.idle -= 1;
        } else {
            state.spawned += 1;
            let rx = self.rx.clone();
            thread::Builder::new()
                .name(format!("{}-{}", self.name, state.spawned))
                .spawn(move || worker_loop(&rx))?;
            trace!(pool = %self.name, workers = state.spawned, "spawned worker");
        }

        tx.send(job)
            .map_err(|e| RpcError::connection(format!("worker pool is shut down: {e}")))
    }

    /// Called by a worker after a job; `false` tells it to exit.
    fn check_in(&self) -> bool {
        let mut state = self.state.lock();
        if state.tx.is_none() || state.idle >= self.capacity {
            return false;
        }
        state.idle += 1;
        true
    }

    /// Stop accepting jobs. Idle workers exit once the queue drains.
    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.tx = None;
        state.idle = 0;
    }

    pub(crate) fn idle(&self) -> usize {
        self.state.lock().idle
    }
}

fn worker_loop(rx: &Receiver<Job>) {
    while let Ok(Job { conn, call }) = rx.recv() {
        conn.serve(call);
        if !conn.pool.check_in() {
            break;
        }
    }
    debug!("worker exiting");
}
