//! Bounded inbound queue and the fixed worker pool that drains it.
//!
//! Read pumps submit with [`InboundQueue::submit`], which never waits: when
//! the queue is full the new envelope is dropped. Workers share one
//! receiver and run each task to completion; a panicking task is caught and
//! logged, and its worker moves on to the next one.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use huddle_core::{Envelope, HubError};
use metrics::counter;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::metrics::{INBOUND_DROPS_TOTAL, WORKER_PANICS_TOTAL};

/// One envelope together with the connection it arrived on.
#[derive(Debug)]
pub struct InboundTask {
    /// Parsed client envelope.
    pub envelope: Envelope,
    /// Sender.
    pub connection: Arc<Connection>,
}

/// Processes inbound tasks on a worker.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    /// Handle one task to completion.
    async fn handle(&self, task: InboundTask);
}

/// Producer side of the inbound queue.
#[derive(Clone, Debug)]
pub struct InboundQueue {
    tx: mpsc::Sender<InboundTask>,
}

impl InboundQueue {
    /// Create a queue holding at most `capacity` tasks.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<InboundTask>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting.
    pub fn submit(&self, task: InboundTask) -> huddle_core::Result<()> {
        match self.tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(
                    conn_id = %task.connection.id(),
                    kind = task.envelope.kind.as_str(),
                    "inbound queue full, dropping envelope"
                );
                counter!(INBOUND_DROPS_TOTAL).increment(1);
                Err(HubError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(HubError::ConnectionClosed),
        }
    }

    /// Free slots left in the queue.
    pub fn remaining(&self) -> usize {
        self.tx.capacity()
    }
}

/// Fixed set of workers sharing one inbound receiver.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` workers. They stop when `cancel` fires or every
    /// [`InboundQueue`] has been dropped.
    pub fn spawn(
        size: usize,
        rx: mpsc::Receiver<InboundTask>,
        handler: Arc<dyn InboundHandler>,
        cancel: CancellationToken,
    ) -> Self {
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..size.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                tokio::spawn(run_worker(worker, rx, handler, cancel))
            })
            .collect();
        Self { handles }
    }

    /// Number of workers started.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Join handles, for shutdown.
    pub fn into_handles(self) -> Vec<JoinHandle<()>> {
        self.handles
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<InboundTask>>>,
    handler: Arc<dyn InboundHandler>,
    cancel: CancellationToken,
) {
    debug!(worker, "worker started");
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = async { rx.lock().await.recv().await } => next,
        };
        let Some(task) = next else { break };

        let conn_id = task.connection.id().clone();
        let kind = task.envelope.kind;
        if let Err(panic) = AssertUnwindSafe(handler.handle(task)).catch_unwind().await {
            error!(
                worker,
                conn_id = %conn_id,
                kind = kind.as_str(),
                panic = %panic_message(&*panic),
                "worker task panicked"
            );
            counter!(WORKER_PANICS_TOTAL).increment(1);
        }
    }
    debug!(worker, "worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
