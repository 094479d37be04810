//! Runs exchanges on worker threads so the console never blocks on USB.
//!
//! Each submission carries a one-shot completion channel; the worker that performed the I/O
//! settles the exchange and sends it back exactly once. If the worker dies first, the channel
//! closes and the waiter sees [`DispatchError::WorkerLost`].

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::shell::classifier::classify;
use crate::shell::command::Command;
use crate::shell::exchange::{Exchange, ExchangeStatus};
use crate::transport::Instrument;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is shut down")]
    Closed,

    #[error("worker terminated before completing exchange {0}")]
    WorkerLost(u64),

    #[error("failed to spawn dispatcher worker: {0}")]
    Spawn(#[source] std::io::Error),
}

type SharedInstrument = Arc<Mutex<Box<dyn Instrument>>>;

struct Job {
    exchange: Exchange,
    respond_to: oneshot::Sender<Exchange>,
}

pub struct Dispatcher {
    jobs: Option<mpsc::Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    instrument: Option<SharedInstrument>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Take ownership of the connection and start `workers` (at least one) I/O threads.
    pub fn start(instrument: Box<dyn Instrument>, workers: usize) -> Result<Self, DispatchError> {
        let instrument: SharedInstrument = Arc::new(Mutex::new(instrument));
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let count = workers.max(1);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let receiver = Arc::clone(&receiver);
            let instrument = Arc::clone(&instrument);
            let handle = thread::Builder::new()
                .name(format!("tmc-worker-{}", index))
                .spawn(move || worker_loop(index, receiver, instrument))
                .map_err(DispatchError::Spawn)?;
            handles.push(handle);
        }

        Ok(Self {
            jobs: Some(sender),
            workers: handles,
            instrument: Some(instrument),
            next_id: AtomicU64::new(0),
        })
    }

    /// Queue a command. Returns as soon as the job is handed to the pool.
    pub fn submit(&self, command: Command) -> Result<PendingExchange, DispatchError> {
        let jobs = self.jobs.as_ref().ok_or(DispatchError::Closed)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (respond_to, receiver) = oneshot::channel();

        debug!(exchange = id, command = %command, "submitting exchange");
        jobs.send(Job {
            exchange: Exchange::new(id, command),
            respond_to,
        })
        .map_err(|_| DispatchError::Closed)?;

        Ok(PendingExchange { id, receiver })
    }

    /// Stop accepting work, wait for in-flight exchanges, and hand the connection back.
    ///
    /// Returns `None` if the connection was already handed back.
    pub fn shutdown(&mut self) -> Option<Box<dyn Instrument>> {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("dispatcher worker panicked during shutdown");
            }
        }

        let shared = self.instrument.take()?;
        match Arc::try_unwrap(shared) {
            Ok(mutex) => Some(mutex.into_inner()),
            Err(_) => {
                warn!("connection still shared after workers stopped");
                None
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Handle to an exchange that has been submitted but may not have settled yet.
pub struct PendingExchange {
    id: u64,
    receiver: oneshot::Receiver<Exchange>,
}

impl PendingExchange {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the exchange settles.
    pub fn wait(self) -> Result<Exchange, DispatchError> {
        let id = self.id;
        self.receiver
            .blocking_recv()
            .map_err(|_| DispatchError::WorkerLost(id))
    }

    /// Non-blocking check. `Ok(None)` while still pending.
    pub fn try_complete(&mut self) -> Result<Option<Exchange>, DispatchError> {
        match self.receiver.try_recv() {
            Ok(exchange) => Ok(Some(exchange)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(DispatchError::WorkerLost(self.id)),
        }
    }
}

fn worker_loop(index: usize, jobs: Arc<Mutex<mpsc::Receiver<Job>>>, instrument: SharedInstrument) {
    debug!(worker = index, "dispatcher worker started");

    loop {
        // The connection is locked before the queue is released, so exchanges run in
        // submission order no matter how many workers are waiting.
        let (job, mut connection) = {
            let queue = jobs.lock();
            let Ok(job) = queue.recv() else {
                break;
            };
            (job, instrument.lock())
        };
        let Job {
            mut exchange,
            respond_to,
        } = job;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            perform(&mut **connection, &mut exchange);
        }));
        if outcome.is_err() {
            // Dropping `respond_to` unsent tells the waiter the worker was lost.
            error!(exchange = exchange.id(), "transport panicked during exchange");
            continue;
        }

        debug!(exchange = exchange.id(), status = ?exchange.status(), "exchange settled");
        if respond_to.send(exchange).is_err() {
            warn!("exchange settled after its waiter went away");
        }
        drop(connection);
    }

    debug!(worker = index, "dispatcher worker stopped");
}

/// Write the command and, for queries, read the response. A failed write skips the read.
fn perform(instrument: &mut dyn Instrument, exchange: &mut Exchange) {
    let command = exchange.command();

    let result = match instrument.write(command.text()) {
        Ok(()) if command.requires_response() => instrument.read().map(Some),
        Ok(()) => Ok(None),
        Err(err) => Err(err),
    };

    let status = match result {
        Ok(payload) => ExchangeStatus::Succeeded(payload),
        Err(err) => classify(err),
    };
    exchange.settle(status);
}
