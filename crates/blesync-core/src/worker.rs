//! The task that owns the transport, and the serialization gate

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{GattError, Result};
use crate::events::EventSink;
use crate::transport::GattTransport;
use crate::types::PeripheralAddress;

// ----------------------------------------------------------------------------
// Serialization Gate
// ----------------------------------------------------------------------------

/// Lock that keeps at most one GATT operation outstanding
///
/// Peripherals created with clones of the same gate are serialized against each
/// other; [`crate::PeripheralRegistry`] hands one gate to all of its peripherals.
#[derive(Debug, Clone, Default)]
pub struct SerialGate {
    lock: Arc<Mutex<()>>,
}

impl SerialGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    pub fn is_held(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

// ----------------------------------------------------------------------------
// Transport Worker
// ----------------------------------------------------------------------------

type Job = Box<dyn FnOnce(&mut dyn GattTransport) + Send>;

/// Submission side of the task that owns a transport
///
/// Jobs run one at a time in submission order on the worker task; this is the only
/// place transport methods are called. The task exits once every sender is dropped.
#[derive(Debug, Clone)]
pub struct TransportWorker {
    jobs: mpsc::UnboundedSender<Job>,
}

/// Receiving side of a [`TransportWorker`], consumed by [`JobQueue::run`]
pub struct JobQueue {
    jobs: mpsc::UnboundedReceiver<Job>,
}

impl JobQueue {
    /// Attach `sink` to `transport`, then execute submitted jobs until every
    /// [`TransportWorker`] handle is dropped
    pub async fn run(
        mut self,
        address: PeripheralAddress,
        mut transport: Box<dyn GattTransport>,
        sink: EventSink,
    ) {
        transport.attach(sink);
        info!(%address, "Transport worker started");

        while let Some(job) = self.jobs.recv().await {
            job(transport.as_mut());
        }

        debug!(%address, "Transport worker stopped");
    }
}

impl TransportWorker {
    pub fn new() -> (Self, JobQueue) {
        let (jobs, job_rx) = mpsc::unbounded_channel();
        (Self { jobs }, JobQueue { jobs: job_rx })
    }

    /// Run `call` against the transport and return its result once it was issued
    pub async fn call<R, F>(&self, call: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn GattTransport) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |transport| {
            let _ = reply_tx.send(call(transport));
        });

        self.jobs.send(job).map_err(|_| GattError::WorkerStopped)?;
        reply_rx.await.map_err(|_| GattError::WorkerStopped)
    }

    pub fn is_running(&self) -> bool {
        !self.jobs.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::{ScriptedTransport, TransportCall};

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let (worker, jobs) = TransportWorker::new();
        let (transport, script) = ScriptedTransport::new(Vec::new());
        let sink = EventSink::new(std::sync::Weak::new());
        tokio::spawn(jobs.run("00:00:00:00:00:01".into(), Box::new(transport), sink));

        let first = worker.call(|transport| transport.read_signal_strength());
        let second = worker.call(|transport| transport.disconnect());
        let (first, second) = tokio::join!(first, second);
        assert!(first.unwrap().is_ok());
        assert!(second.unwrap().is_ok());

        let calls = script.calls();
        assert_eq!(
            calls,
            vec![TransportCall::ReadSignalStrength, TransportCall::Disconnect]
        );
        assert!(worker.is_running());
    }

    #[tokio::test]
    async fn test_call_fails_after_worker_exit() {
        let (worker, jobs) = TransportWorker::new();
        drop(jobs);

        let result = worker.call(|_| ()).await;
        assert_eq!(result, Err(GattError::WorkerStopped));
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_gate_is_exclusive() {
        let gate = SerialGate::new();
        let shared = gate.clone();

        let guard = gate.acquire().await;
        assert!(shared.is_held());
        drop(guard);
        assert!(!shared.is_held());
    }
}
