use crate::operations::{SharedUploadOperation, UploadOutcome, UploadTask};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinHandle;

/// Outcome counts accumulated by every worker in the pool.
#[derive(Debug, Default)]
pub struct OutcomeCounters {
    delivered_and_deleted: AtomicUsize,
    delivered_but_retained: AtomicUsize,
    verification_mismatch: AtomicUsize,
    transport_error: AtomicUsize,
    source_vanished: AtomicUsize,
    panicked: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeSummary {
    pub delivered_and_deleted: usize,
    pub delivered_but_retained: usize,
    pub verification_mismatch: usize,
    pub transport_error: usize,
    pub source_vanished: usize,
    pub panicked: usize,
}

impl OutcomeSummary {
    pub fn total(&self) -> usize {
        self.delivered_and_deleted
            + self.delivered_but_retained
            + self.verification_mismatch
            + self.transport_error
            + self.source_vanished
            + self.panicked
    }
}

impl OutcomeCounters {
    fn record(&self, outcome: &UploadOutcome) {
        let counter = match outcome {
            UploadOutcome::DeliveredAndDeleted { .. } => &self.delivered_and_deleted,
            UploadOutcome::DeliveredButRetained { .. } => &self.delivered_but_retained,
            UploadOutcome::VerificationMismatch { .. } => &self.verification_mismatch,
            UploadOutcome::TransportError { .. } => &self.transport_error,
            UploadOutcome::SourceVanished { .. } => &self.source_vanished,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            delivered_and_deleted: self.delivered_and_deleted.load(Ordering::Relaxed),
            delivered_but_retained: self.delivered_but_retained.load(Ordering::Relaxed),
            verification_mismatch: self.verification_mismatch.load(Ordering::Relaxed),
            transport_error: self.transport_error.load(Ordering::Relaxed),
            source_vanished: self.source_vanished.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Fixed set of workers draining one shared queue. Workers exit once the
/// queue is closed and empty.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    counters: Arc<OutcomeCounters>,
}

impl WorkerPool {
    pub fn spawn(
        concurrency: usize,
        queue: async_channel::Receiver<UploadTask>,
        operation: SharedUploadOperation,
    ) -> Self {
        let counters = Arc::new(OutcomeCounters::default());
        let handles = (0..concurrency.max(1))
            .map(|index| {
                let queue = queue.clone();
                let operation = operation.clone();
                let counters = counters.clone();
                tokio::spawn(run_worker(index + 1, queue, operation, counters))
            })
            .collect();

        Self { handles, counters }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    pub fn summary(&self) -> OutcomeSummary {
        self.counters.summary()
    }

    /// Wait for every worker to finish; the queue must be closed first.
    pub async fn join(self) -> OutcomeSummary {
        for handle in self.handles {
            if let Err(error) = handle.await {
                tracing::error!("Upload worker terminated abnormally: {}", error);
            }
        }
        self.counters.summary()
    }
}

async fn run_worker(
    worker_id: usize,
    queue: async_channel::Receiver<UploadTask>,
    operation: SharedUploadOperation,
    counters: Arc<OutcomeCounters>,
) {
    tracing::debug!("worker-{} started", worker_id);

    while let Ok(task) = queue.recv().await {
        let path = task.path.clone();
        // The task owns the in-flight guard, so unwinding still releases the path.
        match AssertUnwindSafe(operation.run(task)).catch_unwind().await {
            Ok(outcome) => counters.record(&outcome),
            Err(_) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "worker-{} upload panicked path={}; file retained",
                    worker_id,
                    path.display()
                );
            }
        }
    }

    tracing::debug!("worker-{} stopped", worker_id);
}
