use crate::config::PipelineConfig;
use crate::operations::{UploadFileOperation, UploadOptions};
use crate::scanner::Scanner;
use crate::storage::DynStorageGateway;
use crate::tracking::InFlightRegistry;
use crate::worker_pool::{OutcomeSummary, WorkerPool};
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub submitted: usize,
    pub scan_errors: usize,
    pub outcomes: OutcomeSummary,
}

/// Scanner plus worker pool sharing one in-flight registry and one queue.
pub struct Pipeline {
    config: PipelineConfig,
    gateway: DynStorageGateway,
    in_flight: InFlightRegistry,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, gateway: DynStorageGateway) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            gateway,
            in_flight: InFlightRegistry::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle onto the registry, for observing what is currently in flight.
    pub fn in_flight(&self) -> InFlightRegistry {
        self.in_flight.clone()
    }

    /// Scan until `shutdown` resolves, then close the queue and wait for the
    /// workers to finish what was already handed to them.
    pub async fn run<F>(self, shutdown: F) -> PipelineReport
    where
        F: Future<Output = ()>,
    {
        let Pipeline {
            config,
            gateway,
            in_flight,
        } = self;

        let (sender, receiver) = async_channel::unbounded();
        let operation = Arc::new(UploadFileOperation::new(
            gateway,
            UploadOptions {
                delete_after_upload: config.delete_after_upload,
                extra_metadata: config.extra_metadata.clone(),
                retry: config.retry.clone(),
            },
        ));
        let pool = WorkerPool::spawn(config.concurrency, receiver, operation);
        let mut scanner = Scanner::new(&config, in_flight.clone(), sender.clone());

        tracing::info!(
            "Scanning {} every {:?} (quiet={:?}, workers={}, delete_after_upload={})",
            config.watch_root.display(),
            config.scan_interval,
            config.quiet_period,
            pool.size(),
            config.delete_after_upload
        );

        let mut interval = tokio::time::interval(config.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut report = PipelineReport::default();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
            }

            report.ticks += 1;
            match scanner.tick().await {
                Ok(tick) => {
                    report.submitted += tick.submitted;
                    report.scan_errors += tick.errors;
                }
                Err(error) => {
                    report.failed_ticks += 1;
                    tracing::error!("Scanner error: {}", error);
                }
            }
        }

        tracing::info!(
            "Shutdown requested; waiting for {} queued or in-flight uploads",
            in_flight.len()
        );
        sender.close();
        drop(scanner);

        report.outcomes = pool.join().await;
        tracing::info!(
            "Pipeline stopped ticks={} submitted={} delivered={} retained={} mismatched={} failed={}",
            report.ticks,
            report.submitted,
            report.outcomes.delivered_and_deleted,
            report.outcomes.delivered_but_retained,
            report.outcomes.verification_mismatch,
            report.outcomes.transport_error
        );
        report
    }
}
