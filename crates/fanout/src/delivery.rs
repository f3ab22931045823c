//! OutputSlot - one output registration with its private queue and delivery task

use std::sync::Arc;

use contracts::{DataBlock, OutputConnection};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument};

use crate::engine::EngineHandle;
use crate::metrics::DeliveryMetrics;

/// Per-output queue capacity
pub const OUTPUT_QUEUE_CAPACITY: usize = 256;

/// Live registration owned by the engine loop
pub(crate) struct OutputSlot {
    output: Arc<dyn OutputConnection>,
    tx: mpsc::Sender<DataBlock>,
    metrics: Arc<DeliveryMetrics>,
    /// Per-output scope, child of the flow scope
    cancel: CancellationToken,
}

impl OutputSlot {
    /// Create the slot and spawn its delivery task on `tracker`
    pub fn spawn(
        key: u64,
        output: Arc<dyn OutputConnection>,
        engine: EngineHandle,
        tracker: &TaskTracker,
    ) -> Self {
        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
        let metrics = Arc::new(DeliveryMetrics::new());
        let cancel = engine.cancellation().child_token();

        tracker.spawn(delivery_worker(
            key,
            Arc::clone(&output),
            rx,
            Arc::clone(&metrics),
            engine,
            cancel.clone(),
        ));

        Self {
            output,
            tx,
            metrics,
            cancel,
        }
    }

    pub fn output(&self) -> &Arc<dyn OutputConnection> {
        &self.output
    }

    pub fn metrics(&self) -> &Arc<DeliveryMetrics> {
        &self.metrics
    }

    /// Enqueue one reference without blocking
    ///
    /// Returns false if the block was dropped for this output.
    pub fn offer(&self, block: DataBlock) -> bool {
        match self.tx.try_send(block) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(OUTPUT_QUEUE_CAPACITY - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.inc_dropped_count();
                false
            }
            // Delivery task already evicting itself
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl Drop for OutputSlot {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Delivery task: writes queued blocks in order until cancelled or a write fails
#[instrument(
    name = "output_delivery_loop",
    skip(output, rx, metrics, engine, cancel),
    fields(flow = %engine.identifier(), output = %output.describe())
)]
async fn delivery_worker(
    key: u64,
    output: Arc<dyn OutputConnection>,
    mut rx: mpsc::Receiver<DataBlock>,
    metrics: Arc<DeliveryMetrics>,
    engine: EngineHandle,
    cancel: CancellationToken,
) {
    debug!(key, "Delivery task started");

    loop {
        let block = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            block = rx.recv() => match block {
                Some(block) => block,
                None => break,
            },
        };
        metrics.set_queue_len(rx.len());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = output.write(&block) => result,
        };
        drop(block);

        match result {
            Ok(written) => metrics.record_write(written),
            Err(e) => {
                metrics.inc_failure_count();
                error!(key, error = %e, "Error writing to output, evicting");
                engine.remove_key(key).await;
                break;
            }
        }
    }

    // Release every reference still queued
    rx.close();
    let mut discarded = 0usize;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    metrics.set_queue_len(0);

    debug!(key, discarded, "Delivery task stopped");
}
