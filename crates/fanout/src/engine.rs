//! FanoutEngine - single owner of a flow's live output set
//!
//! One task consumes the receiver's data channel and a single command
//! mailbox. Only that task mutates the output set; everybody else talks to it
//! through [`EngineHandle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{same_output, DataBlock, FlowStatus, OutputConnection, ReceiverFlow};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::delivery::OutputSlot;
use crate::metrics::{DeliveryMetrics, DeliverySnapshot};
use crate::status::{InputStatus, SequenceTracker};

/// Command mailbox capacity
pub const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Minimum spacing of aggregated discontinuity warnings
const DISCONTINUITY_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Requests handled by the engine loop
enum EngineCommand {
    Add(Arc<dyn OutputConnection>),
    RemoveKey(u64),
    Remove(Arc<dyn OutputConnection>),
}

struct EngineShared {
    identifier: String,
    status: Mutex<InputStatus>,
    running: AtomicBool,
    deliveries: Mutex<HashMap<u64, (String, Arc<DeliveryMetrics>)>>,
    loop_tracker: TaskTracker,
    delivery_tracker: TaskTracker,
}

/// Cloneable handle to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    cancel: CancellationToken,
    shared: Arc<EngineShared>,
}

/// Engine entry point
pub struct FanoutEngine;

impl FanoutEngine {
    /// Start the engine loop against a receiver flow
    ///
    /// The loop exits when `cancel` fires or the data channel closes.
    #[instrument(name = "fanout_engine_spawn", skip(flow, cancel))]
    pub fn spawn(identifier: &str, flow: &ReceiverFlow, cancel: CancellationToken) -> EngineHandle {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let shared = Arc::new(EngineShared {
            identifier: identifier.to_string(),
            status: Mutex::new(InputStatus::new()),
            running: AtomicBool::new(true),
            deliveries: Mutex::new(HashMap::new()),
            loop_tracker: TaskTracker::new(),
            delivery_tracker: TaskTracker::new(),
        });
        let handle = EngineHandle {
            tx,
            cancel,
            shared: Arc::clone(&shared),
        };

        let engine_loop = EngineLoop {
            handle: handle.clone(),
            data: flow.data_channel(),
            commands: rx,
            outputs: HashMap::new(),
            next_key: 0,
            sequence: SequenceTracker::new(),
            discontinuities_since_log: 0,
            last_discontinuity_log: None,
        };
        shared.loop_tracker.spawn(engine_loop.run());
        shared.loop_tracker.close();

        handle
    }
}

impl EngineHandle {
    /// Flow identifier
    pub fn identifier(&self) -> &str {
        &self.shared.identifier
    }

    /// Flow scope the engine runs under
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Register an output; false if the engine is gone
    pub async fn add_output(&self, output: Arc<dyn OutputConnection>) -> bool {
        info!(flow = %self.identifier(), output = %output.describe(), "Adding output");
        self.send(EngineCommand::Add(output)).await
    }

    /// Remove an output by identity; false if the engine is gone
    pub async fn remove_output(&self, output: Arc<dyn OutputConnection>) -> bool {
        self.send(EngineCommand::Remove(output)).await
    }

    /// Self-eviction request from a delivery task
    pub(crate) async fn remove_key(&self, key: u64) -> bool {
        self.send(EngineCommand::RemoveKey(key)).await
    }

    async fn send(&self, command: EngineCommand) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(command) => sent.is_ok(),
        }
    }

    /// Point-in-time status; resets the since-last-poll counters
    pub fn status(&self) -> FlowStatus {
        let running = self.is_running();
        self.shared.status.lock().poll(running)
    }

    pub fn output_count(&self) -> usize {
        self.shared.status.lock().output_count
    }

    pub fn packet_count(&self) -> u64 {
        self.shared.status.lock().packet_count
    }

    pub fn discontinuity_count(&self) -> u64 {
        self.shared.status.lock().discontinuity_count
    }

    /// Delivery metrics of every live output, keyed by description
    pub fn delivery_metrics(&self) -> Vec<(String, DeliverySnapshot)> {
        self.shared
            .deliveries
            .lock()
            .values()
            .map(|(name, metrics)| (name.clone(), metrics.snapshot()))
            .collect()
    }

    /// Resolves once the engine loop has exited
    pub async fn wait_stopped(&self) {
        self.shared.loop_tracker.wait().await;
    }

    /// Resolves once the loop has exited and every delivery task finished
    pub async fn wait_delivery(&self) {
        self.shared.loop_tracker.wait().await;
        self.shared.delivery_tracker.wait().await;
    }

    /// Bounded [`Self::wait_stopped`]; false on timeout
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_stopped()).await.is_ok()
    }
}

struct EngineLoop {
    handle: EngineHandle,
    data: async_channel::Receiver<DataBlock>,
    commands: mpsc::Receiver<EngineCommand>,
    outputs: HashMap<u64, OutputSlot>,
    next_key: u64,
    sequence: SequenceTracker,
    discontinuities_since_log: u64,
    last_discontinuity_log: Option<Instant>,
}

impl EngineLoop {
    #[instrument(name = "fanout_engine_loop", skip(self), fields(flow = %self.handle.identifier()))]
    async fn run(mut self) {
        info!("Receiver mainloop started");
        let cancel = self.handle.cancel.clone();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                block = self.data.recv() => match block {
                    Ok(block) => self.on_block(block),
                    Err(_) => {
                        info!("Input data channel closed");
                        break;
                    }
                },
            }
        }

        self.shutdown();
    }

    fn on_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Add(output) => {
                let key = self.next_key;
                self.next_key += 1;
                let tracker = self.handle.shared.delivery_tracker.clone();
                let slot = OutputSlot::spawn(key, output, self.handle.clone(), &tracker);
                self.handle
                    .shared
                    .deliveries
                    .lock()
                    .insert(key, (slot.output().describe(), Arc::clone(slot.metrics())));
                self.outputs.insert(key, slot);
                self.handle.shared.status.lock().output_count = self.outputs.len();
            }
            EngineCommand::RemoveKey(key) => match self.outputs.remove(&key) {
                Some(slot) => {
                    info!(key, output = %slot.output().describe(), "Deleting output");
                    self.forget(key);
                }
                None => error!(key, "Couldn't delete output, not found"),
            },
            EngineCommand::Remove(output) => {
                let found = self
                    .outputs
                    .iter()
                    .find(|(_, slot)| same_output(slot.output(), &output))
                    .map(|(key, _)| *key);
                match found {
                    Some(key) => {
                        self.outputs.remove(&key);
                        info!(key, output = %output.describe(), "Removed output");
                        self.forget(key);
                    }
                    None => debug!(output = %output.describe(), "Output not registered, nothing to remove"),
                }
            }
        }
    }

    fn forget(&mut self, key: u64) {
        self.handle.shared.deliveries.lock().remove(&key);
        self.handle.shared.status.lock().output_count = self.outputs.len();
    }

    fn on_block(&mut self, block: DataBlock) {
        let flow = self.handle.identifier();
        let discontinuity = self.sequence.observe(block.seq(), block.discontinuity());
        if discontinuity {
            self.discontinuities_since_log += 1;
            metrics::counter!("relay_input_discontinuities_total", "flow" => flow.to_string())
                .increment(1);
        }

        let log_due = self
            .last_discontinuity_log
            .is_none_or(|at| at.elapsed() >= DISCONTINUITY_LOG_INTERVAL);
        if self.discontinuities_since_log > 0 && log_due {
            warn!(count = self.discontinuities_since_log, "Discontinuity!");
            self.last_discontinuity_log = Some(Instant::now());
            self.discontinuities_since_log = 0;
        }

        {
            let mut status = self.handle.shared.status.lock();
            if discontinuity {
                status.discontinuity_count += 1;
            }
            status.record_packet(block.len());
        }
        metrics::counter!("relay_input_packets_total", "flow" => flow.to_string()).increment(1);

        self.fan_out(block);
    }

    /// Hand one reference to every output; the engine's own reference is
    /// released when `block` goes out of scope
    fn fan_out(&self, block: DataBlock) {
        if block.is_empty() || self.outputs.is_empty() {
            return;
        }
        let mut dropped = 0u64;
        for slot in self.outputs.values() {
            if !slot.offer(block.clone()) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            metrics::counter!("relay_output_dropped_total", "flow" => self.handle.identifier().to_string())
                .increment(dropped);
        }
    }

    fn shutdown(&mut self) {
        self.handle.shared.running.store(false, Ordering::Release);
        self.commands.close();
        let removed = self.outputs.len();
        self.outputs.clear();
        self.handle.shared.deliveries.lock().clear();
        self.handle.shared.status.lock().output_count = 0;
        self.handle.shared.delivery_tracker.close();
        debug!(removed, "Released outputs");
        info!("Mainloop terminated");
    }
}
