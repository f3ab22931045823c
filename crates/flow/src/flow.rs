//! Flow - one input-to-outputs relay unit
//!
//! A flow owns its receiver, its FanoutEngine and the configured input and
//! output handles. Reconfiguration happens in place under the config lock;
//! status reads only take the short status lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    FlowConfig, FlowStatus, OutputConnection, Receiver, ReceiverFactory, ReceiverSettings,
    StatsHandler, StatsRecord,
};
use fanout::{apply_thresholds, EngineHandle, FanoutEngine, OutputBackends, OutputContext};
use observability::{MeasurementNames, StatsReporter};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::error::{FlowError, Result};
use crate::input::{close_input, setup_input, InputHandle};
use crate::output::{close_output, setup_output, OutputHandle};

/// Default period of receiver and stream output stats
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Bound on waiting for the old flow before re-creating it
pub const RESTART_WAIT: Duration = Duration::from_millis(500);

/// Collaborators shared by every flow
#[derive(Clone)]
pub struct FlowDeps {
    pub receivers: Arc<dyn ReceiverFactory>,
    pub backends: OutputBackends,
    pub stats_interval: Duration,
    pub measurements: MeasurementNames,
}

impl FlowDeps {
    pub fn new(receivers: Arc<dyn ReceiverFactory>) -> Self {
        Self {
            receivers,
            backends: OutputBackends::default(),
            stats_interval: DEFAULT_STATS_INTERVAL,
            measurements: MeasurementNames::default(),
        }
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn with_backends(mut self, backends: OutputBackends) -> Self {
        self.backends = backends;
        self
    }
}

/// Stats sink whose reporter can be replaced while outputs hold it
struct FlowStats(RwLock<Arc<StatsReporter>>);

impl FlowStats {
    fn replace(&self, reporter: StatsReporter) {
        *self.0.write() = Arc::new(reporter);
    }
}

impl StatsHandler for FlowStats {
    fn handle_stats(
        &self,
        remote_host: &str,
        output_identifier: &str,
        local_url: Option<&Url>,
        record: StatsRecord,
    ) {
        let reporter = Arc::clone(&self.0.read());
        reporter.handle_stats(remote_host, output_identifier, local_url, record);
    }
}

fn stats_reporter(config: &FlowConfig, deps: &FlowDeps) -> Result<StatsReporter> {
    StatsReporter::new(
        config.identifier.clone(),
        config.stats_stdout,
        config.stats_file.as_deref(),
        deps.measurements.clone(),
    )
    .map_err(|source| FlowError::Stats {
        flow: config.identifier.clone(),
        source,
    })
}

/// What status reads need, swapped on re-creation
struct StatusView {
    engine: EngineHandle,
    minimal_bitrate: u64,
    max_packet_time_ms: u64,
}

/// Everything guarded by the config lock
struct FlowState {
    config: FlowConfig,
    receiver: Arc<dyn Receiver>,
    engine: EngineHandle,
    cancel: CancellationToken,
    tracker: TaskTracker,
    stats: Arc<FlowStats>,
    inputs: HashMap<String, InputHandle>,
    outputs: HashMap<String, OutputHandle>,
    /// Stopped by a re-creation that could not be undone
    failed: bool,
}

impl FlowState {
    #[instrument(name = "flow_build", skip_all, fields(flow = %config.identifier))]
    async fn build(parent: &CancellationToken, config: FlowConfig, deps: &FlowDeps) -> Result<Self> {
        config_loader::validate_flow(&config).map_err(FlowError::Validation)?;
        info!("Setting up flow");
        if config.latency == 0 {
            info!(
                latency_ms = FlowConfig::DEFAULT_LATENCY_MS,
                "Setting latency to default"
            );
        }
        let id = config.identifier.clone();

        let stats = Arc::new(FlowStats(RwLock::new(Arc::new(stats_reporter(&config, deps)?))));
        let receiver = deps
            .receivers
            .create(ReceiverSettings {
                identifier: id.clone(),
                profile: config.profile,
                recovery_latency_ms: config.effective_latency(),
                stats: stats.clone(),
                stats_interval: deps.stats_interval,
            })
            .map_err(|e| FlowError::receiver(&id, e))?;

        let cancel = parent.child_token();
        let tracker = TaskTracker::new();
        let mut inputs = HashMap::new();

        let opened = async {
            receiver.start().await.map_err(|e| FlowError::receiver(&id, e))?;
            for input in &config.inputs {
                let handle = setup_input(&receiver, input).await?;
                inputs.insert(input.url.clone(), handle);
            }
            receiver
                .configure_flow(config.destination_port())
                .await
                .map_err(|e| FlowError::receiver(&id, e))
        }
        .await;
        let receiver_flow = match opened {
            Ok(flow) => flow,
            Err(e) => {
                receiver.destroy().await;
                return Err(e);
            }
        };

        let engine = FanoutEngine::spawn(&id, &receiver_flow, cancel.clone());
        let mut state = Self {
            config,
            receiver,
            engine,
            cancel,
            tracker,
            stats,
            inputs,
            outputs: HashMap::new(),
            failed: false,
        };

        let outputs = state.config.outputs.clone();
        for output in &outputs {
            let ctx = state.output_context(&output.identifier, deps);
            match setup_output(output, &ctx).await {
                Ok(handle) => {
                    state.outputs.insert(output.url.clone(), handle);
                }
                Err(e) => {
                    state.stop().await;
                    state.receiver.destroy().await;
                    return Err(e);
                }
            }
        }
        Ok(state)
    }

    fn output_context(&self, output_identifier: &str, deps: &FlowDeps) -> OutputContext {
        OutputContext {
            flow: self.config.identifier.clone(),
            output_identifier: output_identifier.to_string(),
            engine: self.engine.clone(),
            cancel: self.cancel.clone(),
            tracker: self.tracker.clone(),
            stats: self.stats.clone(),
            stats_interval: deps.stats_interval,
            backends: deps.backends.clone(),
        }
    }

    fn view(&self) -> StatusView {
        StatusView {
            engine: self.engine.clone(),
            minimal_bitrate: self.config.minimal_bitrate,
            max_packet_time_ms: self.config.max_packet_time_ms,
        }
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        for output in self.outputs.values() {
            close_output(output).await;
        }
    }

    /// Best-effort bounded cleanup; false on timeout
    async fn wait(&self, timeout: Duration) -> bool {
        let id = &self.config.identifier;
        if !self.engine.wait(timeout).await {
            warn!(flow = %id, "Mainloop did not stop in time");
        }
        let cleanup = async {
            self.receiver.destroy().await;
            self.tracker.wait().await;
            self.engine.wait_delivery().await;
        };
        match tokio::time::timeout(timeout, cleanup).await {
            Ok(()) => {
                info!(flow = %id, "Cleanup complete");
                true
            }
            Err(_) => {
                warn!(flow = %id, "Cleanup timeout");
                false
            }
        }
    }

    async fn sync_inputs(&mut self, wanted: &FlowConfig) -> Result<()> {
        let keep: HashSet<&str> = wanted.inputs.iter().map(|i| i.url.as_str()).collect();
        let stale: Vec<String> = self
            .inputs
            .keys()
            .filter(|url| !keep.contains(url.as_str()))
            .cloned()
            .collect();
        for url in stale {
            if let Some(input) = self.inputs.remove(&url) {
                close_input(&self.receiver, input).await;
            }
        }
        for input in &wanted.inputs {
            if !self.inputs.contains_key(&input.url) {
                let handle = setup_input(&self.receiver, input).await?;
                self.inputs.insert(input.url.clone(), handle);
            }
        }
        Ok(())
    }

    async fn sync_outputs(&mut self, wanted: &FlowConfig, deps: &FlowDeps) -> Result<()> {
        let keep: HashSet<&str> = wanted.outputs.iter().map(|o| o.url.as_str()).collect();
        let stale: Vec<String> = self
            .outputs
            .keys()
            .filter(|url| !keep.contains(url.as_str()))
            .cloned()
            .collect();
        for url in stale {
            if let Some(output) = self.outputs.remove(&url) {
                info!(output = %output.connection.describe(), "Removing output");
                self.retire_output(&output).await;
            }
        }

        for config in &wanted.outputs {
            match self.outputs.get(&config.url) {
                Some(existing) if existing.config == *config => continue,
                Some(_) => {
                    if let Some(old) = self.outputs.remove(&config.url) {
                        info!(output = %old.connection.describe(), "Output config changed, re-creating");
                        self.retire_output(&old).await;
                    }
                }
                None => {}
            }
            let ctx = self.output_context(&config.identifier, deps);
            let handle = setup_output(config, &ctx).await?;
            self.outputs.insert(config.url.clone(), handle);
        }
        Ok(())
    }

    /// Close the connection and drop its engine registration
    async fn retire_output(&self, output: &OutputHandle) {
        close_output(output).await;
        self.engine.remove_output(Arc::clone(&output.connection)).await;
    }
}

/// One running flow
pub struct Flow {
    identifier: String,
    parent: CancellationToken,
    deps: FlowDeps,
    state: tokio::sync::Mutex<FlowState>,
    view: Mutex<StatusView>,
}

impl Flow {
    /// Validate, start the receiver and inputs, then the engine and outputs
    ///
    /// Any failure aborts creation; whatever was started is torn down again.
    pub async fn create(parent: &CancellationToken, config: FlowConfig, deps: FlowDeps) -> Result<Self> {
        let identifier = config.identifier.clone();
        let state = FlowState::build(parent, config, &deps).await?;
        let view = state.view();
        info!(flow = %identifier, outputs = state.outputs.len(), "Flow running");
        Ok(Self {
            identifier,
            parent: parent.clone(),
            deps,
            state: tokio::sync::Mutex::new(state),
            view: Mutex::new(view),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Engine snapshot with the health thresholds applied
    pub fn status(&self) -> FlowStatus {
        let status = {
            let view = self.view.lock();
            apply_thresholds(
                view.engine.status(),
                view.minimal_bitrate,
                view.max_packet_time_ms,
            )
        };
        observability::record_flow_status(&self.identifier, &status);
        status
    }

    /// Registered engine outputs
    pub fn output_count(&self) -> usize {
        self.view.lock().engine.output_count()
    }

    pub fn engine(&self) -> EngineHandle {
        self.view.lock().engine.clone()
    }

    pub async fn config(&self) -> FlowConfig {
        self.state.lock().await.config.clone()
    }

    pub async fn receiver(&self) -> Arc<dyn Receiver> {
        Arc::clone(&self.state.lock().await.receiver)
    }

    /// Live connection configured for an output URL
    pub async fn output(&self, url: &str) -> Option<Arc<dyn OutputConnection>> {
        let state = self.state.lock().await;
        state.outputs.get(url).map(|o| Arc::clone(&o.connection))
    }

    /// Configured output URLs, sorted
    pub async fn output_urls(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut urls: Vec<_> = state.outputs.keys().cloned().collect();
        urls.sort();
        urls
    }

    /// Cancel the flow scope and close every output without waiting
    pub async fn stop(&self) {
        info!(flow = %self.identifier, "Stopping flow");
        self.state.lock().await.stop().await;
    }

    /// Wait for the engine, receiver and output tasks, bounded by `timeout`
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.state.lock().await.wait(timeout).await
    }

    /// Reconcile the running flow with `config`
    ///
    /// Identity changes (latency, profile, stream id) re-create the flow;
    /// otherwise inputs and outputs are diffed by URL. A failed re-creation
    /// brings the previous settings back up; if that fails too the flow is
    /// left stopped and the next update re-creates it.
    #[instrument(name = "flow_update_config", skip(self, config), fields(flow = %self.identifier))]
    pub async fn update_config(&self, config: FlowConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.config == config && !state.failed {
            return Ok(());
        }
        info!("Updating flow config");
        let result = self.reconcile(&mut state, config).await;
        *self.view.lock() = state.view();
        match &result {
            Ok(()) => info!("Done updating config"),
            Err(e) => error!(error = %e, "Error configuring flow"),
        }
        result
    }

    async fn reconcile(&self, state: &mut FlowState, config: FlowConfig) -> Result<()> {
        config_loader::validate_flow(&config).map_err(FlowError::Validation)?;

        if state.failed || state.config.identity_differs(&config) {
            info!("Receiver settings changed, re-creating");
            observability::record_flow_restart(&self.identifier);
            return self.recreate(state, config).await;
        }

        if state.config.inputs != config.inputs {
            state.sync_inputs(&config).await?;
        }
        state.config.inputs = config.inputs.clone();

        if state.config.outputs != config.outputs {
            state.sync_outputs(&config, &self.deps).await?;
        }
        state.config.outputs = config.outputs.clone();

        if state.config.stats_stdout != config.stats_stdout || state.config.stats_file != config.stats_file {
            let reporter = stats_reporter(&config, &self.deps)?;
            state.stats.replace(reporter);
        }
        state.config = config;
        Ok(())
    }

    async fn recreate(&self, state: &mut FlowState, config: FlowConfig) -> Result<()> {
        let previous = state.config.clone();
        if !state.failed {
            state.stop().await;
            state.wait(RESTART_WAIT).await;
        }
        let err = match FlowState::build(&self.parent, config, &self.deps).await {
            Ok(rebuilt) => {
                *state = rebuilt;
                return Ok(());
            }
            Err(e) => e,
        };

        if !state.failed {
            warn!(error = %err, "Re-creating flow failed, restoring previous settings");
            match FlowState::build(&self.parent, previous, &self.deps).await {
                Ok(restored) => *state = restored,
                Err(e) => {
                    error!(error = %e, "Restoring previous settings failed, flow stopped");
                    state.failed = true;
                }
            }
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{same_output, DataBlock, HealthState, InputConfig, OutputConfig, TransportProfile};
    use ingestion::MockReceiverFactory;
    use tokio::net::UdpSocket;

    struct Fixture {
        factory: Arc<MockReceiverFactory>,
        deps: FlowDeps,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let factory = Arc::new(MockReceiverFactory::new());
            let deps = FlowDeps::new(factory.clone()).with_stats_interval(Duration::from_millis(50));
            Self {
                factory,
                deps,
                cancel: CancellationToken::new(),
            }
        }

        async fn create(&self, config: FlowConfig) -> Flow {
            Flow::create(&self.cancel, config, self.deps.clone()).await.unwrap()
        }
    }

    async fn sink() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let url = format!("udp://{}", socket.local_addr().unwrap());
        (socket, url)
    }

    fn flow_config(id: &str, outputs: &[(&str, &str)]) -> FlowConfig {
        let mut config = FlowConfig::new(id);
        config.inputs.push(InputConfig {
            url: "rist://@127.0.0.1:6000".into(),
        });
        config.outputs = outputs
            .iter()
            .map(|(identifier, url)| OutputConfig {
                identifier: identifier.to_string(),
                url: url.to_string(),
            })
            .collect();
        config
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_create_relays_to_output() {
        let fx = Fixture::new();
        let (socket, url) = sink().await;
        let flow = fx.create(flow_config("a", &[("out", &url)])).await;

        let mock = fx.factory.latest("a").unwrap();
        assert!(mock.is_started());
        assert_eq!(mock.peer_urls().len(), 1);
        assert_eq!(mock.configured_port(), Some(0));
        assert_eq!(mock.settings().recovery_latency_ms, 1000);
        wait_for(|| flow.output_count() == 1).await;

        mock.sender().send(DataBlock::new(vec![0x47u8; 188], 1)).await.unwrap();
        let mut buf = [0u8; 2048];
        let len = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(len, 188);

        let status = flow.status();
        assert_eq!(status.status, HealthState::Ok);
        assert_eq!(status.packet_count, 1);
        assert_eq!(status.output_count, 1);

        flow.stop().await;
        assert!(flow.wait(Duration::from_secs(1)).await);
        assert!(mock.is_destroyed());
    }

    #[tokio::test]
    async fn test_output_diff_keeps_unchanged_connection() {
        let fx = Fixture::new();
        let (_a, url_a) = sink().await;
        let (_b, url_b) = sink().await;
        let (_c, url_c) = sink().await;
        let flow = fx.create(flow_config("f", &[("a", &url_a), ("b", &url_b)])).await;
        let conn_a = flow.output(&url_a).await.unwrap();
        let conn_b = flow.output(&url_b).await.unwrap();

        flow.update_config(flow_config("f", &[("b", &url_b), ("c", &url_c)]))
            .await
            .unwrap();

        let mut expected = vec![url_b.clone(), url_c.clone()];
        expected.sort();
        assert_eq!(flow.output_urls().await, expected);
        assert!(same_output(&conn_b, &flow.output(&url_b).await.unwrap()));
        assert!(matches!(
            conn_a.write(&DataBlock::new(vec![0u8; 4], 0)).await,
            Err(contracts::OutputError::Closed)
        ));
        let mock = fx.factory.latest("f").unwrap();
        assert_eq!(fx.factory.created().len(), 1, "receiver kept");
        assert!(!mock.is_destroyed());

        // A self-evicts on the next block
        mock.sender().send(DataBlock::new(vec![0x47u8; 188], 1)).await.unwrap();
        wait_for(|| flow.output_count() == 2).await;
        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn test_changed_output_config_recreates_connection() {
        let fx = Fixture::new();
        let (_a, url_a) = sink().await;
        let flow = fx.create(flow_config("f", &[("a", &url_a)])).await;
        let before = flow.output(&url_a).await.unwrap();

        flow.update_config(flow_config("f", &[("renamed", &url_a)]))
            .await
            .unwrap();
        let after = flow.output(&url_a).await.unwrap();
        assert!(!same_output(&before, &after));
        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn test_identity_change_recreates_receiver() {
        let fx = Fixture::new();
        let (_a, url_a) = sink().await;
        let config = flow_config("f", &[("a", &url_a)]);
        let flow = fx.create(config.clone()).await;
        let first = fx.factory.latest("f").unwrap();

        // 0 and 1000 are the same effective latency
        let mut same = config.clone();
        same.latency = 1000;
        flow.update_config(same.clone()).await.unwrap();
        assert_eq!(fx.factory.latest("f").unwrap().instance(), first.instance());

        let mut changed = same;
        changed.latency = 2000;
        flow.update_config(changed).await.unwrap();
        let second = fx.factory.latest("f").unwrap();
        assert_ne!(second.instance(), first.instance());
        assert!(first.is_destroyed());
        assert_eq!(second.settings().recovery_latency_ms, 2000);
        assert_eq!(flow.config().await.latency, 2000);
        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn test_failed_recreate_restores_previous_settings() {
        let fx = Fixture::new();
        let (_a, url_a) = sink().await;
        let config = flow_config("f", &[("a", &url_a)]);
        let flow = fx.create(config.clone()).await;
        let first = fx.factory.latest("f").unwrap();

        let mut changed = config.clone();
        changed.latency = 2000;
        changed.outputs.push(OutputConfig {
            identifier: "asi".into(),
            url: "dektecasi://:1?bitrate=1000000".into(),
        });
        let result = flow.update_config(changed).await;
        assert!(matches!(result, Err(FlowError::Output { .. })));
        assert!(first.is_destroyed());

        let restored = fx.factory.latest("f").unwrap();
        assert!(!restored.is_destroyed());
        assert_eq!(restored.settings().recovery_latency_ms, 1000);
        assert_eq!(flow.config().await, config);
        wait_for(|| flow.output_count() == 1).await;
        assert!(flow.status().ok());
        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn test_stopped_flow_recreated_by_next_update() {
        let fx = Fixture::new();
        let config = flow_config("f", &[]);
        let flow = fx.create(config.clone()).await;
        let first = fx.factory.latest("f").unwrap();

        // Neither the new nor the previous settings can be built
        fx.factory.fail_create(true);
        let mut changed = config.clone();
        changed.latency = 2000;
        let result = flow.update_config(changed).await;
        assert!(matches!(result, Err(FlowError::Receiver { .. })));
        assert!(first.is_destroyed());
        assert_eq!(fx.factory.created().len(), 1);

        // Reverting to the config the flow still reports must rebuild it
        fx.factory.fail_create(false);
        flow.update_config(config).await.unwrap();
        let rebuilt = fx.factory.latest("f").unwrap();
        assert_ne!(rebuilt.instance(), first.instance());
        assert!(rebuilt.is_started());
        assert!(!rebuilt.is_destroyed());
        assert_eq!(rebuilt.settings().recovery_latency_ms, 1000);

        rebuilt.sender().send(DataBlock::new(vec![0x47u8; 188], 1)).await.unwrap();
        wait_for(|| flow.status().packet_count == 1).await;
        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn test_removed_output_leaves_engine_without_traffic() {
        let fx = Fixture::new();
        let (_a, url_a) = sink().await;
        let (_b, url_b) = sink().await;
        let flow = fx.create(flow_config("f", &[("a", &url_a), ("b", &url_b)])).await;
        wait_for(|| flow.output_count() == 2).await;

        flow.update_config(flow_config("f", &[("b", &url_b)])).await.unwrap();
        wait_for(|| flow.output_count() == 1).await;
        assert_eq!(flow.status().output_count, 1);
        assert_eq!(flow.status().packet_count, 0);
        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn test_profile_change_sets_destination_port() {
        let fx = Fixture::new();
        let mut config = flow_config("f", &[]);
        config.stream_id = 1234;
        let flow = fx.create(config.clone()).await;
        assert_eq!(fx.factory.latest("f").unwrap().configured_port(), Some(0));

        config.profile = TransportProfile::Main;
        flow.update_config(config).await.unwrap();
        assert_eq!(fx.factory.latest("f").unwrap().configured_port(), Some(1234));
        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn test_input_diff() {
        let fx = Fixture::new();
        let mut config = flow_config("f", &[]);
        let flow = fx.create(config.clone()).await;
        let mock = fx.factory.latest("f").unwrap();

        config.inputs = vec![InputConfig {
            url: "rist://@127.0.0.1:6001".into(),
        }];
        flow.update_config(config).await.unwrap();

        let normalized = |raw: &str| contracts::parse_endpoint_url(raw).unwrap().to_string();
        assert_eq!(mock.peer_urls(), vec![normalized("rist://@127.0.0.1:6001")]);
        assert_eq!(mock.removed_urls(), vec![normalized("rist://@127.0.0.1:6000")]);
        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn test_thresholds_override_status() {
        let fx = Fixture::new();
        let mut config = flow_config("f", &[]);
        let flow = fx.create(config.clone()).await;
        assert!(flow.status().ok());

        config.minimal_bitrate = 500_000;
        config.max_packet_time_ms = 2000;
        flow.update_config(config).await.unwrap();
        assert_eq!(flow.status().status, HealthState::NotOk);
        fx.cancel.cancel();
    }

    #[tokio::test]
    async fn test_failed_output_aborts_create() {
        let fx = Fixture::new();
        let (_a, url_a) = sink().await;
        let config = flow_config(
            "f",
            &[("a", &url_a), ("asi", "dektecasi://:1?bitrate=1000000")],
        );
        let result = Flow::create(&fx.cancel, config, fx.deps.clone()).await;
        assert!(matches!(result, Err(FlowError::Output { .. })));
        assert!(fx.factory.latest("f").unwrap().is_destroyed());
    }

    #[tokio::test]
    async fn test_receiver_create_failure() {
        let fx = Fixture::new();
        fx.factory.fail_create(true);
        let result = Flow::create(&fx.cancel, flow_config("f", &[]), fx.deps.clone()).await;
        assert!(matches!(result, Err(FlowError::Receiver { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let fx = Fixture::new();
        let mut config = flow_config("f", &[]);
        config.inputs.clear();
        let result = Flow::create(&fx.cancel, config, fx.deps.clone()).await;
        assert!(matches!(result, Err(FlowError::Validation(_))));
        assert!(fx.factory.created().is_empty());
    }
}
