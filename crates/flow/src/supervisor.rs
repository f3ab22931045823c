//! Supervisor - maps a whole configuration onto the running flows
//!
//! Owns the flow registry, the applied configuration snapshot, the
//! telemetry settings and the status endpoint. One reconciliation pass runs
//! at a time.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use contracts::{FlowStatus, HealthState, RelayConfig, TelemetryConfig};
use config_loader::ConfigLoader;
use observability::Measurements;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::{FlowError, Result};
use crate::flow::{Flow, FlowDeps};
use crate::http::HttpServer;

/// Bound on waiting for a flow removed by reload
pub const FLOW_REMOVE_WAIT: Duration = Duration::from_millis(500);

/// Bound on waiting for each flow at shutdown
pub const SHUTDOWN_WAIT: Duration = Duration::from_secs(1);

/// Aggregate status of every flow
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status: HealthState,
    #[serde(rename = "OK")]
    pub ok: bool,
    pub flows: BTreeMap<String, FlowStatus>,
}

/// Running flows, readable without the reconcile lock
#[derive(Default)]
pub struct FlowRegistry {
    flows: RwLock<BTreeMap<String, Arc<Flow>>>,
}

impl FlowRegistry {
    pub fn get(&self, identifier: &str) -> Option<Arc<Flow>> {
        self.flows.read().get(identifier).cloned()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.flows.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.flows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.read().is_empty()
    }

    fn insert(&self, flow: Arc<Flow>) {
        self.flows.write().insert(flow.identifier().to_string(), flow);
    }

    fn remove(&self, identifier: &str) -> Option<Arc<Flow>> {
        self.flows.write().remove(identifier)
    }

    fn drain(&self) -> Vec<Arc<Flow>> {
        std::mem::take(&mut *self.flows.write()).into_values().collect()
    }

    /// Status of every flow; NOT-OK if any flow is NOT-OK
    pub fn status_report(&self) -> StatusReport {
        let flows: Vec<Arc<Flow>> = self.flows.read().values().cloned().collect();
        let flows: BTreeMap<String, FlowStatus> = flows
            .iter()
            .map(|flow| (flow.identifier().to_string(), flow.status()))
            .collect();
        let ok = flows.values().all(FlowStatus::ok);
        StatusReport {
            status: if ok { HealthState::Ok } else { HealthState::NotOk },
            ok,
            flows,
        }
    }
}

#[derive(Default)]
struct SupervisorState {
    running: Option<RelayConfig>,
    telemetry: Option<TelemetryConfig>,
    http: Option<HttpServer>,
    /// Last pass failed part-way; `running` no longer describes the flows
    diverged: bool,
    shut_down: bool,
}

/// Top-level reconciler
pub struct Supervisor {
    deps: FlowDeps,
    cancel: CancellationToken,
    registry: Arc<FlowRegistry>,
    state: tokio::sync::Mutex<SupervisorState>,
}

impl Supervisor {
    pub fn new(deps: FlowDeps) -> Self {
        Self {
            deps,
            cancel: CancellationToken::new(),
            registry: Arc::new(FlowRegistry::default()),
            state: tokio::sync::Mutex::new(SupervisorState::default()),
        }
    }

    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.registry
    }

    pub fn flow(&self, identifier: &str) -> Option<Arc<Flow>> {
        self.registry.get(identifier)
    }

    pub fn status_report(&self) -> StatusReport {
        self.registry.status_report()
    }

    /// Last successfully applied configuration
    pub async fn running_config(&self) -> Option<RelayConfig> {
        self.state.lock().await.running.clone()
    }

    /// Bound address of the status endpoint
    pub async fn http_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.http.as_ref().map(HttpServer::local_addr)
    }

    /// Validate and apply a configuration
    ///
    /// An invalid configuration is rejected without touching the running
    /// flows. A failure while applying stops the pass; what was applied so
    /// far stays in place, the previous snapshot is kept, and the next apply
    /// reconciles even when it matches that snapshot.
    #[instrument(name = "supervisor_apply", skip(self, config), fields(config = %config.identifier))]
    pub async fn apply(&self, config: RelayConfig) -> Result<()> {
        if let Err(e) = ConfigLoader::validate(&config) {
            observability::record_reconcile("rejected");
            error!(error = %e, "Failed to validate config, not applying");
            return Err(FlowError::Validation(e));
        }

        let mut state = self.state.lock().await;
        if state.shut_down {
            return Err(FlowError::ShutDown);
        }
        if !state.diverged && state.running.as_ref() == Some(&config) {
            info!("Config unchanged");
            return Ok(());
        }

        let result = self.reconcile(&mut state, &config).await;
        observability::set_active_flows(self.registry.len());
        match &result {
            Ok(()) => {
                observability::record_reconcile("ok");
                info!(flows = self.registry.len(), "Config applied");
                state.running = Some(config);
                state.diverged = false;
            }
            Err(e) => {
                observability::record_reconcile("error");
                state.diverged = true;
                error!(error = %e, "Error applying config");
            }
        }
        result
    }

    async fn reconcile(&self, state: &mut SupervisorState, config: &RelayConfig) -> Result<()> {
        self.reconcile_telemetry(state, config.telemetry.as_ref())?;
        self.reconcile_http(state, config.listen_http.as_deref()).await?;

        // Removed flows go first, they may hold sockets the others need
        let wanted: HashSet<&str> = config.flows.iter().map(|f| f.identifier.as_str()).collect();
        for identifier in self.registry.identifiers() {
            if wanted.contains(identifier.as_str()) {
                continue;
            }
            if let Some(flow) = self.registry.remove(&identifier) {
                info!(flow = %identifier, "Removing flow");
                flow.stop().await;
                flow.wait(FLOW_REMOVE_WAIT).await;
            }
        }

        for flow_config in &config.flows {
            match self.registry.get(&flow_config.identifier) {
                Some(flow) => flow.update_config(flow_config.clone()).await?,
                None => {
                    let flow = Flow::create(&self.cancel, flow_config.clone(), self.deps.clone()).await?;
                    self.registry.insert(Arc::new(flow));
                }
            }
        }
        Ok(())
    }

    fn reconcile_telemetry(
        &self,
        state: &mut SupervisorState,
        telemetry: Option<&TelemetryConfig>,
    ) -> Result<()> {
        if state.telemetry.as_ref() == telemetry {
            return Ok(());
        }
        match telemetry {
            Some(t) => {
                let listen: SocketAddr = t
                    .listen
                    .parse()
                    .map_err(|e| FlowError::Telemetry(format!("invalid listen address '{}': {e}", t.listen)))?;
                observability::install_prometheus(listen)
                    .map_err(|e| FlowError::Telemetry(e.to_string()))?;
                self.deps.measurements.set(Measurements {
                    stream: t.stream_measurement.clone(),
                    input: t.input_measurement.clone(),
                    asi: t.asi_measurement.clone(),
                });
            }
            None => {
                warn!("Telemetry section removed; the exporter keeps serving until restart");
                self.deps.measurements.set(Measurements::default());
            }
        }
        state.telemetry = telemetry.cloned();
        Ok(())
    }

    async fn reconcile_http(&self, state: &mut SupervisorState, listen: Option<&str>) -> Result<()> {
        let current = state.http.as_ref().map(|h| h.listen());
        if current == listen {
            return Ok(());
        }
        if let Some(server) = state.http.take() {
            server.shutdown().await;
        }
        if let Some(listen) = listen {
            let server = HttpServer::start(listen, Arc::clone(&self.registry), self.cancel.child_token()).await?;
            state.http = Some(server);
        }
        Ok(())
    }

    /// Stop every flow, wait for each concurrently, then stop the endpoint
    #[instrument(name = "supervisor_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.shut_down {
            return;
        }
        state.shut_down = true;

        let mut waits = JoinSet::new();
        for flow in self.registry.drain() {
            waits.spawn(async move {
                flow.stop().await;
                flow.wait(SHUTDOWN_WAIT).await
            });
        }
        let mut timed_out = 0usize;
        while let Some(done) = waits.join_next().await {
            if !matches!(done, Ok(true)) {
                timed_out += 1;
            }
        }
        if timed_out > 0 {
            warn!(timed_out, "Some flows did not finish cleanup");
        }

        if let Some(server) = state.http.take() {
            server.shutdown().await;
        }
        self.cancel.cancel();
        observability::set_active_flows(0);
        info!("Shutdown complete");
    }
}
