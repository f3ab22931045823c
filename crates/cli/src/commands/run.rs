//! `run` command implementation.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use flow::{FlowDeps, Supervisor};
use ingestion::DatagramReceiverFactory;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::source::ConfigSource;

/// Execute the `run` command
pub async fn run_relay(args: &RunArgs) -> Result<()> {
    let source = ConfigSource::from_args(args)?;
    let config = source.load().context("Failed to load configuration")?;

    let deps = FlowDeps::new(Arc::new(DatagramReceiverFactory::default()))
        .with_stats_interval(Duration::from_secs(args.stats_interval.max(1)));
    let supervisor = Supervisor::new(deps);

    if let Err(e) = supervisor.apply(config).await {
        supervisor.shutdown().await;
        return Err(e).context("Failed to apply initial configuration");
    }
    info!(flows = supervisor.registry().len(), "Relay running");

    let result = wait_for_signals(&supervisor, &source).await;

    supervisor.shutdown().await;
    info!("Relay Gateway finished");
    result.map_err(Into::into)
}

/// Re-read the config source and apply it
///
/// A config that fails to load keeps the running one; a failure while
/// applying keeps whatever was applied.
pub(crate) async fn reload(supervisor: &Supervisor, source: &ConfigSource) {
    if !source.reloadable() {
        warn!("Configuration comes from flags, nothing to reload");
        return;
    }
    info!("Reloading configuration");
    let config = match source.load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to reload config, keeping running config");
            return;
        }
    };
    if let Err(e) = supervisor.apply(config).await {
        error!(error = %e, "Failed to apply reloaded config");
    }
}

#[cfg(unix)]
async fn wait_for_signals(supervisor: &Supervisor, source: &ConfigSource) -> Result<(), CliError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).map_err(|e| CliError::signal("SIGHUP", e))?;
    let mut terminate = signal(SignalKind::terminate()).map_err(|e| CliError::signal("SIGTERM", e))?;

    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.map_err(|e| CliError::signal("SIGINT", e))?;
                warn!("Received SIGINT, shutting down");
                return Ok(());
            }
            _ = terminate.recv() => {
                warn!("Received SIGTERM, shutting down");
                return Ok(());
            }
            _ = hangup.recv() => reload(supervisor, source).await,
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_supervisor: &Supervisor, _source: &ConfigSource) -> Result<(), CliError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::signal("Ctrl+C", e))?;
    warn!("Received Ctrl+C, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestion::MockReceiverFactory;

    const ONE_FLOW: &str = "identifier: gw\nflows:\n  - identifier: a\n    inputs:\n      - url: rist://@0.0.0.0:5000\n";
    const TWO_FLOWS: &str = "identifier: gw\nflows:\n  - identifier: a\n    inputs:\n      - url: rist://@0.0.0.0:5000\n  - identifier: b\n    inputs:\n      - url: rist://@0.0.0.0:5001\n";

    #[tokio::test]
    async fn test_reload_applies_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        std::fs::write(&path, ONE_FLOW).unwrap();

        let source = ConfigSource::File(path.clone());
        let supervisor = Supervisor::new(FlowDeps::new(Arc::new(MockReceiverFactory::new())));
        supervisor.apply(source.load().unwrap()).await.unwrap();
        assert_eq!(supervisor.registry().identifiers(), vec!["a"]);

        std::fs::write(&path, TWO_FLOWS).unwrap();
        reload(&supervisor, &source).await;
        assert_eq!(supervisor.registry().identifiers(), vec!["a", "b"]);

        // a broken file keeps the running flows
        std::fs::write(&path, "identifier: gw\nflows: [").unwrap();
        reload(&supervisor, &source).await;
        assert_eq!(supervisor.registry().identifiers(), vec!["a", "b"]);

        supervisor.shutdown().await;
    }
}
