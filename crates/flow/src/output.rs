//! Output setup dispatch by URL scheme

use std::sync::Arc;

use contracts::{parse_endpoint_url, OutputConfig, OutputConnection};
use fanout::outputs::{setup_stream, AsiOutput, DatagramOutput};
use fanout::{FanoutError, OutputContext};
use tracing::warn;

use crate::error::{FlowError, Result};

/// A configured output: its config snapshot and live connection
#[derive(Clone)]
pub struct OutputHandle {
    pub config: OutputConfig,
    pub connection: Arc<dyn OutputConnection>,
}

impl std::fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputHandle")
            .field("config", &self.config)
            .field("connection", &self.connection.describe())
            .finish()
    }
}

/// Create the output for `config` and let it register with the engine
pub(crate) async fn setup_output(config: &OutputConfig, ctx: &OutputContext) -> Result<OutputHandle> {
    let url = parse_endpoint_url(&config.url).map_err(|source| FlowError::InvalidUrl {
        url: config.url.clone(),
        source,
    })?;

    let connection: std::result::Result<Arc<dyn OutputConnection>, FanoutError> = match url.scheme() {
        "udp" | "rtp" => DatagramOutput::setup(&url, ctx)
            .await
            .map(|o| o as Arc<dyn OutputConnection>),
        "srt" => setup_stream(&url, ctx).await,
        "dektecasi" => AsiOutput::setup(&url, ctx)
            .await
            .map(|o| o as Arc<dyn OutputConnection>),
        other => Err(FanoutError::UnsupportedScheme(other.to_string())),
    };

    match connection {
        Ok(connection) => Ok(OutputHandle {
            config: config.clone(),
            connection,
        }),
        Err(e) => {
            observability::record_output_setup_failure(&ctx.flow, url.scheme());
            Err(FlowError::output(redacted(&config.url), e))
        }
    }
}

/// Close the connection; failures are logged only
pub(crate) async fn close_output(output: &OutputHandle) {
    if let Err(e) = output.connection.close().await {
        warn!(output = %output.connection.describe(), error = %e, "Error closing output");
    }
}

fn redacted(raw: &str) -> String {
    match parse_endpoint_url(raw) {
        Ok(url) => fanout::outputs::redact_url(&url).to_string(),
        Err(_) => raw.to_string(),
    }
}
