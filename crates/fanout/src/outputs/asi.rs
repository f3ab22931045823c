//! Hardware ASI output (`dektecasi://:port?bitrate=N`)
//!
//! One physical port at one fixed bitrate. Writes are blocking driver calls
//! and run on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contracts::{query_param, AsiStats, DataBlock, OutputConnection, OutputError, StatsHandler, StatsRecord};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use url::Url;

use super::OutputContext;
use crate::error::FanoutError;

/// Hardware stats poll period, independent of the global stats interval
pub const ASI_STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Counters read from the driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsiDriverStats {
    pub fifo_bytes: i64,
    pub bytes_written_total: u64,
    /// Bytes written since the previous call
    pub bytes_written: u64,
}

/// Open hardware context for one port
pub trait AsiDriver: Send + Sync {
    /// Blocking write of one buffer
    fn write(&self, data: &[u8]) -> Result<usize, OutputError>;

    fn stats(&self) -> AsiDriverStats;

    /// Tear down the hardware context; later calls are no-ops
    fn close(&self);
}

pub trait AsiDriverFactory: Send + Sync {
    fn open(&self, port: u16, bitrate: u64) -> Result<Arc<dyn AsiDriver>, FanoutError>;
}

/// DekTec driver factory; needs the `dektec` feature
#[derive(Debug, Default, Clone, Copy)]
pub struct DektecAsiFactory;

impl AsiDriverFactory for DektecAsiFactory {
    #[cfg(feature = "dektec")]
    fn open(&self, port: u16, bitrate: u64) -> Result<Arc<dyn AsiDriver>, FanoutError> {
        let driver = super::asi_ffi::DektecDriver::open(port, bitrate).ok_or_else(|| {
            FanoutError::output_setup(format!("dektecasi://:{port}"), "unable to set up dektec asi")
        })?;
        Ok(Arc::new(driver))
    }

    #[cfg(not(feature = "dektec"))]
    fn open(&self, port: u16, _bitrate: u64) -> Result<Arc<dyn AsiDriver>, FanoutError> {
        Err(FanoutError::output_setup(
            format!("dektecasi://:{port}"),
            "built without dektec support (enable the `dektec` feature)",
        ))
    }
}

pub struct AsiOutput {
    name: String,
    port: u16,
    driver: Arc<dyn AsiDriver>,
    cancel: CancellationToken,
}

impl AsiOutput {
    #[instrument(name = "asi_output_setup", skip(url, ctx), fields(flow = %ctx.flow, url = %url))]
    pub async fn setup(url: &Url, ctx: &OutputContext) -> Result<Arc<Self>, FanoutError> {
        info!("Setting up hardware ASI output");
        let raw = url.as_str();
        if url.scheme() != "dektecasi" {
            return Err(FanoutError::UnsupportedScheme(url.scheme().to_string()));
        }
        let port = url
            .port()
            .ok_or_else(|| FanoutError::invalid_param(raw, "port", "port mustn't be empty"))?;
        let bitrate = query_param(url, "bitrate")
            .ok_or_else(|| FanoutError::invalid_param(raw, "bitrate", "missing"))?
            .parse::<u64>()
            .map_err(|e| FanoutError::invalid_param(raw, "bitrate", e.to_string()))?;
        if bitrate == 0 {
            return Err(FanoutError::invalid_param(raw, "bitrate", "must be positive"));
        }

        let driver = ctx.backends.asi.open(port, bitrate)?;
        let output = Arc::new(Self {
            name: raw.to_string(),
            port,
            driver: Arc::clone(&driver),
            cancel: ctx.cancel.child_token(),
        });

        ctx.tracker.spawn(stats_loop(
            port,
            driver,
            Arc::clone(&ctx.stats),
            ctx.output_identifier.clone(),
            output.cancel.clone(),
        ));
        ctx.engine.add_output(output.clone()).await;
        Ok(output)
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

async fn stats_loop(
    port: u16,
    driver: Arc<dyn AsiDriver>,
    stats: Arc<dyn StatsHandler>,
    output_identifier: String,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(ASI_STATS_INTERVAL) => {}
        }
        let counters = driver.stats();
        stats.handle_stats(
            "",
            &output_identifier,
            None,
            StatsRecord::Asi(AsiStats {
                port,
                fifo_bytes: counters.fifo_bytes,
                bytes_written_total: counters.bytes_written_total,
                bytes_written: counters.bytes_written,
            }),
        );
    }
}

#[async_trait]
impl OutputConnection for AsiOutput {
    async fn write(&self, block: &DataBlock) -> Result<usize, OutputError> {
        if self.cancel.is_cancelled() {
            return Err(OutputError::Closed);
        }
        let driver = Arc::clone(&self.driver);
        let block = block.clone();
        tokio::task::spawn_blocking(move || driver.write(block.data()))
            .await
            .map_err(|e| OutputError::Driver(e.to_string()))?
    }

    async fn close(&self) -> Result<(), OutputError> {
        self.cancel.cancel();
        self.driver.close();
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
