//! Status endpoint
//!
//! `GET /status` returns the aggregate [`StatusReport`] of every running flow.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{FlowError, Result};
use crate::supervisor::{FlowRegistry, StatusReport};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

pub fn router(registry: Arc<FlowRegistry>) -> Router {
    Router::new()
        .route("/status", get(status))
        .with_state(registry)
}

async fn status(State(registry): State<Arc<FlowRegistry>>) -> Json<StatusReport> {
    Json(registry.status_report())
}

/// Running status server
pub struct HttpServer {
    listen: String,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HttpServer {
    /// Bind `listen` and serve until `cancel` fires or [`shutdown`](Self::shutdown)
    pub async fn start(listen: &str, registry: Arc<FlowRegistry>, cancel: CancellationToken) -> Result<Self> {
        let http_err = |source| FlowError::Http {
            addr: listen.to_string(),
            source,
        };
        let listener = TcpListener::bind(listen).await.map_err(http_err)?;
        let local_addr = listener.local_addr().map_err(http_err)?;
        info!(addr = %local_addr, "Status endpoint listening");

        let token = cancel.clone();
        let app = router(registry);
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                error!(error = %e, "Status endpoint failed");
            }
        });

        Ok(Self {
            listen: listen.to_string(),
            local_addr,
            cancel,
            task,
        })
    }

    /// Configured listen address
    pub fn listen(&self) -> &str {
        &self.listen
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await.is_err() {
            warn!(addr = %self.local_addr, "Status endpoint did not stop in time, aborting");
            self.task.abort();
        }
        info!(addr = %self.local_addr, "Status endpoint stopped");
    }
}
