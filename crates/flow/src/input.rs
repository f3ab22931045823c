//! Input handles: one receiver peer per configured input URL

use std::sync::Arc;

use contracts::{parse_endpoint_url, InputConfig, PeerId, Receiver};
use tracing::{info, warn};

use crate::error::{FlowError, Result};

/// A configured input
#[derive(Debug, Clone)]
pub(crate) struct InputHandle {
    pub config: InputConfig,
    pub peer: PeerId,
}

/// Parse the input URL and add it as a receiver peer
pub(crate) async fn setup_input(receiver: &Arc<dyn Receiver>, config: &InputConfig) -> Result<InputHandle> {
    let url = parse_endpoint_url(&config.url).map_err(|source| FlowError::InvalidUrl {
        url: config.url.clone(),
        source,
    })?;
    let peer = receiver
        .add_peer(&url)
        .await
        .map_err(|source| FlowError::Input {
            url: config.url.clone(),
            source,
        })?;
    info!(url = %config.url, peer, "Input configured");
    Ok(InputHandle {
        config: config.clone(),
        peer,
    })
}

/// Remove the peer; failures are logged only
pub(crate) async fn close_input(receiver: &Arc<dyn Receiver>, input: InputHandle) {
    if let Err(e) = receiver.remove_peer(input.peer).await {
        warn!(url = %input.config.url, error = %e, "Failed to remove input");
    } else {
        info!(url = %input.config.url, "Input removed");
    }
}
