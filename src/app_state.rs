use crate::relay_query::RelayQueryBridge;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct HttpServerState {
    pub bridge: RelayQueryBridge,
    /// Parent of every per-query token; cancelled on shutdown.
    pub cancellation_token: CancellationToken,
}

impl HttpServerState {
    pub fn new(bridge: RelayQueryBridge, cancellation_token: CancellationToken) -> Self {
        Self {
            bridge,
            cancellation_token,
        }
    }
}
