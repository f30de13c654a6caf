//! One-shot relay queries.
//!
//! A [`RelayQueryBridge`] opens a WebSocket to the relay named in a
//! [`QueryRequest`], subscribes with the request's filters, collects events
//! until EOSE and closes the connection again. Every query ends with exactly
//! one outcome, bounded by the configured deadline and a cancellation token.

use crate::config::{BridgeSettings, MAX_TIMEOUT};
use crate::error::{Error, InvalidFiltersSnafu};
use crate::metrics;
use crate::query_session::{QueryResult, QuerySession, SessionStep};
use crate::relay_message::{close_frame, subscribe_frame, Filter};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use snafu::ResultExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound for the goodbye (CLOSE frame plus close handshake).
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Raw query string parameters as they arrive over HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    pub relay: Option<String>,
    pub filters: Option<String>,
}

/// A validated query: a WebSocket relay URL and the filters to send, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    relay: Url,
    filters: Vec<Filter>,
}

impl QueryRequest {
    pub fn new(relay: &str, filters: &str) -> Result<Self, Error> {
        if relay.trim().is_empty() || filters.trim().is_empty() {
            return Err(Error::missing_parameters());
        }

        let filters: Vec<Filter> = serde_json::from_str(filters).context(InvalidFiltersSnafu)?;

        let relay_url =
            Url::parse(relay).map_err(|e| Error::invalid_relay_url(relay, e.to_string()))?;
        if !matches!(relay_url.scheme(), "ws" | "wss") {
            return Err(Error::invalid_relay_url(
                relay,
                format!("unsupported scheme {}", relay_url.scheme()),
            ));
        }

        Ok(Self {
            relay: relay_url,
            filters,
        })
    }

    pub fn from_params(params: &QueryParams) -> Result<Self, Error> {
        match (params.relay.as_deref(), params.filters.as_deref()) {
            (Some(relay), Some(filters)) => Self::new(relay, filters),
            _ => Err(Error::missing_parameters()),
        }
    }

    pub fn relay(&self) -> &Url {
        &self.relay
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
}

#[derive(Debug, Clone)]
pub struct RelayQueryBridge {
    query_timeout: Duration,
    connect_timeout: Option<Duration>,
}

impl RelayQueryBridge {
    /// Timeouts above [`MAX_TIMEOUT`] are clamped to it.
    pub fn new(query_timeout: Duration) -> Self {
        Self {
            query_timeout: query_timeout.min(MAX_TIMEOUT),
            connect_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout.min(MAX_TIMEOUT));
        self
    }

    pub fn from_settings(settings: &BridgeSettings) -> Self {
        let bridge = Self::new(settings.query_timeout);
        match settings.connect_timeout {
            Some(connect_timeout) => bridge.with_connect_timeout(connect_timeout),
            None => bridge,
        }
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Runs one query to completion. The connection is closed before this
    /// returns, whatever the outcome.
    pub async fn query(
        &self,
        request: QueryRequest,
        cancellation_token: CancellationToken,
    ) -> Result<QueryResult, Error> {
        let _active = metrics::ActiveQueryGuard::new();
        let started = Instant::now();

        let outcome = self.run(&request, &cancellation_token).await;

        metrics::relay_query_duration().record(started.elapsed().as_millis() as f64);
        match &outcome {
            Ok(result) => {
                metrics::relay_queries("success").increment(1);
                metrics::relay_events_received().increment(result.events.len() as u64);
                info!(
                    "Query to {} returned {} events in {:?}",
                    request.relay,
                    result.events.len(),
                    started.elapsed()
                );
            }
            Err(e) => metrics::relay_queries(e.outcome()).increment(1),
        }

        outcome
    }

    async fn run(
        &self,
        request: &QueryRequest,
        cancellation_token: &CancellationToken,
    ) -> Result<QueryResult, Error> {
        let deadline = deadline_after(self.query_timeout);
        let mut ws = self
            .connect(request.relay(), deadline, cancellation_token)
            .await?;
        info!("WebSocket opened to {}", request.relay);

        let mut session = QuerySession::new();
        let outcome = self
            .exchange(&mut ws, &mut session, request, deadline, cancellation_token)
            .await;

        close_connection(ws, session.subscription_id()).await;
        info!("WebSocket closed to {}", request.relay);

        outcome
    }

    async fn connect(
        &self,
        relay: &Url,
        deadline: Instant,
        cancellation_token: &CancellationToken,
    ) -> Result<WsStream, Error> {
        let connect_deadline = match self.connect_timeout {
            Some(connect_timeout) => deadline.min(deadline_after(connect_timeout)),
            None => deadline,
        };

        tokio::select! {
            biased;

            _ = cancellation_token.cancelled() => Err(Error::cancelled()),

            connected = timeout_at(connect_deadline, connect_async(relay.as_str())) => {
                match connected {
                    Ok(Ok((ws, _response))) => Ok(ws),
                    Ok(Err(e)) => Err(Error::transport(format!(
                        "Failed to connect to {relay}: {e}"
                    ))),
                    Err(_) if connect_deadline < deadline => Err(Error::transport(format!(
                        "Timed out connecting to {relay}"
                    ))),
                    Err(_) => Err(Error::timeout(self.query_timeout)),
                }
            }
        }
    }

    async fn exchange(
        &self,
        ws: &mut WsStream,
        session: &mut QuerySession,
        request: &QueryRequest,
        deadline: Instant,
        cancellation_token: &CancellationToken,
    ) -> Result<QueryResult, Error> {
        let subscription = subscribe_frame(session.subscription_id(), request.filters())?;
        debug!(
            "Sending subscription {} with {} filters to {}",
            session.subscription_id(),
            request.filters().len(),
            request.relay
        );

        match timeout_at(deadline, ws.send(Message::text(subscription))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::transport(format!("Failed to subscribe: {e}"))),
            Err(_) => return Err(Error::timeout(self.query_timeout)),
        }

        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        loop {
            let step = tokio::select! {
                biased;

                _ = cancellation_token.cancelled() => session.fail(Error::cancelled()),

                _ = &mut expiry => session.fail(Error::timeout(self.query_timeout)),

                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => session.handle_text(text),
                        Err(e) => session.fail(Error::protocol_parse(format!(
                            "binary frame is not UTF-8: {e}"
                        ))),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Relay sent close frame: {:?}", frame);
                        session.fail(Error::transport("Relay closed the connection before EOSE"))
                    }
                    Some(Ok(_)) => SessionStep::Continue,
                    Some(Err(e)) => session.fail(Error::transport(e.to_string())),
                    None => session.fail(Error::transport("Connection ended before EOSE")),
                },
            };

            match step {
                SessionStep::Continue => {}
                SessionStep::Done(outcome) => return outcome,
                SessionStep::Discarded => {
                    unreachable!("the exchange returns on the session's first outcome")
                }
            }
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(MAX_TIMEOUT))
        .unwrap_or(now)
}

/// Sends CLOSE for the subscription, then the WebSocket close frame. Errors
/// are logged only; the outcome is already decided.
async fn close_connection(mut ws: WsStream, subscription_id: &str) {
    let goodbye = async {
        if let Ok(frame) = close_frame(subscription_id) {
            if let Err(e) = ws.send(Message::text(frame)).await {
                debug!("Failed to send CLOSE for {}: {}", subscription_id, e);
            }
        }
        if let Err(e) = ws.close(None).await {
            debug!("Failed to close WebSocket: {}", e);
        }
    };

    if timeout(CLOSE_TIMEOUT, goodbye).await.is_err() {
        debug!("Timed out closing WebSocket, dropping it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_keeps_filters_in_order() {
        let request = QueryRequest::new(
            "wss://relay.example.com",
            r#"[{"kinds":[1]},{"authors":["ab"]},{"limit":3}]"#,
        )
        .unwrap();

        let filters: Vec<serde_json::Value> = request
            .filters()
            .iter()
            .cloned()
            .map(serde_json::Value::Object)
            .collect();
        assert_eq!(
            filters,
            vec![json!({"kinds": [1]}), json!({"authors": ["ab"]}), json!({"limit": 3})]
        );
        assert_eq!(request.relay().as_str(), "wss://relay.example.com/");
    }

    #[test]
    fn test_missing_parameters() {
        for params in [
            QueryParams::default(),
            QueryParams {
                relay: Some("wss://relay.example.com".into()),
                filters: None,
            },
            QueryParams {
                relay: None,
                filters: Some("[]".into()),
            },
            QueryParams {
                relay: Some("".into()),
                filters: Some("[]".into()),
            },
        ] {
            let err = QueryRequest::from_params(&params).unwrap_err();
            assert!(matches!(err, Error::MissingParameters { .. }), "{params:?}");
        }
    }

    #[test]
    fn test_invalid_filters() {
        for filters in ["not json", r#"{"kinds":[1]}"#, "[1, 2]", r#"["a"]"#] {
            let err = QueryRequest::new("wss://relay.example.com", filters).unwrap_err();
            assert!(matches!(err, Error::InvalidFilters { .. }), "{filters}");
            assert_eq!(err.public_message(), "Invalid filters");
        }
    }

    #[test]
    fn test_invalid_relay_url() {
        for relay in ["not a url", "https://relay.example.com", "relay.example.com"] {
            let err = QueryRequest::new(relay, "[]").unwrap_err();
            assert!(matches!(err, Error::InvalidRelayUrl { .. }), "{relay}");
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = QueryRequest::new(&format!("ws://{addr}"), "[]").unwrap();
        let bridge = RelayQueryBridge::new(Duration::from_secs(5));

        let err = bridge
            .query(request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }), "{err:?}");
    }

    #[test]
    fn test_timeouts_are_clamped() {
        let bridge = RelayQueryBridge::new(Duration::MAX).with_connect_timeout(Duration::MAX);
        assert_eq!(bridge.query_timeout(), MAX_TIMEOUT);
        assert_eq!(bridge.connect_timeout, Some(MAX_TIMEOUT));

        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > Instant::now());
    }

    #[tokio::test]
    async fn test_cancelled_before_connect() {
        let request = QueryRequest::new("ws://127.0.0.1:9", "[]").unwrap();
        let bridge = RelayQueryBridge::new(Duration::from_secs(5));
        let token = CancellationToken::new();
        token.cancel();

        let err = bridge.query(request, token).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }), "{err:?}");
    }
}
