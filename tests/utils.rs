use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the mock relay does after it receives the REQ frame.
#[derive(Debug, Clone)]
pub enum RelayAction {
    /// Send a text frame. `{sub}` is replaced with the subscription id.
    Text(String),
    /// Send a binary frame. `{sub}` is replaced with the subscription id.
    Binary(String),
    /// Send a binary frame with exactly these bytes.
    RawBinary(Vec<u8>),
    /// Send a close frame and stop.
    Close,
    /// Drop the socket without a close handshake.
    Drop,
}

#[derive(Default)]
struct MockRelayState {
    script: Vec<RelayAction>,
    connections: AtomicUsize,
    closed_connections: AtomicUsize,
    received: Mutex<Vec<Value>>,
}

/// A relay double that answers the first REQ with a fixed script and records
/// every frame the client sends.
pub struct MockRelay {
    addr: SocketAddr,
    state: Arc<MockRelayState>,
    shutdown: CancellationToken,
    server_task: tokio::task::JoinHandle<()>,
}

impl MockRelay {
    pub async fn start(script: Vec<RelayAction>) -> Self {
        let state = Arc::new(MockRelayState {
            script,
            ..Default::default()
        });

        let app = Router::new()
            .route("/", get(websocket_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown,
            server_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().unwrap().clone()
    }

    /// Waits until every accepted connection has been closed by the client.
    pub async fn wait_for_disconnect(&self) -> bool {
        for _ in 0..50 {
            let connections = self.state.connections.load(Ordering::SeqCst);
            let closed = self.state.closed_connections.load(Ordering::SeqCst);
            if connections > 0 && connections == closed {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server_task.await;
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<MockRelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        state.connections.fetch_add(1, Ordering::SeqCst);
        run_script(socket, &state).await;
        state.closed_connections.fetch_add(1, Ordering::SeqCst);
    })
}

async fn run_script(mut socket: WebSocket, state: &MockRelayState) {
    let Some(req) = next_frame(&mut socket, state).await else {
        return;
    };
    let subscription_id = req
        .get(1)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    for action in &state.script {
        let sent = match action {
            RelayAction::Text(text) => {
                let text = text.replace("{sub}", &subscription_id);
                socket.send(Message::Text(text.into())).await
            }
            RelayAction::Binary(text) => {
                let bytes = text.replace("{sub}", &subscription_id).into_bytes();
                socket.send(Message::Binary(bytes.into())).await
            }
            RelayAction::RawBinary(bytes) => {
                socket.send(Message::Binary(bytes.clone().into())).await
            }
            RelayAction::Close => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            RelayAction::Drop => return,
        };
        if sent.is_err() {
            return;
        }
    }

    // Keep recording until the client hangs up
    while next_frame(&mut socket, state).await.is_some() {}
}

async fn next_frame(socket: &mut WebSocket, state: &MockRelayState) -> Option<Value> {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                state.received.lock().unwrap().push(value.clone());
                return Some(value);
            }
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}
