use crate::error::Error;
use crate::relay_message::{RelayEvent, RelayFrame};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use tracing::{debug, warn};

const SUBSCRIPTION_ID_LEN: usize = 12;

/// Random id correlating our REQ with the relay's replies on one connection.
pub fn generate_subscription_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUBSCRIPTION_ID_LEN)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub events: Vec<RelayEvent>,
    pub last_timestamp: u64,
}

impl QueryResult {
    pub fn to_json(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|e| Error::response_construction(e.to_string()))
    }
}

impl IntoResponse for QueryResult {
    fn into_response(self) -> Response {
        match self.to_json() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(e) => e.into_response(),
        }
    }
}

#[derive(Debug)]
pub enum SessionStep {
    /// Keep reading frames.
    Continue,
    /// The terminal outcome. Produced at most once per session.
    Done(Result<QueryResult, Error>),
    /// The session already finished; the frame was dropped.
    Discarded,
}

/// State of one query on one relay connection.
///
/// Only the first terminal event (EOSE, a transport error or an unparseable
/// frame) yields an outcome. Everything after it is a no-op.
#[derive(Debug)]
pub struct QuerySession {
    subscription_id: String,
    events: Vec<RelayEvent>,
    max_timestamp: u64,
    response_sent: bool,
}

impl Default for QuerySession {
    fn default() -> Self {
        Self::new()
    }
}

impl QuerySession {
    pub fn new() -> Self {
        Self::with_subscription_id(generate_subscription_id())
    }

    pub fn with_subscription_id(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            events: Vec::new(),
            max_timestamp: 0,
            response_sent: false,
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn is_finished(&self) -> bool {
        self.response_sent
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn max_timestamp(&self) -> u64 {
        self.max_timestamp
    }

    /// Parses and applies one inbound text frame.
    pub fn handle_text(&mut self, text: &str) -> SessionStep {
        if self.response_sent {
            debug!("Discarding frame received after the query finished");
            return SessionStep::Discarded;
        }

        match RelayFrame::parse(text) {
            Ok(frame) => self.handle_frame(frame),
            Err(e) => {
                debug!("Unparseable relay frame: {}", text);
                self.finish(Err(e))
            }
        }
    }

    pub fn handle_frame(&mut self, frame: RelayFrame) -> SessionStep {
        if self.response_sent {
            debug!("Discarding {:?} received after the query finished", frame);
            return SessionStep::Discarded;
        }

        match frame {
            RelayFrame::Event {
                subscription_id,
                event,
            } => {
                if subscription_id != self.subscription_id {
                    debug!("Ignoring EVENT for foreign subscription {}", subscription_id);
                    return SessionStep::Continue;
                }
                self.max_timestamp = self.max_timestamp.max(event.created_at());
                self.events.push(event);
                SessionStep::Continue
            }
            RelayFrame::Eose { subscription_id } => {
                if subscription_id != self.subscription_id {
                    debug!("Ignoring EOSE for foreign subscription {}", subscription_id);
                    return SessionStep::Continue;
                }
                let result = self.build_result();
                self.finish(result)
            }
            RelayFrame::Notice { message } => {
                warn!("Relay notice: {}", message);
                SessionStep::Continue
            }
            RelayFrame::Closed {
                subscription_id,
                message,
            } => {
                warn!("Relay closed subscription {}: {}", subscription_id, message);
                SessionStep::Continue
            }
            RelayFrame::Other { tag } => {
                debug!("Ignoring {} frame", tag);
                SessionStep::Continue
            }
        }
    }

    /// Records a failure detected outside frame handling (transport error,
    /// timeout, cancellation).
    pub fn fail(&mut self, error: Error) -> SessionStep {
        self.finish(Err(error))
    }

    fn finish(&mut self, outcome: Result<QueryResult, Error>) -> SessionStep {
        if self.response_sent {
            return SessionStep::Discarded;
        }
        self.response_sent = true;
        SessionStep::Done(outcome)
    }

    fn build_result(&mut self) -> Result<QueryResult, Error> {
        let mut events = std::mem::take(&mut self.events);
        events.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        let result = QueryResult {
            events,
            last_timestamp: self.max_timestamp,
        };
        // The body must be encodable before the outcome is committed.
        result.to_json()?;
        Ok(result)
    }
}
