use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use snafu::{Backtrace, Snafu};
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Missing relay or filters"))]
    MissingParameters { backtrace: Backtrace },

    #[snafu(display("Invalid query string: {message}"))]
    InvalidQuery {
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid filters: {source}"))]
    InvalidFilters {
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid relay URL {relay}: {message}"))]
    InvalidRelayUrl {
        relay: String,
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("WebSocket error: {message}"))]
    Transport {
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Error parsing WebSocket message: {message}"))]
    ProtocolParse {
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Failed to build query response: {message}"))]
    ResponseConstruction {
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Relay query timed out after {elapsed:?}"))]
    Timeout {
        elapsed: Duration,
        backtrace: Backtrace,
    },

    #[snafu(display("Relay query cancelled"))]
    Cancelled { backtrace: Backtrace },
}

impl Error {
    pub fn missing_parameters() -> Self {
        Error::MissingParameters {
            backtrace: Backtrace::capture(),
        }
    }

    pub fn invalid_query<S: Into<String>>(message: S) -> Self {
        Error::InvalidQuery {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn invalid_relay_url(relay: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidRelayUrl {
            relay: relay.into(),
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Error::Transport {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn protocol_parse<S: Into<String>>(message: S) -> Self {
        Error::ProtocolParse {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn response_construction<S: Into<String>>(message: S) -> Self {
        Error::ResponseConstruction {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn timeout(elapsed: Duration) -> Self {
        Error::Timeout {
            elapsed,
            backtrace: Backtrace::capture(),
        }
    }

    pub fn cancelled() -> Self {
        Error::Cancelled {
            backtrace: Backtrace::capture(),
        }
    }

    /// True for errors caused by the caller's input, detected before any
    /// connection attempt.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::MissingParameters { .. }
                | Error::InvalidQuery { .. }
                | Error::InvalidFilters { .. }
                | Error::InvalidRelayUrl { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingParameters { .. }
            | Error::InvalidQuery { .. }
            | Error::InvalidFilters { .. }
            | Error::InvalidRelayUrl { .. } => StatusCode::BAD_REQUEST,
            Error::Transport { .. }
            | Error::ProtocolParse { .. }
            | Error::ResponseConstruction { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message exposed to HTTP callers. Details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Error::MissingParameters { .. } => "Missing relay or filters",
            Error::InvalidQuery { .. } => "Invalid query parameters",
            Error::InvalidFilters { .. } => "Invalid filters",
            Error::InvalidRelayUrl { .. } => "Invalid relay URL",
            Error::Transport { .. } => "WebSocket error occurred",
            // A result that can't be built after EOSE shares the parse error path
            Error::ProtocolParse { .. } | Error::ResponseConstruction { .. } => {
                "Error parsing WebSocket message"
            }
            Error::Timeout { .. } => "Relay query timed out",
            Error::Cancelled { .. } => "Relay query cancelled",
        }
    }

    /// Label used for the `outcome` dimension of query metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Error::MissingParameters { .. }
            | Error::InvalidQuery { .. }
            | Error::InvalidFilters { .. }
            | Error::InvalidRelayUrl { .. } => "client_error",
            Error::Transport { .. } => "transport_error",
            Error::ProtocolParse { .. } | Error::ResponseConstruction { .. } => "parse_error",
            Error::Timeout { .. } => "timeout",
            Error::Cancelled { .. } => "cancelled",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.is_client_error() {
            warn!("Rejected query: {}", self);
        } else {
            error!("Relay query failed: {}", self);
        }

        let body = Json(json!({ "error": self.public_message() }));
        (self.status_code(), body).into_response()
    }
}
