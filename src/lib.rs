pub mod app_state;
pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod query_session;
pub mod relay_message;
pub mod relay_query;
pub mod server;

// Re-export commonly used items
pub use app_state::HttpServerState;
pub use error::Error;
pub use query_session::{QueryResult, QuerySession};
pub use relay_query::{QueryParams, QueryRequest, RelayQueryBridge};
