//! `crate::backend` — the narrow contract the gateway consumes from the
//! SciDB client protocol: connect, prepare, execute, complete, disconnect.
//!
//! Everything above this module sees only [`Connector`] and [`Connection`];
//! the wire details live in [`scidb`].

use std::fmt;

use async_trait::async_trait;

pub mod scidb;

#[cfg(test)]
pub mod mock;

pub use scidb::ScidbConnector;

/// Backend error markers that indicate the connection (or the cluster
/// behind it) is gone, as opposed to a plain query error.
const FATAL_MARKERS: &[&str] = &[
    "SCIDB_LE_CANT_SEND_RECEIVE",
    "SCIDB_LE_CONNECTION_ERROR",
    "SCIDB_LE_NO_QUORUM",
];

/// A query identifier as issued by the backend coordinator.
/// `query == 0` means "no current query".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryId {
    pub coordinator: u64,
    pub query: u64,
}

impl QueryId {
    pub fn new(coordinator: u64, query: u64) -> QueryId {
        QueryId { coordinator, query }
    }

    pub fn is_active(&self) -> bool {
        self.query != 0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.coordinator, self.query)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("SciDB authentication failed")]
    Auth,
    #[error("SciDB connection failed: {0}")]
    Connect(String),
    /// An error reported by the server for a prepared/executed query,
    /// carrying the literal backend error text.
    #[error("{0}")]
    Query(String),
    #[error("lost connection to SciDB: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Transient query errors keep the session alive; anything touching the
    /// connection itself does not.
    pub fn is_fatal(&self) -> bool {
        match self {
            BackendError::Auth | BackendError::Connect(_) | BackendError::Io(_) => true,
            BackendError::Query(message) => {
                FATAL_MARKERS.iter().any(|marker| message.contains(marker))
            }
        }
    }
}

/// One established backend connection. The protocol is stateful per
/// connection: callers must not interleave requests on a single handle.
#[async_trait]
pub trait Connection: Send {
    /// Validate and register a query; returns the id the coordinator
    /// assigned to it.
    async fn prepare(&mut self, text: &str) -> Result<QueryId, BackendError>;

    /// Run a prepared query. Blocks until the backend finishes (or the
    /// query is cancelled from another connection).
    async fn execute(&mut self, text: &str, qid: QueryId) -> Result<(), BackendError>;

    /// Finalise a query, releasing its server-side resources.
    async fn complete(&mut self, qid: QueryId) -> Result<(), BackendError>;

    /// Close the connection. Errors are reported but the handle is dead
    /// either way.
    async fn disconnect(&mut self) -> Result<(), BackendError>;
}

/// Factory for backend connections; the session store holds one and opens
/// two connections per session (control + cancel).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn Connection>, BackendError>;
}
