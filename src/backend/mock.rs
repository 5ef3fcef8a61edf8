//! Scripted in-memory backend for tests.
//!
//! The mock records every call, honours per-query scripts matched by
//! substring, and understands the save-wrapped query shape well enough to
//! drop canned bytes into the save target so the read pipeline can be
//! exercised end to end.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{BackendError, Connection, Connector, QueryId};

/// Non-fatal error text the mock reports for a cancelled execute.
pub const CANCELLED_MSG: &str =
    "SystemException ... Error id: scidb::SCIDB_SE_QPROC::SCIDB_LE_QUERY_CANCELLED";

#[derive(Clone)]
pub enum Action {
    /// Fail the execute with the given backend error text.
    Fail(String),
    /// Block inside execute until a `cancel(...)` runs on another
    /// connection, then fail with [`CANCELLED_MSG`].
    BlockUntilCancel,
    /// Write the bytes into the query's save target and succeed.
    Output(Vec<u8>),
}

struct Script {
    needle: String,
    action: Action,
}

#[derive(Default)]
pub struct MockState {
    calls: Mutex<Vec<String>>,
    scripts: Mutex<Vec<Script>>,
    next_query: AtomicU64,
    open_connections: AtomicI64,
    connects: AtomicU64,
    cancelled: AtomicBool,
    cancel_notify: Notify,
}

impl MockState {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn open_connections(&self) -> i64 {
        self.open_connections.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn find_action(&self, text: &str) -> Option<Action> {
        self.scripts
            .lock()
            .iter()
            .find(|script| text.contains(&script.needle))
            .map(|script| script.action.clone())
    }
}

/// Connector handing out scripted connections backed by shared state.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
    reject_auth: bool,
    refuse_connect: bool,
}

impl MockConnector {
    pub fn new() -> MockConnector {
        MockConnector::default()
    }

    /// Reject every connect with an authentication error.
    pub fn rejecting_auth() -> MockConnector {
        MockConnector {
            reject_auth: true,
            ..MockConnector::default()
        }
    }

    /// Refuse every connect with a connection error.
    pub fn refusing() -> MockConnector {
        MockConnector {
            refuse_connect: true,
            ..MockConnector::default()
        }
    }

    pub fn state(&self) -> Arc<MockState> {
        self.state.clone()
    }

    /// Script the action taken when an executed query contains `needle`.
    pub fn script(&self, needle: &str, action: Action) {
        self.state.scripts.lock().push(Script {
            needle: needle.to_string(),
            action,
        });
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _host: &str,
        _port: u16,
        user: &str,
        _password: &str,
    ) -> Result<Box<dyn Connection>, BackendError> {
        if self.reject_auth {
            return Err(BackendError::Auth);
        }
        if self.refuse_connect {
            return Err(BackendError::Connect("connection refused".to_string()));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.open_connections.fetch_add(1, Ordering::SeqCst);
        self.state.record(format!("connect({user})"));
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
            live: true,
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    live: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn prepare(&mut self, text: &str) -> Result<QueryId, BackendError> {
        self.state.record(format!("prepare({text})"));
        let query = self.state.next_query.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(QueryId::new(1, query))
    }

    async fn execute(&mut self, text: &str, _qid: QueryId) -> Result<(), BackendError> {
        self.state.record(format!("execute({text})"));

        if text.starts_with("cancel(") {
            self.state.cancelled.store(true, Ordering::SeqCst);
            self.state.cancel_notify.notify_waiters();
            return Ok(());
        }

        match self.state.find_action(text) {
            Some(Action::Fail(message)) => Err(BackendError::Query(message)),
            Some(Action::BlockUntilCancel) => {
                while !self.state.cancelled.load(Ordering::SeqCst) {
                    let notified = self.state.cancel_notify.notified();
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(Duration::from_secs(10)) => {
                            return Err(BackendError::Query(
                                "mock execute timed out waiting for cancel".to_string(),
                            ));
                        }
                    }
                }
                Err(BackendError::Query(CANCELLED_MSG.to_string()))
            }
            Some(Action::Output(bytes)) => {
                let target = parse_save_target(text).ok_or_else(|| {
                    BackendError::Query(format!("no save target in query: {text}"))
                })?;
                tokio::fs::write(&target, &bytes).await?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn complete(&mut self, qid: QueryId) -> Result<(), BackendError> {
        self.state.record(format!("complete({qid})"));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BackendError> {
        if self.live {
            self.live = false;
            self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
            self.state.record("disconnect".to_string());
        }
        Ok(())
    }
}

/// Pull the save target out of a rewritten query: the `path=...` pair for
/// `aio_save`, the first quoted absolute path for `save`.
pub fn parse_save_target(text: &str) -> Option<PathBuf> {
    let mut quoted = Vec::new();
    for (index, segment) in text.split('\'').enumerate() {
        if index % 2 == 1 {
            quoted.push(segment);
        }
    }
    for segment in &quoted {
        if let Some(path) = segment.strip_prefix("path=") {
            return Some(PathBuf::from(path));
        }
    }
    quoted
        .into_iter()
        .find(|segment| segment.starts_with('/'))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_target_from_both_rewrite_shapes() {
        let aio = "aio_save(list(),'path=/tmp/shim_output_buf_x1','instance=0','format=csv+')";
        assert_eq!(
            parse_save_target(aio),
            Some(PathBuf::from("/tmp/shim_output_buf_x1"))
        );

        let plain = "save(list(),'/tmp/shim_output_buf_x2',0,'csv')";
        assert_eq!(
            parse_save_target(plain),
            Some(PathBuf::from("/tmp/shim_output_buf_x2"))
        );

        assert_eq!(parse_save_target("list()"), None);
    }
}
