//! Shared fixtures for in-crate tests.

use std::sync::Arc;

use tempfile::TempDir;

use crate::backend::mock::MockConnector;
use crate::config::{set_config, Config};
use crate::session::SessionManager;

pub struct TestEnv {
    pub manager: Arc<SessionManager>,
    pub connector: MockConnector,
    /// Owns the scratch directory holding the session buffers.
    pub tmp: TempDir,
}

/// Install a config pointing at a scratch temp dir and build a manager over
/// a scripted backend. The config is process-global, so tests built on this
/// must run under `#[serial_test::serial]`.
pub fn test_env(max_sessions: usize) -> TestEnv {
    test_env_with(max_sessions, MockConnector::new(), Config::default())
}

pub fn test_env_with(
    max_sessions: usize,
    connector: MockConnector,
    mut config: Config,
) -> TestEnv {
    let tmp = tempfile::tempdir().unwrap();
    config.general.tmp_dir = tmp.path().to_string_lossy().into_owned();
    config.general.max_sessions = max_sessions;
    set_config(config);

    let manager = Arc::new(SessionManager::new(
        max_sessions,
        Arc::new(connector.clone()),
    ));
    TestEnv {
        manager,
        connector,
        tmp,
    }
}
