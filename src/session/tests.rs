//! Tests for the session store.

use serial_test::serial;

use super::*;
use crate::backend::mock::MockConnector;
use crate::config::Config;
use crate::errors::ShimError;
use crate::test_support::{test_env, test_env_with};

fn scratch_is_empty(env: &crate::test_support::TestEnv) -> bool {
    std::fs::read_dir(env.tmp.path()).unwrap().next().is_none()
}

#[tokio::test]
#[serial]
async fn ids_are_unique_and_well_formed() {
    let env = test_env(4);
    let mut ids = Vec::new();
    for _ in 0..3 {
        let slot = env.manager.allocate("", "").await.unwrap();
        let id = slot.session_id();
        assert_eq!(id.len(), SESSION_ID_LEN);
        assert!(
            id.bytes().all(|b| ID_CHARSET.contains(&b)),
            "unexpected character in {id}"
        );
        ids.push(id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3, "ids must be pairwise distinct");

    let idle = env
        .manager
        .slots()
        .iter()
        .find(|slot| slot.is_available())
        .unwrap();
    assert_eq!(idle.session_id(), AVAILABLE_ID);
}

#[tokio::test]
#[serial]
async fn pool_is_bounded() {
    let env = test_env(2);
    env.manager.allocate("", "").await.unwrap();
    env.manager.allocate("", "").await.unwrap();
    assert!(matches!(
        env.manager.allocate("", "").await,
        Err(ShimError::OutOfSessions)
    ));
    assert_eq!(env.manager.live_sessions(), 2);
}

#[tokio::test]
#[serial]
async fn reaper_reclaims_an_expired_orphan() {
    let env = test_env(1);
    let orphan = env.manager.allocate("", "").await.unwrap();
    let orphan_id = orphan.session_id();
    let orphan_buffers = orphan.buffers().unwrap();

    let timeout = crate::config::get_config().general.session_timeout as i64;
    orphan
        .last_touched
        .store(now_secs() - timeout - 5, std::sync::atomic::Ordering::SeqCst);

    let fresh = env.manager.allocate("", "").await.unwrap();
    assert_ne!(fresh.session_id(), orphan_id);
    assert!(!orphan_buffers.input_path.exists());
    assert!(!orphan_buffers.output_path.exists());
    assert!(!orphan_buffers.pipe_path.exists());

    // both of the orphan's connections were closed, two fresh ones opened
    let state = env.connector.state();
    assert_eq!(state.connects(), 4);
    assert_eq!(state.open_connections(), 2);
}

#[tokio::test]
#[serial]
async fn in_flight_sessions_survive_the_reaper() {
    let env = test_env(1);
    let busy = env.manager.allocate("", "").await.unwrap();
    let busy_id = busy.session_id();

    // what execute/upload do for their duration
    busy.touch_in_flight();

    assert!(matches!(
        env.manager.allocate("", "").await,
        Err(ShimError::OutOfSessions)
    ));
    assert_eq!(env.manager.lookup(&busy_id).unwrap().index, busy.index);
}

#[tokio::test]
#[serial]
async fn release_returns_the_slot_to_available() {
    let env = test_env(2);
    let slot = env.manager.allocate("", "").await.unwrap();
    let id = slot.session_id();
    let buffers = slot.buffers().unwrap();
    assert!(buffers.input_path.exists());

    env.manager.release(&slot).await;

    assert!(slot.is_available());
    assert_eq!(slot.session_id(), AVAILABLE_ID);
    assert!(!slot.qid().is_active());
    assert!(!buffers.input_path.exists());
    assert!(!buffers.output_path.exists());
    assert!(!buffers.pipe_path.exists());
    assert!(env.manager.lookup(&id).is_none());
    assert_eq!(env.connector.state().open_connections(), 0);
}

#[tokio::test]
#[serial]
async fn lookup_only_matches_live_slots() {
    let env = test_env(2);
    let slot = env.manager.allocate("", "").await.unwrap();
    let id = slot.session_id();

    assert!(env.manager.lookup(AVAILABLE_ID).is_none());
    assert!(env.manager.lookup("0".repeat(32).as_str()).is_none());
    assert_eq!(env.manager.lookup(&id).unwrap().index, slot.index);
}

#[tokio::test]
#[serial]
async fn failed_connect_rolls_the_slot_back() {
    let env = test_env_with(1, MockConnector::refusing(), Config::default());
    assert!(matches!(
        env.manager.allocate("", "").await,
        Err(ShimError::ConnectFailed)
    ));
    let slot = &env.manager.slots()[0];
    assert!(slot.is_available());
    assert_eq!(slot.session_id(), AVAILABLE_ID);
    assert!(scratch_is_empty(&env));
}

#[tokio::test]
#[serial]
async fn rejected_credentials_surface_as_auth_failure() {
    let env = test_env_with(1, MockConnector::rejecting_auth(), Config::default());
    assert!(matches!(
        env.manager.allocate("alice", "wrong").await,
        Err(ShimError::AuthFailed)
    ));
    assert!(scratch_is_empty(&env));
}

#[tokio::test]
#[serial]
async fn signal_cleanup_unlinks_files_without_slot_locks() {
    let env = test_env(2);
    let slot = env.manager.allocate("", "").await.unwrap();
    let buffers = slot.buffers().unwrap();

    // hold the main lock, as a hung execute would
    let _inner = slot.inner.lock().await;
    env.manager.cleanup_all_files();

    assert!(!buffers.input_path.exists());
    assert!(!buffers.output_path.exists());
    assert!(!buffers.pipe_path.exists());
}
