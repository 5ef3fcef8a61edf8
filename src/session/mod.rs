//! Session store: a fixed pool of slots, each tying an HTTP caller to two
//! backend connections and a set of temp buffers.
//!
//! Locking is two-level. The global allocation lock serialises slot
//! allocation and reaping; a per-slot async lock serialises every operation
//! that mutates one session (execute, upload, read, release). The cancel
//! connection sits behind its own brief lock so `/cancel` can run while an
//! execute holds the main slot lock, and `id`, `qid` and the buffer paths
//! live behind sync leaf mutexes so lookups, cancel and the signal handler
//! never wait on async locks. Lock order: global → slot main → leaves; only
//! cleanup additionally takes main → cancel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use rand::Rng;
use tokio::fs::File;
use tokio::io::BufReader;
use tokio::sync::Mutex as AsyncMutex;

use crate::backend::{Connection, Connector, QueryId};
use crate::config::get_config;
use crate::errors::ShimError;

pub mod buffers;
pub mod read;

#[cfg(test)]
mod tests;

pub use buffers::SessionBuffers;

pub const SESSION_ID_LEN: usize = 32;
const ID_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Id carried by an AVAILABLE slot.
pub const AVAILABLE_ID: &str = "NA";

/// last_touched is pushed this far into the future while an upload or
/// execute is in flight, which keeps the reaper off the slot.
pub const IN_FLIGHT_GRACE_SECS: i64 = 7 * 24 * 60 * 60;

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Output format recorded by the last execute that carried a `save`.
/// Sticky: an execute without a save leaves it untouched, so prior output
/// stays readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    #[default]
    None,
    Binary,
    Text,
}

/// State guarded by the main slot lock.
pub struct SlotInner {
    /// Control connection: prepare, execute, complete.
    pub control: Option<Box<dyn Connection>>,
    pub save_mode: SaveMode,
    /// Reserved: pipe streaming, never enabled in this version.
    pub stream: bool,
    /// Reserved: compression level, always -1 in this version.
    pub compression: i32,
    /// Raw output handle for read_bytes; opened on the first read after a
    /// save, kept open so repeated calls advance the offset.
    pub out_file: Option<File>,
    /// Buffered output handle for read_lines.
    pub out_lines: Option<BufReader<File>>,
}

impl Default for SlotInner {
    fn default() -> SlotInner {
        SlotInner {
            control: None,
            save_mode: SaveMode::None,
            stream: false,
            compression: -1,
            out_file: None,
            out_lines: None,
        }
    }
}

pub struct SessionSlot {
    pub index: usize,
    /// true ⇔ AVAILABLE: no open files, no backend contexts, no query id.
    available: AtomicBool,
    last_touched: AtomicI64,
    id: Mutex<String>,
    qid: Mutex<QueryId>,
    paths: Mutex<Option<SessionBuffers>>,
    /// Connection reserved for cancel, so a cancel can travel while the
    /// control connection is blocked inside an execute.
    cancel_conn: AsyncMutex<Option<Box<dyn Connection>>>,
    pub inner: AsyncMutex<SlotInner>,
}

impl SessionSlot {
    fn new(index: usize) -> SessionSlot {
        SessionSlot {
            index,
            available: AtomicBool::new(true),
            last_touched: AtomicI64::new(0),
            id: Mutex::new(AVAILABLE_ID.to_string()),
            qid: Mutex::new(QueryId::default()),
            paths: Mutex::new(None),
            cancel_conn: AsyncMutex::new(None),
            inner: AsyncMutex::new(SlotInner::default()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> String {
        self.id.lock().clone()
    }

    pub fn last_touched(&self) -> i64 {
        self.last_touched.load(Ordering::SeqCst)
    }

    /// Record activity now.
    pub fn touch(&self) {
        self.last_touched.store(now_secs(), Ordering::SeqCst);
    }

    /// Shield the slot from the reaper for the duration of a long-running
    /// operation.
    pub fn touch_in_flight(&self) {
        self.last_touched
            .store(now_secs() + IN_FLIGHT_GRACE_SECS, Ordering::SeqCst);
    }

    pub fn qid(&self) -> QueryId {
        *self.qid.lock()
    }

    pub fn set_qid(&self, qid: QueryId) {
        *self.qid.lock() = qid;
    }

    pub fn buffers(&self) -> Option<SessionBuffers> {
        self.paths.lock().clone()
    }

    pub fn input_path(&self) -> Option<PathBuf> {
        self.paths.lock().as_ref().map(|b| b.input_path.clone())
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.paths.lock().as_ref().map(|b| b.output_path.clone())
    }

    pub fn pipe_path(&self) -> Option<PathBuf> {
        self.paths.lock().as_ref().map(|b| b.pipe_path.clone())
    }

    /// Run a statement on the reserved cancel connection. Holds only the
    /// cancel lock, so it proceeds while an execute owns the main lock.
    pub async fn run_on_cancel_conn(&self, text: &str) -> Result<(), ShimError> {
        let mut guard = self.cancel_conn.lock().await;
        let conn = guard.as_mut().ok_or(ShimError::UnknownSession)?;
        conn.execute(text, QueryId::default())
            .await
            .map_err(ShimError::from)
    }

    /// Tear the slot down under an already-held main lock: disconnect both
    /// connections, drop readers, unlink buffers, reset bookkeeping, mark
    /// AVAILABLE.
    pub async fn cleanup_locked(&self, inner: &mut SlotInner) {
        if let Some(mut conn) = inner.control.take() {
            let _ = conn.disconnect().await;
        }
        if let Some(mut conn) = self.cancel_conn.lock().await.take() {
            let _ = conn.disconnect().await;
        }
        inner.out_file = None;
        inner.out_lines = None;
        inner.save_mode = SaveMode::None;
        inner.stream = false;
        inner.compression = -1;
        self.set_qid(QueryId::default());
        if let Some(buffers) = self.paths.lock().take() {
            buffers.remove();
        }
        *self.id.lock() = AVAILABLE_ID.to_string();
        self.last_touched.store(0, Ordering::SeqCst);
        self.available.store(true, Ordering::SeqCst);
    }

    pub async fn cleanup(&self) {
        let mut inner = self.inner.lock().await;
        self.cleanup_locked(&mut inner).await;
    }

    /// Unlink this slot's buffers without touching any async lock. Used by
    /// the termination path only, where waiting on a lock could deadlock
    /// against a hung backend call.
    pub fn cleanup_files_only(&self) {
        if let Some(buffers) = self.paths.lock().take() {
            buffers.remove();
        }
    }
}

pub struct SessionManager {
    slots: Box<[Arc<SessionSlot>]>,
    alloc_lock: AsyncMutex<()>,
    connector: Arc<dyn Connector>,
}

impl SessionManager {
    pub fn new(max_sessions: usize, connector: Arc<dyn Connector>) -> SessionManager {
        let slots = (0..max_sessions)
            .map(|index| Arc::new(SessionSlot::new(index)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        SessionManager {
            slots,
            alloc_lock: AsyncMutex::new(()),
            connector,
        }
    }

    pub fn slots(&self) -> &[Arc<SessionSlot>] {
        &self.slots
    }

    pub fn live_sessions(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_available()).count()
    }

    /// Allocate a session: an AVAILABLE slot if any, else an orphan past its
    /// timeout. Runs under the global lock. An in-flight operation holds
    /// `last_touched` a week in the future, so it can never be reaped.
    pub async fn allocate(
        &self,
        user: &str,
        password: &str,
    ) -> Result<Arc<SessionSlot>, ShimError> {
        let _guard = self.alloc_lock.lock().await;

        if let Some(slot) = self.slots.iter().find(|s| s.is_available()) {
            return self.initialise(slot.clone(), user, password).await;
        }

        let timeout = get_config().general.session_timeout as i64;
        for slot in self.slots.iter() {
            if slot.is_available() || now_secs() - slot.last_touched() <= timeout {
                continue;
            }
            let mut inner = slot.inner.lock().await;
            // Re-check after taking the lock: the operation we raced with
            // has touched the slot by now.
            if slot.is_available() || now_secs() - slot.last_touched() <= timeout {
                continue;
            }
            warn!(
                "Reaping orphaned session {} from slot {}",
                slot.session_id(),
                slot.index
            );
            slot.cleanup_locked(&mut inner).await;
            drop(inner);
            return self.initialise(slot.clone(), user, password).await;
        }

        Err(ShimError::OutOfSessions)
    }

    /// Find an UNAVAILABLE slot by its id. Linear scan; the pool is small.
    pub fn lookup(&self, id: &str) -> Option<Arc<SessionSlot>> {
        if id == AVAILABLE_ID {
            return None;
        }
        self.slots
            .iter()
            .find(|slot| !slot.is_available() && *slot.id.lock() == id)
            .cloned()
    }

    /// Disconnect, clean up and mark the slot AVAILABLE.
    pub async fn release(&self, slot: &SessionSlot) {
        info!("Releasing session {} (slot {})", slot.session_id(), slot.index);
        slot.cleanup().await;
    }

    /// Best-effort unlink of every slot's buffers; see
    /// [`SessionSlot::cleanup_files_only`].
    pub fn cleanup_all_files(&self) {
        for slot in self.slots.iter() {
            slot.cleanup_files_only();
        }
    }

    async fn initialise(
        &self,
        slot: Arc<SessionSlot>,
        user: &str,
        password: &str,
    ) -> Result<Arc<SessionSlot>, ShimError> {
        let id = self.generate_id();
        slot.available.store(false, Ordering::SeqCst);
        *slot.id.lock() = id.clone();
        slot.touch();

        let config = get_config();
        let result: Result<(), ShimError> = async {
            let buffers = SessionBuffers::create(Path::new(&config.general.tmp_dir), &id)?;
            *slot.paths.lock() = Some(buffers);

            let control = self
                .connector
                .connect(
                    &config.general.scidb_host,
                    config.general.scidb_port,
                    user,
                    password,
                )
                .await?;
            slot.inner.lock().await.control = Some(control);

            let cancel = self
                .connector
                .connect(
                    &config.general.scidb_host,
                    config.general.scidb_port,
                    user,
                    password,
                )
                .await?;
            *slot.cancel_conn.lock().await = Some(cancel);
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                info!("New session {id} in slot {}", slot.index);
                Ok(slot)
            }
            Err(err) => {
                slot.cleanup().await;
                Err(err)
            }
        }
    }

    /// Draw 32 chars from `[0-9a-z]` until the result collides with no
    /// other slot's id. Ids are capabilities only within this process and
    /// for the session's lifetime; cryptographic quality is not required.
    fn generate_id(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let id: String = (0..SESSION_ID_LEN)
                .map(|_| ID_CHARSET[rng.random_range(0..ID_CHARSET.len())] as char)
                .collect();
            if !self.slots.iter().any(|slot| *slot.id.lock() == id) {
                return id;
            }
        }
    }

    /// Per-slot state dump for the debug endpoint.
    pub fn debug_snapshot(&self) -> serde_json::Value {
        let slots: Vec<serde_json::Value> = self
            .slots
            .iter()
            .map(|slot| {
                serde_json::json!({
                    "slot": slot.index,
                    "available": slot.is_available(),
                    "id": slot.session_id(),
                    "qid": slot.qid().to_string(),
                    "last_touched": slot.last_touched(),
                })
            })
            .collect();
        serde_json::json!({ "sessions": slots })
    }
}
