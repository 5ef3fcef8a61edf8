//! Query executor: rewrites incoming query text into a save-wrapped form,
//! runs optional prefix statements, and drives prepare/execute/complete on
//! the session's control connection.

use log::debug;

use crate::backend::Connection;
use crate::config::get_config;
use crate::errors::ShimError;
use crate::session::{SaveMode, SessionSlot};


/// Parameters of one /execute_query call, already extracted from the URL.
#[derive(Debug, Default)]
pub struct ExecuteRequest {
    pub query: String,
    pub save: Option<String>,
    pub prefix: Option<String>,
    pub release: bool,
}

/// Formats that go through aio_save() when the aio policy is on.
fn aio_eligible(save: &str) -> bool {
    save.starts_with('(') || save == "csv+" || save == "lcsv+" || save == "arrow"
}

/// Binary iff the format is a template like `(int64,...)` or arrow;
/// everything else (csv, tsv, lcsv+, ...) is text.
fn save_mode_of(save: &str) -> SaveMode {
    if save.starts_with('(') || save == "arrow" {
        SaveMode::Binary
    } else {
        SaveMode::Text
    }
}

/// Wrap the user query so its result lands in `target`.
fn rewrite_save(query: &str, save: &str, target: &str, instance: u64, use_aio: bool) -> String {
    if use_aio && aio_eligible(save) {
        format!("aio_save({query},'path={target}','instance={instance}','format={save}')")
    } else {
        format!("save({query},'{target}',{instance},'{save}')")
    }
}

/// Run the whole execute pipeline for one session. Takes the main slot
/// lock, so it serialises with every other operation on this session; a
/// concurrent `/cancel` still proceeds on the reserved connection.
/// Returns the backend-assigned query number.
pub async fn execute_query(
    slot: &SessionSlot,
    request: ExecuteRequest,
) -> Result<u64, ShimError> {
    let mut inner = slot.inner.lock().await;
    let config = get_config();

    let mut text = request.query.clone();
    if let Some(save) = request.save.as_deref() {
        let buffers = slot
            .buffers()
            .ok_or_else(|| ShimError::Server("session has no buffers".to_string()))?;
        let target = if inner.stream {
            buffers.pipe_path
        } else {
            buffers.output_path
        };
        text = rewrite_save(
            &request.query,
            save,
            &target.to_string_lossy(),
            config.general.save_instance_id,
            config.general.use_aio,
        );
        // A save never downgrades the mode to NONE, so output from an
        // earlier query stays readable after executes without one.
        inner.save_mode = save_mode_of(save);
        // Fresh output incoming: the next read must start from offset 0.
        inner.out_file = None;
        inner.out_lines = None;
    }

    let control = inner
        .control
        .as_mut()
        .ok_or_else(|| ShimError::Server("session has no backend connection".to_string()))?;

    debug!("Session {} executing: {text}", slot.session_id());

    // Shield the slot from the reaper for the duration, then record real
    // activity no matter how the backend call ends.
    slot.touch_in_flight();
    let result = {
        let guard = scopeguard::guard((), |()| slot.touch());
        let result = run_pipeline(control.as_mut(), slot, &text, request.prefix.as_deref()).await;
        drop(guard);
        result
    };

    match result {
        Ok(query) => {
            if request.release {
                slot.cleanup_locked(&mut inner).await;
            }
            Ok(query)
        }
        Err(err) => {
            if err.invalidates_session() {
                slot.cleanup_locked(&mut inner).await;
            }
            Err(err)
        }
    }
}

async fn run_pipeline(
    control: &mut dyn Connection,
    slot: &SessionSlot,
    text: &str,
    prefix: Option<&str>,
) -> Result<u64, ShimError> {
    // Prefix statements run first, split literally on ';' (no quoting
    // awareness, same as the query language's own loaders expect).
    if let Some(prefix) = prefix {
        for fragment in prefix.split(';') {
            let fragment = fragment.trim();
            if fragment.is_empty() {
                continue;
            }
            let qid = control.prepare(fragment).await?;
            control.execute(fragment, qid).await?;
            control.complete(qid).await?;
        }
    }

    let qid = control.prepare(text).await?;
    // Visible to /cancel from here on.
    slot.set_qid(qid);
    control.execute(text, qid).await?;
    control.complete(qid).await?;
    Ok(qid.query)
}

/// Cancel the session's current query from the reserved connection. Does
/// not release the session; that stays with the owner.
pub async fn cancel(slot: &SessionSlot) -> Result<(), ShimError> {
    let qid = slot.qid();
    if !qid.is_active() {
        return Err(ShimError::NoActiveQuery);
    }
    slot.run_on_cancel_conn(&format!("cancel('{qid}')")).await
}
