//! Endpoint handlers. Each resolves its session, takes the locks it needs,
//! and maps failures through `ShimError`'s status table.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use log::{error, info};
use serde_derive::Deserialize;
use tokio::io::AsyncWriteExt;

use super::AppState;
use crate::backend_log;
use crate::config::{get_config, VERSION};
use crate::errors::ShimError;
use crate::query;
use crate::session::{read, SessionSlot};

#[derive(Deserialize)]
pub struct NewSessionParams {
    user: Option<String>,
    password: Option<String>,
}

pub async fn new_session(
    State(state): State<AppState>,
    Query(params): Query<NewSessionParams>,
) -> Result<Response, ShimError> {
    let config = get_config();
    let user = params.user.unwrap_or(config.general.default_user);
    let password = params.password.unwrap_or(config.general.default_password);

    let slot = state.manager.allocate(&user, &password).await?;
    Ok(slot.session_id().into_response())
}

#[derive(Deserialize)]
pub struct IdParams {
    id: Option<String>,
}

fn resolve(state: &AppState, id: &Option<String>) -> Result<Arc<SessionSlot>, ShimError> {
    let id = id.as_deref().ok_or(ShimError::MissingArg("id"))?;
    state.manager.lookup(id).ok_or(ShimError::UnknownSession)
}

pub async fn release_session(
    State(state): State<AppState>,
    Query(params): Query<IdParams>,
) -> Result<Response, ShimError> {
    let slot = resolve(&state, &params.id)?;
    state.manager.release(&slot).await;
    Ok(().into_response())
}

#[derive(Deserialize)]
pub struct ExecuteParams {
    id: Option<String>,
    query: Option<String>,
    save: Option<String>,
    release: Option<String>,
    prefix: Option<String>,
    // Accepted for interface compatibility; credentials only matter at
    // /new_session.
    #[allow(dead_code)]
    user: Option<String>,
    #[allow(dead_code)]
    password: Option<String>,
}

pub async fn execute_query(
    State(state): State<AppState>,
    Query(params): Query<ExecuteParams>,
) -> Result<Response, ShimError> {
    let slot = resolve(&state, &params.id)?;
    let query_text = params.query.ok_or(ShimError::MissingArg("query"))?;

    let release = params
        .release
        .as_deref()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(0)
        > 0;

    let request = query::ExecuteRequest {
        query: query_text,
        save: params.save,
        prefix: params.prefix,
        release,
    };

    match query::execute_query(&slot, request).await {
        Ok(query_number) => Ok(query_number.to_string().into_response()),
        Err(err) => {
            error!(
                "Session {} query failed ({}): {err}",
                slot.session_id(),
                err.status()
            );
            Err(err)
        }
    }
}

pub async fn cancel(
    State(state): State<AppState>,
    Query(params): Query<IdParams>,
) -> Result<Response, ShimError> {
    let slot = resolve(&state, &params.id)?;
    info!("Cancelling query {} on session {}", slot.qid(), slot.session_id());
    query::cancel(&slot).await?;
    slot.touch();
    Ok(().into_response())
}

pub async fn upload(
    State(state): State<AppState>,
    Query(params): Query<IdParams>,
    body: Body,
) -> Result<Response, ShimError> {
    let slot = resolve(&state, &params.id)?;
    let mut inner = slot.inner.lock().await;
    let path = slot
        .input_path()
        .ok_or_else(|| ShimError::Server("session has no buffers".to_string()))?;

    slot.touch_in_flight();
    let result = {
        let guard = scopeguard::guard((), |()| slot.touch());
        let result = write_body(&path, body).await;
        drop(guard);
        result
    };

    let written = match result {
        Ok(written) => written,
        Err(err) => {
            if err.invalidates_session() {
                slot.cleanup_locked(&mut inner).await;
            }
            return Err(err);
        }
    };

    match written {
        0 => Err(ShimError::EmptyUpload),
        written => {
            info!(
                "Uploaded {written} bytes into {} for session {}",
                path.display(),
                slot.session_id()
            );
            Ok(path.to_string_lossy().into_owned().into_response())
        }
    }
}

async fn write_body(path: &std::path::Path, body: Body) -> Result<u64, ShimError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = body.into_data_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|err| ShimError::Server(format!("upload body read failed: {err}")))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[derive(Deserialize)]
pub struct ReadParams {
    id: Option<String>,
    n: Option<String>,
}

impl ReadParams {
    /// `n` defaults to 0, which means "the whole file".
    fn count(&self) -> i64 {
        self.n
            .as_deref()
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(0)
    }
}

pub async fn read_bytes(
    State(state): State<AppState>,
    Query(params): Query<ReadParams>,
) -> Result<Response, ShimError> {
    let slot = resolve(&state, &params.id)?;
    let mut inner = slot.inner.lock().await;
    let result = read::read_bytes(&slot, &mut inner, params.count()).await;
    slot.touch();
    match result {
        Ok(bytes) => Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response()),
        Err(err) => {
            if err.invalidates_session() {
                slot.cleanup_locked(&mut inner).await;
            }
            Err(err)
        }
    }
}

pub async fn read_lines(
    State(state): State<AppState>,
    Query(params): Query<ReadParams>,
) -> Result<Response, ShimError> {
    let slot = resolve(&state, &params.id)?;
    let mut inner = slot.inner.lock().await;
    let result = read::read_lines(&slot, &mut inner, params.count()).await;
    slot.touch();
    match result {
        Ok(lines) => Ok((
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            lines,
        )
            .into_response()),
        Err(err) => {
            if err.invalidates_session() {
                slot.cleanup_locked(&mut inner).await;
            }
            Err(err)
        }
    }
}

pub async fn version() -> Response {
    VERSION.into_response()
}

pub async fn get_log() -> Response {
    backend_log::tail().await.into_response()
}

#[cfg(debug_assertions)]
pub async fn debug(State(state): State<AppState>) -> Response {
    axum::Json(state.manager.debug_snapshot()).into_response()
}
