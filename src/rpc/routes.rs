//! Route table and handlers.

use std::sync::{Arc, Mutex, TryLockError};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::wire::{LoadFilesRequest, LoadFilesResponse, ReadResponse, RunRequest, RunResponse};
use super::{staging, AppState, RpcError, RpcResult};
use crate::stream::ResultCursor;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/files", post(load_files))
        .route("/v1/files/{run_handle}", delete(unload_files))
        .route("/v1/runs/{run_handle}", post(run))
        .route("/v1/results/{result_handle}/read", post(read))
        .route("/v1/results/{result_handle}/read_all", post(read_all))
        .route("/v1/results/{result_handle}", delete(release))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn load_files(
    State(state): State<AppState>,
    Json(req): Json<LoadFilesRequest>,
) -> RpcResult<Json<LoadFilesResponse>> {
    let handle = Uuid::new_v4();
    let staged = staging::stage(&state.inner.work_dir, handle, &req.files).await?;
    state.inner.runs.insert(handle, staged);
    tracing::info!(run = %handle, files = req.files.len(), "files loaded");
    Ok(Json(LoadFilesResponse { run_handle: handle }))
}

/// Forget a run handle and delete its staged files. Results already
/// started from it keep running; their engines hold everything they need.
async fn unload_files(
    State(state): State<AppState>,
    Path(run_handle): Path<Uuid>,
) -> RpcResult<StatusCode> {
    let (_, staged) = state
        .inner
        .runs
        .remove(&run_handle)
        .ok_or_else(|| RpcError::not_found(format!("unknown run handle {run_handle}")))?;
    tokio::fs::remove_dir_all(&staged.dir).await.map_err(|e| {
        RpcError::internal(format!("cannot remove {}: {e}", staged.dir.display()))
    })?;
    tracing::info!(run = %run_handle, "files unloaded");
    Ok(StatusCode::NO_CONTENT)
}

async fn run(
    State(state): State<AppState>,
    Path(run_handle): Path<Uuid>,
    Json(req): Json<RunRequest>,
) -> RpcResult<Json<RunResponse>> {
    let input = state
        .inner
        .runs
        .get(&run_handle)
        .map(|staged| staged.primary.clone())
        .ok_or_else(|| RpcError::not_found(format!("unknown run handle {run_handle}")))?;

    // Setup reads and parses the input; keep it off the async workers.
    let worker_state = state.clone();
    let cursor = tokio::task::spawn_blocking(move || {
        worker_state.inner.controller.start(&input, &req.vectors)
    })
    .await
    .map_err(|e| RpcError::internal(format!("setup task failed: {e}")))?
    .map_err(|e| {
        tracing::warn!(run = %run_handle, error = %e, "run rejected");
        RpcError::from(e)
    })?;

    let result_handle = Uuid::new_v4();
    tracing::info!(run = %run_handle, result = %result_handle, job = %cursor.job_id(), "run started");
    state
        .inner
        .results
        .insert(result_handle, Arc::new(Mutex::new(cursor)));
    Ok(Json(RunResponse { result_handle }))
}

fn result_cursor(state: &AppState, result_handle: Uuid) -> RpcResult<Arc<Mutex<ResultCursor>>> {
    state
        .result(result_handle)
        .ok_or_else(|| RpcError::not_found(format!("unknown result handle {result_handle}")))
}

fn busy(result_handle: Uuid) -> RpcError {
    RpcError::conflict(format!("a read on {result_handle} is already in progress"))
}

async fn read(
    State(state): State<AppState>,
    Path(result_handle): Path<Uuid>,
) -> RpcResult<Json<ReadResponse>> {
    let cursor = result_cursor(&state, result_handle)?;
    let batch = match cursor.try_lock() {
        Ok(mut cursor) => cursor.poll(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().poll(),
        Err(TryLockError::WouldBlock) => return Err(busy(result_handle)),
    };
    Ok(Json(ReadResponse::from(batch)))
}

/// Wait for the run to finish, then return everything not yet read.
async fn read_all(
    State(state): State<AppState>,
    Path(result_handle): Path<Uuid>,
) -> RpcResult<Json<ReadResponse>> {
    let cursor = result_cursor(&state, result_handle)?;
    // The cursor stays locked while the worker is joined, so other reads
    // on this handle get 409 rather than racing for the tail.
    let batch = tokio::task::spawn_blocking(move || {
        let mut cursor = match cursor.try_lock() {
            Ok(cursor) => cursor,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(busy(result_handle)),
        };
        if !cursor.job().wait() {
            tracing::warn!(result = %result_handle, "worker panicked, returning what it produced");
        }
        Ok(cursor.poll())
    })
    .await
    .map_err(|e| RpcError::internal(format!("read task failed: {e}")))??;
    Ok(Json(ReadResponse::from(batch)))
}

async fn release(
    State(state): State<AppState>,
    Path(result_handle): Path<Uuid>,
) -> RpcResult<StatusCode> {
    state
        .inner
        .results
        .remove(&result_handle)
        .ok_or_else(|| RpcError::not_found(format!("unknown result handle {result_handle}")))?;
    tracing::debug!(result = %result_handle, "result handle released");
    Ok(StatusCode::NO_CONTENT)
}
