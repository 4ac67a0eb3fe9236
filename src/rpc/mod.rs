//! HTTP/JSON surface: load files, start runs, read results.
//!
//! ```text
//! POST   /v1/files                      {files:[{name, contents}]} -> {run_handle}
//! DELETE /v1/files/{run_handle}
//! POST   /v1/runs/{run_handle}          {vectors:[..]}             -> {result_handle}
//! POST   /v1/results/{handle}/read                                 -> {more, scale, data}
//! POST   /v1/results/{handle}/read_all                             -> {more: false, scale, data}
//! DELETE /v1/results/{handle}
//! ```

pub mod routes;
pub mod staging;
pub mod wire;

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use serde_json::json;
use uuid::Uuid;

use crate::error::OhmserveError;
use crate::stream::{ResultCursor, RunController};

pub use routes::router;
pub use staging::StagedRun;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug)]
pub struct RpcError {
    pub status: StatusCode,
    pub message: String,
}

impl RpcError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn setup(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RpcError {}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<OhmserveError> for RpcError {
    fn from(err: OhmserveError) -> Self {
        match err {
            OhmserveError::Setup(msg) => Self::setup(msg),
            _ => Self::internal(err.to_string()),
        }
    }
}

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    controller: RunController,
    work_dir: PathBuf,
    runs: DashMap<Uuid, StagedRun>,
    results: DashMap<Uuid, Arc<Mutex<ResultCursor>>>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("work_dir", &self.inner.work_dir)
            .field("runs", &self.inner.runs.len())
            .field("results", &self.inner.results.len())
            .finish()
    }
}

impl AppState {
    pub fn new(controller: RunController, work_dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(Inner {
                controller,
                work_dir,
                runs: DashMap::new(),
                results: DashMap::new(),
            }),
        }
    }

    pub fn work_dir(&self) -> &std::path::Path {
        &self.inner.work_dir
    }

    /// Run handles whose files are still staged.
    pub fn open_runs(&self) -> usize {
        self.inner.runs.len()
    }

    /// The cursor behind a result handle. Reads serialize on its mutex.
    pub fn result(&self, handle: Uuid) -> Option<Arc<Mutex<ResultCursor>>> {
        self.inner
            .results
            .get(&handle)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Result handles currently held open.
    pub fn open_results(&self) -> usize {
        self.inner.results.len()
    }
}
