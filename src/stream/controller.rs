//! Entry point that turns an input document into a running job.

use std::path::Path;
use std::sync::Arc;

use super::{Job, ResultCursor, StreamLimits};
use crate::engine::EngineFactory;
use crate::error::Result;

pub struct RunController {
    factory: Box<dyn EngineFactory>,
    limits: StreamLimits,
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl RunController {
    pub fn new(factory: Box<dyn EngineFactory>, limits: StreamLimits) -> Self {
        Self { factory, limits }
    }

    pub fn limits(&self) -> StreamLimits {
        self.limits
    }

    /// Initialize the engine on `input`, start a job requesting `vectors`
    /// and return a cursor over it.
    ///
    /// Setup failures are returned here and no job is created. Once this
    /// returns `Ok`, the engine runs in the background and later failures
    /// only end the stream.
    pub fn start(&self, input: &Path, vectors: &[String]) -> Result<ResultCursor> {
        let engine = self.factory.create(input)?;
        let job = Arc::new(Job::new(engine, vectors, self.limits));
        job.start()?;
        tracing::info!(job = %job.id(), input = %input.display(), vectors = vectors.len(), "job started");
        Ok(ResultCursor::new(job))
    }
}
