//! The consumer side of a job.

use std::sync::Arc;

use super::{AnalysisKind, Job, JobId, ResultBatch};

/// Polls one job. Every sample the engine produced is delivered by exactly
/// one call to [`poll`](Self::poll), in production order.
#[derive(Debug)]
pub struct ResultCursor {
    job: Arc<Job>,
    polls: u64,
    delivered: usize,
}

impl ResultCursor {
    pub fn new(job: Arc<Job>) -> Self {
        Self {
            job,
            polls: 0,
            delivered: 0,
        }
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn job_id(&self) -> JobId {
        self.job.id()
    }

    /// Category the engine selected, once it has announced its fields.
    pub fn selected_kind(&self) -> Option<AnalysisKind> {
        self.job.selected_channel().map(|c| c.kind())
    }

    /// Drain everything buffered since the previous poll.
    ///
    /// Returns an empty batch with `more = true` while the engine has not
    /// selected a channel yet. Once `more` is false, later polls return empty
    /// batches with `more = false`.
    pub fn poll(&mut self) -> ResultBatch {
        self.polls += 1;
        // Sample the running flag before looking for a selection: a job seen
        // finished here has already announced whatever it was going to.
        let running = self.job.is_running();
        let batch = match self.job.selected_channel() {
            Some(channel) => channel.drain_all(),
            None => ResultBatch::empty(running),
        };
        self.delivered += batch.sample_count();
        tracing::debug!(
            job = %self.job.id(),
            poll = self.polls,
            samples = batch.sample_count(),
            more = batch.more,
            "poll"
        );
        batch
    }

    /// Samples handed out so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }
}
