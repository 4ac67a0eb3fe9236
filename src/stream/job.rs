//! A single run of an engine and the channels it writes into.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::{AnalysisKind, Channel, SelectionLatch, StreamLimits};
use crate::engine::{Engine, OutputSink};
use crate::error::{OhmserveError, Result};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owns one channel per [`AnalysisKind`] and runs the engine exactly once.
pub struct Job {
    id: JobId,
    channels: Arc<[Arc<Channel>]>,
    engine: Mutex<Option<Box<dyn Engine>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

/// Finishes every channel when the worker exits, including by panic.
struct FinishOnExit(Arc<[Arc<Channel>]>);

impl Drop for FinishOnExit {
    fn drop(&mut self) {
        for channel in self.0.iter() {
            channel.finish();
        }
    }
}

impl Job {
    /// Create the job's channels and register each one with `engine` as an
    /// output sink requesting `vectors`.
    pub fn new(mut engine: Box<dyn Engine>, vectors: &[String], limits: StreamLimits) -> Self {
        let selection = SelectionLatch::default();
        let channels: Arc<[Arc<Channel>]> = AnalysisKind::ALL
            .iter()
            .map(|&kind| {
                Arc::new(Channel::new(
                    kind,
                    vectors.to_vec(),
                    limits,
                    selection.clone(),
                ))
            })
            .collect();

        for channel in channels.iter() {
            engine.add_output(Arc::clone(channel) as Arc<dyn OutputSink>);
        }

        Self {
            id: JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed)),
            channels,
            engine: Mutex::new(Some(engine)),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Channels in declaration order.
    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn channel(&self, kind: AnalysisKind) -> Option<&Arc<Channel>> {
        self.channels.iter().find(|c| c.kind() == kind)
    }

    /// First selected channel in declaration order.
    pub fn selected_channel(&self) -> Option<&Arc<Channel>> {
        self.channels.iter().find(|c| c.is_selected())
    }

    /// False once the engine has returned and every channel is finished.
    pub fn is_running(&self) -> bool {
        self.channels.iter().any(|c| c.is_running())
    }

    /// Spawn the worker thread and return immediately.
    ///
    /// The worker runs the engine to completion and then finishes every
    /// channel. Engine errors are logged, never returned to the poller.
    pub fn start(&self) -> Result<()> {
        let mut engine = self
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| OhmserveError::Analysis(format!("job {} already started", self.id)))?;

        let span = tracing::info_span!("job", id = %self.id);
        let finisher = FinishOnExit(Arc::clone(&self.channels));
        let handle = thread::Builder::new()
            .name(format!("ohmserve-job-{}", self.id))
            .spawn(move || {
                let _span = span.entered();
                let _finisher = finisher;
                tracing::info!("run started");
                match engine.run() {
                    Ok(()) => tracing::info!("run complete"),
                    Err(e) => tracing::error!(error = %e, "run aborted"),
                }
            })?;

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Block until the worker exits. Returns false if it panicked.
    pub fn wait(&self) -> bool {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        handle.map_or(true, |h| h.join().is_ok())
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        let handle = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.is_finished() {
                if handle.join().is_err() {
                    tracing::error!(job = %self.id, "worker panicked");
                }
            } else {
                // The worker owns its engine and channel handles and
                // releases them when the run completes.
                tracing::debug!(job = %self.id, "released while running, detaching worker");
            }
        }
    }
}
