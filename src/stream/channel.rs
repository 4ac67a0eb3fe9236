//! One analysis category's output buffer.
//!
//! The producer thread appends, the poller drains. All mutable state sits
//! behind a single mutex so a drain observes either the state before an
//! append or after it, never a sample written to only some fields.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use num_complex::Complex64;

use super::{AnalysisKind, FieldData, ResultBatch, Series, StepData, StreamLimits};
use crate::engine::OutputSink;
use crate::error::InvariantError;

/// Records which channel of a job was selected first. Shared by all of a
/// job's channels so that at most one of them can ever be selected.
pub type SelectionLatch = Arc<OnceLock<AnalysisKind>>;

#[derive(Debug)]
pub struct Channel {
    kind: AnalysisKind,
    requested: Vec<String>,
    limits: StreamLimits,
    selection: SelectionLatch,
    state: Mutex<ChannelState>,
}

#[derive(Debug)]
struct ChannelState {
    selected: bool,
    running: bool,
    fields: Vec<String>,
    /// `steps[step][field]`; `None` until the field's first sample fixes its type.
    steps: Vec<Vec<Option<Series>>>,
    /// Producer cursor set through `new_step`.
    current_step: usize,
    announced_steps: usize,
    buffered: usize,
}

impl Channel {
    pub fn new(
        kind: AnalysisKind,
        requested: Vec<String>,
        limits: StreamLimits,
        selection: SelectionLatch,
    ) -> Self {
        Self {
            kind,
            requested,
            limits,
            selection,
            state: Mutex::new(ChannelState {
                selected: false,
                running: true,
                fields: Vec::new(),
                steps: Vec::new(),
                current_step: 0,
                announced_steps: 1,
                buffered: 0,
            }),
        }
    }

    /// Standalone channel with its own selection latch.
    pub fn detached(kind: AnalysisKind, requested: Vec<String>) -> Self {
        Self::new(kind, requested, StreamLimits::default(), SelectionLatch::default())
    }

    pub fn kind(&self) -> AnalysisKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    // A panic while holding the lock cannot leave the state half-updated:
    // every mutation is validated before the first write.
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_selected(&self) -> bool {
        self.lock().selected
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn field_names(&self) -> Vec<String> {
        self.lock().fields.clone()
    }

    /// Fix the field layout and step count and mark the channel selected.
    ///
    /// Announcing the same layout twice is a no-op. Any other second
    /// announcement is rejected, as is selecting a second channel of a job.
    /// A buffer limit smaller than one sample is reported here, before the
    /// channel is selected.
    pub fn announce_fields(&self, names: &[String], numsteps: usize) -> Result<(), InvariantError> {
        let numsteps = numsteps.max(1);
        let mut state = self.lock();

        if state.selected {
            if state.fields == names && state.steps.len() == numsteps {
                return Ok(());
            }
            return Err(InvariantError::Reannounced {
                channel: self.name().to_string(),
            });
        }

        if let Some(limit) = self.limits.max_buffered_samples {
            if limit < names.len() {
                return Err(InvariantError::LimitBelowFieldCount {
                    channel: self.name().to_string(),
                    limit,
                    fields: names.len(),
                });
            }
        }

        let winner = *self.selection.get_or_init(|| self.kind);
        if winner != self.kind {
            return Err(InvariantError::SecondSelection {
                channel: self.name().to_string(),
                selected: winner.name().to_string(),
            });
        }

        state.selected = true;
        state.fields = names.to_vec();
        state.steps = vec![vec![None; names.len()]; numsteps];
        tracing::debug!(channel = self.name(), fields = ?names, numsteps, "fields announced");
        Ok(())
    }

    pub fn append_real(&self, step: usize, values: &[f64]) -> Result<(), InvariantError> {
        self.append(step, values, |v| Series::Real(v.to_vec()), |series, v| match series {
            Series::Real(buf) => {
                buf.extend_from_slice(v);
                true
            }
            Series::Complex(_) => false,
        })
    }

    pub fn append_complex(&self, step: usize, values: &[Complex64]) -> Result<(), InvariantError> {
        self.append(step, values, |v| Series::Complex(v.to_vec()), |series, v| match series {
            Series::Complex(buf) => {
                buf.extend_from_slice(v);
                true
            }
            Series::Real(_) => false,
        })
    }

    /// Push `values[i]` onto field `i` of `step`. Validates the whole sample
    /// before touching any series.
    fn append<T: Copy>(
        &self,
        step: usize,
        values: &[T],
        create: impl Fn(&[T]) -> Series,
        extend: impl Fn(&mut Series, &[T]) -> bool,
    ) -> Result<(), InvariantError> {
        let attempted = create(&[]).kind_name();
        let mut state = self.lock();
        let channel = || self.name().to_string();

        if !state.selected {
            return Err(InvariantError::NotAnnounced { channel: channel() });
        }
        if values.len() != state.fields.len() {
            return Err(InvariantError::FieldCountMismatch {
                channel: channel(),
                expected: state.fields.len(),
                got: values.len(),
            });
        }
        let numsteps = state.steps.len();
        if step >= numsteps {
            return Err(InvariantError::StepOutOfRange {
                channel: channel(),
                step,
                numsteps,
            });
        }
        if let Some(pos) = state.steps[step]
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.kind_name() != attempted))
        {
            return Err(InvariantError::KindMismatch {
                channel: channel(),
                field: state.fields[pos].clone(),
                existing: if attempted == "real" { "complex" } else { "real" },
                attempted,
            });
        }
        if let Some(limit) = self.limits.max_buffered_samples {
            if state.buffered + values.len() > limit {
                return Err(InvariantError::BufferLimit {
                    channel: channel(),
                    limit,
                });
            }
        }

        for (slot, value) in state.steps[step].iter_mut().zip(values) {
            let sample = std::slice::from_ref(value);
            match slot {
                Some(series) => {
                    let extended = extend(series, sample);
                    debug_assert!(extended, "kind checked above");
                }
                None => *slot = Some(create(sample)),
            }
        }
        state.buffered += values.len();
        Ok(())
    }

    /// Mark the producer as done. Irreversible and idempotent.
    pub fn finish(&self) {
        let mut state = self.lock();
        if state.running {
            state.running = false;
            tracing::debug!(channel = self.name(), "channel finished");
        }
    }

    /// Take every buffered sample, leaving the step/field layout in place.
    ///
    /// `more` reflects the running flag read under the same lock, so the
    /// batch that carries the last samples is also the one that says
    /// `more = false` once the producer has finished.
    pub fn drain_all(&self) -> ResultBatch {
        let mut state = self.lock();
        let state = &mut *state;

        if !state.selected {
            return ResultBatch::empty(state.running);
        }

        let steps = state
            .steps
            .iter_mut()
            .enumerate()
            .map(|(index, slots)| StepData {
                name: format!("{}{}", self.name(), index),
                fields: state
                    .fields
                    .iter()
                    .zip(slots.iter_mut())
                    .filter_map(|(name, slot)| {
                        let series = match slot.as_mut()? {
                            Series::Real(buf) => Series::Real(std::mem::take(buf)),
                            Series::Complex(buf) => Series::Complex(std::mem::take(buf)),
                        };
                        Some(FieldData {
                            name: name.clone(),
                            series,
                        })
                    })
                    .collect(),
            })
            .collect();
        state.buffered = 0;

        ResultBatch {
            more: state.running,
            scale: state.fields.first().cloned(),
            steps,
        }
    }
}

impl OutputSink for Channel {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn kind(&self) -> AnalysisKind {
        self.kind
    }

    fn requested_outputs(&self) -> Vec<String> {
        self.requested.clone()
    }

    fn report_parse_status(&self, resolved: &[bool]) {
        for (field, ok) in self.requested.iter().zip(resolved) {
            if !ok {
                tracing::warn!(channel = self.name(), field = %field, "failed to parse requested output");
            }
        }
    }

    fn new_step(&self, step: usize, max_step: usize) {
        let mut state = self.lock();
        state.current_step = step;
        state.announced_steps = max_step;
    }

    fn output_field_names(&self, names: &[String]) -> Result<(), InvariantError> {
        let numsteps = self.lock().announced_steps;
        self.announce_fields(names, numsteps)
    }

    fn output_real(&self, values: &[f64]) -> Result<(), InvariantError> {
        let step = self.lock().current_step;
        self.append_real(step, values)
    }

    fn output_complex(&self, values: &[Complex64]) -> Result<(), InvariantError> {
        let step = self.lock().current_step;
        self.append_complex(step, values)
    }

    fn finish_output(&self) {
        self.finish();
    }
}
