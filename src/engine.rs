//! Boundary between a job and the simulation engine.
//!
//! The engine only ever sees [`OutputSink`]s. It announces fields on the one
//! sink matching the analysis it runs and pushes one sample per field at a
//! time. [`NetlistEngine`] is the built-in MNA engine; anything else that
//! speaks these traits can be plugged into a [`RunController`].
//!
//! [`RunController`]: crate::stream::RunController

use std::path::Path;
use std::sync::Arc;

use num_complex::Complex64;

use crate::analysis::{self, Emitter, FieldPlan};
use crate::compiler::{self, MnaSystem};
use crate::error::{InvariantError, OhmserveError, Result};
use crate::ir::{Analysis, SourceSweep};
use crate::parser;
use crate::stream::AnalysisKind;

/// Upper bound on the points of one sweep or transient output grid.
pub const MAX_SWEEP_POINTS: usize = 10_000_000;

/// Upper bound on `.STEP` values. Every step is allocated when fields are
/// announced, so this is much tighter than [`MAX_SWEEP_POINTS`].
pub const MAX_STEPS: usize = 100_000;

/// Receives one analysis category's output.
pub trait OutputSink: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> AnalysisKind;

    /// Output expressions the caller asked for, e.g. `V(1)`, `I(V1)`.
    fn requested_outputs(&self) -> Vec<String>;

    /// One flag per requested output, false where it could not be resolved.
    fn report_parse_status(&self, resolved: &[bool]);

    /// The engine is about to emit step `step` of `max_step`.
    fn new_step(&self, step: usize, max_step: usize);

    /// The resolved field layout. The first field is the independent variable.
    fn output_field_names(&self, names: &[String]) -> std::result::Result<(), InvariantError>;

    fn output_real(&self, values: &[f64]) -> std::result::Result<(), InvariantError>;

    fn output_complex(&self, values: &[Complex64]) -> std::result::Result<(), InvariantError>;

    fn finish_output(&self);
}

/// A prepared simulation. Parsing and initialization happen before a value of
/// this type exists, so `run` only fails on run-time problems.
pub trait Engine: Send + 'static {
    fn add_output(&mut self, sink: Arc<dyn OutputSink>);

    /// Run to completion, pushing results into the registered sinks.
    fn run(&mut self) -> Result<()>;
}

/// Builds engines from a staged input document.
pub trait EngineFactory: Send + Sync {
    /// Fails with [`OhmserveError::Setup`] if the document cannot be initialized.
    fn create(&self, input: &Path) -> Result<Box<dyn Engine>>;
}

/// Factory for [`NetlistEngine`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NetlistEngineFactory;

impl EngineFactory for NetlistEngineFactory {
    fn create(&self, input: &Path) -> Result<Box<dyn Engine>> {
        let text = std::fs::read_to_string(input).map_err(|e| {
            OhmserveError::Setup(format!("cannot read {}: {}", input.display(), e))
        })?;
        Ok(Box::new(NetlistEngine::from_netlist(&text)?))
    }
}

/// Built-in engine: parses a SPICE netlist and runs its analysis on the
/// dense MNA solver.
pub struct NetlistEngine {
    system: MnaSystem,
    analysis: Analysis,
    step: Option<SourceSweep>,
    numsteps: usize,
    /// The sink for `analysis`, with its resolved field layout.
    target: Option<(Arc<dyn OutputSink>, FieldPlan)>,
}

impl std::fmt::Debug for NetlistEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlistEngine")
            .field("analysis", &self.analysis)
            .field("step", &self.step)
            .field("size", &self.system.size)
            .finish_non_exhaustive()
    }
}

/// Category an analysis command writes into.
pub fn analysis_kind(analysis: &Analysis) -> AnalysisKind {
    match analysis {
        Analysis::Op => AnalysisKind::Op,
        Analysis::Dc(_) => AnalysisKind::Dc,
        Analysis::Ac { .. } => AnalysisKind::Ac,
        Analysis::Tran { .. } => AnalysisKind::Tran,
        Analysis::Noise { .. } => AnalysisKind::Noise,
    }
}

impl NetlistEngine {
    /// Parse, compile and validate. Every failure is a setup error.
    pub fn from_netlist(text: &str) -> Result<Self> {
        let setup = |e: OhmserveError| OhmserveError::Setup(e.to_string());
        let circuit = parser::parse(text).map_err(setup)?;
        let system = compiler::compile(&circuit).map_err(setup)?;

        let mut analyses = circuit.analyses.into_iter();
        let analysis = analyses
            .next()
            .ok_or_else(|| OhmserveError::Setup("netlist has no analysis command".into()))?;
        for ignored in analyses {
            tracing::warn!(analysis = ?ignored, "only the first analysis runs, ignoring");
        }

        if let Analysis::Noise { .. } = analysis {
            return Err(OhmserveError::Setup(
                "noise analysis is not supported by the built-in engine".into(),
            ));
        }
        for sweep in [circuit.step.as_ref(), dc_sweep(&analysis)].into_iter().flatten() {
            if !system.has_source(&sweep.source) {
                return Err(OhmserveError::Setup(format!(
                    "sweep references unknown source '{}'",
                    sweep.source
                )));
            }
        }

        let numsteps = match &circuit.step {
            Some(step) => bounded_count("step", step.point_count(), MAX_STEPS)?,
            None => 1,
        };
        let points = bounded_count("analysis", grid_points(&analysis), MAX_SWEEP_POINTS)?;

        tracing::info!(
            title = circuit.title.as_deref().unwrap_or(""),
            numsteps,
            points,
            nodes = system.n_nodes(),
            branches = system.branch_names.len(),
            kind = %analysis_kind(&analysis),
            "netlist initialised"
        );

        Ok(Self {
            system,
            analysis,
            step: circuit.step,
            numsteps,
            target: None,
        })
    }

    pub fn kind(&self) -> AnalysisKind {
        analysis_kind(&self.analysis)
    }

    fn step_count(&self) -> usize {
        self.numsteps
    }
}

/// Points an analysis will emit per step, `None` if unbounded.
fn grid_points(command: &Analysis) -> Option<usize> {
    match command {
        Analysis::Op | Analysis::Noise { .. } => Some(1),
        Analysis::Dc(sweep) => sweep.point_count(),
        Analysis::Ac {
            sweep_type,
            n_points,
            f_start,
            f_stop,
        } => analysis::ac::point_count(*sweep_type, *n_points, *f_start, *f_stop),
        Analysis::Tran { tstep, tstop, .. } => {
            let n = (tstop / tstep).ceil();
            (n.is_finite() && n >= 0.0 && n < usize::MAX as f64).then(|| n as usize + 1)
        }
    }
}

fn bounded_count(what: &str, count: Option<usize>, max: usize) -> Result<usize> {
    match count {
        Some(n) if n <= max => Ok(n),
        Some(n) => Err(OhmserveError::Setup(format!(
            "{what} sweep has {n} points, more than the limit of {max}"
        ))),
        None => Err(OhmserveError::Setup(format!(
            "{what} sweep point count is not finite"
        ))),
    }
}

fn dc_sweep(analysis: &Analysis) -> Option<&SourceSweep> {
    match analysis {
        Analysis::Dc(sweep) => Some(sweep),
        _ => None,
    }
}

impl Engine for NetlistEngine {
    fn add_output(&mut self, sink: Arc<dyn OutputSink>) {
        if sink.kind() != self.kind() {
            return;
        }
        if self.target.is_some() {
            tracing::warn!(sink = sink.name(), "second sink for the same analysis ignored");
            return;
        }
        let plan = FieldPlan::resolve(&self.system, &self.analysis, &sink.requested_outputs());
        sink.report_parse_status(&plan.resolved);
        self.target = Some((sink, plan));
    }

    fn run(&mut self) -> Result<()> {
        let Some((sink, plan)) = &self.target else {
            tracing::warn!(kind = %self.kind(), "no sink registered for analysis, nothing to do");
            return Ok(());
        };

        let numsteps = self.step_count();
        let step_values: Box<dyn Iterator<Item = Option<f64>> + '_> = match &self.step {
            Some(step) => Box::new(step.values().map(Some)),
            None => Box::new(std::iter::once(None)),
        };

        sink.new_step(0, numsteps);
        sink.output_field_names(&plan.names)?;

        for (index, value) in step_values.enumerate() {
            sink.new_step(index, numsteps);
            let overrides: Vec<(&str, f64)> = match (&self.step, value) {
                (Some(step), Some(v)) => vec![(step.source.as_str(), v)],
                _ => Vec::new(),
            };
            tracing::debug!(step = index, numsteps, "step started");

            let emit = Emitter::new(sink.as_ref(), plan);
            match &self.analysis {
                Analysis::Op => analysis::op::run(&self.system, &overrides, &emit)?,
                Analysis::Dc(sweep) => analysis::dc::run(&self.system, sweep, &overrides, &emit)?,
                Analysis::Ac {
                    sweep_type,
                    n_points,
                    f_start,
                    f_stop,
                } => analysis::ac::run(
                    &self.system,
                    *sweep_type,
                    *n_points,
                    *f_start,
                    *f_stop,
                    &emit,
                )?,
                Analysis::Tran {
                    tstep,
                    tstop,
                    tstart,
                    uic,
                } => analysis::transient::run(
                    &self.system,
                    &analysis::transient::TranParams {
                        tstep: *tstep,
                        tstop: *tstop,
                        tstart: *tstart,
                        uic: *uic,
                    },
                    &overrides,
                    &emit,
                )?,
                Analysis::Noise { .. } => {
                    return Err(OhmserveError::Analysis("noise analysis unsupported".into()))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_rejects_malformed_netlist() {
        let err = NetlistEngine::from_netlist("R1 1 0\n.OP").unwrap_err();
        assert!(matches!(err, OhmserveError::Setup(_)));
    }

    #[test]
    fn setup_rejects_missing_analysis() {
        let err = NetlistEngine::from_netlist("V1 1 0 1\nR1 1 0 1k").unwrap_err();
        assert!(err.to_string().contains("no analysis"));
    }

    #[test]
    fn setup_rejects_noise() {
        let err = NetlistEngine::from_netlist("V1 1 0 1\nR1 1 0 1k\n.NOISE V(1) V1 DEC 1 1 10")
            .unwrap_err();
        assert!(err.to_string().contains("noise"));
    }

    #[test]
    fn setup_rejects_unknown_sweep_source() {
        let err = NetlistEngine::from_netlist("V1 1 0 1\nR1 1 0 1k\n.DC V9 0 1 1").unwrap_err();
        assert!(err.to_string().contains("V9"));
        let err = NetlistEngine::from_netlist("V1 1 0 1\nR1 1 0 1k\n.OP\n.STEP V2 0 1 1")
            .unwrap_err();
        assert!(err.to_string().contains("V2"));
    }

    #[test]
    fn first_analysis_wins() {
        let engine =
            NetlistEngine::from_netlist("V1 1 0 1\nR1 1 0 1k\n.TRAN 1u 10u\n.OP").unwrap();
        assert_eq!(engine.kind(), AnalysisKind::Tran);
    }

    #[test]
    fn run_without_sink_is_a_noop() {
        let mut engine = NetlistEngine::from_netlist("V1 1 0 1\nR1 1 0 1k\n.OP").unwrap();
        engine.run().unwrap();
    }

    #[test]
    fn step_count_follows_step_sweep() {
        let engine =
            NetlistEngine::from_netlist("V1 1 0 1\nR1 1 0 1k\n.OP\n.STEP V1 1 4 1").unwrap();
        assert_eq!(engine.step_count(), 4);
    }

    #[test]
    fn setup_rejects_oversized_sweeps() {
        let err = NetlistEngine::from_netlist("V1 1 0 1\nR1 1 0 1k\n.OP\n.STEP V1 0 1 1e-15")
            .unwrap_err();
        assert!(matches!(err, OhmserveError::Setup(_)), "{err}");
        assert!(err.to_string().contains("step sweep"));

        let err = NetlistEngine::from_netlist("V1 1 0 1\nR1 1 0 1k\n.DC V1 0 1 1e-300").unwrap_err();
        assert!(err.to_string().contains("not finite"), "{err}");

        let err = NetlistEngine::from_netlist("V1 1 0 AC 1\nR1 1 0 1k\n.AC LIN 100000000 1 10")
            .unwrap_err();
        assert!(matches!(err, OhmserveError::Setup(_)));

        let err = NetlistEngine::from_netlist("V1 1 0 1\nR1 1 0 1k\n.TRAN 1f 1").unwrap_err();
        assert!(matches!(err, OhmserveError::Setup(_)));
    }

    #[test]
    fn sweeps_at_the_limit_are_accepted() {
        let netlist = format!("V1 1 0 1\nR1 1 0 1k\n.OP\n.STEP V1 1 {MAX_STEPS} 1");
        let engine = NetlistEngine::from_netlist(&netlist).unwrap();
        assert_eq!(engine.step_count(), MAX_STEPS);
    }
}
