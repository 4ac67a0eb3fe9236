//! Built-in analyses. Each one streams its samples into an [`OutputSink`]
//! through an [`Emitter`] instead of collecting a result table.

pub mod ac;
pub mod dc;
pub mod op;
pub mod transient;

use num_complex::Complex64;

use crate::compiler::{MnaSystem, Probe};
use crate::engine::OutputSink;
use crate::error::Result;
use crate::ir::Analysis;
use crate::linalg::Scalar;

/// Name of the independent variable an analysis sweeps, if any.
pub fn scale_name(analysis: &Analysis) -> Option<String> {
    match analysis {
        Analysis::Tran { .. } => Some("TIME".into()),
        Analysis::Ac { .. } => Some("FREQ".into()),
        Analysis::Dc(sweep) => Some(sweep.source.clone()),
        Analysis::Op | Analysis::Noise { .. } => None,
    }
}

/// The field layout announced for one run and how to fill each field from
/// a solution vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPlan {
    /// Announced names, scale first when the analysis has one.
    pub names: Vec<String>,
    /// One probe per non-scale field.
    pub probes: Vec<Probe>,
    pub has_scale: bool,
    /// Per requested output, whether it resolved.
    pub resolved: Vec<bool>,
}

impl FieldPlan {
    /// Resolve the requested outputs against `system`.
    ///
    /// An empty request selects every node voltage and branch current. The
    /// scale is always the first field, whether requested or not.
    pub fn resolve(system: &MnaSystem, analysis: &Analysis, requested: &[String]) -> Self {
        let scale = scale_name(analysis);
        let mut names: Vec<String> = scale.iter().cloned().collect();
        let mut probes = Vec::new();
        let mut resolved = Vec::with_capacity(requested.len());

        let defaults: Vec<String>;
        let wanted = if requested.is_empty() {
            defaults = system
                .node_names
                .iter()
                .map(|n| format!("V({n})"))
                .chain(system.branch_names.iter().map(|b| format!("I({b})")))
                .collect();
            &defaults[..]
        } else {
            requested
        };

        for expr in wanted {
            let expr = expr.trim();
            if scale.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(expr)) {
                resolved.push(true);
                continue;
            }
            match system.probe(expr) {
                Some(probe) => {
                    names.push(expr.to_string());
                    probes.push(probe);
                    resolved.push(true);
                }
                None => resolved.push(false),
            }
        }
        if requested.is_empty() {
            resolved.clear();
        }

        Self {
            names,
            probes,
            has_scale: scale.is_some(),
            resolved,
        }
    }

    fn sample<T: Scalar>(&self, scale: T, x: &[T]) -> Vec<T> {
        let mut values = Vec::with_capacity(self.names.len());
        if self.has_scale {
            values.push(scale);
        }
        values.extend(self.probes.iter().map(|p| p.read(x)));
        values
    }
}

/// Pushes one sample per solved point into a sink.
pub struct Emitter<'a> {
    sink: &'a dyn OutputSink,
    plan: &'a FieldPlan,
}

impl<'a> Emitter<'a> {
    pub fn new(sink: &'a dyn OutputSink, plan: &'a FieldPlan) -> Self {
        Self { sink, plan }
    }

    pub fn real(&self, scale: f64, x: &[f64]) -> Result<()> {
        self.sink.output_real(&self.plan.sample(scale, x))?;
        Ok(())
    }

    pub fn complex(&self, scale: Complex64, x: &[Complex64]) -> Result<()> {
        self.sink.output_complex(&self.plan.sample(scale, x))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::parser::parse;

    fn system() -> (MnaSystem, Vec<Analysis>) {
        let circuit = parse("V1 in 0 DC 1\nR1 in out 1k\nC1 out 0 1u\n.TRAN 1u 10u").unwrap();
        (compile(&circuit).unwrap(), circuit.analyses)
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn scale_is_prepended() {
        let (sys, analyses) = system();
        let plan = FieldPlan::resolve(&sys, &analyses[0], &strings(&["V(out)"]));
        assert_eq!(plan.names, strings(&["TIME", "V(out)"]));
        assert_eq!(plan.resolved, vec![true]);
    }

    #[test]
    fn requested_scale_moves_to_front_once() {
        let (sys, analyses) = system();
        let plan = FieldPlan::resolve(&sys, &analyses[0], &strings(&["V(out)", "time"]));
        assert_eq!(plan.names, strings(&["TIME", "V(out)"]));
        assert_eq!(plan.resolved, vec![true, true]);
    }

    #[test]
    fn unresolved_outputs_are_dropped_and_flagged() {
        let (sys, analyses) = system();
        let plan = FieldPlan::resolve(&sys, &analyses[0], &strings(&["V(nope)", "I(V1)"]));
        assert_eq!(plan.names, strings(&["TIME", "I(V1)"]));
        assert_eq!(plan.resolved, vec![false, true]);
    }

    #[test]
    fn empty_request_selects_everything() {
        let (sys, _) = system();
        let plan = FieldPlan::resolve(&sys, &Analysis::Op, &[]);
        assert_eq!(plan.names, strings(&["V(in)", "V(out)", "I(V1)"]));
        assert!(!plan.has_scale);
        assert!(plan.resolved.is_empty());
    }

    #[test]
    fn sample_reads_probes_in_order() {
        let (sys, analyses) = system();
        let plan = FieldPlan::resolve(&sys, &analyses[0], &strings(&["V(in,out)", "V(in)"]));
        assert_eq!(plan.sample(0.5, &[3.0, 1.0, 0.0]), vec![0.5, 2.0, 3.0]);
    }
}
