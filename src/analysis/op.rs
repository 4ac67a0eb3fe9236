//! DC operating point: solve `G x = b` once.

use super::Emitter;
use crate::compiler::MnaSystem;
use crate::error::Result;

/// Solve the bias point with sources at their DC values.
pub fn solve(system: &MnaSystem, overrides: &[(&str, f64)]) -> Result<Vec<f64>> {
    system.g.solve(&system.rhs_dc(overrides))
}

pub fn run(system: &MnaSystem, overrides: &[(&str, f64)], emit: &Emitter<'_>) -> Result<()> {
    let _span = tracing::info_span!("op_analysis").entered();
    let x = solve(system, overrides)?;
    emit.real(0.0, &x)
}
