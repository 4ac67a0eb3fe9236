//! DC sweep: re-solve the operating point for each value of one source.

use super::Emitter;
use crate::compiler::MnaSystem;
use crate::error::{OhmserveError, Result};
use crate::ir::SourceSweep;

/// Run the sweep. `overrides` come from an enclosing `.STEP`; the swept
/// source takes precedence over them.
pub fn run(
    system: &MnaSystem,
    sweep: &SourceSweep,
    overrides: &[(&str, f64)],
    emit: &Emitter<'_>,
) -> Result<()> {
    let points = sweep.point_count().ok_or_else(|| {
        OhmserveError::Analysis(format!("sweep of {} is not finite", sweep.source))
    })?;
    let _span =
        tracing::info_span!("dc_analysis", source = %sweep.source, points).entered();

    // G does not depend on the swept value, only the RHS does.
    for value in sweep.values() {
        let mut active = Vec::with_capacity(overrides.len() + 1);
        active.push((sweep.source.as_str(), value));
        active.extend_from_slice(overrides);
        let x = system.g.solve(&system.rhs_dc(&active))?;
        emit.real(value, &x)?;
    }
    Ok(())
}
