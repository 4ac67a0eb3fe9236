//! AC frequency sweep analysis.
//!
//! For each frequency point:
//!   1. Form A = G + jωC where ω = 2πf
//!   2. Solve Ax = b_ac
//!   3. Emit FREQ (as f + 0j) followed by the probed phasors
//!
//! Frequency points are generated according to sweep type:
//!   - DEC: logarithmic, n_points per decade
//!   - OCT: logarithmic, n_points per octave
//!   - LIN: linear, n_points total

use super::Emitter;
use crate::compiler::MnaSystem;
use crate::error::{OhmserveError, Result};
use crate::ir::AcSweepType;
use crate::linalg::Matrix;
use num_complex::Complex64;

pub fn run(
    system: &MnaSystem,
    sweep_type: AcSweepType,
    n_points: usize,
    f_start: f64,
    f_stop: f64,
    emit: &Emitter<'_>,
) -> Result<()> {
    if point_count(sweep_type, n_points, f_start, f_stop).is_none() {
        return Err(OhmserveError::Analysis(format!(
            "frequency grid {f_start}..{f_stop} is not finite"
        )));
    }
    let frequencies = generate_frequencies(sweep_type, n_points, f_start, f_stop);
    let _span = tracing::info_span!("ac_analysis", n_points = frequencies.len()).entered();

    let g: Matrix<Complex64> = Matrix::zeros(system.size).combine(&system.g, Complex64::new(1.0, 0.0));
    for f in frequencies {
        let omega = 2.0 * std::f64::consts::PI * f;
        let a = g.combine(&system.c, Complex64::new(0.0, omega));
        let x = a.solve(&system.b_ac)?;
        emit.complex(Complex64::new(f, 0.0), &x)?;
    }
    Ok(())
}

/// Number of frequency points the sweep produces, or `None` when the grid
/// is not finite or its count does not fit in a `usize`.
pub fn point_count(
    sweep_type: AcSweepType,
    n_points: usize,
    f_start: f64,
    f_stop: f64,
) -> Option<usize> {
    let log_count = |span: f64| -> Option<usize> {
        let total = (n_points.max(1) as f64 * span + 1e-9).floor();
        if !total.is_finite() || total < 0.0 || total >= usize::MAX as f64 {
            return None;
        }
        (total as usize).checked_add(1)
    };
    match sweep_type {
        AcSweepType::Dec => log_count((f_stop / f_start).log10()),
        AcSweepType::Oct => log_count((f_stop / f_start).log2()),
        AcSweepType::Lin => Some(n_points.max(1)),
    }
}

/// Frequency points for the given sweep type, `f_stop` included when it
/// falls on the grid. Empty when [`point_count`] is `None`.
pub fn generate_frequencies(
    sweep_type: AcSweepType,
    n_points: usize,
    f_start: f64,
    f_stop: f64,
) -> Vec<f64> {
    let Some(total) = point_count(sweep_type, n_points, f_start, f_stop) else {
        return Vec::new();
    };
    let n = n_points.max(1) as f64;
    match sweep_type {
        AcSweepType::Dec => (0..total).map(|i| f_start * 10f64.powf(i as f64 / n)).collect(),
        AcSweepType::Oct => (0..total).map(|i| f_start * 2f64.powf(i as f64 / n)).collect(),
        AcSweepType::Lin => {
            if total == 1 {
                return vec![f_start];
            }
            let step = (f_stop - f_start) / (total - 1) as f64;
            (0..total).map(|i| f_start + step * i as f64).collect()
        }
    }
}
