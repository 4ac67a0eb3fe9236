//! Transient (time-domain) analysis engine.
//!
//! Solves G*x(t) + C*dx(t)/dt = b(t) using Backward Euler (BE) and
//! Trapezoidal (TRAP) integration with adaptive timestep control.
//!
//! First step uses BE (unconditionally stable). Subsequent steps use TRAP
//! (second-order accurate). Adaptive control compares BE and TRAP solutions
//! to estimate local truncation error. Internal steps never cross an output
//! point, so samples land exactly on multiples of `tstep`.

use super::Emitter;
use crate::compiler::{MnaSystem, SourceEntry};
use crate::error::{OhmserveError, Result};
use crate::linalg::Matrix;

const LTE_TOL: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranParams {
    pub tstep: f64,
    pub tstop: f64,
    /// Samples before this time are computed but not emitted.
    pub tstart: f64,
    /// Start from zero capacitor voltages and inductor currents instead of
    /// the DC operating point.
    pub uic: bool,
}

/// Run transient analysis from t=0 to `tstop`, emitting TIME followed by the
/// probed values at every output point at or after `tstart`.
pub fn run(
    system: &MnaSystem,
    params: &TranParams,
    overrides: &[(&str, f64)],
    emit: &Emitter<'_>,
) -> Result<()> {
    let TranParams {
        tstep,
        tstop,
        tstart,
        uic,
    } = *params;
    let _span = tracing::info_span!("tran_analysis", tstop, tstep).entered();
    if !(tstep > 0.0 && tstop > 0.0) {
        return Err(OhmserveError::Analysis(format!(
            "transient needs positive tstep and tstop, got {tstep} and {tstop}"
        )));
    }

    let h_min = tstep / 10_000.0;
    let h_max = tstep;
    let eps = tstep * 1e-9;
    let rhs_at = |t: f64| system.rhs_with(|source| source_value(source, overrides, t));

    let mut x = if uic {
        uic_initial_conditions(system, &rhs_at(0.0))?
    } else {
        system.g.solve(&rhs_at(0.0))?
    };
    if tstart <= 0.0 {
        emit.real(0.0, &x)?;
    }

    let mut t = 0.0;
    let mut h = h_max;
    let mut b_prev = rhs_at(0.0);
    let mut use_be = true;
    let mut next_output = 1usize;
    let mut accepted = 0usize;
    let mut rejected = 0usize;

    while t < tstop - eps {
        let target = (next_output as f64 * tstep).min(tstop);
        let lands = t + h >= target - eps;
        let (h_step, t_next) = if lands { (target - t, target) } else { (h, t + h) };

        let b_next = rhs_at(t_next);
        let x_be = be_step(system, &x, &b_next, h_step)?;

        let x_new = if use_be {
            // After the first BE step (or a recovery step), switch to TRAP
            use_be = false;
            x_be
        } else {
            let x_trap = trap_step(system, &x, &b_next, &b_prev, h_step)?;
            let lte = compute_lte(&x_trap, &x_be);
            let factor = (0.9 * (LTE_TOL / lte).sqrt()).clamp(0.5, 2.0);

            if lte > LTE_TOL && h_step > h_min * 1.01 {
                h = (h_step * factor).max(h_min);
                use_be = true;
                rejected += 1;
                continue;
            }

            let grown = (h_step * factor).clamp(h_min, h_max);
            h = if lands { grown.max(h) } else { grown };
            x_trap
        };

        accepted += 1;
        x = x_new;
        b_prev = b_next;
        t = t_next;

        if lands {
            next_output += 1;
            if t >= tstart - eps {
                emit.real(t, &x)?;
            }
        }
    }

    tracing::debug!(accepted, rejected, "transient complete");
    Ok(())
}

/// A source's value at `t`; a sweep override pins it for the whole run.
fn source_value(source: &SourceEntry, overrides: &[(&str, f64)], t: f64) -> f64 {
    overrides
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&source.name))
        .map_or_else(|| source.spec.value_at(t), |&(_, v)| v)
}

/// BE: (G + C/h) x_n = b(t_n) + (C/h) x_{n-1}
fn be_step(system: &MnaSystem, x_prev: &[f64], b_next: &[f64], h: f64) -> Result<Vec<f64>> {
    let a = system.g.combine(&system.c, 1.0 / h);
    let c_x = system.c.mul_vec(x_prev);
    let rhs: Vec<f64> = b_next
        .iter()
        .zip(&c_x)
        .map(|(&bt, &cx)| bt + cx / h)
        .collect();
    a.solve(&rhs)
}

/// TRAP: (G + 2C/h) x_n = b(t_n) + (2C/h - G) x_{n-1} + b(t_{n-1})
fn trap_step(
    system: &MnaSystem,
    x_prev: &[f64],
    b_next: &[f64],
    b_prev: &[f64],
    h: f64,
) -> Result<Vec<f64>> {
    let factor = 2.0 / h;
    let a = system.g.combine(&system.c, factor);
    let c_x = system.c.mul_vec(x_prev);
    let g_x = system.g.mul_vec(x_prev);
    let rhs: Vec<f64> = b_next
        .iter()
        .enumerate()
        .map(|(i, &bt)| bt + factor * c_x[i] - g_x[i] + b_prev[i])
        .collect();
    a.solve(&rhs)
}

/// LTE = (2/3) * ||x_trap - x_be||_inf
fn compute_lte(x_trap: &[f64], x_be: &[f64]) -> f64 {
    let max_diff = x_trap
        .iter()
        .zip(x_be)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f64, f64::max);
    (2.0 / 3.0) * max_diff
}

/// Initial state for UIC: inductor currents and capacitor voltages are zero,
/// everything else is solved for consistency with the sources at t=0.
///
/// - Inductor branch rows become `I_L = 0`.
/// - The KCL row of one terminal of each capacitor becomes `V(i) - V(j) = 0`.
fn uic_initial_conditions(system: &MnaSystem, b0: &[f64]) -> Result<Vec<f64>> {
    let mut g: Matrix<f64> = system.g.clone();
    let mut b = b0.to_vec();
    let mut constrained = vec![false; system.n_nodes()];

    for &k in &system.inductor_rows {
        g.clear_row(k);
        g.set(k, k, 1.0);
        b[k] = 0.0;
    }

    for &(ni, nj) in &system.capacitors {
        let (row, other) = match (ni, nj) {
            (Some(i), other) if !constrained[i] => (i, other),
            (other, Some(j)) if !constrained[j] => (j, other),
            _ => continue,
        };
        g.clear_row(row);
        g.set(row, row, 1.0);
        if let Some(other) = other {
            g.set(row, other, -1.0);
        }
        b[row] = 0.0;
        constrained[row] = true;
    }

    g.solve(&b)
}
