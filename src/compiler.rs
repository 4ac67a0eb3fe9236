//! MNA (Modified Nodal Analysis) compiler.
//!
//! Converts a Circuit IR into the matrices the analyses solve.
//!
//! For n non-ground nodes and m branch variables (voltage sources + inductors)
//! the system is (n+m) x (n+m), with x = [node_voltages; branch_currents]:
//!
//! ```text
//! G x + C dx/dt = b
//! ```
//!
//! # Stamps
//!
//! - **Resistor** R between i,j: G(i,i) += 1/R, G(j,j) += 1/R, G(i,j) -= 1/R, G(j,i) -= 1/R
//! - **Capacitor** C between i,j: same pattern into C
//! - **Inductor** L between i,j (branch k): G(i,k) = G(k,i) = 1, G(j,k) = G(k,j) = -1, C(k,k) = -L
//! - **Voltage source** between i,j (branch k): same G pattern as the inductor, b(k) = V
//! - **Current source** from n+ to n-: b(n+) -= I, b(n-) += I
//!
//! Every node also gets GMIN to ground so capacitor-only nodes stay solvable at DC.

use crate::error::{OhmserveError, Result};
use crate::ir::{is_ground, Circuit, Component, SourceSpec};
use crate::linalg::{Matrix, Scalar};
use num_complex::Complex64;
use std::collections::{HashMap, HashSet};

/// Conductance from every node to ground.
pub const GMIN: f64 = 1e-12;

/// Where an independent source drives the right-hand side.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceTarget {
    /// Voltage source branch row.
    Branch(usize),
    /// Current source injecting out of `from` and into `to`.
    Current {
        from: Option<usize>,
        to: Option<usize>,
    },
}

#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub name: String,
    pub spec: SourceSpec,
    pub target: SourceTarget,
}

/// A quantity that can be read off a solution vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// V(a) or V(a,b); `None` is ground.
    Voltage(Option<usize>, Option<usize>),
    /// I(V1), I(L1): a branch variable.
    Current(usize),
}

impl Probe {
    pub fn read<T: Scalar>(&self, x: &[T]) -> T {
        let at = |idx: Option<usize>| idx.map_or(T::default(), |i| x[i]);
        match *self {
            Probe::Voltage(a, b) => at(a) - at(b),
            Probe::Current(k) => x[k],
        }
    }
}

/// The compiled MNA system.
#[derive(Debug, Clone)]
pub struct MnaSystem {
    pub g: Matrix<f64>,
    pub c: Matrix<f64>,
    pub b_ac: Vec<Complex64>,
    pub size: usize,
    /// Node names in matrix-index order.
    pub node_names: Vec<String>,
    /// Branch k (matrix index n_nodes + k) -> component name.
    pub branch_names: Vec<String>,
    pub sources: Vec<SourceEntry>,
    /// Capacitor terminals, used to pin initial conditions for UIC.
    pub capacitors: Vec<(Option<usize>, Option<usize>)>,
    /// Matrix indices of inductor branch rows.
    pub inductor_rows: Vec<usize>,
}

impl MnaSystem {
    pub fn n_nodes(&self) -> usize {
        self.node_names.len()
    }

    fn node_index(&self, node: &str) -> Option<Option<usize>> {
        if is_ground(node) {
            return Some(None);
        }
        self.node_names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(node))
            .map(Some)
    }

    /// Resolve an output expression such as `V(2)`, `V(in,out)` or `I(V1)`.
    pub fn probe(&self, expr: &str) -> Option<Probe> {
        let expr = expr.trim();
        let open = expr.find('(')?;
        let inner = expr.strip_suffix(')')?[open + 1..].trim();
        match expr[..open].trim().to_ascii_uppercase().as_str() {
            "V" => {
                let mut nodes = inner.split(',').map(str::trim);
                let a = self.node_index(nodes.next()?)?;
                let b = match nodes.next() {
                    Some(node) => self.node_index(node)?,
                    None => None,
                };
                if nodes.next().is_some() {
                    return None;
                }
                Some(Probe::Voltage(a, b))
            }
            "I" => self
                .branch_names
                .iter()
                .position(|b| b.eq_ignore_ascii_case(inner))
                .map(|k| Probe::Current(self.n_nodes() + k)),
            _ => None,
        }
    }

    /// Right-hand side with each source's value chosen by `value_of`.
    pub fn rhs_with(&self, value_of: impl Fn(&SourceEntry) -> f64) -> Vec<f64> {
        let mut b = vec![0.0; self.size];
        for source in &self.sources {
            let value = value_of(source);
            match source.target {
                SourceTarget::Branch(k) => b[k] += value,
                SourceTarget::Current { from, to } => {
                    if let Some(i) = from {
                        b[i] -= value;
                    }
                    if let Some(j) = to {
                        b[j] += value;
                    }
                }
            }
        }
        b
    }

    /// DC right-hand side, with optional per-source overrides (sweeps).
    pub fn rhs_dc(&self, overrides: &[(&str, f64)]) -> Vec<f64> {
        self.rhs_with(|source| {
            overrides
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&source.name))
                .map_or_else(|| source.spec.dc_value(), |&(_, v)| v)
        })
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s.name.eq_ignore_ascii_case(name))
    }
}

fn stamp_conductance(m: &mut Matrix<f64>, i: Option<usize>, j: Option<usize>, value: f64) {
    if let Some(i) = i {
        m.add(i, i, value);
    }
    if let Some(j) = j {
        m.add(j, j, value);
    }
    if let (Some(i), Some(j)) = (i, j) {
        m.add(i, j, -value);
        m.add(j, i, -value);
    }
}

fn stamp_branch(g: &mut Matrix<f64>, i: Option<usize>, j: Option<usize>, k: usize) {
    if let Some(i) = i {
        g.add(i, k, 1.0);
        g.add(k, i, 1.0);
    }
    if let Some(j) = j {
        g.add(j, k, -1.0);
        g.add(k, j, -1.0);
    }
}

fn ac_phasor(mag: f64, phase_deg: f64) -> Complex64 {
    Complex64::from_polar(mag, phase_deg.to_radians())
}

/// Compile a Circuit into an MNA system.
pub fn compile(circuit: &Circuit) -> Result<MnaSystem> {
    let mut node_map: HashMap<String, usize> = HashMap::new();
    let mut node_names: Vec<String> = Vec::new();
    let mut seen_names: HashSet<String> = HashSet::new();
    let mut grounded = false;

    for component in &circuit.components {
        if !seen_names.insert(component.name().to_ascii_uppercase()) {
            return Err(OhmserveError::Compile(format!(
                "duplicate element name '{}'",
                component.name()
            )));
        }
        let (a, b) = terminals(component);
        for node in [a, b] {
            if is_ground(node) {
                grounded = true;
            } else if !node_map.contains_key(node) {
                node_map.insert(node.to_string(), node_names.len());
                node_names.push(node.to_string());
            }
        }
    }

    if !circuit.components.is_empty() && !grounded {
        return Err(OhmserveError::Compile(
            "circuit has no ground node (0 or GND)".into(),
        ));
    }

    let n_nodes = node_names.len();
    let branch_names: Vec<String> = circuit
        .components
        .iter()
        .filter(|c| matches!(c, Component::VSource { .. } | Component::Inductor { .. }))
        .map(|c| c.name().to_string())
        .collect();
    let size = n_nodes + branch_names.len();

    let node = |name: &str| -> Option<usize> {
        if is_ground(name) {
            None
        } else {
            node_map.get(name).copied()
        }
    };

    let mut g = Matrix::zeros(size);
    let mut c = Matrix::zeros(size);
    let mut b_ac = vec![Complex64::new(0.0, 0.0); size];
    let mut sources = Vec::new();
    let mut capacitors = Vec::new();
    let mut inductor_rows = Vec::new();
    let mut next_branch = n_nodes;

    for i in 0..n_nodes {
        g.add(i, i, GMIN);
    }

    for component in &circuit.components {
        let (a, b) = terminals(component);
        let (ni, nj) = (node(a), node(b));
        match component {
            Component::Resistor { name, value, .. } => {
                if *value == 0.0 {
                    return Err(OhmserveError::Compile(format!(
                        "Resistor {name} has zero resistance"
                    )));
                }
                stamp_conductance(&mut g, ni, nj, 1.0 / value);
            }
            Component::Capacitor { name, value, .. } => {
                if *value < 0.0 {
                    return Err(OhmserveError::Compile(format!(
                        "Capacitor {name} has negative capacitance"
                    )));
                }
                stamp_conductance(&mut c, ni, nj, *value);
                capacitors.push((ni, nj));
            }
            Component::Inductor { value, .. } => {
                let k = next_branch;
                next_branch += 1;
                stamp_branch(&mut g, ni, nj, k);
                c.add(k, k, -value);
                inductor_rows.push(k);
            }
            Component::VSource { name, spec, .. } => {
                let k = next_branch;
                next_branch += 1;
                stamp_branch(&mut g, ni, nj, k);
                if let Some((mag, phase)) = spec.ac {
                    b_ac[k] += ac_phasor(mag, phase);
                }
                sources.push(SourceEntry {
                    name: name.clone(),
                    spec: spec.clone(),
                    target: SourceTarget::Branch(k),
                });
            }
            Component::ISource { name, spec, .. } => {
                if let Some((mag, phase)) = spec.ac {
                    let phasor = ac_phasor(mag, phase);
                    if let Some(i) = ni {
                        b_ac[i] -= phasor;
                    }
                    if let Some(j) = nj {
                        b_ac[j] += phasor;
                    }
                }
                sources.push(SourceEntry {
                    name: name.clone(),
                    spec: spec.clone(),
                    target: SourceTarget::Current { from: ni, to: nj },
                });
            }
        }
    }

    Ok(MnaSystem {
        g,
        c,
        b_ac,
        size,
        node_names,
        branch_names,
        sources,
        capacitors,
        inductor_rows,
    })
}

fn terminals(component: &Component) -> (&str, &str) {
    match component {
        Component::Resistor { nodes, .. }
        | Component::Capacitor { nodes, .. }
        | Component::Inductor { nodes, .. }
        | Component::VSource { nodes, .. }
        | Component::ISource { nodes, .. } => (&nodes.0, &nodes.1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use approx::assert_abs_diff_eq;

    fn compile_str(netlist: &str) -> MnaSystem {
        compile(&parse(netlist).unwrap()).unwrap()
    }

    #[test]
    fn divider_layout() {
        let sys = compile_str("V1 1 0 DC 10\nR1 1 2 1k\nR2 2 0 1k");
        assert_eq!(sys.node_names, vec!["1", "2"]);
        assert_eq!(sys.branch_names, vec!["V1"]);
        assert_eq!(sys.size, 3);
        assert_abs_diff_eq!(sys.g.get(0, 0), 1e-3 + GMIN, epsilon = 1e-15);
        assert_abs_diff_eq!(sys.g.get(0, 1), -1e-3, epsilon = 1e-15);
        assert_eq!(sys.g.get(0, 2), 1.0);
        assert_eq!(sys.g.get(2, 0), 1.0);
        assert_eq!(sys.rhs_dc(&[]), vec![0.0, 0.0, 10.0]);
    }

    #[test]
    fn current_source_rhs_direction() {
        let sys = compile_str("I1 0 1 DC 2m\nR1 1 0 1k");
        assert_eq!(sys.rhs_dc(&[]), vec![2e-3]);
    }

    #[test]
    fn sweep_override_replaces_source_value() {
        let sys = compile_str("V1 1 0 DC 10\nR1 1 0 1k");
        assert_eq!(sys.rhs_dc(&[("v1", 3.0)]), vec![0.0, 3.0]);
    }

    #[test]
    fn inductor_and_capacitor_stamps() {
        let sys = compile_str("V1 1 0 DC 1\nL1 1 2 1m\nC1 2 0 1u");
        // branch rows follow netlist order
        assert_eq!(sys.branch_names, vec!["V1", "L1"]);
        assert_eq!(sys.inductor_rows, vec![3]);
        assert_eq!(sys.c.get(3, 3), -1e-3);
        assert_eq!(sys.c.get(1, 1), 1e-6);
        assert_eq!(sys.capacitors, vec![(Some(1), None)]);
    }

    #[test]
    fn ac_phasor_from_magnitude_and_phase() {
        let sys = compile_str("V1 1 0 AC 2 90\nR1 1 0 1k");
        assert_abs_diff_eq!(sys.b_ac[1].re, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sys.b_ac[1].im, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn probes_resolve() {
        let sys = compile_str("V1 in 0 DC 1\nR1 in out 1k\nR2 out 0 1k");
        assert_eq!(sys.probe("V(in)"), Some(Probe::Voltage(Some(0), None)));
        assert_eq!(sys.probe("v(IN, out)"), Some(Probe::Voltage(Some(0), Some(1))));
        assert_eq!(sys.probe("I(v1)"), Some(Probe::Current(2)));
        assert_eq!(sys.probe("V(nowhere)"), None);
        assert_eq!(sys.probe("I(R1)"), None);
        assert_eq!(sys.probe("P(in)"), None);
        assert_eq!(sys.probe("TIME"), None);

        let x = [3.0, 1.0, -0.002];
        assert_eq!(Probe::Voltage(Some(0), Some(1)).read(&x), 2.0);
        assert_eq!(Probe::Voltage(None, Some(1)).read(&x), -1.0);
    }

    #[test]
    fn rejects_missing_ground() {
        let err = compile(&parse("R1 1 2 1k").unwrap()).unwrap_err();
        assert!(err.to_string().contains("ground"));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = compile(&parse("R1 1 0 1k\nr1 2 0 1k").unwrap()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
