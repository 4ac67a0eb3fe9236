//! Circuit intermediate representation.
//!
//! The parser produces a `Circuit`; the compiler and the analyses consume it.

use std::f64::consts::PI;

/// Node identifier in the netlist (e.g., "0", "GND", "out").
/// Ground is "0" or "GND".
pub type NodeId = String;

/// Returns true if the node identifier represents ground.
pub fn is_ground(node: &str) -> bool {
    node == "0" || node.eq_ignore_ascii_case("GND")
}

/// Time-domain stimulus attached to an independent source.
#[derive(Debug, Clone, PartialEq)]
pub enum TransientFunc {
    Sin {
        vo: f64,
        va: f64,
        freq: f64,
        td: f64,
        theta: f64,
    },
    Pulse {
        v1: f64,
        v2: f64,
        td: f64,
        tr: f64,
        tf: f64,
        pw: f64,
        per: f64,
    },
    Pwl {
        points: Vec<(f64, f64)>,
    },
    Exp {
        v1: f64,
        v2: f64,
        td1: f64,
        tau1: f64,
        td2: f64,
        tau2: f64,
    },
}

impl TransientFunc {
    /// Source value at time `t`.
    pub fn value_at(&self, t: f64) -> f64 {
        match *self {
            TransientFunc::Sin {
                vo,
                va,
                freq,
                td,
                theta,
            } => {
                if t <= td {
                    return vo;
                }
                let elapsed = t - td;
                vo + va * (2.0 * PI * freq * elapsed).sin() * (-elapsed * theta).exp()
            }
            TransientFunc::Pulse {
                v1,
                v2,
                td,
                tr,
                tf,
                pw,
                per,
            } => {
                if t < td {
                    return v1;
                }
                let mut local = t - td;
                if per > 0.0 {
                    local %= per;
                }
                if local < tr {
                    v1 + (v2 - v1) * local / tr
                } else if local < tr + pw {
                    v2
                } else if local < tr + pw + tf {
                    v2 + (v1 - v2) * (local - tr - pw) / tf
                } else {
                    v1
                }
            }
            TransientFunc::Pwl { ref points } => {
                let (Some(&(t_first, v_first)), Some(&(t_last, v_last))) =
                    (points.first(), points.last())
                else {
                    return 0.0;
                };
                if t <= t_first {
                    return v_first;
                }
                if t >= t_last {
                    return v_last;
                }
                points
                    .windows(2)
                    .find(|w| t <= w[1].0)
                    .map(|w| {
                        let ((t0, y0), (t1, y1)) = (w[0], w[1]);
                        y0 + (y1 - y0) * (t - t0) / (t1 - t0)
                    })
                    .unwrap_or(v_last)
            }
            TransientFunc::Exp {
                v1,
                v2,
                td1,
                tau1,
                td2,
                tau2,
            } => {
                let mut v = v1;
                if t > td1 {
                    v += (v2 - v1) * (1.0 - (-(t - td1) / tau1).exp());
                }
                if t > td2 {
                    v += (v1 - v2) * (1.0 - (-(t - td2) / tau2).exp());
                }
                v
            }
        }
    }
}

/// Excitation of an independent V or I source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceSpec {
    pub dc: Option<f64>,
    /// (magnitude, phase in degrees)
    pub ac: Option<(f64, f64)>,
    pub tran: Option<TransientFunc>,
}

impl SourceSpec {
    /// Value used for bias and sweep purposes.
    pub fn dc_value(&self) -> f64 {
        match (self.dc, &self.tran) {
            (Some(v), _) => v,
            (None, Some(func)) => func.value_at(0.0),
            (None, None) => 0.0,
        }
    }

    /// Value at time `t` during a transient run.
    pub fn value_at(&self, t: f64) -> f64 {
        match &self.tran {
            Some(func) => func.value_at(t),
            None => self.dc.unwrap_or(0.0),
        }
    }
}

/// A circuit component parsed from the netlist.
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Resistor {
        name: String,
        nodes: (NodeId, NodeId),
        value: f64,
    },
    Capacitor {
        name: String,
        nodes: (NodeId, NodeId),
        value: f64,
    },
    Inductor {
        name: String,
        nodes: (NodeId, NodeId),
        value: f64,
    },
    VSource {
        name: String,
        nodes: (NodeId, NodeId),
        spec: SourceSpec,
    },
    ISource {
        name: String,
        nodes: (NodeId, NodeId),
        spec: SourceSpec,
    },
}

impl Component {
    pub fn name(&self) -> &str {
        match self {
            Component::Resistor { name, .. }
            | Component::Capacitor { name, .. }
            | Component::Inductor { name, .. }
            | Component::VSource { name, .. }
            | Component::ISource { name, .. } => name,
        }
    }
}

/// AC sweep type matching SPICE syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcSweepType {
    /// n_points per decade
    Dec,
    /// n_points per octave
    Oct,
    /// n_points total
    Lin,
}

/// A linear sweep of an independent source's DC value, shared by `.DC` and `.STEP`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSweep {
    pub source: String,
    pub start: f64,
    pub stop: f64,
    pub incr: f64,
}

impl SourceSweep {
    /// Number of points from `start` toward `stop`, inclusive. `None` when
    /// the sweep is not finite or its count does not fit in a `usize`.
    pub fn point_count(&self) -> Option<usize> {
        if self.incr == 0.0 || (self.stop - self.start) * self.incr < 0.0 {
            return Some(1);
        }
        let span = ((self.stop - self.start) / self.incr + 1e-9).floor();
        if !span.is_finite() || span < 0.0 || span >= usize::MAX as f64 {
            return None;
        }
        (span as usize).checked_add(1)
    }

    /// Every value from `start` toward `stop`, inclusive, in steps of `incr`.
    /// Yields nothing for a sweep whose [`point_count`](Self::point_count) is `None`.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        let count = self.point_count().unwrap_or(0);
        (0..count).map(move |i| self.start + self.incr * i as f64)
    }
}

/// An analysis command from the netlist.
#[derive(Debug, Clone, PartialEq)]
pub enum Analysis {
    /// `.OP`
    Op,
    /// `.DC src start stop incr`
    Dc(SourceSweep),
    /// `.AC DEC|OCT|LIN np fstart fstop`
    Ac {
        sweep_type: AcSweepType,
        n_points: usize,
        f_start: f64,
        f_stop: f64,
    },
    /// `.TRAN tstep tstop [tstart] [UIC]`
    Tran {
        tstep: f64,
        tstop: f64,
        tstart: f64,
        uic: bool,
    },
    /// `.NOISE ...`, kept verbatim for engines that support it.
    Noise { args: String },
}

/// A parsed circuit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Circuit {
    pub title: Option<String>,
    pub components: Vec<Component>,
    pub analyses: Vec<Analysis>,
    /// `.STEP` repeats the analysis once per swept value.
    pub step: Option<SourceSweep>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sweep_values_inclusive() {
        let sweep = SourceSweep {
            source: "V1".into(),
            start: 0.0,
            stop: 1.0,
            incr: 0.25,
        };
        assert_eq!(sweep.values().collect::<Vec<_>>(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn sweep_values_descending() {
        let sweep = SourceSweep {
            source: "V1".into(),
            start: 2.0,
            stop: 0.0,
            incr: -1.0,
        };
        assert_eq!(sweep.values().collect::<Vec<_>>(), vec![2.0, 1.0, 0.0]);
    }

    #[test]
    fn sweep_values_wrong_direction_is_single_point() {
        let sweep = SourceSweep {
            source: "V1".into(),
            start: 0.0,
            stop: 1.0,
            incr: -1.0,
        };
        assert_eq!(sweep.values().collect::<Vec<_>>(), vec![0.0]);
    }

    #[test]
    fn sweep_point_count_rejects_unrepresentable_sweeps() {
        let tiny = SourceSweep {
            source: "V1".into(),
            start: 0.0,
            stop: 1.0,
            incr: 1e-300,
        };
        assert_eq!(tiny.point_count(), None);
        assert_eq!(tiny.values().next(), None);

        let nan = SourceSweep {
            stop: f64::NAN,
            incr: 1.0,
            ..tiny.clone()
        };
        assert_eq!(nan.point_count(), None);

        let fine = SourceSweep {
            incr: 1e-15,
            ..tiny
        };
        // representable, but far too large to buffer; callers bound it
        assert!(fine.point_count().unwrap() > 999_999_999_999_000);
    }

    #[test]
    fn sin_holds_offset_before_delay() {
        let f = TransientFunc::Sin {
            vo: 1.0,
            va: 2.0,
            freq: 1e3,
            td: 1e-3,
            theta: 0.0,
        };
        assert_abs_diff_eq!(f.value_at(0.5e-3), 1.0);
        assert_abs_diff_eq!(f.value_at(1.25e-3), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn pulse_edges_and_period() {
        let f = TransientFunc::Pulse {
            v1: 0.0,
            v2: 5.0,
            td: 0.0,
            tr: 1.0,
            tf: 1.0,
            pw: 2.0,
            per: 10.0,
        };
        assert_abs_diff_eq!(f.value_at(0.5), 2.5);
        assert_abs_diff_eq!(f.value_at(2.0), 5.0);
        assert_abs_diff_eq!(f.value_at(3.5), 2.5);
        assert_abs_diff_eq!(f.value_at(6.0), 0.0);
        assert_abs_diff_eq!(f.value_at(12.0), 5.0);
    }

    #[test]
    fn pwl_interpolates_and_clamps() {
        let f = TransientFunc::Pwl {
            points: vec![(0.0, 0.0), (1.0, 10.0), (2.0, 0.0)],
        };
        assert_abs_diff_eq!(f.value_at(-1.0), 0.0);
        assert_abs_diff_eq!(f.value_at(0.5), 5.0);
        assert_abs_diff_eq!(f.value_at(1.5), 5.0);
        assert_abs_diff_eq!(f.value_at(3.0), 0.0);
    }

    #[test]
    fn exp_rises_toward_v2() {
        let f = TransientFunc::Exp {
            v1: 0.0,
            v2: 1.0,
            td1: 0.0,
            tau1: 1.0,
            td2: 100.0,
            tau2: 1.0,
        };
        assert_abs_diff_eq!(f.value_at(1.0), 1.0 - (-1.0f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn source_spec_prefers_explicit_dc() {
        let spec = SourceSpec {
            dc: Some(3.0),
            ac: None,
            tran: Some(TransientFunc::Sin {
                vo: 1.0,
                va: 1.0,
                freq: 1.0,
                td: 0.0,
                theta: 0.0,
            }),
        };
        assert_abs_diff_eq!(spec.dc_value(), 3.0);
        assert_abs_diff_eq!(spec.value_at(0.0), 1.0);
    }
}
