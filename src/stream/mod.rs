//! Concurrent result streaming.
//!
//! A [`Job`] runs an engine on a background thread. The engine writes into
//! one [`Channel`] per analysis category. A [`ResultCursor`] drains whatever
//! has accumulated on each poll, so every sample is delivered exactly once.
//!
//! ```text
//! RunController::start ──► Job ──spawn──► engine.run() ──► Channel (Mutex)
//!          │                                                   ▲
//!          └──────────────► ResultCursor::poll ── drain_all ───┘
//! ```

pub mod channel;
pub mod controller;
pub mod cursor;
pub mod job;

pub use channel::{Channel, SelectionLatch};
pub use controller::RunController;
pub use cursor::ResultCursor;
pub use job::{Job, JobId};

use num_complex::Complex64;
use std::fmt;

/// Output category an engine can drive. Declaration order is the scan
/// order used by the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisKind {
    Tran,
    Ac,
    Op,
    Dc,
    Noise,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 5] = [
        AnalysisKind::Tran,
        AnalysisKind::Ac,
        AnalysisKind::Op,
        AnalysisKind::Dc,
        AnalysisKind::Noise,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AnalysisKind::Tran => "tran",
            AnalysisKind::Ac => "ac",
            AnalysisKind::Op => "op",
            AnalysisKind::Dc => "dc",
            AnalysisKind::Noise => "noise",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-channel buffering policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamLimits {
    /// Maximum undelivered samples a channel may hold. `None` is unbounded.
    /// Exceeding it aborts the producing job.
    pub max_buffered_samples: Option<usize>,
}

/// One field's drained samples. A field is real or complex for its whole life.
#[derive(Debug, Clone, PartialEq)]
pub enum Series {
    Real(Vec<f64>),
    Complex(Vec<Complex64>),
}

impl Series {
    pub fn len(&self) -> usize {
        match self {
            Series::Real(v) => v.len(),
            Series::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Series::Real(_) => "real",
            Series::Complex(_) => "complex",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldData {
    pub name: String,
    pub series: Series,
}

/// Drained contents of one sweep step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepData {
    /// Category name followed by the step index, e.g. `tran0`.
    pub name: String,
    pub fields: Vec<FieldData>,
}

impl StepData {
    pub fn field(&self, name: &str) -> Option<&Series> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.series)
    }
}

/// Everything one poll delivers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultBatch {
    /// Keep polling while true.
    pub more: bool,
    /// The independent variable (first announced field), if any.
    pub scale: Option<String>,
    pub steps: Vec<StepData>,
}

impl ResultBatch {
    /// A batch carrying no data.
    pub fn empty(more: bool) -> Self {
        Self {
            more,
            scale: None,
            steps: Vec::new(),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.steps
            .iter()
            .flat_map(|s| &s.fields)
            .map(|f| f.series.len())
            .sum()
    }

    /// True when no field carries any sample.
    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    pub fn step(&self, name: &str) -> Option<&StepData> {
        self.steps.iter().find(|s| s.name == name)
    }
}
