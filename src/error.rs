use thiserror::Error;

#[derive(Debug, Error)]
pub enum OhmserveError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Solve error: {0}")]
    Solve(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    /// The input document could not be parsed or initialized. No run is started.
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Stream error: {0}")]
    Stream(#[from] InvariantError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OhmserveError>;

/// Shape violations between what the engine emits and what a channel expects.
///
/// These are programming defects in the producer. They abort the offending
/// job's run and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("channel '{channel}': expected {expected} values per sample, got {got}")]
    FieldCountMismatch {
        channel: String,
        expected: usize,
        got: usize,
    },

    #[error("channel '{channel}': step {step} out of range (numsteps = {numsteps})")]
    StepOutOfRange {
        channel: String,
        step: usize,
        numsteps: usize,
    },

    #[error("channel '{channel}': field '{field}' is {existing}, refusing {attempted} data")]
    KindMismatch {
        channel: String,
        field: String,
        existing: &'static str,
        attempted: &'static str,
    },

    #[error("channel '{channel}': data emitted before field names were announced")]
    NotAnnounced { channel: String },

    #[error("channel '{channel}': field layout already fixed, cannot re-announce")]
    Reannounced { channel: String },

    #[error("channel '{channel}' cannot be selected, '{selected}' already is")]
    SecondSelection { channel: String, selected: String },

    #[error("channel '{channel}': buffered sample limit of {limit} exceeded")]
    BufferLimit { channel: String, limit: usize },

    #[error("channel '{channel}': buffered sample limit of {limit} cannot hold one sample of {fields} fields")]
    LimitBelowFieldCount {
        channel: String,
        limit: usize,
        fields: usize,
    },
}
