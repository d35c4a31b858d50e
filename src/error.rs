//! Error taxonomy for snapshot assembly and the underlying metric sources.

use thiserror::Error;

/// A bounded [`Snapshot`](crate::snapshot::Snapshot) field was given a value
/// outside its legal range.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field} = {value} is outside the legal range [{min}, {max}]")]
pub struct OutOfRangeError {
    pub field: &'static str,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

/// A metric source could not be queried.
///
/// Readers never return this outward: it is logged and replaced with the
/// reader's fallback value.
#[derive(Debug, Error)]
pub enum SourceUnavailableError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    ExitStatus { program: String, status: String },

    #[error("could not parse {what} from {input:?}")]
    Parse { what: &'static str, input: String },

    #[error("no volume matches filter {0:?}")]
    NotFound(Option<String>),

    #[error("{0} is not available on this host")]
    Missing(&'static str),
}

/// Building the final snapshot failed.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("inconsistent reader output: {0}")]
    InvalidSnapshot(#[from] OutOfRangeError),

    #[error("{reader} reader task did not complete: {source}")]
    ReaderTask {
        reader: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}
