use thiserror::Error;

/// Failure classes of the capture and calibration pipeline.
///
/// Plumbing below the pipeline (database worker, migrations, config files)
/// reports `anyhow::Error`; it is wrapped into one of these variants at the
/// component boundary so callers can decide what is fatal.
#[derive(Debug, Error)]
pub enum Error {
    /// Broker unreachable or connection lost. Fatal to the listener.
    #[error("broker transport failed: {0}")]
    Transport(String),

    /// Store unavailable mid-run. Aborts the current run; nothing is marked processed.
    #[error("message store unavailable: {0:#}")]
    Persistence(#[source] anyhow::Error),

    /// A stored payload could not be decoded into the expected record.
    #[error("malformed payload: {0}")]
    Parse(String),

    /// Too few points for the requested computation.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// The broker rejected or never acknowledged a publish.
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// The instrument model does not implement the requested operation.
    #[error("{operation} is not supported by {model}")]
    NotSupported {
        model: &'static str,
        operation: &'static str,
    },

    /// SCPI I/O or response decoding failed.
    #[error("instrument i/o failed: {0}")]
    Instrument(String),

    #[error("chart rendering failed: {0}")]
    Render(String),

    #[error("invalid configuration: {0:#}")]
    Config(#[source] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
