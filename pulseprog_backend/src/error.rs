use std::path::PathBuf;

/// Result type alias
pub type Result<T> = std::result::Result<T, ProgramError>;

/// Errors raised while loading, validating or writing a pulse program
#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    /// File system error on the given path
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Program file exists but is empty
    #[error("Pulse program {0} is empty")]
    Empty(PathBuf),

    /// Content does not start with a `PULSE_PROGRAM` declaration
    #[error("Pulse program {0} has no PULSE_PROGRAM declaration")]
    MissingHeader(PathBuf),

    /// Unknown parameter key
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),
}
