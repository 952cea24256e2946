//! Error types for the NMR control backend

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opening or configuring the serial port failed
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error on the serial line or a file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected or incomplete response from the device
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Bytes were received but do not form a valid value
    #[error("Decode error: {0}")]
    Decode(String),

    /// A stop or close request interrupted a step before it finished
    #[error("Stopped during {0}")]
    Cancelled(String),

    /// Requested step is not part of the sequence
    #[error("Step '{name}' not found. Declared steps are {declared:?}")]
    StepNotFound { name: String, declared: Vec<String> },

    /// A step needs the device session but none is open
    #[error("No open serial connection")]
    NotConnected,

    /// The external compiler or program upload failed
    #[error("Toolchain error: {0}")]
    Toolchain(String),

    /// Pulse program could not be read or is invalid
    #[error(transparent)]
    Program(#[from] pulseprog_backend::ProgramError),

    /// Writing the acquisition buffer failed
    #[error("Failed to persist samples: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    /// Reading a persisted acquisition failed
    #[error("Failed to load samples: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    /// Nothing to visualize
    #[error("No acquisition data: {0}")]
    NoData(String),

    /// Configuration file could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Controller worker could not be started or has gone away
    #[error("Worker error: {0}")]
    Worker(String),
}
