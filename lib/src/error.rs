use thiserror::Error;

/// Errors surfaced by the signature engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The source buffer cannot be interpreted as pixel data.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// A signature or persisted blob does not match the fixed record layout.
    #[error("corrupt signature: {0}")]
    CorruptSignature(String),

    /// Two signatures were produced with different parameters.
    #[error("signature version mismatch: expected {expected} coefficients, found {found}")]
    SignatureVersionMismatch { expected: usize, found: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] sqlite::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
