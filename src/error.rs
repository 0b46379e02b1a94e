//! Error types for Armonizar

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Data load error: {0}")]
    DataLoad(String),

    #[error("Evaluation set is empty: no images were scored")]
    EmptyEvaluationSet,

    #[error("Distributed sync error: {0}")]
    DistributedSync(String),

    #[error("Unknown {kind}: {name}")]
    UnknownComponent { kind: &'static str, name: String },

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Model error: {0}")]
    Model(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;
