use thiserror::Error;

/// Errors raised by the filter, the sequence runner and the evaluators.
#[derive(Error, Debug)]
pub enum Error {
    #[error("dimension mismatch in {what}: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("{0} is singular or not positive definite")]
    SingularCovariance(&'static str),

    #[error("{what} is not positive semi-definite (min eigenvalue {min_eigenvalue})")]
    IndefiniteCovariance {
        what: &'static str,
        min_eigenvalue: f64,
    },

    #[error("inconsistent sequence inputs at step {step}: {reason}")]
    InconsistentSequenceInputs { step: usize, reason: String },

    #[error("invalid sampling time: {0}")]
    InvalidTimeStep(f64),

    #[error("cannot reduce a mixture without components")]
    EmptyMixture,

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("invalid norm order: L{0}")]
    InvalidNormOrder(i32),

    #[error("invalid norm group '{name}': {reason}")]
    InvalidNormGroup { name: String, reason: &'static str },

    /// Failure reported by a dynamic or measurement model.
    #[error("model evaluation failed: {0}")]
    Model(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn model(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Model(err.into())
    }

    pub(crate) fn vector_len(what: &'static str, expected: usize, found: usize) -> Self {
        Error::DimensionMismatch {
            what,
            expected: (expected, 1),
            found: (found, 1),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fails unless `found` has the `expected` shape.
pub(crate) fn check_shape(
    what: &'static str,
    expected: (usize, usize),
    found: (usize, usize),
) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::DimensionMismatch {
            what,
            expected,
            found,
        })
    }
}
