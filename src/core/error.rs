use std::io;

use thiserror::Error;

/// Errors produced by the spiking network core.
///
/// Configuration and numeric errors are fatal for the operation that raised
/// them; nothing in this crate retries.
#[derive(Debug, Error)]
pub enum SnnError {
    /// Rejected at construction time (non-positive `tau_mem`, zero sizes, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A vector or tensor did not have the length its layer expects.
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// NaN or infinity showed up where a finite value is required.
    #[error("non-finite value in {what}{}", location_suffix(.epoch, .batch))]
    NonFinite {
        what: &'static str,
        epoch: Option<usize>,
        batch: Option<usize>,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Malformed weight file or checkpoint content.
    #[error("invalid format: {0}")]
    Format(String),

    #[cfg(feature = "serde")]
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn location_suffix(epoch: &Option<usize>, batch: &Option<usize>) -> String {
    match (epoch, batch) {
        (Some(e), Some(b)) => format!(" (epoch {e}, batch {b})"),
        (Some(e), None) => format!(" (epoch {e})"),
        _ => String::new(),
    }
}

impl SnnError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SnnError::InvalidConfig(msg.into())
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        SnnError::Format(msg.into())
    }

    pub(crate) fn non_finite(what: &'static str) -> Self {
        SnnError::NonFinite {
            what,
            epoch: None,
            batch: None,
        }
    }

    /// Attach the training position to a numeric error.
    pub(crate) fn at(self, epoch: usize, batch: usize) -> Self {
        match self {
            SnnError::NonFinite { what, .. } => SnnError::NonFinite {
                what,
                epoch: Some(epoch),
                batch: Some(batch),
            },
            other => other,
        }
    }
}

pub type Result<T, E = SnnError> = core::result::Result<T, E>;

/// Fail with [`SnnError::DimensionMismatch`] unless `actual == expected`.
pub(crate) fn ensure_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(SnnError::DimensionMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}
