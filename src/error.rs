use thiserror::Error;

pub type Result<T, E = DisaggError> = std::result::Result<T, E>;

/// Failures of a disaggregation run.
///
/// Routine pruning (no ruptures near a site, all-zero curves) never shows up
/// here; it is logged and skipped by the caller.
#[derive(Error, Debug)]
pub enum DisaggError {
    /// Inconsistent or unsupported job configuration, reported before any
    /// computation starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything that went wrong while processing one seismic source.
    #[error("an error occurred with source id={source_id}: {message}")]
    Source { source_id: String, message: String },

    /// A probability outside [0, 1] reached the product rule.
    #[error("merge rule violated: probability {value} is outside [0, 1]")]
    MergeRule { value: f64 },

    #[error("cannot merge matrices of shape {left:?} and {right:?}")]
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },

    #[error("hazard curve error: {0}")]
    Curve(String),

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("npz error in {path}: {message}")]
    Npz { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DisaggError {
    pub fn config(message: impl Into<String>) -> Self {
        DisaggError::Config(message.into())
    }

    pub fn curve(message: impl Into<String>) -> Self {
        DisaggError::Curve(message.into())
    }

    pub fn geometry(message: impl Into<String>) -> Self {
        DisaggError::Geometry(message.into())
    }

    pub fn npz(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        DisaggError::Npz {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Attaches a source id to an error raised while processing that source.
    /// Errors that already carry a source id keep the innermost one.
    pub fn in_source(self, source_id: &str) -> Self {
        match self {
            err @ DisaggError::Source { .. } => err,
            other => DisaggError::Source {
                source_id: source_id.to_string(),
                message: other.to_string(),
            },
        }
    }
}
