use thiserror::Error;

/// Failures surfaced by tableau construction and batched stepping.
///
/// Shrinking a step after an oversized error estimate is not an error; only
/// exhausting the retry budget is.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    #[error("tableau shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    #[error(
        "step size underflow after {retries} rejected attempts (trajectories {trajectories:?}, step sizes {step_sizes:?})"
    )]
    StepSizeUnderflow {
        retries: usize,
        /// Trajectories still outside tolerance on the final attempt.
        trajectories: Vec<usize>,
        /// Step sizes those trajectories were last attempted with.
        step_sizes: Vec<f64>,
    },

    #[error(
        "vector field returned a {}x{} matrix at stage {stage}, expected {}x{}",
        .actual.0, .actual.1, .expected.0, .expected.1
    )]
    InvalidFieldOutput {
        stage: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("adaptive stepping unavailable: {reason}")]
    AdaptiveUnsupported { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("integration did not reach t = {target} within {steps} steps")]
    MaxStepsExceeded { target: f64, steps: usize },
}

impl IntegrationError {
    pub(crate) fn shape(reason: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

pub type IntegrationResult<T> = std::result::Result<T, IntegrationError>;
