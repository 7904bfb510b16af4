//! Settings and record types for batched integration.

use crate::error::{IntegrationError, IntegrationResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Step-size control settings for a [`Swarm`](super::Swarm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmSettings {
    /// Largest accepted per-trajectory error estimate (max norm over components).
    pub tolerance: f64,
    /// Multiplier applied to every step-size update.
    pub safety_factor: f64,
    /// Upper bound for any trajectory's step size.
    pub max_step_size: f64,
    /// A shrink below this step size fails with `StepSizeUnderflow`.
    pub min_step_size: f64,
    /// Smallest factor a single update may scale a step size by.
    pub min_factor: f64,
    /// Largest factor a single growth update may scale a step size by.
    pub max_factor: f64,
    /// Rejected attempts allowed within one `advance_step` call.
    pub max_retries: usize,
    /// Step budget for `advance_until`.
    pub max_steps_per_call: usize,
    /// Whether embedded error estimates are appended to the history.
    pub record_errors: bool,
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            safety_factor: 0.9,
            max_step_size: 1.0,
            min_step_size: 1e-12,
            min_factor: 0.1,
            max_factor: 5.0,
            max_retries: 50,
            max_steps_per_call: 1_000_000,
            record_errors: true,
        }
    }
}

impl SwarmSettings {
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> IntegrationResult<()> {
        let positive = |value: f64| value.is_finite() && value > 0.0;
        if !positive(self.tolerance) {
            return Err(IntegrationError::config("tolerance must be positive"));
        }
        if !positive(self.safety_factor) || self.safety_factor > 1.0 {
            return Err(IntegrationError::config("safety_factor must lie in (0, 1]"));
        }
        if !positive(self.max_step_size) {
            return Err(IntegrationError::config("max_step_size must be positive"));
        }
        if !(self.min_step_size >= 0.0 && self.min_step_size < self.max_step_size) {
            return Err(IntegrationError::config(
                "min_step_size must be non-negative and below max_step_size",
            ));
        }
        if !positive(self.min_factor) || self.min_factor >= 1.0 {
            return Err(IntegrationError::config("min_factor must lie in (0, 1)"));
        }
        if !(self.max_factor.is_finite() && self.max_factor >= 1.0) {
            return Err(IntegrationError::config("max_factor must be at least 1"));
        }
        if self.max_steps_per_call == 0 {
            return Err(IntegrationError::config("max_steps_per_call must be at least 1"));
        }
        Ok(())
    }
}

/// How the D×N initial state is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialPositions {
    /// Uniform fill of `[low, high)` from `StdRng::seed_from_u64(seed)`,
    /// drawn column by column, component by component.
    Uniform { seed: u64, low: f64, high: f64 },
    /// Caller-provided D×N matrix.
    Explicit(DMatrix<f64>),
}

impl Default for InitialPositions {
    fn default() -> Self {
        InitialPositions::Uniform {
            seed: 1,
            low: 0.0,
            high: 5.0,
        }
    }
}

/// One logged error estimate for the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    /// Zero-based attempt index within the `advance_step` call.
    pub attempt: usize,
    pub accepted: bool,
    /// Per-trajectory clock at the start of the attempt.
    pub clock: DVector<f64>,
    /// Per-trajectory step sizes used for the attempt.
    pub step_size: DVector<f64>,
    /// Signed difference primary minus secondary estimate (D×N).
    pub error: DMatrix<f64>,
    /// Max-norm of `error` per trajectory.
    pub max_error: DVector<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwarmStats {
    pub accepted_steps: usize,
    pub rejected_attempts: usize,
    pub field_evaluations: usize,
}

/// Outcome of a successful `advance_step`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Attempts made, including the committed one.
    pub attempts: usize,
    /// Trajectories that triggered at least one retry.
    pub rejected_trajectories: Vec<usize>,
    /// Step sizes that were committed.
    pub step_taken: DVector<f64>,
}

/// State of one trajectory, copied out of the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Particle {
    pub position: Vec<f64>,
    pub time: f64,
    pub step_size: f64,
}
