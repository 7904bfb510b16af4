//! Batched explicit Runge-Kutta integration.
//!
//! A [`Swarm`] owns N independent trajectories of dimension D stored as the
//! columns of a D×N matrix, and advances all of them together through one
//! [`Tableau`]. With an embedded tableau each step also yields a per-column
//! error estimate, which adaptive stepping uses to control every column's
//! step size independently.
//!
//! Policies worth knowing about:
//! - The clock is kept per trajectory. Under adaptive stepping columns take
//!   different steps and drift apart in time; the vector field receives each
//!   column's own evaluation time.
//! - When any column exceeds the tolerance, only the offending columns have
//!   their step shrunk, but the whole batch is recomputed. Nothing is
//!   committed until every column passes.

pub mod types;

pub use types::{ErrorRecord, InitialPositions, Particle, StepReport, SwarmSettings, SwarmStats};

use crate::error::{IntegrationError, IntegrationResult};
use crate::tableau::Tableau;
use crate::traits::VectorField;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct Swarm<F: VectorField> {
    tableau: Arc<Tableau>,
    field: F,
    positions: DMatrix<f64>,
    step_size: DVector<f64>,
    clock: DVector<f64>,
    settings: SwarmSettings,
    error_history: Vec<ErrorRecord>,
    stats: SwarmStats,
}

/// Candidate next state and, for embedded pairs, its error estimate.
struct StepEstimate {
    primary: DMatrix<f64>,
    error: Option<DMatrix<f64>>,
}

impl<F: VectorField> Swarm<F> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tableau: impl Into<Arc<Tableau>>,
        field: F,
        dimensions: usize,
        count: usize,
        initial_time: f64,
        initial_step_size: f64,
        settings: SwarmSettings,
        initial: InitialPositions,
    ) -> IntegrationResult<Self> {
        let tableau = tableau.into();
        if dimensions == 0 {
            return Err(IntegrationError::config("dimensions must be at least 1"));
        }
        if count == 0 {
            return Err(IntegrationError::config("trajectory count must be at least 1"));
        }
        if field.dimension() != dimensions {
            return Err(IntegrationError::config(format!(
                "vector field has dimension {} but the swarm has {}",
                field.dimension(),
                dimensions
            )));
        }
        if !(initial_step_size.is_finite() && initial_step_size > 0.0) {
            return Err(IntegrationError::config("initial step size must be positive"));
        }
        if !initial_time.is_finite() {
            return Err(IntegrationError::config("initial time must be finite"));
        }
        settings.validate()?;
        if initial_step_size > settings.max_step_size {
            return Err(IntegrationError::config(format!(
                "initial step size {} exceeds max_step_size {}",
                initial_step_size, settings.max_step_size
            )));
        }

        let positions = initial_positions(initial, dimensions, count)?;
        debug!(
            method = tableau.name(),
            stages = tableau.stages(),
            embedded = tableau.is_embedded(),
            dimensions,
            count,
            "created swarm"
        );

        Ok(Self {
            tableau,
            field,
            positions,
            step_size: DVector::from_element(count, initial_step_size),
            clock: DVector::from_element(count, initial_time),
            settings,
            error_history: Vec::new(),
            stats: SwarmStats::default(),
        })
    }

    /// Advances every trajectory by one step.
    ///
    /// With `adaptive`, steps whose error estimate exceeds the tolerance are
    /// retried with shrunk step sizes, and step sizes are grown for the next
    /// call once the step is accepted. Adaptive stepping requires an embedded
    /// tableau with a known order. On error nothing is committed.
    pub fn advance_step(&mut self, adaptive: bool) -> IntegrationResult<StepReport> {
        let order = if adaptive {
            Some(self.adaptive_order()?)
        } else {
            None
        };

        let count = self.count();
        let mut h = self.step_size.clone();
        let mut rejected_trajectories: Vec<usize> = Vec::new();
        let mut attempt = 0usize;

        loop {
            let estimate = self.estimate(&h)?;
            let Some(error) = estimate.error else {
                self.commit(estimate.primary, &h);
                return Ok(StepReport {
                    attempts: attempt + 1,
                    rejected_trajectories,
                    step_taken: h,
                });
            };

            let max_error =
                DVector::from_iterator(count, error.column_iter().map(|c| max_abs(c.iter())));
            let offenders: Vec<usize> = match order {
                Some(_) => (0..count)
                    .filter(|&n| !(max_error[n] <= self.settings.tolerance))
                    .collect(),
                None => Vec::new(),
            };
            let accepted = offenders.is_empty();
            self.record(attempt, accepted, &h, error, max_error.clone());

            if accepted {
                self.commit(estimate.primary, &h);
                if let Some(order) = order {
                    let grow_exponent = 1.0 / f64::from(order.saturating_sub(1).max(1));
                    self.step_size = DVector::from_fn(count, |n, _| {
                        self.updated_step(h[n], max_error[n], grow_exponent, self.settings.max_factor)
                    });
                }
                return Ok(StepReport {
                    attempts: attempt + 1,
                    rejected_trajectories,
                    step_taken: h,
                });
            }

            self.stats.rejected_attempts += 1;
            for &n in &offenders {
                if let Err(pos) = rejected_trajectories.binary_search(&n) {
                    rejected_trajectories.insert(pos, n);
                }
            }

            let attempted: Vec<f64> = offenders.iter().map(|&n| h[n]).collect();
            let shrink_exponent = 1.0 / f64::from(order.unwrap_or(1));
            for &n in &offenders {
                h[n] = self.updated_step(h[n], max_error[n], shrink_exponent, 1.0);
            }
            attempt += 1;

            let underflow = offenders
                .iter()
                .any(|&n| h[n] < self.settings.min_step_size);
            if attempt > self.settings.max_retries || underflow {
                warn!(
                    retries = attempt,
                    trajectories = offenders.len(),
                    min_step = h.min(),
                    "adaptive step failed to meet tolerance"
                );
                return Err(IntegrationError::StepSizeUnderflow {
                    retries: attempt,
                    trajectories: offenders,
                    step_sizes: attempted,
                });
            }
            debug!(
                attempt,
                offenders = offenders.len(),
                "step rejected, retrying batch with shrunk step sizes"
            );
        }
    }

    /// Calls [`advance_step`](Self::advance_step) `steps` times, stopping at
    /// the first error.
    pub fn advance_steps(&mut self, steps: usize, adaptive: bool) -> IntegrationResult<()> {
        for _ in 0..steps {
            self.advance_step(adaptive)?;
        }
        Ok(())
    }

    /// Steps until every trajectory's clock has reached `t_end`.
    ///
    /// The final step is not shortened to land on `t_end`, so clocks may end
    /// past it. Returns the number of steps taken.
    pub fn advance_until(&mut self, t_end: f64, adaptive: bool) -> IntegrationResult<usize> {
        let mut steps = 0usize;
        while self.clock.min() < t_end {
            if steps >= self.settings.max_steps_per_call {
                return Err(IntegrationError::MaxStepsExceeded {
                    target: t_end,
                    steps,
                });
            }
            self.advance_step(adaptive)?;
            steps += 1;
        }
        Ok(steps)
    }

    /// Runs every stage for step sizes `h` without touching the swarm state.
    fn estimate(&mut self, h: &DVector<f64>) -> IntegrationResult<StepEstimate> {
        let tableau = Arc::clone(&self.tableau);
        let (dim, count) = self.positions.shape();
        let gamma = tableau.stage_matrix();
        let weights = tableau.weights();

        let mut derivatives: Vec<DMatrix<f64>> = Vec::with_capacity(tableau.stages());
        for j in 0..tableau.stages() {
            let mut increment = DMatrix::zeros(dim, count);
            for (k, derivative) in derivatives.iter().enumerate() {
                let coefficient = gamma[(j, k)];
                if coefficient != 0.0 {
                    increment += derivative * coefficient;
                }
            }
            let stage_state = &self.positions + scale_columns(increment, h);
            let stage_times = &self.clock + h * tableau.nodes()[j];

            let derivative = self.field.evaluate(&stage_times, &stage_state);
            self.stats.field_evaluations += 1;
            if derivative.shape() != (dim, count) {
                return Err(IntegrationError::InvalidFieldOutput {
                    stage: j,
                    expected: (dim, count),
                    actual: derivative.shape(),
                });
            }
            derivatives.push(derivative);
        }

        let combine = |row: &dyn Fn(usize) -> f64| {
            let mut combined = DMatrix::zeros(dim, count);
            for (j, derivative) in derivatives.iter().enumerate() {
                let w = row(j);
                if w != 0.0 {
                    combined += derivative * w;
                }
            }
            scale_columns(combined, h)
        };

        let primary = &self.positions + combine(&|j: usize| weights[(0, j)]);
        // Contracting against the weight difference avoids cancellation
        // between two nearly equal states.
        let error = tableau
            .is_embedded()
            .then(|| combine(&|j: usize| weights[(0, j)] - weights[(1, j)]));

        Ok(StepEstimate { primary, error })
    }

    fn commit(&mut self, positions: DMatrix<f64>, h: &DVector<f64>) {
        self.positions = positions;
        self.clock += h;
        self.stats.accepted_steps += 1;
        trace!(
            step = self.stats.accepted_steps,
            clock_min = self.clock.min(),
            clock_max = self.clock.max(),
            "committed step"
        );
    }

    fn record(
        &mut self,
        attempt: usize,
        accepted: bool,
        h: &DVector<f64>,
        error: DMatrix<f64>,
        max_error: DVector<f64>,
    ) {
        if !self.settings.record_errors {
            return;
        }
        self.error_history.push(ErrorRecord {
            attempt,
            accepted,
            clock: self.clock.clone(),
            step_size: h.clone(),
            error,
            max_error,
        });
    }

    /// `min(max_step, safety * h * clamp((tol / err)^exponent, min_factor, max_factor))`.
    fn updated_step(&self, h: f64, error: f64, exponent: f64, max_factor: f64) -> f64 {
        let s = &self.settings;
        let factor = if error.is_nan() || error.is_infinite() {
            s.min_factor
        } else if error == 0.0 {
            max_factor
        } else {
            (s.tolerance / error).powf(exponent)
        };
        (s.safety_factor * h * factor.clamp(s.min_factor, max_factor)).min(s.max_step_size)
    }

    fn adaptive_order(&self) -> IntegrationResult<u32> {
        if !self.tableau.is_embedded() {
            return Err(IntegrationError::AdaptiveUnsupported {
                reason: format!(
                    "'{}' has no embedded error estimate",
                    self.tableau.name()
                ),
            });
        }
        self.tableau
            .order()
            .ok_or_else(|| IntegrationError::AdaptiveUnsupported {
                reason: format!("'{}' does not declare its order", self.tableau.name()),
            })
    }

    pub fn tableau(&self) -> &Tableau {
        &self.tableau
    }

    pub fn field(&self) -> &F {
        &self.field
    }

    /// Current D×N state; column n is trajectory n.
    pub fn positions(&self) -> &DMatrix<f64> {
        &self.positions
    }

    /// Per-trajectory integration time.
    pub fn clock(&self) -> &DVector<f64> {
        &self.clock
    }

    /// The shared time, if every trajectory is at the same time.
    pub fn uniform_clock(&self) -> Option<f64> {
        let first = self.clock[0];
        self.clock.iter().all(|&t| t == first).then_some(first)
    }

    /// Step sizes the next `advance_step` will attempt first.
    pub fn step_size(&self) -> &DVector<f64> {
        &self.step_size
    }

    pub fn error_history(&self) -> &[ErrorRecord] {
        &self.error_history
    }

    pub fn settings(&self) -> &SwarmSettings {
        &self.settings
    }

    pub fn stats(&self) -> SwarmStats {
        self.stats
    }

    pub fn dimensions(&self) -> usize {
        self.positions.nrows()
    }

    pub fn count(&self) -> usize {
        self.positions.ncols()
    }

    /// Changes the adaptive tolerance, e.g. to recover from `StepSizeUnderflow`.
    pub fn set_tolerance(&mut self, tolerance: f64) -> IntegrationResult<()> {
        let updated = SwarmSettings {
            tolerance,
            ..self.settings
        };
        updated.validate()?;
        self.settings = updated;
        Ok(())
    }

    pub fn particle(&self, n: usize) -> Option<Particle> {
        (n < self.count()).then(|| Particle {
            position: self.positions.column(n).iter().copied().collect(),
            time: self.clock[n],
            step_size: self.step_size[n],
        })
    }

    pub fn particles(&self) -> impl Iterator<Item = Particle> + '_ {
        (0..self.count()).filter_map(move |n| self.particle(n))
    }

    /// N×R matrix of the signed error of one state component over the R
    /// recorded attempts. `None` if `component` is out of range.
    pub fn error_surface(&self, component: usize) -> Option<DMatrix<f64>> {
        if component >= self.dimensions() {
            return None;
        }
        let mut surface = DMatrix::zeros(self.count(), self.error_history.len());
        for (r, record) in self.error_history.iter().enumerate() {
            for n in 0..self.count() {
                surface[(n, r)] = record.error[(component, n)];
            }
        }
        Some(surface)
    }
}

fn initial_positions(
    initial: InitialPositions,
    dimensions: usize,
    count: usize,
) -> IntegrationResult<DMatrix<f64>> {
    match initial {
        InitialPositions::Uniform { seed, low, high } => {
            if !(low.is_finite() && high.is_finite() && low < high) {
                return Err(IntegrationError::config(format!(
                    "invalid initial range [{low}, {high})"
                )));
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let mut positions = DMatrix::zeros(dimensions, count);
            for n in 0..count {
                for d in 0..dimensions {
                    positions[(d, n)] = rng.gen_range(low..high);
                }
            }
            Ok(positions)
        }
        InitialPositions::Explicit(positions) => {
            if positions.shape() != (dimensions, count) {
                return Err(IntegrationError::config(format!(
                    "initial positions are {}x{}, expected {}x{}",
                    positions.nrows(),
                    positions.ncols(),
                    dimensions,
                    count
                )));
            }
            if positions.iter().any(|v| !v.is_finite()) {
                return Err(IntegrationError::config("initial positions must be finite"));
            }
            Ok(positions)
        }
    }
}

/// Multiplies column n of `matrix` by `h[n]`.
fn scale_columns(mut matrix: DMatrix<f64>, h: &DVector<f64>) -> DMatrix<f64> {
    for (n, mut column) in matrix.column_iter_mut().enumerate() {
        column *= h[n];
    }
    matrix
}

/// Max-norm that propagates NaN instead of skipping it.
fn max_abs<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    values.fold(0.0, |acc: f64, v| {
        if acc.is_nan() || v.is_nan() {
            f64::NAN
        } else {
            acc.max(v.abs())
        }
    })
}
