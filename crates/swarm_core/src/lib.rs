//! `swarm_core` integrates large batches of independent trajectories of an
//! ODE with explicit Runge-Kutta methods described by Butcher tableaux.
//!
//! Key components:
//! - **Tableau** and **TableauRegistry**: method coefficients, built-in or
//!   loaded from JSON documents with rational-expression entries.
//! - **Swarm**: the batched stepper. Fixed steps with any tableau; adaptive
//!   per-trajectory step control with embedded pairs.
//! - **VectorField**: the batch-wise derivative interface, implemented by the
//!   built-in attractors and by `ExpressionField` for user equations.
pub mod attractors;
pub mod error;
pub mod expression;
pub mod registry;
pub mod swarm;
pub mod tableau;
pub mod traits;

pub use error::{IntegrationError, IntegrationResult};
pub use expression::ExpressionField;
pub use registry::TableauRegistry;
pub use swarm::{
    ErrorRecord, InitialPositions, Particle, StepReport, Swarm, SwarmSettings, SwarmStats,
};
pub use tableau::Tableau;
pub use traits::{FieldFn, VectorField};
