use crate::error::{IntegrationError, IntegrationResult};
use nalgebra::{DMatrix, DVector, RowDVector};
use std::fmt;

pub const DEFAULT_TABLEAU_NAME: &str = "Custom Solver";

/// Butcher tableau of an explicit Runge-Kutta method.
///
/// - `nodes` (c): stage time offsets as fractions of the step.
/// - `stage_matrix` (A): strictly lower-triangular S×S stage weights.
/// - `weights` (b): 1×S, or 2×S for an embedded pair where row 0 is the
///   primary (higher order) solution and row 1 the secondary estimate.
///
/// Construction checks shapes and explicitness only; order conditions are
/// the responsibility of whoever supplies the coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct Tableau {
    name: String,
    nodes: DVector<f64>,
    stage_matrix: DMatrix<f64>,
    weights: DMatrix<f64>,
    order: Option<u32>,
}

impl Tableau {
    pub fn new(
        nodes: DVector<f64>,
        stage_matrix: DMatrix<f64>,
        weights: DMatrix<f64>,
        order: Option<u32>,
        name: impl Into<String>,
    ) -> IntegrationResult<Self> {
        let stages = nodes.len();
        if stages == 0 {
            return Err(IntegrationError::shape("tableau must have at least one stage"));
        }
        if stage_matrix.nrows() != stages || stage_matrix.ncols() != stages {
            return Err(IntegrationError::shape(format!(
                "stage matrix is {}x{} but there are {} nodes",
                stage_matrix.nrows(),
                stage_matrix.ncols(),
                stages
            )));
        }
        if weights.nrows() == 0 || weights.nrows() > 2 {
            return Err(IntegrationError::shape(format!(
                "weights must have one or two rows, got {}",
                weights.nrows()
            )));
        }
        if weights.ncols() != stages {
            return Err(IntegrationError::shape(format!(
                "weight rows have length {} but there are {} nodes",
                weights.ncols(),
                stages
            )));
        }
        for j in 0..stages {
            for k in j..stages {
                if stage_matrix[(j, k)] != 0.0 {
                    return Err(IntegrationError::shape(format!(
                        "stage matrix entry ({j}, {k}) is nonzero; explicit methods need a strictly lower-triangular matrix"
                    )));
                }
            }
        }
        if order == Some(0) {
            return Err(IntegrationError::shape("order must be a positive integer"));
        }

        Ok(Self {
            name: name.into(),
            nodes,
            stage_matrix,
            weights,
            order,
        })
    }

    /// Builds a tableau from row-major nested vectors.
    ///
    /// `weights` holds one row for a plain method or two for an embedded pair.
    /// Stage-matrix rows shorter than the node count are zero-padded, so the
    /// usual lower-triangular notation (`[[], [1/2], [0, 1/2], ...]`) works.
    pub fn from_rows(
        nodes: &[f64],
        stage_matrix: &[Vec<f64>],
        weights: &[Vec<f64>],
        order: Option<u32>,
        name: impl Into<String>,
    ) -> IntegrationResult<Self> {
        let stages = nodes.len();
        if stage_matrix.len() != stages {
            return Err(IntegrationError::shape(format!(
                "stage matrix has {} rows but there are {} nodes",
                stage_matrix.len(),
                stages
            )));
        }
        let mut gamma = DMatrix::zeros(stages, stages);
        for (j, row) in stage_matrix.iter().enumerate() {
            if row.len() > stages {
                return Err(IntegrationError::shape(format!(
                    "stage matrix row {j} has {} entries but there are {} nodes",
                    row.len(),
                    stages
                )));
            }
            for (k, &value) in row.iter().enumerate() {
                gamma[(j, k)] = value;
            }
        }

        let width = weights.first().map(|row| row.len()).unwrap_or(0);
        if weights.iter().any(|row| row.len() != width) {
            return Err(IntegrationError::shape("weight rows have differing lengths"));
        }
        let alpha = DMatrix::from_fn(weights.len(), width, |r, c| weights[r][c]);

        Self::new(
            DVector::from_column_slice(nodes),
            gamma,
            alpha,
            order,
            name,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &DVector<f64> {
        &self.nodes
    }

    pub fn stage_matrix(&self) -> &DMatrix<f64> {
        &self.stage_matrix
    }

    pub fn weights(&self) -> &DMatrix<f64> {
        &self.weights
    }

    pub fn primary_weights(&self) -> RowDVector<f64> {
        self.weights.row(0).into_owned()
    }

    /// Secondary weight row of an embedded pair.
    pub fn embedded_weights(&self) -> Option<RowDVector<f64>> {
        self.is_embedded().then(|| self.weights.row(1).into_owned())
    }

    pub fn order(&self) -> Option<u32> {
        self.order
    }

    pub fn stages(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_embedded(&self) -> bool {
        self.weights.nrows() == 2
    }
}

impl fmt::Display for Tableau {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model: {}", self.name)?;
        if let Some(order) = self.order {
            write!(f, " (order {order})")?;
        }
        writeln!(f)?;
        writeln!(f)?;

        let stages = self.stages();
        for j in 0..stages {
            write!(f, "{:>10.6} |", self.nodes[j])?;
            for k in 0..j {
                write!(f, " {:>10.6}", self.stage_matrix[(j, k)])?;
            }
            writeln!(f)?;
        }
        write!(f, "{}", "-".repeat(11))?;
        writeln!(f, "+{}", "-".repeat(11 * stages))?;
        for r in 0..self.weights.nrows() {
            write!(f, "{:>10} |", "")?;
            for k in 0..stages {
                write!(f, " {:>10.6}", self.weights[(r, k)])?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
