//! Named registry of Butcher tableaux.
//!
//! Registries are read from JSON documents shaped like
//!
//! ```json
//! { "explicit_methods": { "RK4": { "alpha": "[1/6, 1/3, 1/3, 1/6]",
//!                                  "beta":  "[0, 1/2, 1/2, 1]",
//!                                  "gamma": "[[], [1/2], [0, 1/2], [0, 0, 1]]",
//!                                  "order": 4 } } }
//! ```
//!
//! where `alpha` are the weights (one or two rows), `beta` the nodes and
//! `gamma` the stage matrix. Each field may be a bracketed string literal, or
//! a JSON array whose entries are numbers or expression strings.

use crate::expression::{parse_literal, Literal};
use crate::tableau::Tableau;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const BUILTIN_SOLVERS: &str = include_str!("../data/solvers.json");

/// A coefficient field as it appears in a registry document.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Coefficients {
    Number(f64),
    Text(String),
    List(Vec<Coefficients>),
}

impl Coefficients {
    pub fn resolve(&self) -> Result<Literal> {
        match self {
            Coefficients::Number(v) => Ok(Literal::Scalar(*v)),
            Coefficients::Text(text) => parse_literal(text),
            Coefficients::List(items) => Ok(Literal::List(
                items
                    .iter()
                    .map(Coefficients::resolve)
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MethodDefinition {
    #[serde(alias = "weights")]
    pub alpha: Coefficients,
    #[serde(alias = "nodes")]
    pub beta: Coefficients,
    #[serde(alias = "stage_matrix")]
    pub gamma: Coefficients,
    #[serde(default)]
    pub order: Option<u32>,
}

impl MethodDefinition {
    pub fn to_tableau(&self, name: &str) -> Result<Tableau> {
        let nodes = self
            .beta
            .resolve()
            .and_then(|l| l.as_vector())
            .context("Invalid nodes (beta)")?;
        let stage_matrix = self
            .gamma
            .resolve()
            .and_then(|l| l.as_rows())
            .context("Invalid stage matrix (gamma)")?;
        let weights = self
            .alpha
            .resolve()
            .and_then(|l| l.as_rows())
            .context("Invalid weights (alpha)")?;
        Ok(Tableau::from_rows(
            &nodes,
            &stage_matrix,
            &weights,
            self.order,
            name,
        )?)
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    explicit_methods: BTreeMap<String, MethodDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct TableauRegistry {
    methods: BTreeMap<String, Arc<Tableau>>,
}

impl TableauRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The methods shipped with the crate (Euler through Dormand-Prince).
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_SOLVERS).context("Built-in solver table is invalid.")
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: RegistryDocument =
            serde_json::from_str(json).context("Failed to parse solver registry JSON.")?;

        let mut registry = Self::new();
        for (name, definition) in &document.explicit_methods {
            let tableau = definition
                .to_tableau(name)
                .with_context(|| format!("Failed to build tableau '{}'.", name))?;
            registry.insert(tableau);
        }
        debug!(methods = registry.len(), "loaded tableau registry");
        Ok(registry)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read solver registry {}.", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("In {}", path.display()))
    }

    /// Adds or replaces a method under its own name.
    pub fn insert(&mut self, tableau: Tableau) -> Option<Arc<Tableau>> {
        self.methods
            .insert(tableau.name().to_string(), Arc::new(tableau))
    }

    /// Looks a method up by exact name, falling back to a case-insensitive match.
    pub fn get(&self, name: &str) -> Result<Arc<Tableau>> {
        if let Some(tableau) = self.methods.get(name) {
            return Ok(Arc::clone(tableau));
        }
        self.methods
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, tableau)| Arc::clone(tableau))
            .ok_or_else(|| {
                anyhow!(
                    "Unknown solver '{}'. Available: {}.",
                    name,
                    self.names().collect::<Vec<_>>().join(", ")
                )
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.methods.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
