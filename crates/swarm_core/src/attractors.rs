//! Three-dimensional chaotic attractors with their customary parameters.
//!
//! Every field here is autonomous; the time argument is ignored.

use crate::traits::{map_columns, VectorField};
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

/// Names accepted by [`by_name`], in canonical spelling.
pub const NAMES: [&str; 7] = [
    "lorenz",
    "tsucs1",
    "tsucs2",
    "yu-wang",
    "wimol-banlue",
    "wang-sun",
    "thomas",
];

/// Builds an attractor by name.
///
/// An empty `params` slice keeps the defaults; otherwise every parameter
/// must be supplied, in the order the struct declares them.
pub fn by_name(name: &str, params: &[f64]) -> Result<Box<dyn VectorField>> {
    let key = name.trim().to_ascii_lowercase().replace(['_', ' '], "-");
    let field: Box<dyn VectorField> = match key.as_str() {
        "lorenz" => Box::new(Lorenz::from_params(params)?),
        "tsucs1" => Box::new(Tsucs1::from_params(params)?),
        "tsucs2" => Box::new(Tsucs2::from_params(params)?),
        "yu-wang" | "yuwang" => Box::new(YuWang::from_params(params)?),
        "wimol-banlue" => Box::new(WimolBanlue::from_params(params)?),
        "wang-sun" => Box::new(WangSun::from_params(params)?),
        "thomas" => Box::new(Thomas::from_params(params)?),
        _ => bail!(
            "Unknown attractor '{}'. Available: {}.",
            name,
            NAMES.join(", ")
        ),
    };
    Ok(field)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    NAMES.iter().copied()
}

fn override_defaults<const P: usize>(
    name: &str,
    params: &[f64],
    defaults: [f64; P],
) -> Result<[f64; P]> {
    if params.is_empty() {
        return Ok(defaults);
    }
    if params.len() != P {
        bail!(
            "{} takes {} parameters, got {}.",
            name,
            P,
            params.len()
        );
    }
    if let Some(bad) = params.iter().find(|p| !p.is_finite()) {
        bail!("{} parameter {} is not finite.", name, bad);
    }
    let mut values = defaults;
    values.copy_from_slice(params);
    Ok(values)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lorenz {
    pub sigma: f64,
    pub rho: f64,
    pub beta: f64,
}

impl Default for Lorenz {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            rho: 28.0,
            beta: 8.0 / 3.0,
        }
    }
}

impl Lorenz {
    pub fn from_params(params: &[f64]) -> Result<Self> {
        let d = Self::default();
        let [sigma, rho, beta] = override_defaults("Lorenz", params, [d.sigma, d.rho, d.beta])?;
        Ok(Self { sigma, rho, beta })
    }
}

impl VectorField for Lorenz {
    fn dimension(&self) -> usize {
        3
    }

    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64> {
        map_columns(times, state, |_t, v, out| {
            let (x, y, z) = (v[0], v[1], v[2]);
            out[0] = self.sigma * (y - x);
            out[1] = x * (self.rho - z) - y;
            out[2] = x * y - self.beta * z;
        })
    }
}

/// Three-scroll unified chaotic system, first variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tsucs1 {
    pub alpha: f64,
    pub beta: f64,
    pub delta: f64,
    pub epsilon: f64,
    pub zeta: f64,
}

impl Default for Tsucs1 {
    fn default() -> Self {
        Self {
            alpha: 40.0,
            beta: 0.5 + 1.0 / 3.0,
            delta: 0.5,
            epsilon: 0.65,
            zeta: 20.0,
        }
    }
}

impl Tsucs1 {
    pub fn from_params(params: &[f64]) -> Result<Self> {
        let d = Self::default();
        let [alpha, beta, delta, epsilon, zeta] = override_defaults(
            "TSUCS1",
            params,
            [d.alpha, d.beta, d.delta, d.epsilon, d.zeta],
        )?;
        Ok(Self {
            alpha,
            beta,
            delta,
            epsilon,
            zeta,
        })
    }
}

impl VectorField for Tsucs1 {
    fn dimension(&self) -> usize {
        3
    }

    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64> {
        map_columns(times, state, |_t, v, out| {
            let (x, y, z) = (v[0], v[1], v[2]);
            out[0] = self.alpha * (y - x) + self.delta * x * z;
            out[1] = self.zeta * y - x * z;
            out[2] = self.beta * z + x * y - self.epsilon * x * x;
        })
    }
}

/// Three-scroll unified chaotic system, second variant.
///
/// The z equation subtracts `e + x²` rather than `e·x²` as TSUCS1 does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tsucs2 {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for Tsucs2 {
    fn default() -> Self {
        Self {
            a: 40.0,
            b: 55.0,
            c: 1.5 + 1.0 / 3.0,
            d: 0.16,
            e: 0.65,
            f: 20.0,
        }
    }
}

impl Tsucs2 {
    pub fn from_params(params: &[f64]) -> Result<Self> {
        let p = Self::default();
        let [a, b, c, d, e, f] =
            override_defaults("TSUCS2", params, [p.a, p.b, p.c, p.d, p.e, p.f])?;
        Ok(Self { a, b, c, d, e, f })
    }
}

impl VectorField for Tsucs2 {
    fn dimension(&self) -> usize {
        3
    }

    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64> {
        map_columns(times, state, |_t, v, out| {
            let (x, y, z) = (v[0], v[1], v[2]);
            out[0] = self.a * (y - x) + self.d * x * z;
            out[1] = self.b * x - x * z + self.f * y;
            out[2] = self.c * z + x * y - (self.e + x * x);
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YuWang {
    pub alpha: f64,
    pub beta: f64,
    pub sigma: f64,
    pub delta: f64,
}

impl Default for YuWang {
    fn default() -> Self {
        Self {
            alpha: 10.0,
            beta: 40.0,
            sigma: 2.0,
            delta: 2.5,
        }
    }
}

impl YuWang {
    pub fn from_params(params: &[f64]) -> Result<Self> {
        let d = Self::default();
        let [alpha, beta, sigma, delta] =
            override_defaults("Yu-Wang", params, [d.alpha, d.beta, d.sigma, d.delta])?;
        Ok(Self {
            alpha,
            beta,
            sigma,
            delta,
        })
    }
}

impl VectorField for YuWang {
    fn dimension(&self) -> usize {
        3
    }

    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64> {
        map_columns(times, state, |_t, v, out| {
            let (x, y, z) = (v[0], v[1], v[2]);
            out[0] = self.alpha * (y - x);
            out[1] = self.beta * x - self.sigma * x * z;
            out[2] = (x * y).exp() - self.delta * z;
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WimolBanlue {
    pub alpha: f64,
}

impl Default for WimolBanlue {
    fn default() -> Self {
        Self { alpha: 2.0 }
    }
}

impl WimolBanlue {
    pub fn from_params(params: &[f64]) -> Result<Self> {
        let [alpha] = override_defaults("Wimol-Banlue", params, [Self::default().alpha])?;
        Ok(Self { alpha })
    }
}

impl VectorField for WimolBanlue {
    fn dimension(&self) -> usize {
        3
    }

    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64> {
        map_columns(times, state, |_t, v, out| {
            let (x, y, z) = (v[0], v[1], v[2]);
            out[0] = y - x;
            out[1] = -z * x.tanh();
            out[2] = -self.alpha * x * y + y.abs();
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WangSun {
    pub alpha: f64,
    pub beta: f64,
    pub sigma: f64,
    pub delta: f64,
    pub epsilon: f64,
    pub zeta: f64,
}

impl Default for WangSun {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            beta: -0.01,
            sigma: 1.0,
            delta: -0.4,
            epsilon: -1.0,
            zeta: -1.0,
        }
    }
}

impl WangSun {
    pub fn from_params(params: &[f64]) -> Result<Self> {
        let d = Self::default();
        let [alpha, beta, sigma, delta, epsilon, zeta] = override_defaults(
            "Wang-Sun",
            params,
            [d.alpha, d.beta, d.sigma, d.delta, d.epsilon, d.zeta],
        )?;
        Ok(Self {
            alpha,
            beta,
            sigma,
            delta,
            epsilon,
            zeta,
        })
    }
}

impl VectorField for WangSun {
    fn dimension(&self) -> usize {
        3
    }

    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64> {
        map_columns(times, state, |_t, v, out| {
            let (x, y, z) = (v[0], v[1], v[2]);
            out[0] = self.alpha * x + self.sigma * y * z;
            out[1] = self.beta * x + self.delta * y - x * z;
            out[2] = self.epsilon * z + self.zeta * x * y;
        })
    }
}

/// Thomas' cyclically symmetric attractor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thomas {
    pub beta: f64,
}

impl Default for Thomas {
    fn default() -> Self {
        Self { beta: 0.19 }
    }
}

impl Thomas {
    pub fn from_params(params: &[f64]) -> Result<Self> {
        let [beta] = override_defaults("Thomas", params, [Self::default().beta])?;
        Ok(Self { beta })
    }
}

impl VectorField for Thomas {
    fn dimension(&self) -> usize {
        3
    }

    // x is driven by +beta while y and z are damped by -beta.
    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64> {
        map_columns(times, state, |_t, v, out| {
            let (x, y, z) = (v[0], v[1], v[2]);
            out[0] = self.beta * x + y.sin();
            out[1] = -self.beta * y + z.sin();
            out[2] = -self.beta * z + x.sin();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_at(field: &dyn VectorField, point: [f64; 3]) -> [f64; 3] {
        let state = DMatrix::from_column_slice(3, 1, &point);
        let out = field.evaluate(&DVector::zeros(1), &state);
        [out[(0, 0)], out[(1, 0)], out[(2, 0)]]
    }

    fn assert_close(actual: [f64; 3], expected: [f64; 3]) {
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-12, "got {actual:?}, expected {expected:?}");
        }
    }

    #[test]
    fn lorenz_matches_hand_computed_values() {
        let out = eval_at(&Lorenz::default(), [1.0, 2.0, 3.0]);
        assert_close(out, [10.0, 1.0 * 25.0 - 2.0, 2.0 - 8.0]);
    }

    #[test]
    fn every_named_attractor_evaluates_column_wise() {
        let state = DMatrix::from_column_slice(3, 2, &[0.1, 0.2, 0.3, -0.3, 0.2, 0.1]);
        for name in names() {
            let field = by_name(name, &[]).expect(name);
            assert_eq!(field.dimension(), 3);
            let out = field.evaluate(&DVector::zeros(2), &state);
            assert_eq!(out.shape(), (3, 2));
            assert!(out.iter().all(|v| v.is_finite()), "{name} produced {out}");

            let single = eval_at(field.as_ref(), [-0.3, 0.2, 0.1]);
            assert_close(single, [out[(0, 1)], out[(1, 1)], out[(2, 1)]]);
        }
    }

    #[test]
    fn point_values_of_the_remaining_attractors() {
        let p = [1.0, 2.0, 0.5];
        assert_close(
            eval_at(&Tsucs1::default(), p),
            [40.0 + 0.25, 40.0 - 0.5, (0.5 + 1.0 / 3.0) * 0.5 + 2.0 - 0.65],
        );
        assert_close(
            eval_at(&Tsucs2::default(), p),
            [40.0 + 0.08, 55.0 - 0.5 + 40.0, (1.5 + 1.0 / 3.0) * 0.5 + 2.0 - 1.65],
        );
        assert_close(
            eval_at(&YuWang::default(), p),
            [10.0, 40.0 - 1.0, 2.0f64.exp() - 1.25],
        );
        assert_close(
            eval_at(&WimolBanlue::default(), p),
            [1.0, -0.5 * 1.0f64.tanh(), -4.0 + 2.0],
        );
        assert_close(
            eval_at(&WangSun::default(), p),
            [0.2 + 1.0, -0.01 - 0.8 - 0.5, -0.5 - 2.0],
        );
        assert_close(
            eval_at(&Thomas::default(), p),
            [0.19 + 2.0f64.sin(), -0.38 + 0.5f64.sin(), -0.095 + 1.0f64.sin()],
        );
    }

    #[test]
    fn by_name_overrides_parameters_in_declaration_order() {
        let field = by_name("Lorenz", &[1.0, 2.0, 3.0]).unwrap();
        assert_close(eval_at(field.as_ref(), [1.0, 1.0, 1.0]), [0.0, 0.0, -2.0]);

        let thomas = by_name("THOMAS", &[0.5]).unwrap();
        assert_close(
            eval_at(thomas.as_ref(), [0.0, 0.0, 0.0]),
            [0.0, 0.0, 0.0],
        );
        assert!(by_name("wang_sun", &[]).is_ok());
    }

    #[test]
    fn bad_names_and_parameter_counts_are_reported() {
        let err = by_name("rossler", &[])
            .err()
            .expect("unknown attractor")
            .to_string();
        assert!(err.contains("Available: lorenz"), "{err}");

        let err = by_name("lorenz", &[1.0])
            .err()
            .expect("wrong parameter count")
            .to_string();
        assert!(err.contains("takes 3 parameters"), "{err}");

        assert!(by_name("thomas", &[f64::NAN]).is_err());
    }
}
