//! Batched integrator exposed to JavaScript.

use anyhow::{bail, Context, Result};
use js_sys::Float64Array;
use swarm_core::attractors;
use swarm_core::{
    ExpressionField, InitialPositions, Swarm, SwarmSettings, TableauRegistry, VectorField,
};
use wasm_bindgen::prelude::*;

const INITIAL_LOW: f64 = 0.0;
const INITIAL_HIGH: f64 = 5.0;

#[wasm_bindgen]
pub struct WasmSwarm {
    pub(crate) swarm: Swarm<Box<dyn VectorField>>,
}

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

pub(crate) fn build_swarm(
    method: &str,
    field: Box<dyn VectorField>,
    count: u32,
    step_size: f64,
    tolerance: f64,
    seed: u32,
) -> Result<Swarm<Box<dyn VectorField>>> {
    if count == 0 {
        bail!("Swarm needs at least one particle.");
    }
    let tableau = TableauRegistry::builtin()?.get(method)?;
    let dimensions = field.dimension();
    let swarm = Swarm::new(
        tableau,
        field,
        dimensions,
        count as usize,
        0.0,
        step_size,
        SwarmSettings::with_tolerance(tolerance),
        InitialPositions::Uniform {
            seed: u64::from(seed),
            low: INITIAL_LOW,
            high: INITIAL_HIGH,
        },
    )?;
    Ok(swarm)
}

pub(crate) fn build_expression_field(
    equations: &[String],
    var_names: &[String],
    param_names: &[String],
    params: Vec<f64>,
) -> Result<Box<dyn VectorField>> {
    let field = ExpressionField::compile(equations, var_names, param_names, params)
        .context("Failed to compile equations.")?;
    Ok(Box::new(field))
}

pub(crate) fn step_count(steps: usize) -> Result<u32> {
    u32::try_from(steps).with_context(|| format!("Step count {steps} does not fit in a u32."))
}

#[wasm_bindgen]
impl WasmSwarm {
    /// Swarm of `count` particles on a named attractor. An empty `params`
    /// keeps the attractor's default parameters.
    #[wasm_bindgen(constructor)]
    pub fn new(
        method: &str,
        attractor: &str,
        params: Vec<f64>,
        count: u32,
        step_size: f64,
        tolerance: f64,
        seed: u32,
    ) -> Result<WasmSwarm, JsValue> {
        console_error_panic_hook::set_once();

        let field = attractors::by_name(attractor, &params).map_err(|e| js_error(format!("{e:#}")))?;
        let swarm = build_swarm(method, field, count, step_size, tolerance, seed)
            .map_err(|e| js_error(format!("{e:#}")))?;
        Ok(WasmSwarm { swarm })
    }

    /// Swarm of `count` particles on a system given as one equation per variable.
    #[allow(clippy::too_many_arguments)]
    pub fn from_equations(
        method: &str,
        equations: Vec<String>,
        var_names: Vec<String>,
        param_names: Vec<String>,
        params: Vec<f64>,
        count: u32,
        step_size: f64,
        tolerance: f64,
        seed: u32,
    ) -> Result<WasmSwarm, JsValue> {
        console_error_panic_hook::set_once();

        let field = build_expression_field(&equations, &var_names, &param_names, params)
            .map_err(|e| js_error(format!("{e:#}")))?;
        let swarm = build_swarm(method, field, count, step_size, tolerance, seed)
            .map_err(|e| js_error(format!("{e:#}")))?;
        Ok(WasmSwarm { swarm })
    }

    pub fn step(&mut self, adaptive: bool) -> Result<(), JsValue> {
        self.swarm.advance_step(adaptive).map_err(js_error)?;
        Ok(())
    }

    pub fn step_many(&mut self, steps: u32, adaptive: bool) -> Result<(), JsValue> {
        self.swarm
            .advance_steps(steps as usize, adaptive)
            .map_err(js_error)
    }

    /// Steps until every particle reaches `t_end`; returns the steps taken.
    pub fn advance_until(&mut self, t_end: f64, adaptive: bool) -> Result<u32, JsValue> {
        let steps = self
            .swarm
            .advance_until(t_end, adaptive)
            .map_err(js_error)?;
        step_count(steps).map_err(|e| js_error(format!("{e:#}")))
    }

    pub fn set_tolerance(&mut self, tolerance: f64) -> Result<(), JsValue> {
        self.swarm.set_tolerance(tolerance).map_err(js_error)
    }

    pub fn dimensions(&self) -> usize {
        self.swarm.dimensions()
    }

    pub fn count(&self) -> usize {
        self.swarm.count()
    }

    pub fn method(&self) -> String {
        self.swarm.tableau().name().to_string()
    }

    /// Butcher array of the active method as text.
    pub fn describe_method(&self) -> String {
        self.swarm.tableau().to_string()
    }

    /// Positions flattened column-major: particle n occupies
    /// `[n * dimensions, (n + 1) * dimensions)`.
    pub fn positions(&self) -> Vec<f64> {
        self.swarm.positions().as_slice().to_vec()
    }

    pub fn clock(&self) -> Vec<f64> {
        self.swarm.clock().as_slice().to_vec()
    }

    pub fn step_sizes(&self) -> Vec<f64> {
        self.swarm.step_size().as_slice().to_vec()
    }

    pub fn error_history(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(self.swarm.error_history())
            .map_err(|e| js_error(format!("Failed to serialize error history: {e}")))
    }

    pub fn stats(&self) -> Result<JsValue, JsValue> {
        serde_wasm_bindgen::to_value(&self.swarm.stats())
            .map_err(|e| js_error(format!("Failed to serialize stats: {e}")))
    }

    /// Error of one component over all recorded attempts, flattened
    /// column-major (count × attempts).
    pub fn error_surface(&self, component: usize) -> Result<Float64Array, JsValue> {
        let surface = self.swarm.error_surface(component).ok_or_else(|| {
            js_error(format!(
                "Component {} out of range for a {}-dimensional system.",
                component,
                self.swarm.dimensions()
            ))
        })?;
        Ok(Float64Array::from(surface.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn attractor_swarm_steps_adaptively() {
        let mut swarm = WasmSwarm::new("Dormand-Prince", "lorenz", Vec::new(), 16, 0.001, 1e-6, 7)
            .expect("swarm should build");

        swarm.step_many(5, true).expect("steps");

        assert_eq!(swarm.dimensions(), 3);
        assert_eq!(swarm.count(), 16);
        assert_eq!(swarm.positions().len(), 48);
        assert_eq!(swarm.clock().len(), 16);
        assert!(swarm.clock().iter().all(|&t| t > 0.0));
        assert_eq!(swarm.swarm.stats().accepted_steps, 5);
        assert_eq!(swarm.method(), "Dormand-Prince");
    }

    #[test]
    fn positions_are_column_major() {
        let swarm = WasmSwarm::new("RK4", "thomas", vec![0.2], 4, 0.01, 1e-6, 3)
            .expect("swarm should build");
        let flat = swarm.positions();
        let inner = swarm.swarm.positions();
        assert_eq!(flat[3 * 2 + 1], inner[(1, 2)]);
    }

    #[test]
    fn equation_swarm_advances_to_target_time() {
        let mut swarm = WasmSwarm::from_equations(
            "RK4",
            strings(&["-k * x"]),
            strings(&["x"]),
            strings(&["k"]),
            vec![1.0],
            3,
            0.25,
            1e-6,
            1,
        )
        .expect("swarm should build");
        let start = swarm.positions();

        let steps = swarm.advance_until(1.0, false).expect("advance");

        assert_eq!(steps, 4);
        assert_eq!(swarm.clock(), vec![1.0; 3]);
        assert_eq!(swarm.step_sizes(), vec![0.25; 3]);
        for (end, begin) in swarm.positions().iter().zip(start.iter()) {
            assert!((end - begin * (-1.0f64).exp()).abs() < 1e-3);
        }
    }

    #[test]
    fn builders_report_bad_input() {
        let field = attractors::by_name("lorenz", &[]).unwrap();
        let err = build_swarm("Radau", field, 4, 0.01, 1e-6, 1)
            .err()
            .expect("unknown method");
        assert!(format!("{err:#}").contains("Unknown solver"));

        let field = attractors::by_name("lorenz", &[]).unwrap();
        assert!(build_swarm("RK4", field, 0, 0.01, 1e-6, 1).is_err());

        let err = build_expression_field(&strings(&["x +"]), &strings(&["x"]), &[], Vec::new())
            .err()
            .expect("parse error");
        assert!(format!("{err:#}").contains("Failed to compile equations"));
    }

    #[test]
    fn step_counts_beyond_u32_are_reported() {
        assert_eq!(step_count(4).unwrap(), 4);
        assert_eq!(step_count(u32::MAX as usize).unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        {
            let err = step_count(u32::MAX as usize + 1)
                .err()
                .expect("overflowing step count");
            assert!(format!("{err:#}").contains("does not fit in a u32"));
        }
    }

    #[cfg(target_arch = "wasm32")]
    mod wasm {
        use super::*;
        use wasm_bindgen_test::wasm_bindgen_test;

        #[wasm_bindgen_test]
        fn unknown_attractor_is_rejected() {
            let result = WasmSwarm::new("RK4", "rossler", Vec::new(), 4, 0.01, 1e-6, 1);
            let message = result
                .err()
                .and_then(|err| err.as_string())
                .unwrap_or_default();
            assert!(message.contains("Unknown attractor"));
        }

        #[wasm_bindgen_test]
        fn adaptive_step_on_plain_method_is_rejected() {
            let mut swarm =
                WasmSwarm::new("RK4", "lorenz", Vec::new(), 4, 0.01, 1e-6, 1).expect("swarm");
            let message = swarm
                .step(true)
                .err()
                .and_then(|err| err.as_string())
                .unwrap_or_default();
            assert!(message.contains("adaptive stepping unavailable"));
        }

        #[wasm_bindgen_test]
        fn error_surface_has_one_entry_per_particle_and_attempt() {
            let mut swarm = WasmSwarm::new("Cash-Karp", "lorenz", Vec::new(), 5, 0.001, 1e-6, 1)
                .expect("swarm");
            swarm.step_many(2, false).expect("steps");
            let surface = swarm.error_surface(0).expect("surface");
            assert_eq!(surface.length(), 10);
            assert!(swarm.error_surface(3).is_err());
            assert!(swarm.error_history().is_ok());
        }
    }
}
