//! WebAssembly bindings for `swarm_core`.

use swarm_core::attractors;
use swarm_core::TableauRegistry;
use wasm_bindgen::prelude::*;

mod swarm;

pub use swarm::WasmSwarm;

/// Names of the built-in integration methods.
#[wasm_bindgen]
pub fn available_methods() -> Result<Vec<String>, JsValue> {
    let registry =
        TableauRegistry::builtin().map_err(|e| JsValue::from_str(&format!("{e:#}")))?;
    Ok(registry.names().map(str::to_string).collect())
}

#[wasm_bindgen]
pub fn available_attractors() -> Vec<String> {
    attractors::names().map(str::to_string).collect()
}
