use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub fn compile_project(xml: &str, entry: Option<String>) -> Result<String, JsValue> {
    crate::compile(xml, entry.as_deref()).map_err(|e| JsValue::from_str(&e.to_string()))
}
