use boa_engine::{JsResult, JsValue, Source};
use strand_core::{Runtime, RuntimeOptions};

pub fn runtime() -> Runtime {
    let mut runtime = Runtime::new(RuntimeOptions::default())
        .expect("Failed to create a new runtime");
    runtime.register_api(strand_api::WebApi);
    runtime
}

/// Evaluates `src` and drives the event loop until the resulting value (a
/// promise, usually) settles.
pub fn eval_wait(runtime: &mut Runtime, src: &str) -> JsResult<JsValue> {
    runtime.eval_and_wait(Source::from_bytes(src))
}

pub fn string_of(value: &JsValue) -> String {
    value
        .as_string()
        .map(|string| string.to_std_string_escaped())
        .unwrap_or_else(|| format!("{value:?}"))
}
