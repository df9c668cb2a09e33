//! The Streams core: `ReadableStream`, `WritableStream`, `TransformStream`
//! and the piping operations.
//!
//! Stream state lives in native structs behind [`JsNativeObject`] handles;
//! controllers, readers and writers are separate classes holding traced
//! back-references, so the object graph cycles are the GC's problem rather
//! than an ownership puzzle.
//!
//! More information:
//!  - [WHATWG Streams specification][spec]
//!
//! [spec]: https://streams.spec.whatwg.org/

pub mod pipe;
pub mod queuing_strategy;
pub mod readable;
pub mod transform;
pub mod writable;

use boa_engine::{
    js_string,
    object::{builtins::JsPromise, FunctionObjectBuilder, JsObject},
    Context, JsResult, JsValue, NativeFunction,
};
use boa_gc::Trace;
use strand_core::{event_loop::report_error, Api};

pub use queuing_strategy::QueuingStrategy;
pub use readable::{ReadableStream, ReadableStreamClass};
pub use transform::TransformStreamClass;
pub use writable::{WritableStream, WritableStreamClass};

/// Builds a `{value, done}` read result object.
pub(crate) fn new_read_result(
    value: JsValue,
    done: bool,
    context: &mut Context,
) -> JsValue {
    let obj = JsObject::with_object_proto(context.intrinsics());
    obj.create_data_property_or_throw(js_string!("value"), value, context)
        .expect("fresh object accepts data properties");
    obj.create_data_property_or_throw(js_string!("done"), done, context)
        .expect("fresh object accepts data properties");
    obj.into()
}

/// Resolves `value` to a promise: pass-through for promises, otherwise a
/// promise resolved with the value.
pub(crate) fn promise_resolved_with(
    value: &JsValue,
    context: &mut Context,
) -> JsResult<JsPromise> {
    if let Some(promise) = value.as_promise() {
        return JsPromise::from_object(promise.clone());
    }
    JsPromise::resolve(value.clone(), context)
}

/// Builds a callable from a host fn with traced captures.
pub(crate) fn callback<T: Trace + 'static>(
    context: &mut Context,
    captures: T,
    body: fn(&JsValue, &[JsValue], &mut T, &mut Context) -> JsResult<JsValue>,
) -> boa_engine::object::builtins::JsFunction {
    FunctionObjectBuilder::new(
        context,
        NativeFunction::from_copy_closure_with_captures(body, captures),
    )
    .build()
}

/// `promise.then(...)` with the result promise dropped; reaction errors are
/// reported through the exception hook.
pub(crate) fn promise_then(
    promise: &JsPromise,
    on_fulfilled: Option<boa_engine::object::builtins::JsFunction>,
    on_rejected: Option<boa_engine::object::builtins::JsFunction>,
    context: &mut Context,
) {
    if let Err(err) = promise.then(on_fulfilled, on_rejected, context) {
        report_error(&err);
    }
}

pub struct StreamApi;

impl Api for StreamApi {
    fn init(self, context: &mut Context) {
        queuing_strategy::QueuingStrategyApi.init(context);
        readable::ReadableStreamApi.init(context);
        writable::WritableStreamApi.init(context);
        transform::TransformStreamApi.init(context);
    }
}
