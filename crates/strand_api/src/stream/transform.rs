//! `TransformStream`: a `(writable, readable)` pair wired through a
//! transformer.
//!
//! Writes invoke `transformer.transform(chunk, controller)`, which may
//! enqueue onto the readable side any number of times; closing the writable
//! runs `flush` and then closes the readable; errors on either side
//! propagate to the other.
//!
//! More information:
//!  - [WHATWG Streams specification][spec]
//!
//! [spec]: https://streams.spec.whatwg.org/#ts-model

use boa_engine::{
    js_string,
    object::builtins::{JsFunction, JsPromise},
    property::Attribute,
    Context, JsArgs, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{custom_trace, Finalize, Trace};
use strand_core::native::{
    register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
};

use super::{
    callback, promise_resolved_with, promise_then,
    readable::{callable_prop, ReadableStream, UnderlyingSource},
    writable::{UnderlyingSink, WritableStream},
    QueuingStrategy,
};

pub struct TransformStream {
    readable: JsValue,
    writable: JsValue,
}

impl Finalize for TransformStream {}

unsafe impl Trace for TransformStream {
    custom_trace!(this, {
        mark(&this.readable);
        mark(&this.writable);
    });
}

/// Passed to `transform`/`flush`; enqueues into the readable side and
/// propagates errors to both.
pub struct TransformStreamDefaultController {
    readable: JsValue,
    writable: JsValue,
}

impl Finalize for TransformStreamDefaultController {}

unsafe impl Trace for TransformStreamDefaultController {
    custom_trace!(this, {
        mark(&this.readable);
        mark(&this.writable);
    });
}

impl TransformStreamDefaultController {
    fn readable(&self) -> JsResult<JsNativeObject<ReadableStream>> {
        JsNativeObject::try_from(self.readable.clone())
    }

    fn writable(&self) -> JsResult<JsNativeObject<WritableStream>> {
        JsNativeObject::try_from(self.writable.clone())
    }
}

/// Errors both sides of the pair with `reason`.
fn error_both(
    controller: &JsNativeObject<TransformStreamDefaultController>,
    reason: &JsValue,
    context: &mut Context,
) {
    let (readable, writable) = {
        let inner = controller.deref();
        (inner.readable(), inner.writable())
    };
    if let Ok(readable) = readable {
        ReadableStream::error(&readable, reason, context);
    }
    if let Ok(writable) = writable {
        WritableStream::error(&writable, reason, context);
    }
}

pub struct TransformStreamDefaultControllerClass;

impl TransformStreamDefaultControllerClass {
    fn desired_size(context: &mut Context) -> Accessor {
        Accessor::new("desiredSize").get(
            NativeFunction::from_fn_ptr(|this, _args, _context| {
                let controller: JsNativeObject<TransformStreamDefaultController> =
                    JsNativeObject::try_from(this.clone())?;
                let readable = controller.deref().readable()?;
                let desired = readable.deref().desired_size();
                Ok(match desired {
                    Some(size) => JsValue::from(size),
                    None => JsValue::null(),
                })
            }),
            context,
        )
    }

    fn enqueue(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let controller: JsNativeObject<TransformStreamDefaultController> =
            JsNativeObject::try_from(this.clone())?;
        let readable = controller.deref().readable()?;
        ReadableStream::enqueue(&readable, args.get_or_undefined(0), context)?;
        Ok(JsValue::undefined())
    }

    fn error(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let controller: JsNativeObject<TransformStreamDefaultController> =
            JsNativeObject::try_from(this.clone())?;
        error_both(&controller, args.get_or_undefined(0), context);
        Ok(JsValue::undefined())
    }

    fn terminate(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let controller: JsNativeObject<TransformStreamDefaultController> =
            JsNativeObject::try_from(this.clone())?;
        let readable = controller.deref().readable()?;
        let _ = ReadableStream::request_close(&readable, context);
        if let Ok(writable) = controller.deref().writable() {
            let reason = JsNativeError::typ()
                .with_message("The transform stream has been terminated")
                .to_opaque(context);
            WritableStream::error(&writable, &reason.into(), context);
        }
        Ok(JsValue::undefined())
    }
}

impl NativeClass for TransformStreamDefaultControllerClass {
    type Instance = TransformStreamDefaultController;

    const NAME: &'static str = "TransformStreamDefaultController";

    fn constructor(
        _this: &JsNativeObject<TransformStreamDefaultController>,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<TransformStreamDefaultController> {
        Err(JsNativeError::typ()
            .with_message("Illegal constructor")
            .into())
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let desired_size = Self::desired_size(class.context());
        class
            .accessor(js_string!("desiredSize"), desired_size, Attribute::all())
            .method(
                js_string!("enqueue"),
                1,
                NativeFunction::from_fn_ptr(Self::enqueue),
            )
            .method(
                js_string!("error"),
                1,
                NativeFunction::from_fn_ptr(Self::error),
            )
            .method(
                js_string!("terminate"),
                0,
                NativeFunction::from_fn_ptr(Self::terminate),
            );
        Ok(())
    }
}

struct Transformer {
    this: JsValue,
    start: Option<JsFunction>,
    transform: Option<JsFunction>,
    flush: Option<JsFunction>,
}

fn parse_transformer(
    value: &JsValue,
    context: &mut Context,
) -> JsResult<Transformer> {
    if value.is_undefined() {
        return Ok(Transformer {
            this: JsValue::undefined(),
            start: None,
            transform: None,
            flush: None,
        });
    }
    let obj = value.as_object().ok_or_else(|| {
        JsNativeError::typ().with_message("Expected a transformer object")
    })?;
    Ok(Transformer {
        this: value.clone(),
        start: callable_prop(obj, "start", context)?,
        transform: callable_prop(obj, "transform", context)?,
        flush: callable_prop(obj, "flush", context)?,
    })
}

pub fn create_transform_stream(
    transformer_value: &JsValue,
    writable_strategy: &QueuingStrategy,
    readable_strategy: &QueuingStrategy,
    context: &mut Context,
) -> JsResult<TransformStream> {
    let transformer = parse_transformer(transformer_value, context)?;

    let controller = JsNativeObject::new::<TransformStreamDefaultControllerClass>(
        TransformStreamDefaultController {
            readable: JsValue::undefined(),
            writable: JsValue::undefined(),
        },
        context,
    )?;

    // Readable side: push-driven by the transformer; cancelling it errors
    // the writable side.
    let readable_cancel =
        callback(context, controller.clone(), |_this, args, controller, context| {
            let reason = args.get_or_undefined(0).clone();
            if let Ok(writable) = controller.deref().writable() {
                WritableStream::error(&writable, &reason, context);
            }
            Ok(JsValue::undefined())
        });
    let readable = ReadableStream::create(
        UnderlyingSource::native(None, Some(readable_cancel)),
        readable_strategy,
        context,
    )?;

    // Writable side: writes run the transformer, close runs flush then
    // closes the readable, abort errors the readable.
    let transform_fn = transformer.transform.clone();
    let transformer_this = transformer.this.clone();
    let sink_write = callback(
        context,
        (controller.clone(), transform_fn, transformer_this),
        |_this, args, (controller, transform, transformer_this), context| {
            let chunk = args.get_or_undefined(0).clone();
            let Some(transform) = transform else {
                // Identity transform: forward the chunk untouched.
                let readable = controller.deref().readable()?;
                ReadableStream::enqueue(&readable, &chunk, context)?;
                return Ok(JsValue::undefined());
            };
            let result = transform.call(
                transformer_this,
                &[chunk, controller.to_inner()],
                context,
            );
            match result {
                Ok(value) => {
                    let promise = promise_resolved_with(&value, context)?;
                    let on_rejected = callback(
                        context,
                        controller.clone(),
                        |_this, args, controller, context| {
                            error_both(controller, args.get_or_undefined(0), context);
                            Ok(JsValue::undefined())
                        },
                    );
                    promise_then(&promise, None, Some(on_rejected), context);
                    Ok(promise.into())
                }
                Err(err) => {
                    let reason = err.to_opaque(context);
                    error_both(controller, &reason, context);
                    Err(boa_engine::JsError::from_opaque(reason))
                }
            }
        },
    );

    let flush_fn = transformer.flush.clone();
    let flush_this = transformer.this.clone();
    let sink_close = callback(
        context,
        (controller.clone(), flush_fn, flush_this),
        |_this, _args, (controller, flush, flush_this), context| {
            let flush_promise = match flush {
                Some(flush) => {
                    let result =
                        flush.call(flush_this, &[controller.to_inner()], context)?;
                    promise_resolved_with(&result, context)?
                }
                None => JsPromise::resolve(JsValue::undefined(), context)?,
            };
            let on_flushed = callback(
                context,
                controller.clone(),
                |_this, _args, controller, context| {
                    let readable = controller.deref().readable()?;
                    let _ = ReadableStream::request_close(&readable, context);
                    Ok(JsValue::undefined())
                },
            );
            let on_flush_failed = callback(
                context,
                controller.clone(),
                |_this, args, controller, context| {
                    let reason = args.get_or_undefined(0).clone();
                    error_both(controller, &reason, context);
                    Err(boa_engine::JsError::from_opaque(reason))
                },
            );
            let chained =
                flush_promise.then(Some(on_flushed), Some(on_flush_failed), context)?;
            Ok(chained.into())
        },
    );

    let sink_abort =
        callback(context, controller.clone(), |_this, args, controller, context| {
            let reason = args.get_or_undefined(0).clone();
            if let Ok(readable) = controller.deref().readable() {
                ReadableStream::error(&readable, &reason, context);
            }
            Ok(JsValue::undefined())
        });

    let writable = WritableStream::create(
        UnderlyingSink::native(Some(sink_write), Some(sink_close), Some(sink_abort)),
        writable_strategy,
        context,
    )?;

    {
        let mut inner = controller.deref_mut();
        inner.readable = readable.to_inner();
        inner.writable = writable.to_inner();
    }

    // transformer.start(controller) runs at construction; a rejection errors
    // both sides.
    if let Some(start) = transformer.start {
        let result =
            start.call(&transformer.this, &[controller.to_inner()], context)?;
        let promise = promise_resolved_with(&result, context)?;
        let on_start_failed =
            callback(context, controller.clone(), |_this, args, controller, context| {
                error_both(controller, args.get_or_undefined(0), context);
                Ok(JsValue::undefined())
            });
        promise_then(&promise, None, Some(on_start_failed), context);
    }

    Ok(TransformStream {
        readable: readable.to_inner(),
        writable: writable.to_inner(),
    })
}

impl TransformStream {
    pub fn readable(&self) -> JsValue {
        self.readable.clone()
    }

    pub fn writable(&self) -> JsValue {
        self.writable.clone()
    }
}

pub struct TransformStreamClass;

impl TransformStreamClass {
    fn readable(context: &mut Context) -> Accessor {
        Accessor::new("readable").get(
            NativeFunction::from_fn_ptr(|this, _args, _context| {
                let stream: JsNativeObject<TransformStream> =
                    JsNativeObject::try_from(this.clone())?;
                let readable = stream.deref().readable.clone();
                Ok(readable)
            }),
            context,
        )
    }

    fn writable(context: &mut Context) -> Accessor {
        Accessor::new("writable").get(
            NativeFunction::from_fn_ptr(|this, _args, _context| {
                let stream: JsNativeObject<TransformStream> =
                    JsNativeObject::try_from(this.clone())?;
                let writable = stream.deref().writable.clone();
                Ok(writable)
            }),
            context,
        )
    }
}

impl NativeClass for TransformStreamClass {
    type Instance = TransformStream;

    const NAME: &'static str = "TransformStream";

    fn constructor(
        _this: &JsNativeObject<TransformStream>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<TransformStream> {
        let writable_strategy =
            QueuingStrategy::from_value(args.get_or_undefined(1), context)?;
        let readable_strategy =
            QueuingStrategy::from_value(args.get_or_undefined(2), context)?;
        create_transform_stream(
            args.get_or_undefined(0),
            &writable_strategy,
            &readable_strategy,
            context,
        )
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let readable = Self::readable(class.context());
        let writable = Self::writable(class.context());
        class
            .accessor(js_string!("readable"), readable, Attribute::all())
            .accessor(js_string!("writable"), writable, Attribute::all());
        Ok(())
    }
}

pub struct TransformStreamApi;

impl strand_core::Api for TransformStreamApi {
    fn init(self, context: &mut Context) {
        register_global_class::<TransformStreamClass>(context)
            .expect("The `TransformStream` class shouldn't exist yet");
        register_global_class::<TransformStreamDefaultControllerClass>(context)
            .expect("The `TransformStreamDefaultController` class shouldn't exist yet");
    }
}
