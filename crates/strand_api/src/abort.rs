//! `AbortController` / `AbortSignal`: the cancellation fabric.
//!
//! A signal transitions `aborted` from false to true exactly once and carries
//! the abort `reason` from that moment on. Consumers observe the transition
//! either through the synchronous `abort` event or through native observers
//! registered by host operations (fetch, pipeTo). The `reason` identity is
//! preserved through every rejection path.
//!
//! More information:
//!  - [WHATWG DOM specification][spec]
//!
//! [spec]: https://dom.spec.whatwg.org/#interface-abortcontroller

use boa_engine::{
    js_string,
    object::{FunctionObjectBuilder, Object},
    property::Attribute,
    Context, JsArgs, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{custom_trace, Finalize, GcRefMut, Trace};
use strand_core::{
    accessor,
    error::abort_error,
    event_loop::{report_error, with_event_loop},
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
};

use crate::event::{
    dispatch_event, Event, EventClass, EventTarget, EventTargetMethods, EventTargeted,
};

pub struct AbortSignal {
    aborted: bool,
    reason: JsValue,
    target: EventTarget,
    // Host-side continuations, invoked with the reason before JS listeners.
    observers: Vec<JsValue>,
}

impl Finalize for AbortSignal {}

unsafe impl Trace for AbortSignal {
    custom_trace!(this, {
        mark(&this.reason);
        mark(&this.target);
        mark(&this.observers);
    });
}

impl EventTargeted for AbortSignal {
    fn event_target(&mut self) -> &mut EventTarget {
        &mut self.target
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        Self {
            aborted: false,
            reason: JsValue::undefined(),
            target: EventTarget::new(),
            observers: Vec::new(),
        }
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }

    pub fn reason(&self) -> JsValue {
        self.reason.clone()
    }

    pub fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message(
                        "Failed to convert js value into rust type `AbortSignal`",
                    )
                    .into()
            })
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a fresh, unaborted signal object.
pub fn new_signal(context: &mut Context) -> JsResult<JsNativeObject<AbortSignal>> {
    JsNativeObject::new::<AbortSignalClass>(AbortSignal::new(), context)
}

/// Registers a host-side abort continuation. If the signal is already
/// aborted the continuation fires immediately with the reason.
pub fn add_native_observer(
    signal: &JsNativeObject<AbortSignal>,
    observer: JsValue,
    context: &mut Context,
) -> JsResult<()> {
    let reason = {
        let mut inner = signal.deref_mut();
        if !inner.aborted {
            inner.observers.push(observer);
            return Ok(());
        }
        inner.reason.clone()
    };
    if let Some(callback) = observer.as_callable() {
        callback.call(&JsValue::undefined(), &[reason], context)?;
    }
    Ok(())
}

/// Signals abort: one-shot transition, reason capture, observer fan-out, then
/// a synchronous `abort` event. Listeners registered after this never fire
/// for this transition.
pub fn signal_abort(
    signal: &JsNativeObject<AbortSignal>,
    reason: &JsValue,
    context: &mut Context,
) -> JsResult<()> {
    let (reason, observers) = {
        let mut inner = signal.deref_mut();
        if inner.aborted {
            return Ok(());
        }
        inner.aborted = true;
        inner.reason = if reason.is_undefined() {
            abort_error("aborted", context).to_opaque(context)
        } else {
            reason.clone()
        };
        (inner.reason.clone(), std::mem::take(&mut inner.observers))
    };

    for observer in observers {
        if let Some(callback) = observer.as_callable() {
            if let Err(err) =
                callback.call(&JsValue::undefined(), &[reason.clone()], context)
            {
                report_error(&err);
            }
        }
    }

    let event = JsNativeObject::new::<EventClass>(Event::new("abort"), context)?;
    dispatch_event(signal, &event, context)?;
    Ok(())
}

pub struct AbortSignalClass;

impl AbortSignalClass {
    fn aborted(context: &mut Context) -> Accessor {
        accessor!(
            context,
            AbortSignal,
            "aborted",
            get:((signal, _context) => Ok(signal.aborted.into()))
        )
    }

    fn reason(context: &mut Context) -> Accessor {
        accessor!(
            context,
            AbortSignal,
            "reason",
            get:((signal, _context) => Ok(signal.reason.clone()))
        )
    }

    fn throw_if_aborted(
        this: &JsValue,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<JsValue> {
        let signal = AbortSignal::try_from_js(this)?;
        if signal.aborted {
            return Err(boa_engine::JsError::from_opaque(signal.reason.clone()));
        }
        Ok(JsValue::undefined())
    }

    /// `AbortSignal.abort(reason?)`: a signal born aborted.
    fn abort(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let signal = new_signal(context)?;
        signal_abort(&signal, args.get_or_undefined(0), context)?;
        Ok(signal.to_inner())
    }

    /// `AbortSignal.timeout(ms)`: aborts with a `TimeoutError` after `ms`.
    fn timeout(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let ms = args.get_or_undefined(0).to_number(context)?;
        let ms = if ms.is_finite() && ms > 0.0 { ms } else { 0.0 };
        let signal = new_signal(context)?;

        let callback = FunctionObjectBuilder::new(
            context,
            NativeFunction::from_copy_closure_with_captures(
                |_this, _args, signal, context| {
                    let reason = strand_core::error::named_error(
                        "TimeoutError",
                        "signal timed out",
                        context,
                    )
                    .to_opaque(context);
                    signal_abort(signal, &reason, context)?;
                    Ok(JsValue::undefined())
                },
                signal.clone(),
            ),
        )
        .build();

        with_event_loop(|event_loop| {
            event_loop.set_timer(
                callback.into(),
                Vec::new(),
                std::time::Duration::from_millis(ms as u64),
                false,
            )
        });

        Ok(signal.to_inner())
    }
}

impl NativeClass for AbortSignalClass {
    type Instance = AbortSignal;

    const NAME: &'static str = "AbortSignal";

    fn constructor(
        _this: &JsNativeObject<AbortSignal>,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<AbortSignal> {
        Err(JsNativeError::typ()
            .with_message("Illegal constructor")
            .into())
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let aborted = Self::aborted(class.context());
        let reason = Self::reason(class.context());

        class
            .accessor(js_string!("aborted"), aborted, Attribute::all())
            .accessor(js_string!("reason"), reason, Attribute::all())
            .method(
                js_string!("throwIfAborted"),
                0,
                NativeFunction::from_fn_ptr(Self::throw_if_aborted),
            )
            .static_method(
                js_string!("abort"),
                0,
                NativeFunction::from_fn_ptr(Self::abort),
            )
            .static_method(
                js_string!("timeout"),
                1,
                NativeFunction::from_fn_ptr(Self::timeout),
            );
        EventTargetMethods::define::<AbortSignal>(class)?;
        Ok(())
    }
}

pub struct AbortController {
    signal: JsNativeObject<AbortSignal>,
}

impl Finalize for AbortController {
    fn finalize(&self) {
        self.signal.finalize();
    }
}

unsafe impl Trace for AbortController {
    custom_trace!(this, {
        mark(&this.signal);
    });
}

impl AbortController {
    pub fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message(
                        "Failed to convert js value into rust type `AbortController`",
                    )
                    .into()
            })
    }
}

pub struct AbortControllerClass;

impl AbortControllerClass {
    fn signal(context: &mut Context) -> Accessor {
        accessor!(
            context,
            AbortController,
            "signal",
            get:((controller, _context) => Ok(controller.signal.to_inner()))
        )
    }

    fn abort(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let signal = {
            let controller = AbortController::try_from_js(this)?;
            controller.signal.clone()
        };
        signal_abort(&signal, args.get_or_undefined(0), context)?;
        Ok(JsValue::undefined())
    }
}

impl NativeClass for AbortControllerClass {
    type Instance = AbortController;

    const NAME: &'static str = "AbortController";

    fn constructor(
        _this: &JsNativeObject<AbortController>,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<AbortController> {
        Ok(AbortController {
            signal: new_signal(context)?,
        })
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let signal = Self::signal(class.context());

        class
            .accessor(js_string!("signal"), signal, Attribute::all())
            .method(
                js_string!("abort"),
                0,
                NativeFunction::from_fn_ptr(Self::abort),
            );
        Ok(())
    }
}

pub struct AbortApi;

impl strand_core::Api for AbortApi {
    fn init(self, context: &mut Context) {
        register_global_class::<AbortSignalClass>(context)
            .expect("The `AbortSignal` class shouldn't exist yet");
        register_global_class::<AbortControllerClass>(context)
            .expect("The `AbortController` class shouldn't exist yet");
    }
}
