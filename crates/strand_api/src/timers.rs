//! `setTimeout` / `setInterval` / `clearTimeout` / `clearInterval` and
//! `queueMicrotask`, built directly on the host event loop.
//!
//! A non-callable first argument registers a no-op; the timer id is handed
//! out either way. Negative and non-finite delays clamp to zero; zero-delay
//! timers fire after the current script and its microtasks. Intervals
//! reschedule relative to completion of the previous firing.

use std::time::Duration;

use boa_engine::{
    job::NativeJob, js_string, Context, JsArgs, JsNativeError, JsResult, JsValue,
    NativeFunction,
};
use strand_core::event_loop::{report_error, with_event_loop};

fn parse_delay(value: &JsValue, context: &mut Context) -> JsResult<Duration> {
    let ms = value.to_number(context)?;
    let ms = if ms.is_finite() && ms > 0.0 { ms } else { 0.0 };
    Ok(Duration::from_micros((ms * 1000.0) as u64))
}

fn set_timer(
    args: &[JsValue],
    repeat: bool,
    context: &mut Context,
) -> JsResult<JsValue> {
    let callback = args.get_or_undefined(0).clone();
    let delay = parse_delay(args.get_or_undefined(1), context)?;
    let extra_args: Vec<JsValue> = args.iter().skip(2).cloned().collect();

    let id = with_event_loop(|event_loop| {
        event_loop.set_timer(callback, extra_args, delay, repeat)
    });
    Ok(JsValue::from(id))
}

fn clear_timer(args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let id = args.get_or_undefined(0).to_number(context)?;
    if id.is_finite() && id > 0.0 {
        with_event_loop(|event_loop| event_loop.clear_timer(id as u32));
    }
    Ok(JsValue::undefined())
}

pub struct TimersApi;

impl TimersApi {
    fn set_timeout(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        set_timer(args, false, context)
    }

    fn set_interval(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        set_timer(args, true, context)
    }

    fn clear_timeout(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        clear_timer(args, context)
    }

    fn queue_microtask(
        _this: &JsValue,
        args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<JsValue> {
        let callback = args.get_or_undefined(0).clone();
        let Some(function) = callback.as_callable().cloned() else {
            return Err(JsNativeError::typ()
                .with_message("queueMicrotask expects a callable argument")
                .into());
        };

        with_event_loop(|event_loop| {
            event_loop.enqueue_microtask(NativeJob::new(move |context| {
                if let Err(err) = function.call(&JsValue::undefined(), &[], context) {
                    report_error(&err);
                }
                Ok(JsValue::undefined())
            }));
        });
        Ok(JsValue::undefined())
    }
}

impl strand_core::Api for TimersApi {
    fn init(self, context: &mut Context) {
        context
            .register_global_builtin_callable(
                js_string!("setTimeout"),
                2,
                NativeFunction::from_fn_ptr(Self::set_timeout),
            )
            .expect("setTimeout should only be registered once");
        context
            .register_global_builtin_callable(
                js_string!("setInterval"),
                2,
                NativeFunction::from_fn_ptr(Self::set_interval),
            )
            .expect("setInterval should only be registered once");
        context
            .register_global_builtin_callable(
                js_string!("clearTimeout"),
                1,
                NativeFunction::from_fn_ptr(Self::clear_timeout),
            )
            .expect("clearTimeout should only be registered once");
        context
            .register_global_builtin_callable(
                js_string!("clearInterval"),
                1,
                NativeFunction::from_fn_ptr(Self::clear_timeout),
            )
            .expect("clearInterval should only be registered once");
        context
            .register_global_builtin_callable(
                js_string!("queueMicrotask"),
                1,
                NativeFunction::from_fn_ptr(Self::queue_microtask),
            )
            .expect("queueMicrotask should only be registered once");
    }
}
