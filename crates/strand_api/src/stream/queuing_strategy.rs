//! Queuing strategies.
//!
//! The strategy handed to a stream constructor is any object with optional
//! `highWaterMark` and `size` members; `CountQueuingStrategy` and
//! `ByteLengthQueuingStrategy` are the builtin shapes. A missing
//! `highWaterMark` falls back to a per-call-site default and the default
//! strategy behaves like `new CountQueuingStrategy({highWaterMark: 1})`.
//!
//! More information:
//!  - [WHATWG Streams specification - § 7. Queuing strategies][spec]
//!
//! [spec]: https://streams.spec.whatwg.org/#qs

use boa_engine::{
    js_string,
    object::{builtins::JsFunction, Object},
    property::Attribute,
    value::TryFromJs,
    Context, JsArgs, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{Finalize, GcRefMut, Trace};
use strand_core::{
    accessor,
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
};

/// A parsed `{highWaterMark, size}` bag. `high_water_mark` is validated:
/// neither NaN nor negative.
#[derive(Default)]
pub struct QueuingStrategy {
    pub high_water_mark: Option<f64>,
    pub size: Option<JsFunction>,
}

impl QueuingStrategy {
    /// https://streams.spec.whatwg.org/#validate-and-normalize-high-water-mark
    pub fn extract_high_water_mark(&self, default_hwm: f64) -> f64 {
        self.high_water_mark.unwrap_or(default_hwm)
    }

    pub fn from_value(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        if value.is_undefined() {
            return Ok(Self::default());
        }
        value.try_js_into(context)
    }
}

impl TryFromJs for QueuingStrategy {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let obj = value.as_object().ok_or_else(|| {
            JsNativeError::typ().with_message("Expected a queuing strategy object")
        })?;

        let high_water_mark = if obj.has_property(js_string!("highWaterMark"), context)?
        {
            let hwm = obj
                .get(js_string!("highWaterMark"), context)?
                .to_number(context)?;
            if hwm.is_nan() || hwm < 0.0 {
                return Err(JsNativeError::range()
                    .with_message("Invalid highWaterMark")
                    .into());
            }
            Some(hwm)
        } else {
            None
        };

        let size = if obj.has_property(js_string!("size"), context)? {
            let size = obj.get(js_string!("size"), context)?;
            if size.is_undefined() {
                None
            } else {
                Some(
                    size.as_callable()
                        .and_then(|obj| JsFunction::from_object(obj.clone()))
                        .ok_or_else(|| {
                            JsNativeError::typ()
                                .with_message("Queuing strategy size must be callable")
                        })?,
                )
            }
        } else {
            None
        };

        Ok(Self {
            high_water_mark,
            size,
        })
    }
}

fn high_water_mark_from_args(
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<f64> {
    let obj = args.get_or_undefined(0).as_object().cloned().ok_or_else(|| {
        JsNativeError::typ().with_message("Expected an init object with highWaterMark")
    })?;
    obj.get(js_string!("highWaterMark"), context)?
        .to_number(context)
}

#[derive(Trace, Finalize)]
pub struct CountQueuingStrategy {
    pub high_water_mark: f64,
}

impl CountQueuingStrategy {
    fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message(
                        "Failed to convert js value into rust type `CountQueuingStrategy`",
                    )
                    .into()
            })
    }
}

pub struct CountQueuingStrategyClass;

impl CountQueuingStrategyClass {
    fn high_water_mark(context: &mut Context) -> Accessor {
        accessor!(
            context,
            CountQueuingStrategy,
            "highWaterMark",
            get:((strategy, _context) => Ok(strategy.high_water_mark.into()))
        )
    }

    /// Every chunk counts for one.
    fn size(
        _this: &JsValue,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<JsValue> {
        Ok(JsValue::from(1))
    }
}

impl NativeClass for CountQueuingStrategyClass {
    type Instance = CountQueuingStrategy;

    const NAME: &'static str = "CountQueuingStrategy";

    const LENGTH: usize = 1;

    fn constructor(
        _this: &JsNativeObject<CountQueuingStrategy>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<CountQueuingStrategy> {
        Ok(CountQueuingStrategy {
            high_water_mark: high_water_mark_from_args(args, context)?,
        })
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let high_water_mark = Self::high_water_mark(class.context());
        class
            .accessor(
                js_string!("highWaterMark"),
                high_water_mark,
                Attribute::all(),
            )
            .method(
                js_string!("size"),
                0,
                NativeFunction::from_fn_ptr(Self::size),
            );
        Ok(())
    }
}

#[derive(Trace, Finalize)]
pub struct ByteLengthQueuingStrategy {
    pub high_water_mark: f64,
}

impl ByteLengthQueuingStrategy {
    fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message(
                        "Failed to convert js value into rust type `ByteLengthQueuingStrategy`",
                    )
                    .into()
            })
    }
}

pub struct ByteLengthQueuingStrategyClass;

impl ByteLengthQueuingStrategyClass {
    fn high_water_mark(context: &mut Context) -> Accessor {
        accessor!(
            context,
            ByteLengthQueuingStrategy,
            "highWaterMark",
            get:((strategy, _context) => Ok(strategy.high_water_mark.into()))
        )
    }

    /// A chunk counts for its `byteLength`.
    fn size(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let chunk = args.get_or_undefined(0);
        let Some(obj) = chunk.as_object() else {
            return Err(JsNativeError::typ()
                .with_message("Expected a chunk with byteLength")
                .into());
        };
        obj.get(js_string!("byteLength"), context)
    }
}

impl NativeClass for ByteLengthQueuingStrategyClass {
    type Instance = ByteLengthQueuingStrategy;

    const NAME: &'static str = "ByteLengthQueuingStrategy";

    const LENGTH: usize = 1;

    fn constructor(
        _this: &JsNativeObject<ByteLengthQueuingStrategy>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<ByteLengthQueuingStrategy> {
        Ok(ByteLengthQueuingStrategy {
            high_water_mark: high_water_mark_from_args(args, context)?,
        })
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let high_water_mark = Self::high_water_mark(class.context());
        class
            .accessor(
                js_string!("highWaterMark"),
                high_water_mark,
                Attribute::all(),
            )
            .method(
                js_string!("size"),
                1,
                NativeFunction::from_fn_ptr(Self::size),
            );
        Ok(())
    }
}

pub struct QueuingStrategyApi;

impl strand_core::Api for QueuingStrategyApi {
    fn init(self, context: &mut Context) {
        register_global_class::<CountQueuingStrategyClass>(context)
            .expect("The `CountQueuingStrategy` class shouldn't exist yet");
        register_global_class::<ByteLengthQueuingStrategyClass>(context)
            .expect("The `ByteLengthQueuingStrategy` class shouldn't exist yet");
    }
}
