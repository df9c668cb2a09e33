//! Helpers for implementing pair iterables (interfaces with a "list of value
//! pairs to iterate over": `Headers`, `URLSearchParams`, `FormData`).
//!
//! Implement [`PairIterable`] for the iterable type, declare an iterator
//! class implementing [`PairIteratorClass`] (which derives `NativeClass`
//! automatically), register it, and call
//! [`PairIterableMethods::define_pair_iterable_methods`] from the iterable's
//! `NativeClass::init` to define `@@iterator`, `entries`, `keys`, `values`
//! and `forEach`.
//!
//! More information:
//!  - [WHATWG Web IDL specification - Iterable declarations][idl]
//!
//! [idl]: https://webidl.spec.whatwg.org/#idl-iterable

use std::marker::PhantomData;

use crate::{
    native::{ClassBuilder, JsNativeObject, NativeClass},
    value::IntoJs,
};
use boa_engine::{
    js_string,
    object::{NativeObject, Object},
    value::TryFromJs,
    Context, JsError, JsNativeError, JsObject, JsResult, JsSymbol, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, GcRefMut, Trace};

enum PairIteratorKind {
    KeyPlusValue,
    Key,
    Value,
}

impl TryFromJs for PairIteratorKind {
    fn try_from_js(value: &JsValue, _context: &mut Context) -> JsResult<Self> {
        let kind_str = value
            .as_string()
            .ok_or::<JsError>(
                JsNativeError::typ()
                    .with_message("expected string kind arg to pair iterator constructor")
                    .into(),
            )?
            .to_std_string()
            .map_err::<JsError, _>(|_| {
                JsNativeError::typ()
                    .with_message("invalid string kind arg to pair iterator constructor")
                    .into()
            })?;
        match kind_str.as_str() {
            "key+value" => Ok(PairIteratorKind::KeyPlusValue),
            "key" => Ok(PairIteratorKind::Key),
            "value" => Ok(PairIteratorKind::Value),
            &_ => Err(JsNativeError::typ()
                .with_message("unexpected string kind arg to pair iterator constructor")
                .into()),
        }
    }
}

/// Struct for pair iterable items, as returned by
/// [`PairIterable::pair_iterable_get`].
pub struct PairValue {
    pub key: JsValue,
    pub value: JsValue,
}

impl IntoJs for PairValue {
    fn into_js(self, context: &mut Context) -> JsValue {
        boa_engine::object::builtins::JsArray::from_iter([self.key, self.value], context)
            .into()
    }
}

/// Trait for pair iterable objects.
pub trait PairIterable: NativeObject {
    /// Length of the list of value pairs to iterate over.
    fn pair_iterable_len(&self) -> JsResult<usize>;
    /// Get one of the value pairs. Should return `Ok` if the provided
    /// `index` is less than the current
    /// [`pair_iterable_len`][`PairIterable::pair_iterable_len`].
    fn pair_iterable_get(
        &self,
        index: usize,
        context: &mut Context,
    ) -> JsResult<PairValue>;
}

/// Rust type used for pair iterator objects. Not relevant to users.
pub struct PairIterator<T: PairIterable> {
    target: JsNativeObject<T>,
    kind: PairIteratorKind,
    index: usize,
}

impl<T: PairIterable> PairIterator<T> {
    pub fn entries(target: JsNativeObject<T>) -> PairIterator<T> {
        PairIterator {
            target,
            kind: PairIteratorKind::KeyPlusValue,
            index: 0,
        }
    }

    pub fn values(target: JsNativeObject<T>) -> PairIterator<T> {
        PairIterator {
            target,
            kind: PairIteratorKind::Value,
            index: 0,
        }
    }

    pub fn keys(target: JsNativeObject<T>) -> PairIterator<T> {
        PairIterator {
            target,
            kind: PairIteratorKind::Key,
            index: 0,
        }
    }
}

impl<T: PairIterable> Finalize for PairIterator<T> {
    fn finalize(&self) {
        self.target.finalize();
    }
}

unsafe impl<T: PairIterable> Trace for PairIterator<T> {
    boa_gc::custom_trace!(this, mark, {
        mark(&this.target);
    });
}

impl<T: PairIterable> PairIterator<T> {
    fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message(
                        "Failed to convert js value into rust type `PairIterator`",
                    )
                    .into()
            })
    }
}

struct IteratorResult {
    done: bool,
    value: JsValue,
}

impl IntoJs for IteratorResult {
    fn into_js(self, context: &mut Context) -> JsValue {
        let obj = JsObject::with_object_proto(context.intrinsics());
        obj.create_data_property_or_throw(js_string!("value"), self.value, context)
            .expect("unexpected error while converting IteratorResult to JsValue");
        obj.create_data_property_or_throw(
            js_string!("done"),
            JsValue::Boolean(self.done),
            context,
        )
        .expect("unexpected error while converting IteratorResult to JsValue");
        obj.into()
    }
}

struct PairIteratorMethods<T: PairIterable> {
    _phantom: PhantomData<T>,
}

impl<T: PairIterable> PairIteratorMethods<T> {
    fn next(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut pair_iterator = PairIterator::<T>::try_from_js(this)?;
        if pair_iterator.index >= pair_iterator.target.deref().pair_iterable_len()? {
            let result = IteratorResult {
                done: true,
                value: JsValue::undefined(),
            };
            return Ok(result.into_js(context));
        }
        let pair = pair_iterator
            .target
            .deref()
            .pair_iterable_get(pair_iterator.index, context)?;
        pair_iterator.index += 1;
        let value = match pair_iterator.kind {
            PairIteratorKind::KeyPlusValue => pair.into_js(context),
            PairIteratorKind::Key => pair.key,
            PairIteratorKind::Value => pair.value,
        };
        let result = IteratorResult { done: false, value };
        Ok(result.into_js(context))
    }
}

/// Trait for pair iterator classes.
///
/// Implementing this will automatically derive a [`NativeClass`]
/// implementation. See module docs for example.
pub trait PairIteratorClass {
    type Iterable: PairIterable;
    const NAME: &'static str;
}

/// Provides
/// [`define_pair_iterable_methods`][PairIterableMethods::define_pair_iterable_methods]
/// helper.
pub struct PairIterableMethods<T: PairIteratorClass> {
    _phantom: PhantomData<T>,
}

impl<T: PairIteratorClass> PairIterableMethods<T> {
    /// Defines the pair iterable methods (`@@iterator`, `entries`,
    /// `keys`, `values`, `forEach`) on the [`ClassBuilder`] for an
    /// iterable object [`NativeClass`] impl.
    pub fn define_pair_iterable_methods(
        class: &mut ClassBuilder<'_, '_>,
    ) -> JsResult<()> {
        // JsSymbol::iterator() is not public, fetch it off the global Symbol
        let symbol_iterator: JsSymbol = class
            .context()
            .intrinsics()
            .constructors()
            .symbol()
            .constructor()
            .get(js_string!("iterator"), class.context())?
            .as_symbol()
            .ok_or(
                JsNativeError::typ().with_message("Symbol.iterator was not a Symbol?"),
            )?;

        class.method(
            symbol_iterator,
            0,
            NativeFunction::from_fn_ptr(
                |this: &JsValue,
                 _args: &[JsValue],
                 context: &mut Context|
                 -> JsResult<JsValue> {
                    let target = JsNativeObject::try_from(this.clone())?;
                    let pair_iterator = PairIterator::entries(target);
                    Ok(JsNativeObject::new::<T>(pair_iterator, context)?.to_inner())
                },
            ),
        );
        class.method(
            js_string!("entries"),
            0,
            NativeFunction::from_fn_ptr(
                |this: &JsValue,
                 _args: &[JsValue],
                 context: &mut Context|
                 -> JsResult<JsValue> {
                    let target = JsNativeObject::try_from(this.clone())?;
                    let pair_iterator = PairIterator::entries(target);
                    Ok(JsNativeObject::new::<T>(pair_iterator, context)?.to_inner())
                },
            ),
        );
        class.method(
            js_string!("keys"),
            0,
            NativeFunction::from_fn_ptr(
                |this: &JsValue,
                 _args: &[JsValue],
                 context: &mut Context|
                 -> JsResult<JsValue> {
                    let target = JsNativeObject::try_from(this.clone())?;
                    let pair_iterator = PairIterator::keys(target);
                    Ok(JsNativeObject::new::<T>(pair_iterator, context)?.to_inner())
                },
            ),
        );
        class.method(
            js_string!("values"),
            0,
            NativeFunction::from_fn_ptr(
                |this: &JsValue,
                 _args: &[JsValue],
                 context: &mut Context|
                 -> JsResult<JsValue> {
                    let target = JsNativeObject::try_from(this.clone())?;
                    let pair_iterator = PairIterator::values(target);
                    Ok(JsNativeObject::new::<T>(pair_iterator, context)?.to_inner())
                },
            ),
        );
        class.method(
            js_string!("forEach"),
            1,
            NativeFunction::from_fn_ptr(
                |this: &JsValue,
                 args: &[JsValue],
                 context: &mut Context|
                 -> JsResult<JsValue> {
                    let target: JsNativeObject<T::Iterable> =
                        JsNativeObject::try_from(this.clone())?;
                    let callback_arg = args.get(0).ok_or::<JsError>(
                        JsNativeError::typ()
                            .with_message("expected callback argument to forEach")
                            .into(),
                    )?;
                    let callback = callback_arg.as_callable().ok_or::<JsError>(
                        JsNativeError::typ()
                            .with_message("forEach callback argument was not callable")
                            .into(),
                    )?;
                    let undef_this = JsValue::undefined();
                    let this_arg = args.get(1).unwrap_or(&undef_this);
                    let mut index = 0;
                    while index < target.deref().pair_iterable_len()? {
                        let pair = target.deref().pair_iterable_get(index, context)?;
                        let args = [pair.value, pair.key, target.to_inner()];
                        callback.call(this_arg, &args, context)?;
                        index += 1;
                    }
                    Ok(JsValue::undefined())
                },
            ),
        );

        Ok(())
    }
}

impl<T: PairIteratorClass> NativeClass for T {
    type Instance = PairIterator<T::Iterable>;
    const NAME: &'static str = T::NAME;

    // Pair iterators are only instantiated internally, but the constructor
    // still accepts (target, kind) so they stay constructible from script.
    const LENGTH: usize = 2;

    fn constructor(
        _this: &JsNativeObject<Self::Instance>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<Self::Instance> {
        let init_arg = args.get(0).ok_or_else(|| {
            JsError::from_native(
                JsNativeError::typ()
                    .with_message("expected 2 arguments to pair iterator constructor"),
            )
        })?;
        let kind_arg = args.get(1).ok_or_else(|| {
            JsError::from_native(
                JsNativeError::typ()
                    .with_message("expected 2 arguments to pair iterator constructor"),
            )
        })?;

        let target = JsNativeObject::try_from(init_arg.clone())?;
        let kind = kind_arg.try_js_into(context)?;

        Ok(PairIterator {
            target,
            kind,
            index: 0,
        })
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let iterator_prototype = class
            .context()
            .intrinsics()
            .objects()
            .iterator_prototypes()
            .iterator();
        class
            .method(
                js_string!("next"),
                0,
                NativeFunction::from_fn_ptr(PairIteratorMethods::<T::Iterable>::next),
            )
            .inherit(iterator_prototype);
        Ok(())
    }
}
