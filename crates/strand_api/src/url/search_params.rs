//! The `URLSearchParams` Web API class.
//!
//! A `URLSearchParams` created through a `URL` keeps a back-reference to it:
//! mutations re-serialize the pair list into the URL's query component.
//!
//! More information:
//!  - [WHATWG `URL` specification][spec]
//!
//! [spec]: https://url.spec.whatwg.org/#interface-urlsearchparams

use boa_engine::{
    js_string,
    object::{builtins::JsArray, Object},
    property::Attribute,
    value::TryFromJs,
    Context, JsArgs, JsError, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{custom_trace, Finalize, GcRefMut, Trace};
use strand_core::{
    accessor,
    iterators::{PairIterable, PairIterableMethods, PairIteratorClass, PairValue},
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject,
        JsNativeObjectToString, NativeClass,
    },
    value::IntoJs,
};

use super::Url;

#[derive(Default)]
pub struct UrlSearchParams {
    values: Vec<(String, String)>,
    url: Option<JsNativeObject<Url>>,
}

impl Finalize for UrlSearchParams {}

unsafe impl Trace for UrlSearchParams {
    custom_trace!(this, {
        if let Some(url) = &this.url {
            mark(url);
        }
    });
}

impl JsNativeObjectToString for UrlSearchParams {
    fn to_string(
        this: &JsNativeObject<Self>,
        context: &mut Context,
    ) -> JsResult<JsValue> {
        Ok(this.deref().serialize().into_js(context))
    }
}

impl UrlSearchParams {
    pub fn with_values(values: Vec<(String, String)>) -> Self {
        Self { values, url: None }
    }

    pub(crate) fn set_url(&mut self, url: &JsNativeObject<Url>) {
        self.url = Some(url.clone());
    }

    /// Swaps in a new pair list without writing back to the URL (used when
    /// the URL itself was just reparsed).
    pub(crate) fn replace_values(&mut self, values: Vec<(String, String)>) {
        self.values = values;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// https://url.spec.whatwg.org/#urlencoded-serializing
    pub fn serialize(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.values.iter())
            .finish()
    }

    // Mutations write the serialization back into the owning URL.
    fn update_url(&mut self) {
        if let Some(url) = &self.url {
            let query = self.serialize();
            let mut url = url.deref_mut();
            url.url
                .set_query(if query.is_empty() { None } else { Some(&query) });
        }
    }

    pub fn append(&mut self, name: String, value: String) {
        self.values.push((name, value));
        self.update_url();
    }

    pub fn remove(&mut self, name: &str, value: Option<&str>) {
        self.values.retain(|(entry_name, entry_value)| {
            entry_name != name || value.is_some_and(|value| entry_value != value)
        });
        self.update_url();
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, value)| value.clone())
    }

    pub fn get_all(&self, name: &str) -> Vec<String> {
        self.values
            .iter()
            .filter(|(entry_name, _)| entry_name == name)
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn contains(&self, name: &str, value: Option<&str>) -> bool {
        self.values.iter().any(|(entry_name, entry_value)| {
            entry_name == name && value.map_or(true, |value| entry_value == value)
        })
    }

    /// https://url.spec.whatwg.org/#dom-urlsearchparams-set
    pub fn set(&mut self, name: String, value: String) {
        let mut replaced = false;
        self.values.retain_mut(|entry| {
            if entry.0 != name {
                return true;
            }
            if replaced {
                return false;
            }
            entry.1 = value.clone();
            replaced = true;
            true
        });
        if !replaced {
            self.values.push((name, value));
        }
        self.update_url();
    }

    pub fn sort(&mut self) {
        self.values.sort_by(|(a, _), (b, _)| {
            a.encode_utf16().collect::<Vec<_>>().cmp(
                &b.encode_utf16().collect::<Vec<_>>(),
            )
        });
        self.update_url();
    }
}

impl UrlSearchParams {
    pub fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message(
                        "Failed to convert js value into rust type `UrlSearchParams`",
                    )
                    .into()
            })
    }
}

/// The `URLSearchParams` constructor init union: a sequence of pairs, a
/// record, or a query string.
pub enum UrlSearchParamsInit {
    Pairs(Vec<(String, String)>),
    Query(String),
}

impl TryFromJs for UrlSearchParamsInit {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        if let Some(string) = value.as_string() {
            let query = string.to_std_string_escaped();
            return Ok(Self::Query(query));
        }

        let obj = value.as_object().ok_or_else(|| {
            JsError::from_native(
                JsNativeError::typ()
                    .with_message("Expected a string, sequence or record"),
            )
        })?;

        if obj.is_array() {
            let arr = JsArray::from_object(obj.clone())?;
            let mut pairs = vec![];
            for i in 0..arr.length(context)? {
                let pair: JsArray = arr.get(i, context)?.try_js_into(context)?;
                if pair.length(context)? != 2 {
                    return Err(JsNativeError::typ()
                        .with_message("Each query pair must have exactly two items")
                        .into());
                }
                let name: String = pair.get(0, context)?.try_js_into(context)?;
                let value: String = pair.get(1, context)?.try_js_into(context)?;
                pairs.push((name, value));
            }
            Ok(Self::Pairs(pairs))
        } else if let Some(params) = obj.downcast_ref::<UrlSearchParams>() {
            Ok(Self::Pairs(params.values.clone()))
        } else {
            let entries = boa_engine::builtins::object::Object::entries(
                &JsValue::undefined(),
                &[value.clone()],
                context,
            )?;
            let arr = JsArray::from_object(
                entries.as_object().cloned().ok_or_else(|| {
                    JsNativeError::typ()
                        .with_message("Expected array from `Object.entries`")
                })?,
            )?;
            let mut pairs = vec![];
            for i in 0..arr.length(context)? {
                let pair: JsArray = arr.get(i, context)?.try_js_into(context)?;
                let name: String = pair.get(0, context)?.try_js_into(context)?;
                let value: String =
                    pair.get(1, context)?.to_string(context)?.to_std_string_escaped();
                pairs.push((name, value));
            }
            Ok(Self::Pairs(pairs))
        }
    }
}

impl UrlSearchParamsInit {
    fn into_values(self) -> Vec<(String, String)> {
        match self {
            Self::Pairs(pairs) => pairs,
            Self::Query(query) => {
                let query = query.strip_prefix('?').unwrap_or(&query);
                url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            }
        }
    }
}

pub struct UrlSearchParamsClass;

impl UrlSearchParamsClass {
    fn size(context: &mut Context) -> Accessor {
        accessor!(
            context,
            UrlSearchParams,
            "size",
            get:((params, _context) => Ok(params.len().into()))
        )
    }

    fn append(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut params = UrlSearchParams::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        let value: String = args.get_or_undefined(1).try_js_into(context)?;
        params.append(name, value);
        Ok(JsValue::undefined())
    }

    fn delete(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut params = UrlSearchParams::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        let value: Option<String> = args.get_or_undefined(1).try_js_into(context)?;
        params.remove(&name, value.as_deref());
        Ok(JsValue::undefined())
    }

    fn get(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let params = UrlSearchParams::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        Ok(params.get(&name).into_js(context))
    }

    fn get_all(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let params = UrlSearchParams::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        Ok(params.get_all(&name).into_js(context))
    }

    fn has(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let params = UrlSearchParams::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        let value: Option<String> = args.get_or_undefined(1).try_js_into(context)?;
        Ok(params.contains(&name, value.as_deref()).into())
    }

    fn set(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut params = UrlSearchParams::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        let value: String = args.get_or_undefined(1).try_js_into(context)?;
        params.set(name, value);
        Ok(JsValue::undefined())
    }

    fn sort(
        this: &JsValue,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut params = UrlSearchParams::try_from_js(this)?;
        params.sort();
        Ok(JsValue::undefined())
    }
}

impl PairIterable for UrlSearchParams {
    fn pair_iterable_len(&self) -> JsResult<usize> {
        Ok(self.values.len())
    }

    fn pair_iterable_get(
        &self,
        index: usize,
        context: &mut Context,
    ) -> JsResult<PairValue> {
        let (name, value) = self.values.get(index).cloned().ok_or_else(|| {
            JsError::from_native(
                JsNativeError::range()
                    .with_message("URLSearchParams iteration out of bounds"),
            )
        })?;
        Ok(PairValue {
            key: name.into_js(context),
            value: value.into_js(context),
        })
    }
}

pub struct UrlSearchParamsIteratorClass;

impl PairIteratorClass for UrlSearchParamsIteratorClass {
    type Iterable = UrlSearchParams;

    const NAME: &'static str = "URLSearchParams Iterator";
}

impl NativeClass for UrlSearchParamsClass {
    type Instance = UrlSearchParams;

    const NAME: &'static str = "URLSearchParams";

    fn constructor(
        _this: &JsNativeObject<UrlSearchParams>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<UrlSearchParams> {
        match args.get(0) {
            None => Ok(UrlSearchParams::default()),
            Some(value) if value.is_undefined() => Ok(UrlSearchParams::default()),
            Some(value) => {
                let init: UrlSearchParamsInit = value.try_js_into(context)?;
                Ok(UrlSearchParams::with_values(init.into_values()))
            }
        }
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let size = Self::size(class.context());
        class
            .accessor(js_string!("size"), size, Attribute::all())
            .method(
                js_string!("append"),
                2,
                NativeFunction::from_fn_ptr(Self::append),
            )
            .method(
                js_string!("delete"),
                1,
                NativeFunction::from_fn_ptr(Self::delete),
            )
            .method(js_string!("get"), 1, NativeFunction::from_fn_ptr(Self::get))
            .method(
                js_string!("getAll"),
                1,
                NativeFunction::from_fn_ptr(Self::get_all),
            )
            .method(js_string!("has"), 1, NativeFunction::from_fn_ptr(Self::has))
            .method(js_string!("set"), 2, NativeFunction::from_fn_ptr(Self::set))
            .method(
                js_string!("sort"),
                0,
                NativeFunction::from_fn_ptr(Self::sort),
            )
            .method(
                js_string!("toString"),
                0,
                NativeFunction::from_fn_ptr(Self::to_string),
            );
        PairIterableMethods::<UrlSearchParamsIteratorClass>::define_pair_iterable_methods(
            class,
        )?;
        Ok(())
    }
}

pub struct UrlSearchParamsApi;

impl strand_core::Api for UrlSearchParamsApi {
    fn init(self, context: &mut Context) {
        register_global_class::<UrlSearchParamsClass>(context)
            .expect("The `URLSearchParams` class shouldn't exist yet");
        register_global_class::<UrlSearchParamsIteratorClass>(context)
            .expect("The `URLSearchParams Iterator` class shouldn't exist yet");
    }
}
