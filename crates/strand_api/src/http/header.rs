//! The `Headers` Web API class over `http::HeaderMap`.
//!
//! Names must be RFC 7230 tokens and values must be free of CR/LF/NUL; both
//! are enforced by the `http` crate's parsers. Iteration observes the
//! sort-and-combine order with `set-cookie` kept uncombined.
//!
//! More information:
//!  - [WHATWG `Headers` specification][spec]
//!
//! [spec]: https://fetch.spec.whatwg.org/#headers-class

use std::{cell::RefCell, collections::BTreeMap, ops::DerefMut};

use boa_engine::{
    builtins, js_string,
    object::{builtins::JsArray, Object},
    value::TryFromJs,
    Context, JsArgs, JsError, JsNativeError, JsObject, JsResult, JsValue,
    NativeFunction,
};
use boa_gc::{empty_trace, Finalize, GcRefMut, Trace};
use http::{header::Entry, HeaderMap, HeaderName, HeaderValue};
use strand_core::{
    iterators::{PairIterable, PairIterableMethods, PairIteratorClass, PairValue},
    native::{
        register_global_class, ClassBuilder, JsNativeObject, NativeClass,
    },
    value::IntoJs,
};

#[derive(Default, Clone)]
pub struct Headers {
    headers: HeaderMap,
    // Sorted-and-combined entries, rebuilt lazily after each mutation.
    cached_iteration: RefCell<Option<Vec<(String, String)>>>,
}

/// https://fetch.spec.whatwg.org/#concept-header-list-sort-and-combine
fn sort_and_combine_headers(headers: &HeaderMap) -> JsResult<Vec<(String, String)>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for key in headers.keys() {
        let values = collect_values(headers.get_all(key))?;
        map.insert(key.to_string(), values);
    }

    let mut entries: Vec<(String, String)> = Vec::default();
    for (key, values) in map.into_iter() {
        if key == "set-cookie" {
            for value in values {
                entries.push((key.clone(), value));
            }
        } else {
            entries.push((key.clone(), values.join(", ")))
        }
    }

    Ok(entries)
}

fn collect_values<'a, T>(iter: T) -> JsResult<Vec<String>>
where
    T: IntoIterator<Item = &'a HeaderValue>,
{
    iter.into_iter()
        .map(|value| value.to_str().map(String::from))
        .collect::<Result<Vec<String>, _>>()
        .map_err(|_| {
            JsError::from_native(JsNativeError::typ().with_message(
                "Failed to convert header value to printable ascii string",
            ))
        })
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_http_headers(headers: HeaderMap) -> Self {
        Self {
            headers,
            cached_iteration: RefCell::default(),
        }
    }

    pub fn to_http_headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    fn clear_cached_iteration(&self) {
        let mut cached_iteration = self.cached_iteration.borrow_mut();
        *cached_iteration = None;
    }

    fn get_cached_iteration(&self) -> JsResult<Vec<(String, String)>> {
        let mut cached_iteration = self.cached_iteration.borrow_mut();
        match cached_iteration.deref_mut() {
            Some(iterable) => Ok(iterable.clone()),
            None => {
                let iterable = sort_and_combine_headers(&self.headers)?;
                *cached_iteration = Some(iterable.clone());
                Ok(iterable)
            }
        }
    }

    /// https://fetch.spec.whatwg.org/#dom-headers-append
    pub fn append(&mut self, name: &str, value: &str) -> JsResult<()> {
        self.clear_cached_iteration();
        self.headers
            .append(str_to_header_name(name)?, str_to_header_value(value)?);
        Ok(())
    }

    /// https://fetch.spec.whatwg.org/#dom-headers-delete
    pub fn remove(&mut self, name: &str) -> JsResult<()> {
        self.clear_cached_iteration();
        let name = str_to_header_name(name)?;
        match self.headers.entry(name) {
            Entry::Occupied(entry) => {
                entry.remove_entry_mult();
                Ok(())
            }
            Entry::Vacant(_) => Ok(()),
        }
    }

    /// https://fetch.spec.whatwg.org/#dom-headers-get
    pub fn get(&self, name: &str) -> JsResult<Option<String>> {
        let name = str_to_header_name(name)?;
        let values = collect_values(self.headers.get_all(name))?;
        if values.is_empty() {
            Ok(None)
        } else {
            Ok(Some(values.join(", ")))
        }
    }

    pub fn get_set_cookie(&self) -> JsResult<Vec<String>> {
        collect_values(self.headers.get_all("set-cookie"))
    }

    /// https://fetch.spec.whatwg.org/#dom-headers-has
    pub fn contains(&self, name: &str) -> JsResult<bool> {
        let name = str_to_header_name(name)?;
        Ok(self.headers.contains_key(&name))
    }

    /// https://fetch.spec.whatwg.org/#dom-headers-set
    pub fn set(&mut self, name: &str, value: &str) -> JsResult<()> {
        self.clear_cached_iteration();
        let name = str_to_header_name(name)?;
        let value = str_to_header_value(value)?;
        self.headers.insert(name, value);
        Ok(())
    }
}

impl Finalize for Headers {}

unsafe impl Trace for Headers {
    empty_trace!();
}

impl From<HeaderMap> for Headers {
    fn from(headers: HeaderMap) -> Self {
        Self::from_http_headers(headers)
    }
}

fn str_to_header_name(name: &str) -> JsResult<HeaderName> {
    HeaderName::try_from(&name.to_ascii_lowercase()).map_err(|_| {
        JsError::from_native(
            JsNativeError::typ().with_message(format!("Invalid header name: {name:?}")),
        )
    })
}

fn str_to_header_value(value: &str) -> JsResult<HeaderValue> {
    HeaderValue::try_from(value.trim()).map_err(|_| {
        JsError::from_native(
            JsNativeError::typ().with_message("Invalid header value"),
        )
    })
}

pub struct HeadersClass;

impl Headers {
    pub fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message("Failed to convert js value into rust type `Headers`")
                    .into()
            })
    }
}

impl HeadersClass {
    fn append(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut headers = Headers::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        let value: String = args.get_or_undefined(1).try_js_into(context)?;

        headers.append(&name, &value)?;

        Ok(JsValue::undefined())
    }

    fn delete(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut headers = Headers::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;

        headers.remove(&name)?;

        Ok(JsValue::undefined())
    }

    fn get(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let headers = Headers::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;

        Ok(headers.get(&name)?.into_js(context))
    }

    fn get_set_cookie(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let headers = Headers::try_from_js(this)?;
        Ok(headers.get_set_cookie()?.into_js(context))
    }

    fn has(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let headers = Headers::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;

        Ok(headers.contains(&name)?.into())
    }

    fn set(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut headers = Headers::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        let value: String = args.get_or_undefined(1).try_js_into(context)?;

        headers.set(&name, &value)?;

        Ok(JsValue::undefined())
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HeaderEntry {
    name: String,
    value: String,
}

impl TryFromJs for HeaderEntry {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let arr: JsArray = value.try_js_into(context)?;

        let name: String = arr.get(0, context)?.try_js_into(context)?;
        let value: String = arr.get(1, context)?.try_js_into(context)?;

        Ok(Self { name, value })
    }
}

fn js_array_to_header_entries(
    obj: &JsObject,
    context: &mut Context,
) -> JsResult<Vec<HeaderEntry>> {
    let arr = JsArray::from_object(obj.clone())?;

    let mut vec = vec![];

    let length = arr.length(context)?;
    for i in 0..length {
        vec.push(HeaderEntry::try_from_js(&arr.get(i, context)?, context)?)
    }

    Ok(vec)
}

/// The `HeadersInit` union.
///
/// https://fetch.spec.whatwg.org/#typedefdef-headersinit
pub enum HeadersInit {
    New(Vec<HeaderEntry>),
    Existing(Headers),
}

impl Default for HeadersInit {
    fn default() -> Self {
        Self::Existing(Headers::default())
    }
}

impl Headers {
    pub fn from_init(init: HeadersInit) -> JsResult<Headers> {
        match init {
            HeadersInit::New(entries) => {
                let mut headers = Headers::default();
                for entry in entries {
                    headers.append(&entry.name, &entry.value)?
                }
                Ok(headers)
            }
            HeadersInit::Existing(headers) => Ok(headers),
        }
    }
}

impl TryFromJs for HeadersInit {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let obj = value.as_object().ok_or_else(|| {
            JsError::from_native(
                JsNativeError::typ()
                    .with_message("Failed to convert js value into js object"),
            )
        })?;

        if obj.is_array() {
            Ok(Self::New(js_array_to_header_entries(obj, context)?))
        } else if obj.is_native_object() {
            let headers = obj.downcast_ref::<Headers>().ok_or_else(|| {
                JsError::from_native(JsNativeError::typ().with_message(
                    "Failed to convert js object into Rust type `Headers`",
                ))
            })?;

            Ok(Self::Existing(headers.clone()))
        } else {
            let arr = builtins::object::Object::entries(
                &JsValue::undefined(),
                &[value.clone()],
                context,
            )?
            .to_object(context)
            .map_err(|_| {
                JsError::from_native(
                    JsNativeError::typ()
                        .with_message("Expected array from `Object.entries`"),
                )
            })?;

            Ok(Self::New(js_array_to_header_entries(&arr, context)?))
        }
    }
}

impl TryFromJs for Headers {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let init: HeadersInit = value.try_js_into(context)?;

        Headers::from_init(init)
    }
}

impl NativeClass for HeadersClass {
    type Instance = Headers;

    const NAME: &'static str = "Headers";

    fn constructor(
        _this: &JsNativeObject<Headers>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<Headers> {
        match args.get(0) {
            None => Ok(Headers::default()),
            Some(value) if value.is_undefined() => Ok(Headers::default()),
            Some(value) => value.try_js_into(context),
        }
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        class
            .method(
                js_string!("append"),
                2,
                NativeFunction::from_fn_ptr(HeadersClass::append),
            )
            .method(
                js_string!("delete"),
                1,
                NativeFunction::from_fn_ptr(HeadersClass::delete),
            )
            .method(
                js_string!("get"),
                1,
                NativeFunction::from_fn_ptr(HeadersClass::get),
            )
            .method(
                js_string!("getSetCookie"),
                0,
                NativeFunction::from_fn_ptr(HeadersClass::get_set_cookie),
            )
            .method(
                js_string!("has"),
                1,
                NativeFunction::from_fn_ptr(HeadersClass::has),
            )
            .method(
                js_string!("set"),
                2,
                NativeFunction::from_fn_ptr(HeadersClass::set),
            );
        PairIterableMethods::<HeadersIteratorClass>::define_pair_iterable_methods(
            class,
        )?;
        Ok(())
    }
}

impl PairIterable for Headers {
    fn pair_iterable_len(&self) -> JsResult<usize> {
        Ok(self.get_cached_iteration()?.len())
    }

    fn pair_iterable_get(
        &self,
        index: usize,
        context: &mut Context,
    ) -> JsResult<PairValue> {
        let cached_iteration = self.get_cached_iteration()?;
        let (key, value) = cached_iteration.get(index).cloned().ok_or_else(|| {
            JsError::from_native(
                JsNativeError::range().with_message("Headers iteration out of bounds"),
            )
        })?;
        Ok(PairValue {
            key: key.into_js(context),
            value: value.into_js(context),
        })
    }
}

pub struct HeadersIteratorClass;

impl PairIteratorClass for HeadersIteratorClass {
    type Iterable = Headers;

    const NAME: &'static str = "Headers Iterator";
}

pub struct HeadersApi;

impl strand_core::Api for HeadersApi {
    fn init(self, context: &mut Context) {
        register_global_class::<HeadersClass>(context)
            .expect("The `Headers` class shouldn't exist yet");
        register_global_class::<HeadersIteratorClass>(context)
            .expect("The `Headers Iterator` class shouldn't exist yet");
    }
}

#[cfg(test)]
mod test {
    use super::Headers;

    #[test]
    fn append_and_combine() {
        let mut headers = Headers::new();
        headers.append("Accept", "text/html").unwrap();
        headers.append("accept", "application/json").unwrap();
        assert_eq!(
            headers.get("ACCEPT").unwrap().unwrap(),
            "text/html, application/json"
        );
    }

    #[test]
    fn invalid_names_and_values_are_rejected() {
        let mut headers = Headers::new();
        assert!(headers.append("bad name", "x").is_err());
        assert!(headers.append("", "x").is_err());
        assert!(headers.append("x-ok", "bad\r\nvalue").is_err());
        assert!(headers.append("x-ok", "bad\0value").is_err());
    }

    #[test]
    fn set_replaces_while_append_accumulates() {
        let mut headers = Headers::new();
        headers.append("x-token", "a").unwrap();
        headers.append("x-token", "b").unwrap();
        headers.set("x-token", "c").unwrap();
        assert_eq!(headers.get("x-token").unwrap().unwrap(), "c");
    }

    #[test]
    fn set_cookie_stays_uncombined() {
        let mut headers = Headers::new();
        headers.append("set-cookie", "a=1").unwrap();
        headers.append("set-cookie", "b=2").unwrap();
        assert_eq!(headers.get_set_cookie().unwrap(), vec!["a=1", "b=2"]);
    }
}
