//! The `Request` Web API class.
//!
//! More information:
//!  - [WHATWG Fetch specification][spec]
//!
//! [spec]: https://fetch.spec.whatwg.org/#request-class

use std::str::FromStr;

use boa_engine::{
    js_string,
    property::Attribute,
    value::TryFromJs,
    Context, JsArgs, JsError, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{custom_trace, Finalize, Trace};
use http::Method;
use strand_core::{
    accessor,
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
    value::IntoJs,
};
use url::Url;

use crate::abort::AbortSignal;

use super::{
    body::{Body, BodyWithType},
    header::{Headers, HeadersClass},
};

pub enum RequestInfo {
    Request(JsNativeObject<Request>),
    String(String),
}

#[derive(Default)]
pub struct RequestOptions {
    method: Option<String>,
    headers: Option<Headers>,
    body: Option<BodyWithType>,
    signal: Option<JsValue>,
}

pub struct Request {
    method: Method,
    url: Url,
    headers: JsNativeObject<Headers>,
    body: Body,
    signal: Option<JsValue>,
}

impl Finalize for Request {
    fn finalize(&self) {
        self.headers.finalize();
        self.body.finalize();
    }
}

unsafe impl Trace for Request {
    custom_trace!(this, {
        mark(&this.headers);
        mark(&this.body);
        if let Some(signal) = &this.signal {
            mark(signal);
        }
    });
}

/// https://fetch.spec.whatwg.org/#forbidden-method
fn parse_method(method: &str) -> JsResult<Method> {
    if matches!(
        method.to_ascii_uppercase().as_str(),
        "CONNECT" | "TRACE" | "TRACK"
    ) {
        return Err(JsError::from_native(
            JsNativeError::typ()
                .with_message(format!("Forbidden method: {method}")),
        ));
    }
    // Normalization uppercases the common verbs, per the spec.
    let normalized = if matches!(
        method.to_ascii_uppercase().as_str(),
        "DELETE" | "GET" | "HEAD" | "OPTIONS" | "POST" | "PUT" | "PATCH"
    ) {
        method.to_ascii_uppercase()
    } else {
        method.to_string()
    };
    Method::from_str(&normalized).map_err(|_| {
        JsError::from_native(
            JsNativeError::typ().with_message(format!("Invalid method: {method}")),
        )
    })
}

impl Request {
    /// https://fetch.spec.whatwg.org/#request-create
    pub fn new(
        info: RequestInfo,
        options: RequestOptions,
        context: &mut Context,
    ) -> JsResult<Self> {
        // 1. Parse (or copy) the request this one builds on.
        let (url, mut method, base_headers, body, base_signal) = match info {
            RequestInfo::String(url) => {
                let parsed = Url::from_str(&url).map_err(|_| {
                    JsError::from_native(
                        JsNativeError::typ()
                            .with_message(format!("Invalid URL: {url}")),
                    )
                })?;
                (parsed, Method::GET, None, Body::null(), None)
            }
            RequestInfo::Request(request) => {
                let inner = request.deref();
                let bytes = inner.body.bytes_if_buffered();
                let body = match bytes {
                    Some(bytes) => Body::from_bytes(bytes),
                    None => match inner.body.stream_value() {
                        Some(stream) => Body::from_stream(stream),
                        None => Body::null(),
                    },
                };
                (
                    inner.url.clone(),
                    inner.method.clone(),
                    Some(inner.headers.deref().clone()),
                    body,
                    inner.signal.clone(),
                )
            }
        };

        // 25. init["method"]
        if let Some(init_method) = options.method {
            method = parse_method(&init_method)?;
        }

        // 33. init["headers"]
        let headers = match options.headers {
            Some(headers) => headers,
            None => base_headers.unwrap_or_default(),
        };
        let headers = JsNativeObject::new::<HeadersClass>(headers, context)?;

        // 35. A GET/HEAD request must not carry a body.
        let (body, content_type) = match options.body {
            Some(with_type) => (with_type.body, with_type.content_type),
            None => (body, None),
        };
        if !body.is_null() && matches!(method, Method::GET | Method::HEAD) {
            return Err(JsError::from_native(JsNativeError::typ().with_message(
                format!("{} cannot have a body", method.as_str()),
            )));
        }

        // 37.4. Default the Content-Type from the body shape.
        if let Some(content_type) = content_type {
            if !headers.deref().contains_key("content-type") {
                headers.deref_mut().append("content-type", &content_type)?;
            }
        }

        let signal = match options.signal.or(base_signal) {
            Some(signal) if signal.is_null_or_undefined() => None,
            Some(signal) => {
                if !JsNativeObject::<AbortSignal>::is(&signal) {
                    return Err(JsError::from_native(
                        JsNativeError::typ()
                            .with_message("Request signal must be an AbortSignal"),
                    ));
                }
                Some(signal)
            }
            None => None,
        };

        Ok(Self {
            method,
            url,
            headers,
            body,
            signal,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &JsNativeObject<Headers> {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn signal(&self) -> Option<JsValue> {
        self.signal.clone()
    }

    pub fn body_used(&self) -> bool {
        self.body.is_used()
    }
}

pub struct RequestClass;

impl Request {
    pub fn try_from_js(
        value: &JsValue,
    ) -> JsResult<boa_gc::GcRefMut<'_, boa_engine::object::Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message("Failed to convert js value into rust type `Request`")
                    .into()
            })
    }
}

impl RequestClass {
    fn method(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Request,
            "method",
            get:((request, context) => Ok(request.method().to_string().into_js(context)))
        )
    }

    fn url(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Request,
            "url",
            get:((request, context) => Ok(request.url().to_string().into_js(context)))
        )
    }

    fn headers(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Request,
            "headers",
            get:((request, _context) => Ok(request.headers().inner().clone()))
        )
    }

    fn body_used(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Request,
            "bodyUsed",
            get:((request, _context) => Ok(request.body_used().into()))
        )
    }

    fn body(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Request,
            "body",
            get:((request, context) => request.body_mut().as_stream(context))
        )
    }

    fn signal(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Request,
            "signal",
            get:((request, _context) => Ok(request.signal().unwrap_or_else(JsValue::null)))
        )
    }

    fn array_buffer(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut request = Request::try_from_js(this)?;
        request.body.array_buffer(context)
    }

    fn text(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut request = Request::try_from_js(this)?;
        request.body.text(context)
    }

    fn json(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut request = Request::try_from_js(this)?;
        request.body.json(context)
    }
}

impl TryFromJs for RequestInfo {
    fn try_from_js(value: &JsValue, _context: &mut Context) -> JsResult<Self> {
        if let Some(string) = value.as_string() {
            Ok(Self::String(string.to_std_string_escaped()))
        } else {
            let request = JsNativeObject::try_from(value.clone()).map_err(|_| {
                JsNativeError::typ()
                    .with_message("Expected a URL string or Request object")
            })?;
            Ok(Self::Request(request))
        }
    }
}

impl TryFromJs for RequestOptions {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let obj = value.as_object().ok_or_else(|| {
            JsError::from_native(JsNativeError::typ().with_message("Expected object"))
        })?;

        let method: Option<String> = if obj.has_property(js_string!("method"), context)?
        {
            Some(obj.get(js_string!("method"), context)?.try_js_into(context)?)
        } else {
            None
        };

        let headers: Option<Headers> =
            if obj.has_property(js_string!("headers"), context)? {
                Some(Headers::from_init(
                    obj.get(js_string!("headers"), context)?
                        .try_js_into(context)?,
                )?)
            } else {
                None
            };

        let body: Option<BodyWithType> =
            if obj.has_property(js_string!("body"), context)? {
                let body = obj.get(js_string!("body"), context)?;
                if body.is_null_or_undefined() {
                    None
                } else {
                    Some(body.try_js_into(context)?)
                }
            } else {
                None
            };

        let signal: Option<JsValue> =
            if obj.has_property(js_string!("signal"), context)? {
                Some(obj.get(js_string!("signal"), context)?)
            } else {
                None
            };

        Ok(Self {
            method,
            headers,
            body,
            signal,
        })
    }
}

impl NativeClass for RequestClass {
    type Instance = Request;

    const NAME: &'static str = "Request";

    const LENGTH: usize = 1;

    fn constructor(
        _this: &JsNativeObject<Request>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<Self::Instance> {
        let info: RequestInfo = args.get_or_undefined(0).try_js_into(context)?;

        let options: RequestOptions = match args.get(1) {
            Some(value) if !value.is_undefined() => value.try_js_into(context)?,
            _ => Default::default(),
        };

        Request::new(info, options, context)
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let body = Self::body(class.context());
        let body_used = Self::body_used(class.context());
        let headers = Self::headers(class.context());
        let method = Self::method(class.context());
        let signal = Self::signal(class.context());
        let url = Self::url(class.context());

        class
            .accessor(js_string!("body"), body, Attribute::all())
            .accessor(js_string!("bodyUsed"), body_used, Attribute::all())
            .accessor(js_string!("headers"), headers, Attribute::all())
            .accessor(js_string!("method"), method, Attribute::all())
            .accessor(js_string!("signal"), signal, Attribute::all())
            .accessor(js_string!("url"), url, Attribute::all())
            .method(
                js_string!("arrayBuffer"),
                0,
                NativeFunction::from_fn_ptr(Self::array_buffer),
            )
            .method(
                js_string!("json"),
                0,
                NativeFunction::from_fn_ptr(Self::json),
            )
            .method(
                js_string!("text"),
                0,
                NativeFunction::from_fn_ptr(Self::text),
            );

        Ok(())
    }
}

pub struct RequestApi;

impl strand_core::Api for RequestApi {
    fn init(self, context: &mut Context) {
        register_global_class::<RequestClass>(context)
            .expect("The `Request` class shouldn't exist yet")
    }
}
