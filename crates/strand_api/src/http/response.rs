//! The `Response` Web API class.
//!
//! The constructor path enforces an integer status in [200, 599]; internal
//! pathways (the network engine) may carry any status the wire produced.
//! `clone()` requires an unconsumed body and tees stream bodies.
//!
//! More information:
//!  - [WHATWG Fetch specification][spec]
//!
//! [spec]: https://fetch.spec.whatwg.org/#response-class

use boa_engine::{
    js_string,
    property::Attribute,
    value::TryFromJs,
    Context, JsArgs, JsError, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{custom_trace, Finalize, Trace};
use http::HeaderMap;
use strand_core::{
    accessor,
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
    value::IntoJs,
};
use url::Url;

use super::{
    body::{Body, BodyWithType},
    header::{Headers, HeadersClass},
};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Default,
    Error,
}

pub struct Response {
    status: u16,
    status_text: String,
    headers: JsNativeObject<Headers>,
    body: Body,
    url: Option<Url>,
    type_: ResponseType,
}

impl Finalize for Response {
    fn finalize(&self) {
        self.headers.finalize();
        self.body.finalize();
    }
}

unsafe impl Trace for Response {
    custom_trace!(this, {
        mark(&this.headers);
        mark(&this.body);
    });
}

pub struct ResponseOptions {
    status: f64,
    status_text: String,
    headers: Headers,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self {
            status: 200.0,
            status_text: String::new(),
            headers: Default::default(),
        }
    }
}

impl TryFromJs for ResponseOptions {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let mut options = ResponseOptions::default();
        let Some(obj) = value.as_object() else {
            return Ok(options);
        };
        if obj.has_property(js_string!("status"), context)? {
            options.status = obj.get(js_string!("status"), context)?.to_number(context)?;
        }
        if obj.has_property(js_string!("statusText"), context)? {
            options.status_text = obj
                .get(js_string!("statusText"), context)?
                .try_js_into(context)?;
        }
        if obj.has_property(js_string!("headers"), context)? {
            options.headers = Headers::from_init(
                obj.get(js_string!("headers"), context)?
                    .try_js_into(context)?,
            )?;
        }
        Ok(options)
    }
}

impl Response {
    /// https://fetch.spec.whatwg.org/#initialize-a-response
    pub fn new(
        body_with_type: BodyWithType,
        options: ResponseOptions,
        context: &mut Context,
    ) -> JsResult<Self> {
        // The constructor path enforces an integer status in [200, 599].
        if options.status.fract() != 0.0
            || !(200.0..=599.0).contains(&options.status)
        {
            return Err(JsError::from_native(JsNativeError::range().with_message(
                format!("Invalid response status: {}", options.status),
            )));
        }

        let headers = options.headers;
        if let Some(content_type) = &body_with_type.content_type {
            if !headers.contains_key("content-type") {
                let mut headers = headers.clone();
                headers.append("content-type", content_type)?;
                return Self::build(
                    options.status as u16,
                    options.status_text,
                    headers,
                    body_with_type.body,
                    context,
                );
            }
        }
        Self::build(
            options.status as u16,
            options.status_text,
            headers,
            body_with_type.body,
            context,
        )
    }

    fn build(
        status: u16,
        status_text: String,
        headers: Headers,
        body: Body,
        context: &mut Context,
    ) -> JsResult<Self> {
        Ok(Self {
            status,
            status_text,
            headers: JsNativeObject::new::<HeadersClass>(headers, context)?,
            body,
            url: None,
            type_: ResponseType::Default,
        })
    }

    /// Internal pathway for the network engine: 1xx statuses allowed, url
    /// recorded, body already a stream.
    pub fn from_network(
        status: u16,
        status_text: String,
        headers: HeaderMap,
        body: Body,
        url: Url,
        context: &mut Context,
    ) -> JsResult<Self> {
        Ok(Self {
            status,
            status_text,
            headers: JsNativeObject::new::<HeadersClass>(
                Headers::from_http_headers(headers),
                context,
            )?,
            body,
            url: Some(url),
            type_: ResponseType::Default,
        })
    }

    /// https://fetch.spec.whatwg.org/#dom-response-error
    pub fn network_error(context: &mut Context) -> JsResult<Self> {
        Ok(Self {
            status: 0,
            status_text: String::new(),
            headers: JsNativeObject::new::<HeadersClass>(Headers::new(), context)?,
            body: Body::null(),
            url: None,
            type_: ResponseType::Error,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn content_type(&self) -> String {
        self.headers
            .deref()
            .get("content-type")
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// https://fetch.spec.whatwg.org/#dom-response-clone
    pub fn clone_response(
        &mut self,
        context: &mut Context,
    ) -> JsResult<Response> {
        let body = self.body.split_off_clone(context)?;
        Ok(Response {
            status: self.status,
            status_text: self.status_text.clone(),
            headers: JsNativeObject::new::<HeadersClass>(
                self.headers.deref().clone(),
                context,
            )?,
            body,
            url: self.url.clone(),
            type_: self.type_,
        })
    }
}

pub struct ResponseClass;

impl Response {
    pub fn try_from_js(
        value: &JsValue,
    ) -> JsResult<boa_gc::GcRefMut<'_, boa_engine::object::Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message(
                        "Failed to convert js value into rust type `Response`",
                    )
                    .into()
            })
    }
}

impl ResponseClass {
    fn status(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Response,
            "status",
            get:((response, _context) => Ok(response.status.into()))
        )
    }

    fn ok(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Response,
            "ok",
            get:((response, _context) => Ok(response.ok().into()))
        )
    }

    fn status_text(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Response,
            "statusText",
            get:((response, context) => Ok(response.status_text.clone().into_js(context)))
        )
    }

    fn headers(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Response,
            "headers",
            get:((response, _context) => Ok(response.headers.inner().clone()))
        )
    }

    fn body(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Response,
            "body",
            get:((response, context) => response.body_mut().as_stream(context))
        )
    }

    fn body_used(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Response,
            "bodyUsed",
            get:((response, _context) => Ok(response.body.is_used().into()))
        )
    }

    fn url(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Response,
            "url",
            get:((response, context) => Ok(response
                .url
                .as_ref()
                .map(|url| url.to_string())
                .unwrap_or_default()
                .into_js(context)))
        )
    }

    fn type_(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Response,
            "type",
            get:((response, context) => Ok(match response.type_ {
                ResponseType::Default => "default",
                ResponseType::Error => "error",
            }
            .into_js(context)))
        )
    }

    fn redirected(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Response,
            "redirected",
            get:((_response, _context) => Ok(false.into()))
        )
    }

    fn array_buffer(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut response = Response::try_from_js(this)?;
        response.body.array_buffer(context)
    }

    fn bytes(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut response = Response::try_from_js(this)?;
        response.body.bytes(context)
    }

    fn text(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut response = Response::try_from_js(this)?;
        response.body.text(context)
    }

    fn json(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut response = Response::try_from_js(this)?;
        response.body.json(context)
    }

    fn blob(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let (content_type, this) = {
            let response = Response::try_from_js(this)?;
            (response.content_type(), this.clone())
        };
        let mut response = Response::try_from_js(&this)?;
        response.body.blob(content_type, context)
    }

    fn clone(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let cloned = {
            let mut response = Response::try_from_js(this)?;
            response.clone_response(context)?
        };
        Ok(JsNativeObject::new::<ResponseClass>(cloned, context)?.to_inner())
    }

    /// `Response.json(data, init?)`
    fn json_static(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let body = BodyWithType::json(args.get_or_undefined(0), context)?;
        let options: ResponseOptions = args.get_or_undefined(1).try_js_into(context)?;
        let response = Response::new(body, options, context)?;
        Ok(JsNativeObject::new::<ResponseClass>(response, context)?.to_inner())
    }

    /// `Response.error()`
    fn error_static(
        _this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let response = Response::network_error(context)?;
        Ok(JsNativeObject::new::<ResponseClass>(response, context)?.to_inner())
    }
}

impl NativeClass for ResponseClass {
    type Instance = Response;

    const NAME: &'static str = "Response";

    fn constructor(
        _this: &JsNativeObject<Response>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<Self::Instance> {
        let body: BodyWithType = args.get_or_undefined(0).try_js_into(context)?;
        let options: ResponseOptions = args.get_or_undefined(1).try_js_into(context)?;

        Response::new(body, options, context)
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let status = Self::status(class.context());
        let ok = Self::ok(class.context());
        let status_text = Self::status_text(class.context());
        let headers = Self::headers(class.context());
        let body = Self::body(class.context());
        let body_used = Self::body_used(class.context());
        let url = Self::url(class.context());
        let type_ = Self::type_(class.context());
        let redirected = Self::redirected(class.context());

        class
            .accessor(js_string!("status"), status, Attribute::all())
            .accessor(js_string!("ok"), ok, Attribute::all())
            .accessor(js_string!("statusText"), status_text, Attribute::all())
            .accessor(js_string!("headers"), headers, Attribute::all())
            .accessor(js_string!("body"), body, Attribute::all())
            .accessor(js_string!("bodyUsed"), body_used, Attribute::all())
            .accessor(js_string!("url"), url, Attribute::all())
            .accessor(js_string!("type"), type_, Attribute::all())
            .accessor(js_string!("redirected"), redirected, Attribute::all())
            .static_method(
                js_string!("json"),
                1,
                NativeFunction::from_fn_ptr(Self::json_static),
            )
            .static_method(
                js_string!("error"),
                0,
                NativeFunction::from_fn_ptr(Self::error_static),
            )
            .method(
                js_string!("arrayBuffer"),
                0,
                NativeFunction::from_fn_ptr(Self::array_buffer),
            )
            .method(
                js_string!("bytes"),
                0,
                NativeFunction::from_fn_ptr(Self::bytes),
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
            )
            .method(
                js_string!("blob"),
                0,
                NativeFunction::from_fn_ptr(Self::blob),
            )
            .method(
                js_string!("clone"),
                0,
                NativeFunction::from_fn_ptr(Self::clone),
            );

        Ok(())
    }
}

pub struct ResponseApi;

impl strand_core::Api for ResponseApi {
    fn init(self, context: &mut Context) {
        register_global_class::<ResponseClass>(context)
            .expect("The `Response` class shouldn't exist yet")
    }
}
