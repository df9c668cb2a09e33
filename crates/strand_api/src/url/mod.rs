//! The `URL` Web API class over the `url` crate's parser.
//!
//! More information:
//!  - [WHATWG `URL` specification][spec]
//!
//! [spec]: https://url.spec.whatwg.org/

mod search_params;

use boa_engine::{
    js_string, object::Object, property::Attribute, Context, JsArgs, JsError,
    JsNativeError, JsObject, JsResult, JsValue, NativeFunction,
};
use boa_gc::{custom_trace, Finalize, GcRefMut, Trace};
use strand_core::{
    accessor,
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject,
        JsNativeObjectToString, NativeClass,
    },
    value::IntoJs,
    Api,
};
use url::Url as InnerUrl;

pub use search_params::{UrlSearchParams, UrlSearchParamsClass};

use self::search_params::UrlSearchParamsApi;

pub struct Url {
    pub(crate) url: InnerUrl,
    search_params: JsNativeObject<UrlSearchParams>,
}

impl Finalize for Url {
    fn finalize(&self) {
        self.search_params.finalize()
    }
}

unsafe impl Trace for Url {
    custom_trace!(this, {
        mark(&this.search_params);
    });
}

impl JsNativeObjectToString for Url {
    fn to_string(
        this: &JsNativeObject<Self>,
        context: &mut Context,
    ) -> JsResult<JsValue> {
        Ok(this.deref().href().into_js(context))
    }
}

impl Url {
    fn parse_with_base(url: &str, base: Option<&str>) -> Option<InnerUrl> {
        let base = base.and_then(|base| InnerUrl::parse(base).ok());
        InnerUrl::options().base_url(base.as_ref()).parse(url).ok()
    }

    /// https://url.spec.whatwg.org/#dom-url-url
    pub fn new(
        url: String,
        base: Option<String>,
        context: &mut Context,
    ) -> JsResult<Self> {
        let parsed_url =
            Self::parse_with_base(&url, base.as_deref()).ok_or_else(|| {
                JsError::from_native(
                    JsNativeError::typ().with_message(format!("Invalid URL: {url}")),
                )
            })?;

        let query = parsed_url.query_pairs().into_owned().collect();

        Ok(Self {
            url: parsed_url,
            search_params: JsNativeObject::new::<UrlSearchParamsClass>(
                UrlSearchParams::with_values(query),
                context,
            )?,
        })
    }

    /// https://url.spec.whatwg.org/#dom-url-canparse
    pub fn can_parse(url: &str, base: Option<&str>) -> bool {
        Self::parse_with_base(url, base).is_some()
    }

    pub fn href(&self) -> String {
        self.url.to_string()
    }

    pub fn set_href(&mut self, href: &str) -> JsResult<()> {
        let parsed_url = InnerUrl::parse(href).map_err(|_| {
            JsError::from_native(
                JsNativeError::typ().with_message(format!("Invalid URL: {href}")),
            )
        })?;

        let query: Vec<_> = parsed_url.query_pairs().into_owned().collect();
        self.url = parsed_url;
        self.search_params.deref_mut().replace_values(query);

        Ok(())
    }

    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// The scheme including the final ':'.
    pub fn protocol(&self) -> String {
        format!("{}:", self.url.scheme())
    }

    pub fn set_protocol(&mut self, protocol: &str) -> JsResult<()> {
        let scheme = protocol.strip_suffix(':').unwrap_or(protocol);
        self.url.set_scheme(scheme).map_err(|_| {
            JsError::from(JsNativeError::typ().with_message("Invalid protocol"))
        })
    }

    pub fn username(&self) -> String {
        String::from(self.url.username())
    }

    pub fn set_username(&mut self, username: &str) -> JsResult<()> {
        self.url.set_username(username).map_err(|_| {
            JsError::from_native(JsNativeError::typ().with_message("Invalid username"))
        })
    }

    pub fn password(&self) -> String {
        self.url.password().unwrap_or_default().to_string()
    }

    pub fn set_password(&mut self, password: Option<&str>) -> JsResult<()> {
        self.url.set_password(password).map_err(|_| {
            JsError::from_native(JsNativeError::typ().with_message("Invalid password"))
        })
    }

    /// Host with the port when one is present.
    pub fn host(&self) -> String {
        let Some(host) = self.url.host_str() else {
            return String::new();
        };
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => String::from(host),
        }
    }

    pub fn set_host(&mut self, host: Option<&str>) -> JsResult<()> {
        fn invalid_host() -> JsError {
            JsError::from_native(JsNativeError::typ().with_message("Invalid host"))
        }

        match host {
            Some(host) => {
                let (name, port) = match host.rsplit_once(':') {
                    Some((name, port)) if !port.is_empty() => {
                        let port =
                            port.parse::<u16>().map_err(|_| invalid_host())?;
                        (name, Some(port))
                    }
                    _ => (host, None),
                };
                self.url.set_host(Some(name)).map_err(|_| invalid_host())?;
                if port.is_some() {
                    self.url.set_port(port).map_err(|_| invalid_host())?;
                }
            }
            None => {
                self.url.set_host(None).map_err(|_| invalid_host())?;
            }
        }

        Ok(())
    }

    pub fn hostname(&self) -> String {
        self.url.host_str().unwrap_or_default().to_string()
    }

    pub fn set_hostname(&mut self, hostname: Option<&str>) -> JsResult<()> {
        self.url.set_host(hostname).map_err(|_| {
            JsError::from_native(JsNativeError::typ().with_message("Invalid hostname"))
        })
    }

    /// The explicit port, or the empty string for the scheme default.
    pub fn port(&self) -> String {
        self.url
            .port()
            .map(|port| port.to_string())
            .unwrap_or_default()
    }

    pub fn set_port(&mut self, port: Option<u16>) -> JsResult<()> {
        self.url.set_port(port).map_err(|_| {
            JsError::from_native(JsNativeError::typ().with_message("Invalid port"))
        })
    }

    pub fn pathname(&self) -> String {
        String::from(self.url.path())
    }

    pub fn set_pathname(&mut self, path: &str) {
        self.url.set_path(path);
    }

    /// The query including the leading '?', or the empty string.
    pub fn search(&self) -> String {
        match self.url.query() {
            Some(query) if !query.is_empty() => format!("?{query}"),
            _ => String::new(),
        }
    }

    pub fn set_search(&mut self, search: Option<&str>) {
        let search = search.map(|s| s.strip_prefix('?').unwrap_or(s));
        self.url
            .set_query(search.filter(|s| !s.is_empty()));
        let query = self.url.query_pairs().into_owned().collect();
        self.search_params.deref_mut().replace_values(query);
    }

    pub fn search_params(&self) -> JsObject {
        self.search_params.to_object()
    }

    /// The fragment including the leading '#', or the empty string.
    pub fn hash(&self) -> String {
        match self.url.fragment() {
            Some(fragment) if !fragment.is_empty() => format!("#{fragment}"),
            _ => String::new(),
        }
    }

    pub fn set_hash(&mut self, hash: Option<&str>) {
        let hash = hash.map(|h| h.strip_prefix('#').unwrap_or(h));
        self.url.set_fragment(hash.filter(|h| !h.is_empty()));
    }
}

pub struct UrlClass;

impl Url {
    pub(crate) fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message("Failed to convert js value into rust type `Url`")
                    .into()
            })
    }
}

impl UrlClass {
    fn hash(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "hash",
            get:((url, context) => Ok(url.hash().into_js(context))),
            set:((url, hash: Option<String>, _context) => url.set_hash(hash.as_deref()))
        )
    }

    fn host(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "host",
            get:((url, context) => Ok(url.host().into_js(context))),
            set:((url, host: Option<String>, _context) => url.set_host(host.as_deref())?)
        )
    }

    fn hostname(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "hostname",
            get:((url, context) => Ok(url.hostname().into_js(context))),
            set:((url, hostname: Option<String>, _context) => url.set_hostname(hostname.as_deref())?)
        )
    }

    fn href(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "href",
            get:((url, context) => Ok(url.href().into_js(context))),
            set:((url, href: String, _context) => url.set_href(&href)?)
        )
    }

    fn origin(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "origin",
            get:((url, context) => Ok(url.origin().into_js(context)))
        )
    }

    fn password(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "password",
            get:((url, context) => Ok(url.password().into_js(context))),
            set:((url, password: Option<String>, _context) => url.set_password(password.as_deref())?)
        )
    }

    fn pathname(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "pathname",
            get:((url, context) => Ok(url.pathname().into_js(context))),
            set:((url, path: String, _context) => url.set_pathname(&path))
        )
    }

    fn port(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "port",
            get:((url, context) => Ok(url.port().into_js(context))),
            set:((url, port: Option<u16>, _context) => url.set_port(port)?)
        )
    }

    fn protocol(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "protocol",
            get:((url, context) => Ok(url.protocol().into_js(context))),
            set:((url, protocol: String, _context) => url.set_protocol(&protocol)?)
        )
    }

    fn search(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "search",
            get:((url, context) => Ok(url.search().into_js(context))),
            set:((url, search: Option<String>, _context) => url.set_search(search.as_deref()))
        )
    }

    fn search_params(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "searchParams",
            get:((url, _context) => Ok(url.search_params().into()))
        )
    }

    fn username(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Url,
            "username",
            get:((url, context) => Ok(url.username().into_js(context))),
            set:((url, username: String, _context) => url.set_username(&username)?)
        )
    }

    fn can_parse(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let url: String = args.get_or_undefined(0).try_js_into(context)?;
        let base: Option<String> = args.get_or_undefined(1).try_js_into(context)?;

        Ok(Url::can_parse(&url, base.as_deref()).into())
    }
}

impl NativeClass for UrlClass {
    type Instance = Url;

    const NAME: &'static str = "URL";

    const LENGTH: usize = 1;

    fn constructor(
        _this: &JsNativeObject<Url>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<Url> {
        let url: String = args.get_or_undefined(0).try_js_into(context)?;
        let base: Option<String> = args.get_or_undefined(1).try_js_into(context)?;

        Url::new(url, base, context)
    }

    fn object_constructor(
        this: &JsNativeObject<Self::Instance>,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<()> {
        // The query object's URL object is `this`: mutations through
        // `searchParams` write back into the URL.
        this.deref().search_params.deref_mut().set_url(this);

        Ok(())
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let hash = UrlClass::hash(class.context());
        let host = UrlClass::host(class.context());
        let hostname = UrlClass::hostname(class.context());
        let href = UrlClass::href(class.context());
        let origin = UrlClass::origin(class.context());
        let password = UrlClass::password(class.context());
        let pathname = UrlClass::pathname(class.context());
        let port = UrlClass::port(class.context());
        let protocol = UrlClass::protocol(class.context());
        let search = UrlClass::search(class.context());
        let search_params = UrlClass::search_params(class.context());
        let username = UrlClass::username(class.context());

        class
            .accessor(js_string!("hash"), hash, Attribute::all())
            .accessor(js_string!("host"), host, Attribute::all())
            .accessor(js_string!("hostname"), hostname, Attribute::all())
            .accessor(js_string!("href"), href, Attribute::all())
            .accessor(js_string!("origin"), origin, Attribute::all())
            .accessor(js_string!("password"), password, Attribute::all())
            .accessor(js_string!("pathname"), pathname, Attribute::all())
            .accessor(js_string!("port"), port, Attribute::all())
            .accessor(js_string!("protocol"), protocol, Attribute::all())
            .accessor(js_string!("search"), search, Attribute::all())
            .accessor(js_string!("searchParams"), search_params, Attribute::all())
            .accessor(js_string!("username"), username, Attribute::all())
            .static_method(
                js_string!("canParse"),
                1,
                NativeFunction::from_fn_ptr(UrlClass::can_parse),
            )
            .method(
                js_string!("toString"),
                0,
                NativeFunction::from_fn_ptr(UrlClass::to_string),
            )
            .method(
                js_string!("toJSON"),
                0,
                NativeFunction::from_fn_ptr(UrlClass::to_string),
            );

        Ok(())
    }
}

pub struct UrlApi;

impl Api for UrlApi {
    fn init(self, context: &mut Context) {
        UrlSearchParamsApi.init(context);
        register_global_class::<UrlClass>(context)
            .expect("The `URL` class shouldn't exist yet")
    }
}
