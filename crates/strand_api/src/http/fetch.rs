//! The `fetch` global.
//!
//! Validation happens synchronously (URL, method, headers, body/method
//! consistency); the wire work is handed to the engine in `client`. An
//! already-aborted signal rejects a microtask later with its exact reason.
//!
//! More information:
//!  - [WHATWG Fetch specification][spec]
//!
//! [spec]: https://fetch.spec.whatwg.org/#fetch-method

use boa_engine::{
    job::NativeJob, js_string, Context, JsArgs, JsNativeError, JsResult, JsValue,
    NativeFunction,
};
use strand_core::{
    event_loop::with_event_loop, native::JsNativeObject, promise::Deferred,
};

use crate::abort::AbortSignal;

use super::{
    client::{self, FetchBody},
    request::{Request, RequestInfo, RequestOptions},
};

fn fetch_body_of(request: &Request) -> FetchBody {
    if let Some(stream) = request.body().stream_value() {
        return FetchBody::Stream(stream);
    }
    match request.body().bytes_if_buffered() {
        Some(bytes) => FetchBody::Bytes(bytes),
        None => FetchBody::Empty,
    }
}

pub struct FetchApi;

impl FetchApi {
    fn fetch(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let info: RequestInfo = args.get_or_undefined(0).try_js_into(context)?;
        let options: RequestOptions = match args.get(1) {
            Some(value) if !value.is_undefined() => value.try_js_into(context)?,
            _ => Default::default(),
        };
        let request = Request::new(info, options, context)?;

        if !matches!(request.url().scheme(), "http" | "https") {
            return Err(JsNativeError::typ()
                .with_message(format!(
                    "fetch cannot load {}: unsupported scheme",
                    request.url()
                ))
                .into());
        }

        let deferred = Deferred::new(context)?;

        // An already-aborted signal short-circuits before any network work,
        // rejecting with the signal's exact reason a microtask later.
        let signal = match request.signal() {
            Some(signal) => {
                let signal: JsNativeObject<AbortSignal> =
                    JsNativeObject::try_from(signal)?;
                if signal.deref().aborted() {
                    let reason = signal.deref().reason();
                    let reject = deferred.clone();
                    with_event_loop(|event_loop| {
                        event_loop.enqueue_microtask(NativeJob::new(move |context| {
                            reject.reject(&reason, context);
                            Ok(JsValue::undefined())
                        }));
                    });
                    return Ok(deferred.to_value());
                }
                Some(signal)
            }
            None => None,
        };

        let body = fetch_body_of(&request);
        client::execute(
            request.method().clone(),
            request.url().clone(),
            request.headers().deref().to_http_headers(),
            body,
            signal,
            None,
            deferred.clone(),
            context,
        )?;

        Ok(deferred.to_value())
    }
}

impl strand_core::Api for FetchApi {
    fn init(self, context: &mut Context) {
        context
            .register_global_builtin_callable(
                js_string!("fetch"),
                1,
                NativeFunction::from_fn_ptr(Self::fetch),
            )
            .expect("fetch should only be registered once");
    }
}
