//! The `Body` mixin shared by `Request` and `Response`.
//!
//! A body is null, materialized bytes, a blob, or a `ReadableStream`; the
//! first exposure through `.body` converts the other shapes into a stream so
//! consumption is observable exactly once.
//!
//! More information:
//!  - [WHATWG Fetch specification][spec]
//!
//! [spec]: https://fetch.spec.whatwg.org/#body-mixin

use boa_engine::{
    object::builtins::JsPromise,
    value::TryFromJs,
    Context, JsError, JsNativeError, JsResult, JsString, JsValue,
};
use boa_gc::{custom_trace, Finalize, Trace};
use strand_core::{native::JsNativeObject, promise::Deferred};

use crate::{
    file::blob::Blob,
    idl::{bytes_to_array_buffer, bytes_to_uint8_array, BufferSource, JsBufferSource},
    stream::{
        callback, promise_then,
        readable::{ReadableStream, UnderlyingSource},
        QueuingStrategy,
    },
    url::UrlSearchParams,
};

use super::form_data::FormData;

pub enum BodySource {
    Bytes(Vec<u8>),
    Blob(Blob),
    Stream(JsValue),
}

pub struct Body {
    source: Option<BodySource>,
    used: bool,
}

impl Finalize for Body {}

unsafe impl Trace for Body {
    custom_trace!(this, {
        if let Some(BodySource::Stream(stream)) = &this.source {
            mark(stream);
        }
    });
}

impl Body {
    /// Returns a `null` body
    pub fn null() -> Self {
        Self {
            source: None,
            used: false,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            source: Some(BodySource::Bytes(bytes)),
            used: false,
        }
    }

    pub fn from_blob(blob: Blob) -> Self {
        Self {
            source: Some(BodySource::Blob(blob)),
            used: false,
        }
    }

    pub fn from_stream(stream: JsValue) -> Self {
        Self {
            source: Some(BodySource::Stream(stream)),
            used: false,
        }
    }

    pub fn is_null(&self) -> bool {
        self.source.is_none()
    }

    /// https://fetch.spec.whatwg.org/#dom-body-bodyused
    pub fn is_used(&self) -> bool {
        if self.used {
            return true;
        }
        match &self.source {
            Some(BodySource::Stream(stream)) => {
                JsNativeObject::<ReadableStream>::try_from(stream.clone())
                    .map(|stream| stream.deref().is_disturbed())
                    .unwrap_or(false)
            }
            _ => false,
        }
    }

    /// The underlying stream source value, if this body is stream-shaped.
    pub fn stream_value(&self) -> Option<JsValue> {
        match &self.source {
            Some(BodySource::Stream(stream)) => Some(stream.clone()),
            _ => None,
        }
    }

    pub fn bytes_if_buffered(&self) -> Option<Vec<u8>> {
        match &self.source {
            Some(BodySource::Bytes(bytes)) => Some(bytes.clone()),
            Some(BodySource::Blob(blob)) => blob.read_bytes().ok(),
            _ => None,
        }
    }

    /// `.body`: the body as a `ReadableStream` (or null). Bytes and blob
    /// sources are converted in place so later consumption shares the
    /// stream's disturbed state.
    pub fn as_stream(&mut self, context: &mut Context) -> JsResult<JsValue> {
        match &self.source {
            None => Ok(JsValue::null()),
            Some(BodySource::Stream(stream)) => Ok(stream.clone()),
            Some(BodySource::Bytes(bytes)) => {
                let blob = Blob::from_bytes(bytes.clone(), "");
                let stream = blob.stream(context)?;
                self.source = Some(BodySource::Stream(stream.clone()));
                Ok(stream)
            }
            Some(BodySource::Blob(blob)) => {
                let stream = blob.stream(context)?;
                self.source = Some(BodySource::Stream(stream.clone()));
                Ok(stream)
            }
        }
    }

    fn consume(&mut self) -> JsResult<BodySource> {
        if self.used {
            return Err(JsNativeError::typ()
                .with_message("Body has already been consumed")
                .into());
        }
        self.used = true;
        Ok(self
            .source
            .take()
            .unwrap_or_else(|| BodySource::Bytes(vec![])))
    }

    /// https://fetch.spec.whatwg.org/#dom-body-text
    pub fn text(&mut self, context: &mut Context) -> JsResult<JsValue> {
        self.consume_with(context, |bytes, _context| {
            Ok(JsString::from(String::from_utf8_lossy(&bytes).into_owned()).into())
        })
    }

    /// https://fetch.spec.whatwg.org/#dom-body-arraybuffer
    pub fn array_buffer(&mut self, context: &mut Context) -> JsResult<JsValue> {
        self.consume_with(context, |bytes, context| {
            Ok(bytes_to_array_buffer(bytes, context)?.into())
        })
    }

    /// https://fetch.spec.whatwg.org/#dom-body-bytes
    pub fn bytes(&mut self, context: &mut Context) -> JsResult<JsValue> {
        self.consume_with(context, |bytes, context| {
            Ok(bytes_to_uint8_array(bytes, context)?.into())
        })
    }

    /// https://fetch.spec.whatwg.org/#dom-body-json
    pub fn json(&mut self, context: &mut Context) -> JsResult<JsValue> {
        self.consume_with(context, |bytes, context| {
            let text = String::from_utf8_lossy(&bytes);
            let json: serde_json::Value =
                serde_json::from_str(&text).map_err(|err| {
                    JsError::from_native(
                        JsNativeError::typ()
                            .with_message(format!("Invalid JSON body: {err}")),
                    )
                })?;
            JsValue::from_json(&json, context)
        })
    }

    /// https://fetch.spec.whatwg.org/#dom-body-blob
    pub fn blob(&mut self, content_type: String, context: &mut Context) -> JsResult<JsValue> {
        let finish = move |bytes: Vec<u8>, context: &mut Context| {
            let blob = Blob::from_bytes(bytes, &content_type);
            Ok(
                JsNativeObject::new::<crate::file::blob::BlobClass>(blob, context)?
                    .to_inner(),
            )
        };
        match self.consume()? {
            BodySource::Bytes(bytes) => {
                let value = finish(bytes, context)?;
                Ok(JsPromise::resolve(value, context)?.into())
            }
            BodySource::Blob(blob) => {
                let bytes = blob.read_bytes().unwrap_or_default();
                let value = finish(bytes, context)?;
                Ok(JsPromise::resolve(value, context)?.into())
            }
            BodySource::Stream(stream) => read_all_with(&stream, context, finish),
        }
    }

    fn consume_with(
        &mut self,
        context: &mut Context,
        finish: fn(Vec<u8>, &mut Context) -> JsResult<JsValue>,
    ) -> JsResult<JsValue> {
        match self.consume()? {
            BodySource::Bytes(bytes) => {
                let value = finish(bytes, context)?;
                Ok(JsPromise::resolve(value, context)?.into())
            }
            BodySource::Blob(blob) => {
                let bytes = blob.read_bytes().map_err(|err| {
                    JsError::from_native(JsNativeError::typ().with_message(format!(
                        "Failed to read body blob: {err}"
                    )))
                })?;
                let value = finish(bytes, context)?;
                Ok(JsPromise::resolve(value, context)?.into())
            }
            BodySource::Stream(stream) => read_all_with(&stream, context, finish),
        }
    }

    /// Splits a stream body for `clone()`: this body keeps one branch, the
    /// returned body gets the other. Buffered shapes are copied.
    pub fn split_off_clone(&mut self, context: &mut Context) -> JsResult<Body> {
        if self.is_used() {
            return Err(JsNativeError::typ()
                .with_message("Cannot clone a body that has been consumed")
                .into());
        }
        match &self.source {
            None => Ok(Body::null()),
            Some(BodySource::Bytes(bytes)) => Ok(Body::from_bytes(bytes.clone())),
            Some(BodySource::Blob(blob)) => Ok(Body::from_blob(blob.clone())),
            Some(BodySource::Stream(stream)) => {
                let stream: JsNativeObject<ReadableStream> =
                    JsNativeObject::try_from(stream.clone())?;
                let (branch_0, branch_1) = ReadableStream::tee(&stream, context)?;
                self.source = Some(BodySource::Stream(branch_0));
                Ok(Body::from_stream(branch_1))
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::null()
    }
}

/// Collects the whole stream (string or BufferSource chunks), then maps the
/// bytes through `finish` into the resolved value.
fn read_all_with<F>(
    stream_value: &JsValue,
    context: &mut Context,
    finish: F,
) -> JsResult<JsValue>
where
    F: FnOnce(Vec<u8>, &mut Context) -> JsResult<JsValue> + Clone + 'static,
{
    let stream: JsNativeObject<ReadableStream> =
        JsNativeObject::try_from(stream_value.clone()).map_err(|_| {
            JsNativeError::typ().with_message("Body stream is not a ReadableStream")
        })?;
    let reader = ReadableStream::acquire_reader(&stream, context)?;
    let deferred = Deferred::new(context)?;

    // `finish` is not traceable, so it waits in the handle table while the
    // traced state carries its key.
    let finish_handle = crate::handles::insert(FinishFn(Box::new(finish)));
    let state = JsNativeObject::new_internal(
        ReadAllState {
            reader: reader.to_inner(),
            deferred: deferred.clone(),
            bytes: Vec::new(),
            finish_handle,
        },
        context,
    );

    read_all_step(&state, context);
    Ok(deferred.to_value())
}

struct FinishFn(Box<dyn FnOnce(Vec<u8>, &mut Context) -> JsResult<JsValue>>);

struct ReadAllState {
    reader: JsValue,
    deferred: Deferred,
    bytes: Vec<u8>,
    finish_handle: crate::handles::HandleId,
}

impl Finalize for ReadAllState {}

unsafe impl Trace for ReadAllState {
    custom_trace!(this, {
        mark(&this.reader);
        mark(&this.deferred);
    });
}

fn read_all_finish(
    state: &JsNativeObject<ReadAllState>,
    result: Result<Vec<u8>, JsValue>,
    context: &mut Context,
) {
    let deferred = state.deref().deferred.clone();
    let finisher = crate::handles::take::<FinishFn>(state.deref().finish_handle);
    match result {
        Ok(bytes) => match finisher {
            Some(FinishFn(finish)) => match finish(bytes, context) {
                Ok(value) => deferred.resolve(&value, context),
                Err(err) => deferred.reject_with(&err, context),
            },
            None => deferred.resolve(&JsValue::undefined(), context),
        },
        Err(reason) => deferred.reject(&reason, context),
    }
}

fn read_all_step(state: &JsNativeObject<ReadAllState>, context: &mut Context) {
    let reader = state.deref().reader.clone();
    let reader: JsNativeObject<crate::stream::readable::ReadableStreamDefaultReader> =
        match JsNativeObject::try_from(reader) {
            Ok(reader) => reader,
            Err(err) => {
                let reason = err.to_opaque(context);
                read_all_finish(state, Err(reason), context);
                return;
            }
        };
    let promise =
        match crate::stream::readable::ReadableStreamDefaultReader::read_impl(
            &reader, context,
        ) {
            Ok(promise) => promise,
            Err(err) => {
                let reason = err.to_opaque(context);
                read_all_finish(state, Err(reason), context);
                return;
            }
        };

    let on_chunk = callback(context, state.clone(), |_this, args, state, context| {
        let result = args.get_or_undefined(0);
        let Some(result) = result.as_object() else {
            return Ok(JsValue::undefined());
        };
        let done = result
            .get(boa_engine::js_string!("done"), context)?
            .to_boolean();
        let value = result.get(boa_engine::js_string!("value"), context)?;

        if done {
            let bytes = std::mem::take(&mut state.deref_mut().bytes);
            read_all_finish(state, Ok(bytes), context);
            return Ok(JsValue::undefined());
        }

        let chunk_bytes = if let Some(string) = value.as_string() {
            Ok(String::from_utf16_lossy(string.as_slice()).into_bytes())
        } else {
            JsBufferSource::try_from_js(&value, context)
                .and_then(|source| source.clone_data(context))
        };
        match chunk_bytes {
            Ok(mut chunk) => {
                state.deref_mut().bytes.append(&mut chunk);
                read_all_step(state, context);
            }
            Err(err) => {
                let reason = err.to_opaque(context);
                read_all_finish(state, Err(reason), context);
            }
        }
        Ok(JsValue::undefined())
    });
    let on_error = callback(context, state.clone(), |_this, args, state, context| {
        let reason = args.get_or_undefined(0).clone();
        read_all_finish(state, Err(reason), context);
        Ok(JsValue::undefined())
    });
    promise_then(&promise, Some(on_chunk), Some(on_error), context);
}

/// The `BodyInit` union.
///
/// https://fetch.spec.whatwg.org/#bodyinit-unions
pub enum BodyInit {
    Text(JsString),
    Bytes(Vec<u8>),
    Blob(Blob),
    FormData(FormData),
    UrlSearchParams(String),
    Stream(JsValue),
}

impl TryFromJs for BodyInit {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        if let Some(string) = value.as_string() {
            return Ok(Self::Text(string.clone()));
        }
        if JsNativeObject::<ReadableStream>::is(value) {
            return Ok(Self::Stream(value.clone()));
        }
        if let Some(obj) = value.as_object() {
            if let Some(form_data) = obj.downcast_ref::<FormData>() {
                return Ok(Self::FormData(form_data.clone()));
            }
            if let Some(params) = obj.downcast_ref::<UrlSearchParams>() {
                return Ok(Self::UrlSearchParams(params.serialize()));
            }
        }
        if let Ok(blob) = Blob::from_blob_like(value) {
            return Ok(Self::Blob(blob));
        }
        let source = JsBufferSource::try_from_js(value, context).map_err(|_| {
            JsNativeError::typ()
                .with_message("Body must be a string, BufferSource, Blob, FormData, URLSearchParams or ReadableStream")
        })?;
        Ok(Self::Bytes(source.clone_data(context)?))
    }
}

/// A body paired with the content type its shape implies.
///
/// https://fetch.spec.whatwg.org/#body-with-type
#[derive(Default)]
pub struct BodyWithType {
    pub body: Body,
    pub content_type: Option<String>,
}

impl BodyWithType {
    /// https://fetch.spec.whatwg.org/#concept-bodyinit-extract
    pub fn from_init(init: BodyInit) -> JsResult<Self> {
        Ok(match init {
            BodyInit::Text(string) => Self {
                body: Body::from_bytes(
                    String::from_utf16_lossy(string.as_slice()).into_bytes(),
                ),
                content_type: Some("text/plain;charset=UTF-8".into()),
            },
            BodyInit::Bytes(bytes) => Self {
                body: Body::from_bytes(bytes),
                content_type: None,
            },
            BodyInit::Blob(blob) => {
                let content_type = match blob.type_() {
                    type_ if type_.is_empty() => None,
                    type_ => Some(type_),
                };
                Self {
                    body: Body::from_blob(blob),
                    content_type,
                }
            }
            BodyInit::FormData(form_data) => {
                let (bytes, boundary) = form_data.encode_multipart();
                Self {
                    body: Body::from_bytes(bytes),
                    content_type: Some(format!(
                        "multipart/form-data; boundary={boundary}"
                    )),
                }
            }
            BodyInit::UrlSearchParams(query) => Self {
                body: Body::from_bytes(query.into_bytes()),
                content_type: Some(
                    "application/x-www-form-urlencoded;charset=UTF-8".into(),
                ),
            },
            BodyInit::Stream(stream) => Self {
                body: Body::from_stream(stream),
                content_type: None,
            },
        })
    }

    /// https://fetch.spec.whatwg.org/#dom-response-json
    pub fn json(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let json = value.to_json(context)?;
        Ok(Self {
            body: Body::from_bytes(json.to_string().into_bytes()),
            content_type: Some("application/json".into()),
        })
    }
}

impl TryFromJs for BodyWithType {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        if value.is_null_or_undefined() {
            return Ok(Self::default());
        }
        let init: BodyInit = value.try_js_into(context)?;

        BodyWithType::from_init(init)
    }
}
