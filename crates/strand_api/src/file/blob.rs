//! The `Blob` API: an immutable byte container.
//!
//! A blob's bytes live either in shared memory or behind a path reference
//! (for `File.fromPath`); `slice` adjusts an offset/length window over the
//! shared source, so it is O(1) either way.
//!
//! More information:
//!  - [W3C `File` specification][spec]
//!
//! [spec]: https://w3c.github.io/FileAPI/

use std::{path::PathBuf, rc::Rc};

use boa_engine::{
    js_string,
    object::{builtins::JsArray, Object},
    property::Attribute,
    value::TryFromJs,
    Context, JsArgs, JsError, JsNativeError, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{empty_trace, Finalize, GcRefMut, Trace};
use strand_core::{
    accessor,
    event_loop::with_event_loop,
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
    promise::Deferred,
    value::IntoJs,
};

use crate::{
    handles,
    idl::{bytes_to_array_buffer, BufferSource, JsBufferSource},
    stream::readable::{
        stream_of_controller, ReadableStream, UnderlyingSource,
    },
    stream::{callback, QueuingStrategy},
};

const STREAM_CHUNK_SIZE: u64 = 64 * 1024;

#[derive(Clone)]
pub enum BlobSource {
    Memory(Rc<Vec<u8>>),
    Path(PathBuf),
}

#[derive(Clone)]
pub struct Blob {
    source: BlobSource,
    offset: u64,
    size: u64,
    type_: String,
}

impl Finalize for Blob {}

unsafe impl Trace for Blob {
    empty_trace!();
}

fn normalize_type(t: &str) -> String {
    // Anything outside U+0020..U+007E empties the type; otherwise it is
    // lowercased.
    for c in t.chars() {
        match c {
            '\u{0020}'..='\u{007E}' => (),
            _ => return String::new(),
        }
    }
    t.to_ascii_lowercase()
}

/// https://w3c.github.io/FileAPI/#process-blob-parts
fn process_blob_parts(
    parts: BlobParts,
    context: &mut Context,
) -> JsResult<Vec<u8>> {
    let mut bytes: Vec<u8> = vec![];
    for part in parts.0 {
        match part {
            BlobPart::String(string) => {
                bytes.extend_from_slice(
                    String::from_utf16_lossy(string.as_slice()).as_bytes(),
                );
            }
            BlobPart::BufferSource(source) => {
                bytes.append(&mut source.clone_data(context)?);
            }
            BlobPart::Blob(blob) => {
                let mut blob_bytes = blob.read_bytes().map_err(|err| {
                    JsError::from_native(JsNativeError::error().with_message(
                        format!("Failed to read blob part: {err}"),
                    ))
                })?;
                bytes.append(&mut blob_bytes);
            }
        }
    }
    Ok(bytes)
}

impl Blob {
    pub fn from_bytes(bytes: Vec<u8>, type_: &str) -> Self {
        let size = bytes.len() as u64;
        Self {
            source: BlobSource::Memory(Rc::new(bytes)),
            offset: 0,
            size,
            type_: normalize_type(type_),
        }
    }

    pub fn from_path(path: PathBuf, size: u64, type_: &str) -> Self {
        Self {
            source: BlobSource::Path(path),
            offset: 0,
            size,
            type_: normalize_type(type_),
        }
    }

    /// https://w3c.github.io/FileAPI/#constructorBlob
    pub fn new(
        parts: Option<BlobParts>,
        options: Option<BlobPropertyBag>,
        context: &mut Context,
    ) -> JsResult<Self> {
        let bytes = match parts {
            None => vec![],
            Some(parts) => process_blob_parts(parts, context)?,
        };
        let type_ = options.and_then(|options| options.type_).unwrap_or_default();
        Ok(Self::from_bytes(bytes, &type_))
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn type_(&self) -> String {
        self.type_.clone()
    }

    pub fn is_path_backed(&self) -> bool {
        matches!(self.source, BlobSource::Path(_))
    }

    /// Materializes this blob's window of the byte source.
    pub fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        let start = self.offset as usize;
        let end = (self.offset + self.size) as usize;
        match &self.source {
            BlobSource::Memory(bytes) => {
                Ok(bytes.get(start..end).unwrap_or_default().to_vec())
            }
            BlobSource::Path(path) => {
                let bytes = std::fs::read(path)?;
                Ok(bytes.get(start..end).unwrap_or_default().to_vec())
            }
        }
    }

    /// https://w3c.github.io/FileAPI/#slice-blob
    pub fn slice(
        &self,
        start: Option<i64>,
        end: Option<i64>,
        content_type: Option<String>,
    ) -> Blob {
        let original_size = self.size as i64;
        let relative_start = start.map_or(0, |start| {
            if start < 0 {
                (original_size + start).max(0)
            } else {
                start.min(original_size)
            }
        });
        let relative_end = end.map_or(original_size, |end| {
            if end < 0 {
                (original_size + end).max(0)
            } else {
                end.min(original_size)
            }
        });
        let span = (relative_end - relative_start).max(0) as u64;
        let type_ = content_type
            .map(|content_type| normalize_type(&content_type))
            .unwrap_or_default();
        Blob {
            source: self.source.clone(),
            offset: self.offset + relative_start as u64,
            size: span,
            type_,
        }
    }

    /// Resolves with the blob's bytes: immediately for in-memory sources,
    /// after a background read for path-backed ones.
    fn bytes_async(
        &self,
        context: &mut Context,
        finish: fn(Vec<u8>, &mut Context) -> JsResult<JsValue>,
    ) -> JsResult<JsValue> {
        match &self.source {
            BlobSource::Memory(_) => {
                let bytes = self.read_bytes().unwrap_or_default();
                let value = finish(bytes, context)?;
                Ok(boa_engine::object::builtins::JsPromise::resolve(value, context)?
                    .into())
            }
            BlobSource::Path(_) => {
                let deferred = Deferred::new(context)?;
                let promise = deferred.to_value();
                let handle = handles::insert((deferred, finish));
                let blob = self.clone_source_window();
                with_event_loop(|event_loop| {
                    let guard = event_loop.op_guard();
                    let sender = event_loop.task_sender();
                    event_loop.io().spawn(async move {
                        let result = blob.read_bytes();
                        sender.post(move |context| {
                            let Some((deferred, finish)) = handles::take::<(
                                Deferred,
                                fn(Vec<u8>, &mut Context) -> JsResult<JsValue>,
                            )>(handle) else {
                                return;
                            };
                            match result {
                                Ok(bytes) => match finish(bytes, context) {
                                    Ok(value) => deferred.resolve(&value, context),
                                    Err(err) => deferred.reject_with(&err, context),
                                },
                                Err(err) => {
                                    let error = strand_core::error::named_error(
                                        "NotReadableError",
                                        &format!("Failed to read file: {err}"),
                                        context,
                                    );
                                    deferred.reject_with(&error, context);
                                }
                            }
                        });
                        drop(guard);
                    });
                });
                Ok(promise)
            }
        }
    }

    /// A clone that is safe to move to another thread: memory windows are
    /// copied, path-backed windows carry the path.
    pub(crate) fn sendable(&self) -> SendableBlob {
        self.clone_source_window()
    }

    fn clone_source_window(&self) -> SendableBlob {
        SendableBlob {
            source: match &self.source {
                BlobSource::Memory(bytes) => SendableSource::Memory(bytes.to_vec()),
                BlobSource::Path(path) => SendableSource::Path(path.clone()),
            },
            offset: self.offset,
            size: self.size,
        }
    }

    pub fn text(&self, context: &mut Context) -> JsResult<JsValue> {
        self.bytes_async(context, |bytes, _context| {
            Ok(JsString::from(String::from_utf8_lossy(&bytes).into_owned()).into())
        })
    }

    pub fn array_buffer(&self, context: &mut Context) -> JsResult<JsValue> {
        self.bytes_async(context, |bytes, context| {
            Ok(bytes_to_array_buffer(bytes, context)?.into())
        })
    }

    /// `blob.stream()`: a ReadableStream delivering the bytes in chunks.
    pub fn stream(&self, context: &mut Context) -> JsResult<JsValue> {
        let state = handles::insert(BlobStreamState {
            blob: self.clone_source_window(),
            cursor: 0,
        });

        let pull = callback(
            context,
            JsValue::from(state as f64),
            |_this, args, state_handle, context| {
                let handle = state_handle
                    .as_number()
                    .map(|id| id as handles::HandleId)
                    .unwrap_or_default();
                let controller = args.get_or_undefined(0);
                let stream = stream_of_controller(controller)?;

                let chunk = handles::with(handle, |state: &mut BlobStreamState| {
                    let chunk = state
                        .blob
                        .read_range_local(state.cursor, STREAM_CHUNK_SIZE);
                    if let Ok(chunk) = &chunk {
                        state.cursor += chunk.len() as u64;
                    }
                    chunk
                });

                match chunk {
                    Some(Ok(chunk)) if chunk.is_empty() => {
                        handles::remove(handle);
                        let _ = ReadableStream::request_close(&stream, context);
                    }
                    Some(Ok(chunk)) => {
                        let view = crate::idl::bytes_to_uint8_array(chunk, context)?;
                        ReadableStream::enqueue(&stream, &view.into(), context)?;
                    }
                    Some(Err(err)) => {
                        handles::remove(handle);
                        let reason = strand_core::error::named_error(
                            "NotReadableError",
                            &format!("Failed to read blob: {err}"),
                            context,
                        )
                        .to_opaque(context);
                        ReadableStream::error(&stream, &reason, context);
                    }
                    None => {
                        let _ = ReadableStream::request_close(&stream, context);
                    }
                }
                Ok(JsValue::undefined())
            },
        );

        let cancel = callback(
            context,
            JsValue::from(state as f64),
            |_this, _args, state_handle, _context| {
                if let Some(id) = state_handle.as_number() {
                    handles::remove(id as handles::HandleId);
                }
                Ok(JsValue::undefined())
            },
        );

        let stream = ReadableStream::create(
            UnderlyingSource::native(Some(pull), Some(cancel)),
            &QueuingStrategy::default(),
            context,
        )?;
        Ok(stream.to_inner())
    }

    /// The `data:` URL form used by `FileReader.readAsDataURL`.
    pub fn to_data_url(&self, bytes: &[u8]) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let mime = if self.type_.is_empty() {
            "application/octet-stream"
        } else {
            &self.type_
        };
        format!("data:{mime};base64,{}", STANDARD.encode(bytes))
    }
}

/// A blob window that can cross to the I/O threads.
pub(crate) struct SendableBlob {
    source: SendableSource,
    offset: u64,
    size: u64,
}

enum SendableSource {
    Memory(Vec<u8>),
    Path(PathBuf),
}

impl SendableBlob {
    pub(crate) fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        self.read_range_local(0, self.size)
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    fn read_range_local(&self, from: u64, len: u64) -> std::io::Result<Vec<u8>> {
        let start = self.offset + from.min(self.size);
        let end = (start + len).min(self.offset + self.size);
        match &self.source {
            SendableSource::Memory(bytes) => Ok(bytes
                .get(start as usize..end as usize)
                .unwrap_or_default()
                .to_vec()),
            SendableSource::Path(path) => {
                use std::io::{Read, Seek, SeekFrom};
                let mut file = std::fs::File::open(path)?;
                file.seek(SeekFrom::Start(start))?;
                let mut buffer = vec![0u8; (end - start) as usize];
                let read = file.read(&mut buffer)?;
                buffer.truncate(read);
                Ok(buffer)
            }
        }
    }
}

struct BlobStreamState {
    blob: SendableBlob,
    cursor: u64,
}

impl Blob {
    pub fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message("Failed to convert js value into rust type `Blob`")
                    .into()
            })
    }

    /// Accepts a `Blob` or a `File` and yields the underlying blob.
    pub fn from_blob_like(value: &JsValue) -> JsResult<Blob> {
        if let Ok(blob) = Blob::try_from_js(value) {
            return Ok(blob.clone());
        }
        let file = super::file::File::try_from_js(value)?;
        Ok(file.blob().clone())
    }
}

pub enum BlobPart {
    BufferSource(JsBufferSource),
    Blob(Blob),
    String(JsString),
}

impl TryFromJs for BlobPart {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        if value.is_string() {
            let string: String = value.try_js_into(context)?;
            return Ok(Self::String(JsString::from(string)));
        }
        if let Ok(blob) = Blob::from_blob_like(value) {
            return Ok(Self::Blob(blob));
        }
        Ok(Self::BufferSource(JsBufferSource::try_from_js(
            value, context,
        )?))
    }
}

pub struct BlobParts(Vec<BlobPart>);

impl TryFromJs for BlobParts {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let mut vec: Vec<BlobPart> = vec![];

        if value.is_object() {
            let obj = value.as_object().expect("checked above");
            let arr = JsArray::from_object(obj.clone())?;
            for i in 0..arr.length(context)? {
                let blob_part: BlobPart = arr.get(i, context)?.try_js_into(context)?;
                vec.push(blob_part)
            }
        }

        Ok(Self(vec))
    }
}

#[derive(Default, Clone)]
pub struct BlobPropertyBag {
    type_: Option<String>,
}

impl BlobPropertyBag {
    pub fn type_(&self) -> Option<&str> {
        self.type_.as_deref()
    }
}

impl TryFromJs for BlobPropertyBag {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let obj = value.as_object().ok_or_else(|| {
            JsError::from_native(JsNativeError::typ().with_message("Expected object"))
        })?;

        let type_: Option<String> = if obj.has_property(js_string!("type"), context)? {
            Some(String::try_from_js(
                &obj.get(js_string!("type"), context)?,
                context,
            )?)
        } else {
            None
        };

        Ok(Self { type_ })
    }
}

pub struct BlobClass;

impl BlobClass {
    fn size(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Blob,
            "size",
            get:((blob, _context) => Ok(blob.size().into()))
        )
    }

    fn type_(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Blob,
            "type",
            get:((blob, context) => Ok(blob.type_().into_js(context)))
        )
    }

    fn text(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let blob = Blob::try_from_js(this)?.clone();
        blob.text(context)
    }

    fn array_buffer(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let blob = Blob::try_from_js(this)?.clone();
        blob.array_buffer(context)
    }

    fn stream(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let blob = Blob::try_from_js(this)?.clone();
        blob.stream(context)
    }

    fn slice(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let blob = Blob::try_from_js(this)?;
        let start: Option<i64> = args.get_or_undefined(0).try_js_into(context)?;
        let end: Option<i64> = args.get_or_undefined(1).try_js_into(context)?;
        let content_type: Option<String> =
            args.get_or_undefined(2).try_js_into(context)?;
        let blob = blob.slice(start, end, content_type);
        let blob = JsNativeObject::new::<BlobClass>(blob, context)?;

        Ok(blob.to_inner())
    }
}

impl NativeClass for BlobClass {
    type Instance = Blob;

    const NAME: &'static str = "Blob";

    fn constructor(
        _this: &JsNativeObject<Blob>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<Blob> {
        let parts: Option<BlobParts> = args.get_or_undefined(0).try_js_into(context)?;
        let options: Option<BlobPropertyBag> =
            args.get_or_undefined(1).try_js_into(context)?;

        Blob::new(parts, options, context)
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let size = Self::size(class.context());
        let type_ = Self::type_(class.context());

        class
            .accessor(js_string!("size"), size, Attribute::all())
            .accessor(js_string!("type"), type_, Attribute::all())
            .method(
                js_string!("text"),
                0,
                NativeFunction::from_fn_ptr(Self::text),
            )
            .method(
                js_string!("arrayBuffer"),
                0,
                NativeFunction::from_fn_ptr(Self::array_buffer),
            )
            .method(
                js_string!("stream"),
                0,
                NativeFunction::from_fn_ptr(Self::stream),
            )
            .method(
                js_string!("slice"),
                0,
                NativeFunction::from_fn_ptr(Self::slice),
            );

        Ok(())
    }
}

pub struct BlobApi;

impl strand_core::Api for BlobApi {
    fn init(self, context: &mut Context) {
        register_global_class::<BlobClass>(context)
            .expect("The `Blob` class shouldn't exist yet")
    }
}

#[cfg(test)]
mod test {
    use super::Blob;

    #[test]
    fn slice_is_a_window_over_the_source() {
        let blob = Blob::from_bytes(b"Hello World".to_vec(), "text/plain");
        let sliced = blob.slice(Some(6), Some(11), None);
        assert_eq!(sliced.size(), 5);
        assert_eq!(sliced.read_bytes().unwrap(), b"World");

        let negative = blob.slice(Some(-5), None, Some("TEXT/PLAIN".into()));
        assert_eq!(negative.read_bytes().unwrap(), b"World");
        assert_eq!(negative.type_(), "text/plain");
    }

    #[test]
    fn out_of_range_slice_is_empty() {
        let blob = Blob::from_bytes(b"abc".to_vec(), "");
        let sliced = blob.slice(Some(10), Some(20), None);
        assert_eq!(sliced.size(), 0);
        assert!(sliced.read_bytes().unwrap().is_empty());
    }
}
