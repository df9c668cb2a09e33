//! The `FileReader` API: an async reader state machine over blobs.
//!
//! States run `EMPTY → LOADING → DONE`; starting a read while one is loading
//! throws an `InvalidStateError`, `abort()` lands in DONE with a null result,
//! and `load` fires strictly before `loadend`. Reads happen off-thread and
//! re-enter through the event loop.
//!
//! More information:
//!  - [W3C `File` specification][spec]
//!
//! [spec]: https://w3c.github.io/FileAPI/#APIASynch

use boa_engine::{
    js_string, property::Attribute, Context, JsArgs, JsNativeError, JsResult,
    JsString, JsValue, NativeFunction,
};
use boa_gc::{custom_trace, Finalize, Trace};
use strand_core::{
    accessor,
    error::named_error,
    event_loop::with_event_loop,
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
};

use crate::{
    event::{dispatch_event, Event, EventClass, EventTarget, EventTargetMethods, EventTargeted},
    handles,
    idl::bytes_to_array_buffer,
};

use super::blob::Blob;

pub const EMPTY: u16 = 0;
pub const LOADING: u16 = 1;
pub const DONE: u16 = 2;

#[derive(Clone, Copy)]
enum ReadKind {
    Text,
    ArrayBuffer,
    DataUrl,
}

pub struct FileReader {
    ready_state: u16,
    result: JsValue,
    error: JsValue,
    target: EventTarget,
    onloadstart: JsValue,
    onprogress: JsValue,
    onload: JsValue,
    onloadend: JsValue,
    onerror: JsValue,
    onabort: JsValue,
    // Bumped by every read and abort; stale completions compare and bail.
    generation: u64,
}

impl Finalize for FileReader {}

unsafe impl Trace for FileReader {
    custom_trace!(this, {
        mark(&this.result);
        mark(&this.error);
        mark(&this.target);
        mark(&this.onloadstart);
        mark(&this.onprogress);
        mark(&this.onload);
        mark(&this.onloadend);
        mark(&this.onerror);
        mark(&this.onabort);
    });
}

impl EventTargeted for FileReader {
    fn event_target(&mut self) -> &mut EventTarget {
        &mut self.target
    }
}

impl FileReader {
    fn new() -> Self {
        Self {
            ready_state: EMPTY,
            result: JsValue::null(),
            error: JsValue::null(),
            target: EventTarget::new(),
            onloadstart: JsValue::null(),
            onprogress: JsValue::null(),
            onload: JsValue::null(),
            onloadend: JsValue::null(),
            onerror: JsValue::null(),
            onabort: JsValue::null(),
            generation: 0,
        }
    }

    pub fn try_from_js(
        value: &JsValue,
    ) -> JsResult<boa_gc::GcRefMut<'_, boa_engine::object::Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message(
                        "Failed to convert js value into rust type `FileReader`",
                    )
                    .into()
            })
    }

    fn handler_for(&self, event_type: &str) -> JsValue {
        match event_type {
            "loadstart" => self.onloadstart.clone(),
            "progress" => self.onprogress.clone(),
            "load" => self.onload.clone(),
            "loadend" => self.onloadend.clone(),
            "error" => self.onerror.clone(),
            "abort" => self.onabort.clone(),
            _ => JsValue::null(),
        }
    }
}

/// Fires a progress-flavoured event: the `on*` handler first, then the
/// listener list.
fn fire(
    reader: &JsNativeObject<FileReader>,
    event_type: &str,
    loaded: u64,
    total: u64,
    context: &mut Context,
) {
    let event = match JsNativeObject::new::<EventClass>(Event::new(event_type), context)
    {
        Ok(event) => event,
        Err(_) => return,
    };
    {
        let obj = event.object();
        let _ = obj.set(js_string!("loaded"), loaded, false, context);
        let _ = obj.set(js_string!("total"), total, false, context);
    }

    let handler = reader.deref().handler_for(event_type);
    if let Some(handler) = handler.as_callable() {
        if let Err(err) =
            handler.call(&reader.to_inner(), &[event.to_inner()], context)
        {
            strand_core::event_loop::report_error(&err);
        }
    }
    let _ = dispatch_event(reader, &event, context);
}

struct ReaderOp {
    reader: JsNativeObject<FileReader>,
    kind: ReadKind,
    generation: u64,
    total: u64,
    mime: String,
}

fn start_read(
    this: &JsValue,
    args: &[JsValue],
    kind: ReadKind,
    context: &mut Context,
) -> JsResult<JsValue> {
    let reader: JsNativeObject<FileReader> = JsNativeObject::try_from(this.clone())?;
    let blob = Blob::from_blob_like(args.get_or_undefined(0)).map_err(|_| {
        JsNativeError::typ().with_message("Expected a Blob or File argument")
    })?;

    let generation = {
        let mut inner = reader.deref_mut();
        if inner.ready_state == LOADING {
            return Err(named_error(
                "InvalidStateError",
                "The object is in the LOADING state",
                context,
            ));
        }
        inner.ready_state = LOADING;
        inner.result = JsValue::null();
        inner.error = JsValue::null();
        inner.generation += 1;
        inner.generation
    };

    let total = blob.size();

    // loadstart fires before the background read can possibly complete.
    fire(&reader, "loadstart", 0, total, context);
    if reader.deref().generation != generation {
        // a loadstart listener restarted or aborted the read
        return Ok(JsValue::undefined());
    }

    let op = handles::insert(ReaderOp {
        reader: reader.clone(),
        kind,
        generation,
        total,
        mime: blob.type_(),
    });
    let sendable = blob.sendable();

    with_event_loop(|event_loop| {
        let guard = event_loop.op_guard();
        let sender = event_loop.task_sender();
        event_loop.io().spawn(async move {
            let result = sendable.read_bytes();
            sender.post(move |context| {
                let Some(op) = handles::take::<ReaderOp>(op) else {
                    return;
                };
                if op.reader.deref().generation != op.generation
                    || op.reader.deref().ready_state != LOADING
                {
                    return;
                }
                match result {
                    Ok(bytes) => complete(&op, bytes, context),
                    Err(err) => fail(&op, &err.to_string(), context),
                }
            });
            drop(guard);
        });
    });

    Ok(JsValue::undefined())
}

fn complete(op: &ReaderOp, bytes: Vec<u8>, context: &mut Context) {
    let value: JsValue = match op.kind {
        ReadKind::Text => {
            JsString::from(String::from_utf8_lossy(&bytes).into_owned()).into()
        }
        ReadKind::ArrayBuffer => match bytes_to_array_buffer(bytes.clone(), context) {
            Ok(buffer) => buffer.into(),
            Err(err) => {
                fail(op, &format!("{err}"), context);
                return;
            }
        },
        ReadKind::DataUrl => {
            use base64::{engine::general_purpose::STANDARD, Engine};
            let mime = if op.mime.is_empty() {
                "application/octet-stream"
            } else {
                &op.mime
            };
            JsString::from(format!("data:{mime};base64,{}", STANDARD.encode(&bytes)))
                .into()
        }
    };

    {
        let mut inner = op.reader.deref_mut();
        inner.ready_state = DONE;
        inner.result = value;
    }
    fire(&op.reader, "progress", op.total, op.total, context);
    fire(&op.reader, "load", op.total, op.total, context);
    fire(&op.reader, "loadend", op.total, op.total, context);
}

fn fail(op: &ReaderOp, message: &str, context: &mut Context) {
    let error = named_error(
        "NotReadableError",
        &format!("Failed to read blob: {message}"),
        context,
    )
    .to_opaque(context);
    {
        let mut inner = op.reader.deref_mut();
        inner.ready_state = DONE;
        inner.result = JsValue::null();
        inner.error = error;
    }
    fire(&op.reader, "error", 0, op.total, context);
    fire(&op.reader, "loadend", 0, op.total, context);
}

pub struct FileReaderClass;

impl FileReaderClass {
    fn ready_state(context: &mut Context) -> Accessor {
        accessor!(
            context,
            FileReader,
            "readyState",
            get:((reader, _context) => Ok(reader.ready_state.into()))
        )
    }

    fn result(context: &mut Context) -> Accessor {
        accessor!(
            context,
            FileReader,
            "result",
            get:((reader, _context) => Ok(reader.result.clone()))
        )
    }

    fn error(context: &mut Context) -> Accessor {
        accessor!(
            context,
            FileReader,
            "error",
            get:((reader, _context) => Ok(reader.error.clone()))
        )
    }

    fn read_as_text(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        start_read(this, args, ReadKind::Text, context)
    }

    fn read_as_array_buffer(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        start_read(this, args, ReadKind::ArrayBuffer, context)
    }

    fn read_as_data_url(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        start_read(this, args, ReadKind::DataUrl, context)
    }

    /// `abort()` from any state lands in DONE with a null result, firing
    /// `abort` then `loadend`.
    fn abort(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let reader: JsNativeObject<FileReader> =
            JsNativeObject::try_from(this.clone())?;
        {
            let mut inner = reader.deref_mut();
            inner.generation += 1;
            inner.ready_state = DONE;
            inner.result = JsValue::null();
        }
        fire(&reader, "abort", 0, 0, context);
        fire(&reader, "loadend", 0, 0, context);
        Ok(JsValue::undefined())
    }
}

macro_rules! handler_accessor {
    ($fn_name:ident, $field:ident, $name:expr) => {
        fn $fn_name(context: &mut Context) -> Accessor {
            accessor!(
                context,
                FileReader,
                $name,
                get:((reader, _context) => Ok(reader.$field.clone())),
                set:((reader, value: JsValue, _context) => reader.$field = value)
            )
        }
    };
}

impl FileReaderClass {
    handler_accessor!(onloadstart, onloadstart, "onloadstart");
    handler_accessor!(onprogress, onprogress, "onprogress");
    handler_accessor!(onload, onload, "onload");
    handler_accessor!(onloadend, onloadend, "onloadend");
    handler_accessor!(onerror, onerror, "onerror");
    handler_accessor!(onabort, onabort, "onabort");
}

impl NativeClass for FileReaderClass {
    type Instance = FileReader;

    const NAME: &'static str = "FileReader";

    fn constructor(
        _this: &JsNativeObject<FileReader>,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<FileReader> {
        Ok(FileReader::new())
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let ready_state = Self::ready_state(class.context());
        let result = Self::result(class.context());
        let error = Self::error(class.context());
        let onloadstart = Self::onloadstart(class.context());
        let onprogress = Self::onprogress(class.context());
        let onload = Self::onload(class.context());
        let onloadend = Self::onloadend(class.context());
        let onerror = Self::onerror(class.context());
        let onabort = Self::onabort(class.context());

        class
            .accessor(js_string!("readyState"), ready_state, Attribute::all())
            .accessor(js_string!("result"), result, Attribute::all())
            .accessor(js_string!("error"), error, Attribute::all())
            .accessor(js_string!("onloadstart"), onloadstart, Attribute::all())
            .accessor(js_string!("onprogress"), onprogress, Attribute::all())
            .accessor(js_string!("onload"), onload, Attribute::all())
            .accessor(js_string!("onloadend"), onloadend, Attribute::all())
            .accessor(js_string!("onerror"), onerror, Attribute::all())
            .accessor(js_string!("onabort"), onabort, Attribute::all())
            .property(js_string!("EMPTY"), EMPTY, Attribute::all())
            .property(js_string!("LOADING"), LOADING, Attribute::all())
            .property(js_string!("DONE"), DONE, Attribute::all())
            .static_property(js_string!("EMPTY"), EMPTY, Attribute::all())
            .static_property(js_string!("LOADING"), LOADING, Attribute::all())
            .static_property(js_string!("DONE"), DONE, Attribute::all())
            .method(
                js_string!("readAsText"),
                1,
                NativeFunction::from_fn_ptr(Self::read_as_text),
            )
            .method(
                js_string!("readAsArrayBuffer"),
                1,
                NativeFunction::from_fn_ptr(Self::read_as_array_buffer),
            )
            .method(
                js_string!("readAsDataURL"),
                1,
                NativeFunction::from_fn_ptr(Self::read_as_data_url),
            )
            .method(
                js_string!("abort"),
                0,
                NativeFunction::from_fn_ptr(Self::abort),
            );
        EventTargetMethods::define::<FileReader>(class)?;
        Ok(())
    }
}

pub struct FileReaderApi;

impl strand_core::Api for FileReaderApi {
    fn init(self, context: &mut Context) {
        register_global_class::<FileReaderClass>(context)
            .expect("The `FileReader` class shouldn't exist yet");
    }
}
