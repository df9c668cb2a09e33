//! `WritableStream`, its controller and default writer.
//!
//! Writes are serialized: the sink's `write` is not invoked for the next
//! chunk until the promise returned for the previous one settles.
//! Backpressure surfaces through the writer's `ready` promise, which is
//! pending exactly while `desiredSize <= 0`.
//!
//! More information:
//!  - [WHATWG Streams specification][spec]
//!
//! [spec]: https://streams.spec.whatwg.org/#ws-model

use std::collections::VecDeque;

use boa_engine::{
    js_string,
    object::{
        builtins::{JsFunction, JsPromise},
        JsObject,
    },
    property::Attribute,
    Context, JsArgs, JsError, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{custom_trace, Finalize, Trace};
use strand_core::{
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
    promise::Deferred,
};

use super::{
    callback, promise_resolved_with, promise_then, readable::callable_prop,
    QueuingStrategy,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WritableState {
    Writable,
    Erroring,
    Errored,
    Closed,
}

pub struct UnderlyingSink {
    this: JsValue,
    start: Option<JsFunction>,
    write: Option<JsFunction>,
    close: Option<JsFunction>,
    abort: Option<JsFunction>,
}

impl UnderlyingSink {
    pub fn empty() -> Self {
        Self {
            this: JsValue::undefined(),
            start: None,
            write: None,
            close: None,
            abort: None,
        }
    }

    /// A host-backed sink built from native callables.
    pub fn native(
        write: Option<JsFunction>,
        close: Option<JsFunction>,
        abort: Option<JsFunction>,
    ) -> Self {
        Self {
            this: JsValue::undefined(),
            start: None,
            write,
            close,
            abort,
        }
    }

    pub fn from_object(sink: &JsObject, context: &mut Context) -> JsResult<Self> {
        Ok(Self {
            this: sink.clone().into(),
            start: callable_prop(sink, "start", context)?,
            write: callable_prop(sink, "write", context)?,
            close: callable_prop(sink, "close", context)?,
            abort: callable_prop(sink, "abort", context)?,
        })
    }
}

struct PendingWrite {
    chunk: JsValue,
    size: f64,
    deferred: Deferred,
}

struct WriterState {
    ready: Deferred,
    ready_pending: bool,
    closed: Deferred,
}

pub struct WritableStream {
    state: WritableState,
    stored_error: JsValue,
    sink: UnderlyingSink,
    queue: VecDeque<PendingWrite>,
    queue_total_size: f64,
    high_water_mark: f64,
    size_fn: Option<JsFunction>,
    started: bool,
    in_flight: bool,
    close_requested: bool,
    close_deferred: Option<Deferred>,
    writer: Option<WriterState>,
    controller: JsValue,
}

impl Finalize for WritableStream {}

unsafe impl Trace for WritableStream {
    custom_trace!(this, {
        mark(&this.stored_error);
        mark(&this.sink.this);
        if let Some(start) = &this.sink.start {
            mark(start);
        }
        if let Some(write) = &this.sink.write {
            mark(write);
        }
        if let Some(close) = &this.sink.close {
            mark(close);
        }
        if let Some(abort) = &this.sink.abort {
            mark(abort);
        }
        for pending in &this.queue {
            mark(&pending.chunk);
            mark(&pending.deferred);
        }
        if let Some(size) = &this.size_fn {
            mark(size);
        }
        if let Some(close) = &this.close_deferred {
            mark(close);
        }
        if let Some(writer) = &this.writer {
            mark(&writer.ready);
            mark(&writer.closed);
        }
        mark(&this.controller);
    });
}

impl WritableStream {
    pub fn locked(&self) -> bool {
        self.writer.is_some()
    }

    pub fn state(&self) -> WritableState {
        self.state
    }

    pub fn stored_error(&self) -> JsValue {
        self.stored_error.clone()
    }

    pub fn desired_size(&self) -> Option<f64> {
        match self.state {
            WritableState::Errored | WritableState::Erroring => None,
            WritableState::Closed => Some(0.0),
            WritableState::Writable => {
                Some(self.high_water_mark - self.queue_total_size)
            }
        }
    }

    pub fn create(
        sink: UnderlyingSink,
        strategy: &QueuingStrategy,
        context: &mut Context,
    ) -> JsResult<JsNativeObject<WritableStream>> {
        let stream = WritableStream {
            state: WritableState::Writable,
            stored_error: JsValue::undefined(),
            sink,
            queue: VecDeque::new(),
            queue_total_size: 0.0,
            high_water_mark: strategy.extract_high_water_mark(1.0),
            size_fn: strategy.size.clone(),
            started: false,
            in_flight: false,
            close_requested: false,
            close_deferred: None,
            writer: None,
            controller: JsValue::undefined(),
        };
        let stream = JsNativeObject::new::<WritableStreamClass>(stream, context)?;
        Self::attach_controller_and_start(&stream, context)?;
        Ok(stream)
    }

    pub(crate) fn attach_controller_and_start(
        stream: &JsNativeObject<WritableStream>,
        context: &mut Context,
    ) -> JsResult<()> {
        let controller = JsNativeObject::new::<WritableStreamDefaultControllerClass>(
            WritableStreamDefaultController {
                stream: stream.to_inner(),
            },
            context,
        )?;
        stream.deref_mut().controller = controller.to_inner();

        let (start, this) = {
            let inner = stream.deref();
            (inner.sink.start.clone(), inner.sink.this.clone())
        };

        match start {
            Some(start) => {
                let result = start.call(&this, &[controller.to_inner()], context)?;
                let promise = promise_resolved_with(&result, context)?;
                let on_started = callback(
                    context,
                    stream.clone(),
                    |_this, _args, stream, context| {
                        stream.deref_mut().started = true;
                        WritableStream::advance_queue(stream, context);
                        Ok(JsValue::undefined())
                    },
                );
                let on_start_failed = callback(
                    context,
                    stream.clone(),
                    |_this, args, stream, context| {
                        let reason = args.get_or_undefined(0).clone();
                        WritableStream::error(stream, &reason, context);
                        Ok(JsValue::undefined())
                    },
                );
                promise_then(&promise, Some(on_started), Some(on_start_failed), context);
            }
            None => {
                stream.deref_mut().started = true;
                Self::advance_queue(stream, context);
            }
        }
        Ok(())
    }

    fn chunk_size(
        stream: &JsNativeObject<WritableStream>,
        chunk: &JsValue,
        context: &mut Context,
    ) -> JsResult<f64> {
        let size_fn = stream.deref().size_fn.clone();
        let Some(size_fn) = size_fn else {
            return Ok(1.0);
        };
        match size_fn
            .call(&JsValue::undefined(), &[chunk.clone()], context)
            .and_then(|size| size.to_number(context))
        {
            Ok(size) => Ok(size),
            Err(err) => {
                let reason = err.to_opaque(context);
                Self::error(stream, &reason, context);
                Err(JsError::from_opaque(reason))
            }
        }
    }

    /// Queues a chunk; the promise settles when the sink's `write` for that
    /// chunk does.
    pub(crate) fn write(
        stream: &JsNativeObject<WritableStream>,
        chunk: &JsValue,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        let state = stream.deref().state;
        match state {
            WritableState::Writable => {}
            WritableState::Closed => {
                return JsPromise::reject(
                    JsNativeError::typ()
                        .with_message("Cannot write to a closed stream"),
                    context,
                );
            }
            WritableState::Erroring | WritableState::Errored => {
                let reason = stream.deref().stored_error.clone();
                return JsPromise::reject(JsError::from_opaque(reason), context);
            }
        }
        if stream.deref().close_requested {
            return JsPromise::reject(
                JsNativeError::typ().with_message("Cannot write to a closing stream"),
                context,
            );
        }

        let size = Self::chunk_size(stream, chunk, context)?;
        let deferred = Deferred::new(context)?;
        {
            let mut inner = stream.deref_mut();
            inner.queue.push_back(PendingWrite {
                chunk: chunk.clone(),
                size,
                deferred: deferred.clone(),
            });
            inner.queue_total_size += size;
        }
        Self::update_backpressure(stream, context);
        Self::advance_queue(stream, context);
        Ok(deferred.promise().clone())
    }

    /// Flushes the queue, then runs the sink's `close`.
    pub(crate) fn close(
        stream: &JsNativeObject<WritableStream>,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        {
            let inner = stream.deref();
            if inner.close_requested || inner.state == WritableState::Closed {
                return JsPromise::reject(
                    JsNativeError::typ()
                        .with_message("Cannot close an already-closing stream"),
                    context,
                );
            }
            if matches!(
                inner.state,
                WritableState::Errored | WritableState::Erroring
            ) {
                let reason = inner.stored_error.clone();
                return JsPromise::reject(JsError::from_opaque(reason), context);
            }
        }
        let deferred = Deferred::new(context)?;
        {
            let mut inner = stream.deref_mut();
            inner.close_requested = true;
            inner.close_deferred = Some(deferred.clone());
        }
        Self::advance_queue(stream, context);
        Ok(deferred.promise().clone())
    }

    /// Errors the stream and runs the sink's `abort`; every queued write
    /// rejects with `reason`.
    pub(crate) fn abort(
        stream: &JsNativeObject<WritableStream>,
        reason: &JsValue,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        if matches!(
            stream.deref().state,
            WritableState::Errored | WritableState::Closed
        ) {
            return JsPromise::resolve(JsValue::undefined(), context);
        }

        let abort_hook = {
            let inner = stream.deref();
            inner
                .sink
                .abort
                .clone()
                .map(|abort| (abort, inner.sink.this.clone()))
        };
        Self::error(stream, reason, context);

        match abort_hook {
            Some((abort, this)) => {
                let result = abort.call(&this, &[reason.clone()], context)?;
                let promise = promise_resolved_with(&result, context)?;
                let on_done = callback(
                    context,
                    JsValue::undefined(),
                    |_this, _args, _captures, _context| Ok(JsValue::undefined()),
                );
                promise.then(Some(on_done), None, context)
            }
            None => JsPromise::resolve(JsValue::undefined(), context),
        }
    }

    /// Serialized sink dispatch: runs the next queued write (or the pending
    /// close) when none is in flight.
    fn advance_queue(stream: &JsNativeObject<WritableStream>, context: &mut Context) {
        enum Job {
            Write(PendingWrite),
            Close(Option<Deferred>),
            Wait,
        }

        let job = {
            let mut inner = stream.deref_mut();
            if !inner.started
                || inner.in_flight
                || inner.state != WritableState::Writable
            {
                Job::Wait
            } else if let Some(pending) = inner.queue.pop_front() {
                inner.in_flight = true;
                Job::Write(pending)
            } else if inner.close_requested {
                inner.in_flight = true;
                Job::Close(inner.close_deferred.clone())
            } else {
                Job::Wait
            }
        };

        match job {
            Job::Wait => {}
            Job::Write(pending) => Self::run_write(stream, pending, context),
            Job::Close(deferred) => Self::run_close(stream, deferred, context),
        }
    }

    fn run_write(
        stream: &JsNativeObject<WritableStream>,
        pending: PendingWrite,
        context: &mut Context,
    ) {
        let (write, this, controller) = {
            let inner = stream.deref();
            (
                inner.sink.write.clone(),
                inner.sink.this.clone(),
                inner.controller.clone(),
            )
        };

        let promise = match write {
            Some(write) => write
                .call(&this, &[pending.chunk.clone(), controller], context)
                .and_then(|result| promise_resolved_with(&result, context)),
            None => JsPromise::resolve(JsValue::undefined(), context),
        };
        let promise = match promise {
            Ok(promise) => promise,
            Err(err) => {
                let reason = err.to_opaque(context);
                stream.deref_mut().in_flight = false;
                pending.deferred.reject(&reason, context);
                Self::error(stream, &reason, context);
                return;
            }
        };

        let on_written = callback(
            context,
            (stream.clone(), pending.deferred.clone(), pending.size),
            |_this, _args, (stream, deferred, size), context| {
                {
                    let mut inner = stream.deref_mut();
                    inner.in_flight = false;
                    inner.queue_total_size -= *size;
                }
                deferred.resolve(&JsValue::undefined(), context);
                WritableStream::update_backpressure(stream, context);
                WritableStream::advance_queue(stream, context);
                Ok(JsValue::undefined())
            },
        );
        let on_write_failed = callback(
            context,
            (stream.clone(), pending.deferred.clone()),
            |_this, args, (stream, deferred), context| {
                stream.deref_mut().in_flight = false;
                let reason = args.get_or_undefined(0).clone();
                deferred.reject(&reason, context);
                WritableStream::error(stream, &reason, context);
                Ok(JsValue::undefined())
            },
        );
        promise_then(&promise, Some(on_written), Some(on_write_failed), context);
    }

    fn run_close(
        stream: &JsNativeObject<WritableStream>,
        deferred: Option<Deferred>,
        context: &mut Context,
    ) {
        let (close, this) = {
            let inner = stream.deref();
            (inner.sink.close.clone(), inner.sink.this.clone())
        };

        let promise = match close {
            Some(close) => close
                .call(&this, &[], context)
                .and_then(|result| promise_resolved_with(&result, context)),
            None => JsPromise::resolve(JsValue::undefined(), context),
        };
        let promise = match promise {
            Ok(promise) => promise,
            Err(err) => {
                let reason = err.to_opaque(context);
                stream.deref_mut().in_flight = false;
                if let Some(deferred) = &deferred {
                    deferred.reject(&reason, context);
                }
                Self::error(stream, &reason, context);
                return;
            }
        };

        let on_closed = callback(
            context,
            (stream.clone(), deferred.clone()),
            |_this, _args, (stream, deferred), context| {
                let closed = {
                    let mut inner = stream.deref_mut();
                    inner.in_flight = false;
                    if inner.state != WritableState::Writable {
                        return Ok(JsValue::undefined());
                    }
                    inner.state = WritableState::Closed;
                    inner.writer.as_ref().map(|writer| writer.closed.clone())
                };
                if let Some(deferred) = deferred {
                    deferred.resolve(&JsValue::undefined(), context);
                }
                if let Some(closed) = closed {
                    closed.resolve(&JsValue::undefined(), context);
                }
                Ok(JsValue::undefined())
            },
        );
        let on_close_failed = callback(
            context,
            (stream.clone(), deferred),
            |_this, args, (stream, deferred), context| {
                stream.deref_mut().in_flight = false;
                let reason = args.get_or_undefined(0).clone();
                if let Some(deferred) = deferred {
                    deferred.reject(&reason, context);
                }
                WritableStream::error(stream, &reason, context);
                Ok(JsValue::undefined())
            },
        );
        promise_then(&promise, Some(on_closed), Some(on_close_failed), context);
    }

    /// Transitions to errored, flushing the queue and settling the writer's
    /// promises with `reason`.
    pub(crate) fn error(
        stream: &JsNativeObject<WritableStream>,
        reason: &JsValue,
        context: &mut Context,
    ) {
        let (queued, close_deferred, writer_promises) = {
            let mut inner = stream.deref_mut();
            if matches!(
                inner.state,
                WritableState::Errored | WritableState::Closed
            ) {
                return;
            }
            inner.state = WritableState::Errored;
            inner.stored_error = reason.clone();
            inner.queue_total_size = 0.0;
            let queued: Vec<PendingWrite> = inner.queue.drain(..).collect();
            let close_deferred = inner.close_deferred.take();
            let writer_promises = inner.writer.as_mut().map(|writer| {
                writer.ready_pending = false;
                (writer.ready.clone(), writer.closed.clone())
            });
            (queued, close_deferred, writer_promises)
        };

        for pending in queued {
            pending.deferred.reject(reason, context);
        }
        if let Some(deferred) = close_deferred {
            deferred.reject(reason, context);
        }
        if let Some((ready, closed)) = writer_promises {
            ready.reject(reason, context);
            closed.reject(reason, context);
        }
    }

    /// Keeps the writer's `ready` promise in step with `desiredSize`.
    fn update_backpressure(
        stream: &JsNativeObject<WritableStream>,
        context: &mut Context,
    ) {
        let action = {
            let mut inner = stream.deref_mut();
            let desired = inner.desired_size();
            let Some(writer) = inner.writer.as_mut() else {
                return;
            };
            match desired {
                Some(size) if size <= 0.0 && !writer.ready_pending => {
                    writer.ready_pending = true;
                    None
                }
                Some(size) if size > 0.0 && writer.ready_pending => {
                    writer.ready_pending = false;
                    Some(writer.ready.clone())
                }
                _ => return,
            }
        };
        match action {
            // backpressure released: settle the old promise and refresh
            Some(ready) => {
                ready.resolve(&JsValue::undefined(), context);
            }
            // backpressure applied: swap in a fresh pending promise
            None => {
                if let Ok(fresh) = Deferred::new(context) {
                    if let Some(writer) = stream.deref_mut().writer.as_mut() {
                        writer.ready = fresh;
                    }
                }
            }
        }
    }

    pub fn acquire_writer(
        stream: &JsNativeObject<WritableStream>,
        context: &mut Context,
    ) -> JsResult<JsNativeObject<WritableStreamDefaultWriter>> {
        let ready = Deferred::new(context)?;
        let closed = Deferred::new(context)?;
        {
            let mut inner = stream.deref_mut();
            if inner.locked() {
                return Err(JsNativeError::typ()
                    .with_message("WritableStream is already locked to a writer")
                    .into());
            }
            let backpressure = inner.desired_size().is_some_and(|size| size <= 0.0);
            inner.writer = Some(WriterState {
                ready: ready.clone(),
                ready_pending: backpressure,
                closed: closed.clone(),
            });
        }
        let state = stream.deref().state;
        match state {
            WritableState::Writable => {
                let backpressure = stream
                    .deref()
                    .desired_size()
                    .is_some_and(|size| size <= 0.0);
                if !backpressure {
                    ready.resolve(&JsValue::undefined(), context);
                }
            }
            WritableState::Erroring | WritableState::Errored => {
                let reason = stream.deref().stored_error.clone();
                ready.reject(&reason, context);
                closed.reject(&reason, context);
            }
            WritableState::Closed => {
                ready.resolve(&JsValue::undefined(), context);
                closed.resolve(&JsValue::undefined(), context);
            }
        }
        JsNativeObject::new::<WritableStreamDefaultWriterClass>(
            WritableStreamDefaultWriter {
                stream: stream.to_inner(),
            },
            context,
        )
    }

    pub(crate) fn release_writer(
        stream: &JsNativeObject<WritableStream>,
        context: &mut Context,
    ) -> JsResult<()> {
        let writer = stream.deref_mut().writer.take();
        if let Some(writer) = writer {
            let reason = JsNativeError::typ()
                .with_message("Writer was released")
                .to_opaque(context);
            let reason = JsValue::from(reason);
            if stream.deref().state == WritableState::Writable {
                if writer.ready_pending {
                    writer.ready.reject(&reason, context);
                }
                writer.closed.reject(&reason, context);
            }
        }
        Ok(())
    }
}

/// Minimal controller passed to the sink's `write`: enough to error the
/// stream from inside a write.
pub struct WritableStreamDefaultController {
    stream: JsValue,
}

impl Finalize for WritableStreamDefaultController {}

unsafe impl Trace for WritableStreamDefaultController {
    custom_trace!(this, {
        mark(&this.stream);
    });
}

pub struct WritableStreamDefaultControllerClass;

impl WritableStreamDefaultControllerClass {
    fn error(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let controller: JsNativeObject<WritableStreamDefaultController> =
            JsNativeObject::try_from(this.clone())?;
        let stream: JsNativeObject<WritableStream> =
            JsNativeObject::try_from(controller.deref().stream.clone())?;
        WritableStream::error(&stream, args.get_or_undefined(0), context);
        Ok(JsValue::undefined())
    }
}

impl NativeClass for WritableStreamDefaultControllerClass {
    type Instance = WritableStreamDefaultController;

    const NAME: &'static str = "WritableStreamDefaultController";

    fn constructor(
        _this: &JsNativeObject<WritableStreamDefaultController>,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<WritableStreamDefaultController> {
        Err(JsNativeError::typ()
            .with_message("Illegal constructor")
            .into())
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        class.method(
            js_string!("error"),
            1,
            NativeFunction::from_fn_ptr(Self::error),
        );
        Ok(())
    }
}

pub struct WritableStreamDefaultWriter {
    stream: JsValue,
}

impl Finalize for WritableStreamDefaultWriter {}

unsafe impl Trace for WritableStreamDefaultWriter {
    custom_trace!(this, {
        mark(&this.stream);
    });
}

impl WritableStreamDefaultWriter {
    fn stream(&self) -> JsResult<JsNativeObject<WritableStream>> {
        if self.stream.is_undefined() {
            return Err(JsNativeError::typ()
                .with_message("Writer has been released")
                .into());
        }
        JsNativeObject::try_from(self.stream.clone())
    }

    pub(crate) fn write_impl(
        writer: &JsNativeObject<WritableStreamDefaultWriter>,
        chunk: &JsValue,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        let stream = writer.deref().stream()?;
        WritableStream::write(&stream, chunk, context)
    }

    pub(crate) fn ready_impl(
        writer: &JsNativeObject<WritableStreamDefaultWriter>,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        let stream = writer.deref().stream()?;
        let ready = stream
            .deref()
            .writer
            .as_ref()
            .map(|state| state.ready.clone());
        match ready {
            Some(ready) => Ok(ready.promise().clone()),
            None => JsPromise::reject(
                JsNativeError::typ().with_message("Writer has been released"),
                context,
            ),
        }
    }

    pub(crate) fn closed_impl(
        writer: &JsNativeObject<WritableStreamDefaultWriter>,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        let stream = writer.deref().stream()?;
        let closed = stream
            .deref()
            .writer
            .as_ref()
            .map(|state| state.closed.clone());
        match closed {
            Some(closed) => Ok(closed.promise().clone()),
            None => JsPromise::reject(
                JsNativeError::typ().with_message("Writer has been released"),
                context,
            ),
        }
    }

    pub(crate) fn close_impl(
        writer: &JsNativeObject<WritableStreamDefaultWriter>,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        let stream = writer.deref().stream()?;
        WritableStream::close(&stream, context)
    }

    pub(crate) fn abort_impl(
        writer: &JsNativeObject<WritableStreamDefaultWriter>,
        reason: &JsValue,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        let stream = writer.deref().stream()?;
        WritableStream::abort(&stream, reason, context)
    }

    pub(crate) fn release_impl(
        writer: &JsNativeObject<WritableStreamDefaultWriter>,
        context: &mut Context,
    ) -> JsResult<()> {
        let stream = match writer.deref().stream() {
            Ok(stream) => stream,
            Err(_) => return Ok(()),
        };
        WritableStream::release_writer(&stream, context)?;
        writer.deref_mut().stream = JsValue::undefined();
        Ok(())
    }
}

pub struct WritableStreamDefaultWriterClass;

impl WritableStreamDefaultWriterClass {
    fn desired_size(context: &mut Context) -> Accessor {
        Accessor::new("desiredSize").get(
            NativeFunction::from_fn_ptr(|this, _args, _context| {
                let writer: JsNativeObject<WritableStreamDefaultWriter> =
                    JsNativeObject::try_from(this.clone())?;
                let stream = writer.deref().stream()?;
                let desired = stream.deref().desired_size();
                Ok(match desired {
                    Some(size) => JsValue::from(size),
                    None => JsValue::null(),
                })
            }),
            context,
        )
    }

    fn ready(context: &mut Context) -> Accessor {
        Accessor::new("ready").get(
            NativeFunction::from_fn_ptr(|this, _args, context| {
                let writer: JsNativeObject<WritableStreamDefaultWriter> =
                    JsNativeObject::try_from(this.clone())?;
                Ok(WritableStreamDefaultWriter::ready_impl(&writer, context)?.into())
            }),
            context,
        )
    }

    fn closed(context: &mut Context) -> Accessor {
        Accessor::new("closed").get(
            NativeFunction::from_fn_ptr(|this, _args, context| {
                let writer: JsNativeObject<WritableStreamDefaultWriter> =
                    JsNativeObject::try_from(this.clone())?;
                Ok(WritableStreamDefaultWriter::closed_impl(&writer, context)?.into())
            }),
            context,
        )
    }

    fn write(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let writer: JsNativeObject<WritableStreamDefaultWriter> =
            JsNativeObject::try_from(this.clone())?;
        Ok(WritableStreamDefaultWriter::write_impl(
            &writer,
            args.get_or_undefined(0),
            context,
        )?
        .into())
    }

    fn close(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let writer: JsNativeObject<WritableStreamDefaultWriter> =
            JsNativeObject::try_from(this.clone())?;
        Ok(WritableStreamDefaultWriter::close_impl(&writer, context)?.into())
    }

    fn abort(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let writer: JsNativeObject<WritableStreamDefaultWriter> =
            JsNativeObject::try_from(this.clone())?;
        Ok(WritableStreamDefaultWriter::abort_impl(
            &writer,
            args.get_or_undefined(0),
            context,
        )?
        .into())
    }

    fn release_lock(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let writer: JsNativeObject<WritableStreamDefaultWriter> =
            JsNativeObject::try_from(this.clone())?;
        WritableStreamDefaultWriter::release_impl(&writer, context)?;
        Ok(JsValue::undefined())
    }
}

impl NativeClass for WritableStreamDefaultWriterClass {
    type Instance = WritableStreamDefaultWriter;

    const NAME: &'static str = "WritableStreamDefaultWriter";

    const LENGTH: usize = 1;

    fn constructor(
        _this: &JsNativeObject<WritableStreamDefaultWriter>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<WritableStreamDefaultWriter> {
        let stream: JsNativeObject<WritableStream> =
            JsNativeObject::try_from(args.get_or_undefined(0).clone()).map_err(|_| {
                JsNativeError::typ()
                    .with_message("Expected a WritableStream argument")
            })?;
        let writer = WritableStream::acquire_writer(&stream, context)?;
        Ok(WritableStreamDefaultWriter {
            stream: writer.deref().stream.clone(),
        })
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let desired_size = Self::desired_size(class.context());
        let ready = Self::ready(class.context());
        let closed = Self::closed(class.context());
        class
            .accessor(js_string!("desiredSize"), desired_size, Attribute::all())
            .accessor(js_string!("ready"), ready, Attribute::all())
            .accessor(js_string!("closed"), closed, Attribute::all())
            .method(
                js_string!("write"),
                1,
                NativeFunction::from_fn_ptr(Self::write),
            )
            .method(
                js_string!("close"),
                0,
                NativeFunction::from_fn_ptr(Self::close),
            )
            .method(
                js_string!("abort"),
                0,
                NativeFunction::from_fn_ptr(Self::abort),
            )
            .method(
                js_string!("releaseLock"),
                0,
                NativeFunction::from_fn_ptr(Self::release_lock),
            );
        Ok(())
    }
}

pub struct WritableStreamClass;

impl WritableStreamClass {
    fn locked(context: &mut Context) -> Accessor {
        Accessor::new("locked").get(
            NativeFunction::from_fn_ptr(|this, _args, _context| {
                let stream: JsNativeObject<WritableStream> =
                    JsNativeObject::try_from(this.clone())?;
                let locked = stream.deref().locked();
                Ok(locked.into())
            }),
            context,
        )
    }

    fn get_writer(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let stream: JsNativeObject<WritableStream> =
            JsNativeObject::try_from(this.clone())?;
        let writer = WritableStream::acquire_writer(&stream, context)?;
        Ok(writer.to_inner())
    }

    fn close(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let stream: JsNativeObject<WritableStream> =
            JsNativeObject::try_from(this.clone())?;
        if stream.deref().locked() {
            return Err(JsNativeError::typ()
                .with_message("Cannot close a locked WritableStream")
                .into());
        }
        Ok(WritableStream::close(&stream, context)?.into())
    }

    fn abort(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let stream: JsNativeObject<WritableStream> =
            JsNativeObject::try_from(this.clone())?;
        if stream.deref().locked() {
            return Err(JsNativeError::typ()
                .with_message("Cannot abort a locked WritableStream")
                .into());
        }
        Ok(WritableStream::abort(&stream, args.get_or_undefined(0), context)?.into())
    }
}

impl NativeClass for WritableStreamClass {
    type Instance = WritableStream;

    const NAME: &'static str = "WritableStream";

    fn constructor(
        _this: &JsNativeObject<WritableStream>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<WritableStream> {
        let sink = match args.get_or_undefined(0) {
            value if value.is_undefined() => UnderlyingSink::empty(),
            value => {
                let obj = value.as_object().ok_or_else(|| {
                    JsNativeError::typ()
                        .with_message("Expected an underlying sink object")
                })?;
                UnderlyingSink::from_object(obj, context)?
            }
        };
        let strategy =
            QueuingStrategy::from_value(args.get_or_undefined(1), context)?;

        Ok(WritableStream {
            state: WritableState::Writable,
            stored_error: JsValue::undefined(),
            sink,
            queue: VecDeque::new(),
            queue_total_size: 0.0,
            high_water_mark: strategy.extract_high_water_mark(1.0),
            size_fn: strategy.size.clone(),
            started: false,
            in_flight: false,
            close_requested: false,
            close_deferred: None,
            writer: None,
            controller: JsValue::undefined(),
        })
    }

    fn object_constructor(
        this: &JsNativeObject<Self::Instance>,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<()> {
        WritableStream::attach_controller_and_start(this, context)
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let locked = Self::locked(class.context());
        class
            .accessor(js_string!("locked"), locked, Attribute::all())
            .method(
                js_string!("getWriter"),
                0,
                NativeFunction::from_fn_ptr(Self::get_writer),
            )
            .method(
                js_string!("close"),
                0,
                NativeFunction::from_fn_ptr(Self::close),
            )
            .method(
                js_string!("abort"),
                0,
                NativeFunction::from_fn_ptr(Self::abort),
            );
        Ok(())
    }
}

pub struct WritableStreamApi;

impl strand_core::Api for WritableStreamApi {
    fn init(self, context: &mut Context) {
        register_global_class::<WritableStreamClass>(context)
            .expect("The `WritableStream` class shouldn't exist yet");
        register_global_class::<WritableStreamDefaultControllerClass>(context)
            .expect("The `WritableStreamDefaultController` class shouldn't exist yet");
        register_global_class::<WritableStreamDefaultWriterClass>(context)
            .expect("The `WritableStreamDefaultWriter` class shouldn't exist yet");
    }
}
