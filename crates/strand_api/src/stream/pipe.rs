//! `pipeTo` and `pipeThrough`.
//!
//! The pipe loop honours backpressure through `writer.ready`, never awaits a
//! write's completion before issuing the next read, checks the abort signal
//! at every suspension boundary, and preserves the signal's exact reason
//! through every rejection path.
//!
//! More information:
//!  - [WHATWG Streams specification][spec]
//!
//! [spec]: https://streams.spec.whatwg.org/#rs-prototype

use boa_engine::{
    js_string,
    object::builtins::JsPromise,
    Context, JsArgs, JsNativeError, JsResult, JsValue,
};
use boa_gc::{custom_trace, Finalize, Trace};
use strand_core::{
    native::JsNativeObject,
    promise::Deferred,
};

use crate::abort::{add_native_observer, AbortSignal};

use super::{
    callback, promise_then,
    readable::{ReadableStream, ReadableStreamDefaultReader},
    writable::{WritableStream, WritableStreamDefaultWriter},
};

struct PipeState {
    reader: JsValue,
    writer: JsValue,
    prevent_close: bool,
    prevent_abort: bool,
    prevent_cancel: bool,
    shutting_down: bool,
    deferred: Deferred,
}

impl Finalize for PipeState {}

unsafe impl Trace for PipeState {
    custom_trace!(this, {
        mark(&this.reader);
        mark(&this.writer);
        mark(&this.deferred);
    });
}

impl PipeState {
    fn reader(&self) -> JsResult<JsNativeObject<ReadableStreamDefaultReader>> {
        JsNativeObject::try_from(self.reader.clone())
    }

    fn writer(&self) -> JsResult<JsNativeObject<WritableStreamDefaultWriter>> {
        JsNativeObject::try_from(self.writer.clone())
    }
}

struct PipeOptions {
    prevent_close: bool,
    prevent_abort: bool,
    prevent_cancel: bool,
    signal: Option<JsNativeObject<AbortSignal>>,
}

fn parse_options(value: &JsValue, context: &mut Context) -> JsResult<PipeOptions> {
    let mut options = PipeOptions {
        prevent_close: false,
        prevent_abort: false,
        prevent_cancel: false,
        signal: None,
    };
    let Some(obj) = value.as_object() else {
        return Ok(options);
    };
    options.prevent_close = obj.get(js_string!("preventClose"), context)?.to_boolean();
    options.prevent_abort = obj.get(js_string!("preventAbort"), context)?.to_boolean();
    options.prevent_cancel =
        obj.get(js_string!("preventCancel"), context)?.to_boolean();
    let signal = obj.get(js_string!("signal"), context)?;
    if !signal.is_undefined() {
        let signal = JsNativeObject::try_from(signal).map_err(|_| {
            JsNativeError::typ()
                .with_message("pipeTo options.signal must be an AbortSignal")
        })?;
        options.signal = Some(signal);
    }
    Ok(options)
}

/// `source.pipeTo(destination, options)`.
pub fn pipe_to(
    source: &JsNativeObject<ReadableStream>,
    destination: &JsValue,
    options: &JsValue,
    context: &mut Context,
) -> JsResult<JsPromise> {
    let destination: JsNativeObject<WritableStream> =
        JsNativeObject::try_from(destination.clone()).map_err(|_| {
            JsNativeError::typ()
                .with_message("pipeTo destination must be a WritableStream")
        })?;
    let options = parse_options(options, context)?;

    if source.deref().locked() {
        return Err(JsNativeError::typ()
            .with_message("Cannot pipe a locked ReadableStream")
            .into());
    }
    if destination.deref().locked() {
        return Err(JsNativeError::typ()
            .with_message("Cannot pipe to a locked WritableStream")
            .into());
    }

    let reader = ReadableStream::acquire_reader(source, context)?;
    let writer = WritableStream::acquire_writer(&destination, context)?;

    let deferred = Deferred::new(context)?;
    let pipe = JsNativeObject::new_internal(
        PipeState {
            reader: reader.to_inner(),
            writer: writer.to_inner(),
            prevent_close: options.prevent_close,
            prevent_abort: options.prevent_abort,
            prevent_cancel: options.prevent_cancel,
            shutting_down: false,
            deferred: deferred.clone(),
        },
        context,
    );

    if let Some(signal) = &options.signal {
        if signal.deref().aborted() {
            let reason = signal.deref().reason();
            shutdown_abort(&pipe, &reason, context);
            return Ok(deferred.promise().clone());
        }
        let observer = callback(context, pipe.clone(), |_this, args, pipe, context| {
            let reason = args.get_or_undefined(0).clone();
            shutdown_abort(pipe, &reason, context);
            Ok(JsValue::undefined())
        });
        add_native_observer(signal, observer.into(), context)?;
    }

    next_step(&pipe, context);
    Ok(deferred.promise().clone())
}

/// One iteration: read, await readiness, write without awaiting completion,
/// repeat.
fn next_step(pipe: &JsNativeObject<PipeState>, context: &mut Context) {
    if pipe.deref().shutting_down {
        return;
    }
    let reader = match pipe.deref().reader() {
        Ok(reader) => reader,
        Err(_) => return,
    };
    let read_promise = match ReadableStreamDefaultReader::read_impl(&reader, context) {
        Ok(promise) => promise,
        Err(err) => {
            let reason = err.to_opaque(context);
            shutdown_source_error(pipe, &reason, context);
            return;
        }
    };

    let on_chunk = callback(context, pipe.clone(), |_this, args, pipe, context| {
        let result = args.get_or_undefined(0);
        let Some(result) = result.as_object() else {
            return Ok(JsValue::undefined());
        };
        let done = result.get(js_string!("done"), context)?.to_boolean();
        let value = result.get(js_string!("value"), context)?;

        if pipe.deref().shutting_down {
            return Ok(JsValue::undefined());
        }
        if done {
            shutdown_done(pipe, context);
            return Ok(JsValue::undefined());
        }

        let writer = pipe.deref().writer()?;
        let ready = WritableStreamDefaultWriter::ready_impl(&writer, context)?;
        let on_ready = callback(
            context,
            (pipe.clone(), value),
            |_this, _args, (pipe, chunk), context| {
                if pipe.deref().shutting_down {
                    return Ok(JsValue::undefined());
                }
                let writer = pipe.deref().writer()?;
                match WritableStreamDefaultWriter::write_impl(&writer, chunk, context) {
                    Ok(write_promise) => {
                        // Write failures surface through this rejection; the
                        // loop continues without awaiting completion.
                        let on_write_failed = callback(
                            context,
                            pipe.clone(),
                            |_this, args, pipe, context| {
                                let reason = args.get_or_undefined(0).clone();
                                shutdown_dest_error(pipe, &reason, context);
                                Ok(JsValue::undefined())
                            },
                        );
                        promise_then(
                            &write_promise,
                            None,
                            Some(on_write_failed),
                            context,
                        );
                        next_step(pipe, context);
                    }
                    Err(err) => {
                        let reason = err.to_opaque(context);
                        shutdown_dest_error(pipe, &reason, context);
                    }
                }
                Ok(JsValue::undefined())
            },
        );
        let on_ready_failed =
            callback(context, pipe.clone(), |_this, args, pipe, context| {
                let reason = args.get_or_undefined(0).clone();
                shutdown_dest_error(pipe, &reason, context);
                Ok(JsValue::undefined())
            });
        promise_then(&ready, Some(on_ready), Some(on_ready_failed), context);
        Ok(JsValue::undefined())
    });
    let on_read_failed = callback(context, pipe.clone(), |_this, args, pipe, context| {
        let reason = args.get_or_undefined(0).clone();
        shutdown_source_error(pipe, &reason, context);
        Ok(JsValue::undefined())
    });
    promise_then(&read_promise, Some(on_chunk), Some(on_read_failed), context);
}

fn enter_shutdown(pipe: &JsNativeObject<PipeState>) -> bool {
    let mut inner = pipe.deref_mut();
    if inner.shutting_down {
        return false;
    }
    inner.shutting_down = true;
    true
}

/// Normal termination: close the destination (unless prevented), then
/// resolve.
fn shutdown_done(pipe: &JsNativeObject<PipeState>, context: &mut Context) {
    if !enter_shutdown(pipe) {
        return;
    }
    let prevent_close = pipe.deref().prevent_close;
    if prevent_close {
        finalize(pipe, None, context);
        return;
    }
    let close_promise = pipe
        .deref()
        .writer()
        .and_then(|writer| WritableStreamDefaultWriter::close_impl(&writer, context));
    match close_promise {
        Ok(promise) => {
            let on_closed = callback(context, pipe.clone(), |_this, _args, pipe, context| {
                finalize(pipe, None, context);
                Ok(JsValue::undefined())
            });
            let on_close_failed =
                callback(context, pipe.clone(), |_this, args, pipe, context| {
                    let reason = args.get_or_undefined(0).clone();
                    finalize(pipe, Some(reason), context);
                    Ok(JsValue::undefined())
                });
            promise_then(&promise, Some(on_closed), Some(on_close_failed), context);
        }
        Err(err) => {
            let reason = err.to_opaque(context);
            finalize(pipe, Some(reason), context);
        }
    }
}

/// The source errored: abort the destination unless prevented, reject with
/// the source's error.
fn shutdown_source_error(
    pipe: &JsNativeObject<PipeState>,
    reason: &JsValue,
    context: &mut Context,
) {
    if !enter_shutdown(pipe) {
        return;
    }
    if !pipe.deref().prevent_abort {
        if let Ok(writer) = pipe.deref().writer() {
            let _ = WritableStreamDefaultWriter::abort_impl(&writer, reason, context);
        }
    }
    finalize(pipe, Some(reason.clone()), context);
}

/// The destination errored: cancel the source unless prevented, reject with
/// the destination's error.
fn shutdown_dest_error(
    pipe: &JsNativeObject<PipeState>,
    reason: &JsValue,
    context: &mut Context,
) {
    if !enter_shutdown(pipe) {
        return;
    }
    if !pipe.deref().prevent_cancel {
        if let Ok(reader) = pipe.deref().reader() {
            let _ =
                ReadableStreamDefaultReader::cancel_impl(&reader, reason, context);
        }
    }
    finalize(pipe, Some(reason.clone()), context);
}

/// The signal fired: abort destination and cancel source (each unless
/// prevented) and reject with the signal's exact reason.
fn shutdown_abort(
    pipe: &JsNativeObject<PipeState>,
    reason: &JsValue,
    context: &mut Context,
) {
    if !enter_shutdown(pipe) {
        return;
    }
    if !pipe.deref().prevent_abort {
        if let Ok(writer) = pipe.deref().writer() {
            let _ = WritableStreamDefaultWriter::abort_impl(&writer, reason, context);
        }
    }
    if !pipe.deref().prevent_cancel {
        if let Ok(reader) = pipe.deref().reader() {
            let _ =
                ReadableStreamDefaultReader::cancel_impl(&reader, reason, context);
        }
    }
    finalize(pipe, Some(reason.clone()), context);
}

/// Releases both locks and settles the returned promise.
fn finalize(
    pipe: &JsNativeObject<PipeState>,
    error: Option<JsValue>,
    context: &mut Context,
) {
    let (reader, writer, deferred) = {
        let inner = pipe.deref();
        (inner.reader(), inner.writer(), inner.deferred.clone())
    };
    if let Ok(reader) = reader {
        let _ = ReadableStreamDefaultReader::release_impl(&reader, context);
    }
    if let Ok(writer) = writer {
        let _ = WritableStreamDefaultWriter::release_impl(&writer, context);
    }
    match error {
        Some(reason) => deferred.reject(&reason, context),
        None => deferred.resolve(&JsValue::undefined(), context),
    }
}

/// `source.pipeThrough({writable, readable}, options)`: starts a background
/// pipe into `writable` and returns `readable`. Failures are observable only
/// through the returned stream.
pub fn pipe_through(
    source: &JsNativeObject<ReadableStream>,
    pair: &JsValue,
    options: &JsValue,
    context: &mut Context,
) -> JsResult<JsValue> {
    let Some(pair) = pair.as_object() else {
        return Err(JsNativeError::typ()
            .with_message("pipeThrough expects a {writable, readable} pair")
            .into());
    };
    let writable = pair.get(js_string!("writable"), context)?;
    let readable = pair.get(js_string!("readable"), context)?;
    if !JsNativeObject::<WritableStream>::is(&writable) {
        return Err(JsNativeError::typ()
            .with_message("pipeThrough pair is missing a writable stream")
            .into());
    }
    if !JsNativeObject::<ReadableStream>::is(&readable) {
        return Err(JsNativeError::typ()
            .with_message("pipeThrough pair is missing a readable stream")
            .into());
    }

    let pipe_promise = pipe_to(source, &writable, options, context)?;
    // The background pipe's rejection is reported through `readable`, not
    // through an unhandled rejection.
    let swallow = callback(
        context,
        JsValue::undefined(),
        |_this, _args, _captures, _context| Ok(JsValue::undefined()),
    );
    promise_then(&pipe_promise, None, Some(swallow), context);

    Ok(readable)
}
