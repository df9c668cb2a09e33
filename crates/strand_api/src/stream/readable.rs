//! `ReadableStream`, its default controller and default reader.
//!
//! More information:
//!  - [WHATWG Streams specification][spec]
//!
//! [spec]: https://streams.spec.whatwg.org/#rs-model

use std::collections::VecDeque;

use boa_engine::{
    js_string,
    object::{
        builtins::{JsArray, JsFunction, JsPromise},
        JsObject,
    },
    property::Attribute,
    Context, JsArgs, JsError, JsNativeError, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{custom_trace, Finalize, Trace};
use strand_core::{
    accessor,
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
    promise::Deferred,
};

use super::{
    callback, new_read_result, pipe, promise_resolved_with, promise_then,
    QueuingStrategy,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReadableState {
    Readable,
    Closed,
    Errored,
}

/// The `start`/`pull`/`cancel` callbacks of an underlying source, with the
/// source object as their `this`. Host-backed streams install callables
/// built from native closures here, so the machinery below serves both.
pub struct UnderlyingSource {
    this: JsValue,
    start: Option<JsFunction>,
    pull: Option<JsFunction>,
    cancel: Option<JsFunction>,
}

impl UnderlyingSource {
    pub fn empty() -> Self {
        Self {
            this: JsValue::undefined(),
            start: None,
            pull: None,
            cancel: None,
        }
    }

    /// A host-backed source built from native callables.
    pub fn native(pull: Option<JsFunction>, cancel: Option<JsFunction>) -> Self {
        Self {
            this: JsValue::undefined(),
            start: None,
            pull,
            cancel,
        }
    }

    pub fn from_object(
        source: &JsObject,
        context: &mut Context,
    ) -> JsResult<Self> {
        Ok(Self {
            this: source.clone().into(),
            start: callable_prop(source, "start", context)?,
            pull: callable_prop(source, "pull", context)?,
            cancel: callable_prop(source, "cancel", context)?,
        })
    }
}

pub(crate) fn callable_prop(
    obj: &JsObject,
    name: &str,
    context: &mut Context,
) -> JsResult<Option<JsFunction>> {
    let value = obj.get(JsString::from(name), context)?;
    if value.is_null_or_undefined() {
        return Ok(None);
    }
    value
        .as_callable()
        .and_then(|callable| JsFunction::from_object(callable.clone()))
        .map(Some)
        .ok_or_else(|| {
            JsNativeError::typ()
                .with_message(format!("`{name}` is not a function"))
                .into()
        })
}

struct ReaderState {
    read_requests: VecDeque<Deferred>,
    closed: Deferred,
}

pub struct ReadableStream {
    state: ReadableState,
    stored_error: JsValue,
    queue: VecDeque<(JsValue, f64)>,
    queue_total_size: f64,
    high_water_mark: f64,
    size_fn: Option<JsFunction>,
    source: UnderlyingSource,
    started: bool,
    pulling: bool,
    pull_again: bool,
    close_requested: bool,
    disturbed: bool,
    reader: Option<ReaderState>,
    controller: JsValue,
}

impl Finalize for ReadableStream {}

unsafe impl Trace for ReadableStream {
    custom_trace!(this, {
        mark(&this.stored_error);
        for (chunk, _) in &this.queue {
            mark(chunk);
        }
        mark(&this.source.this);
        if let Some(start) = &this.source.start {
            mark(start);
        }
        if let Some(pull) = &this.source.pull {
            mark(pull);
        }
        if let Some(cancel) = &this.source.cancel {
            mark(cancel);
        }
        if let Some(size) = &this.size_fn {
            mark(size);
        }
        if let Some(reader) = &this.reader {
            for request in &reader.read_requests {
                mark(request);
            }
            mark(&reader.closed);
        }
        mark(&this.controller);
    });
}

impl ReadableStream {
    pub fn locked(&self) -> bool {
        self.reader.is_some()
    }

    pub fn state(&self) -> ReadableState {
        self.state
    }

    pub fn is_disturbed(&self) -> bool {
        self.disturbed
    }

    /// `highWaterMark − queuedSize`; `None` once errored.
    pub fn desired_size(&self) -> Option<f64> {
        match self.state {
            ReadableState::Errored => None,
            ReadableState::Closed => Some(0.0),
            ReadableState::Readable => {
                Some(self.high_water_mark - self.queue_total_size)
            }
        }
    }

    pub fn controller_value(&self) -> JsValue {
        self.controller.clone()
    }

    /// Creates a stream over a parsed underlying source. `start` runs before
    /// this returns; its rejection errors the stream asynchronously.
    pub fn create(
        source: UnderlyingSource,
        strategy: &QueuingStrategy,
        context: &mut Context,
    ) -> JsResult<JsNativeObject<ReadableStream>> {
        let stream = ReadableStream {
            state: ReadableState::Readable,
            stored_error: JsValue::undefined(),
            queue: VecDeque::new(),
            queue_total_size: 0.0,
            high_water_mark: strategy.extract_high_water_mark(1.0),
            size_fn: strategy.size.clone(),
            source,
            started: false,
            pulling: false,
            pull_again: false,
            close_requested: false,
            disturbed: false,
            reader: None,
            controller: JsValue::undefined(),
        };
        let stream = JsNativeObject::new::<ReadableStreamClass>(stream, context)?;
        Self::attach_controller_and_start(&stream, context)?;
        Ok(stream)
    }

    pub(crate) fn attach_controller_and_start(
        stream: &JsNativeObject<ReadableStream>,
        context: &mut Context,
    ) -> JsResult<()> {
        let controller = JsNativeObject::new::<ReadableStreamDefaultControllerClass>(
            ReadableStreamDefaultController {
                stream: stream.to_inner(),
            },
            context,
        )?;
        stream.deref_mut().controller = controller.to_inner();

        let (start, this) = {
            let inner = stream.deref();
            (inner.source.start.clone(), inner.source.this.clone())
        };

        match start {
            Some(start) => {
                // Synchronous throws from start propagate to the caller.
                let result = start.call(&this, &[controller.to_inner()], context)?;
                let promise = promise_resolved_with(&result, context)?;
                let on_started = callback(
                    context,
                    stream.clone(),
                    |_this, _args, stream, context| {
                        stream.deref_mut().started = true;
                        ReadableStream::pull_if_needed(stream, context);
                        Ok(JsValue::undefined())
                    },
                );
                let on_start_failed = callback(
                    context,
                    stream.clone(),
                    |_this, args, stream, context| {
                        let reason = args.get_or_undefined(0).clone();
                        ReadableStream::error(stream, &reason, context);
                        Ok(JsValue::undefined())
                    },
                );
                promise_then(&promise, Some(on_started), Some(on_start_failed), context);
            }
            None => {
                stream.deref_mut().started = true;
                Self::pull_if_needed(stream, context);
            }
        }
        Ok(())
    }

    fn should_pull(&self) -> bool {
        if self.state != ReadableState::Readable
            || self.close_requested
            || !self.started
        {
            return false;
        }
        if let Some(reader) = &self.reader {
            if !reader.read_requests.is_empty() {
                return true;
            }
        }
        self.desired_size().is_some_and(|size| size > 0.0)
    }

    /// Re-entry-protected pull: at most one `pull` in flight, with a repull
    /// noted for when it settles.
    pub(crate) fn pull_if_needed(
        stream: &JsNativeObject<ReadableStream>,
        context: &mut Context,
    ) {
        let (pull, this, controller) = {
            let mut inner = stream.deref_mut();
            if !inner.should_pull() {
                return;
            }
            if inner.pulling {
                inner.pull_again = true;
                return;
            }
            let Some(pull) = inner.source.pull.clone() else {
                return;
            };
            inner.pulling = true;
            (pull, inner.source.this.clone(), inner.controller.clone())
        };

        let result = pull.call(&this, &[controller], context);
        let promise = result.and_then(|value| promise_resolved_with(&value, context));
        let promise = match promise {
            Ok(promise) => promise,
            Err(err) => {
                let reason = err.to_opaque(context);
                stream.deref_mut().pulling = false;
                Self::error(stream, &reason, context);
                return;
            }
        };

        let on_pulled = callback(context, stream.clone(), |_this, _args, stream, context| {
            let pull_again = {
                let mut inner = stream.deref_mut();
                inner.pulling = false;
                std::mem::take(&mut inner.pull_again)
            };
            if pull_again {
                ReadableStream::pull_if_needed(stream, context);
            }
            Ok(JsValue::undefined())
        });
        let on_pull_failed =
            callback(context, stream.clone(), |_this, args, stream, context| {
                stream.deref_mut().pulling = false;
                let reason = args.get_or_undefined(0).clone();
                ReadableStream::error(stream, &reason, context);
                Ok(JsValue::undefined())
            });
        promise_then(&promise, Some(on_pulled), Some(on_pull_failed), context);
    }

    fn chunk_size(
        stream: &JsNativeObject<ReadableStream>,
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

    /// Delivers a chunk: directly to a pending read request when one exists,
    /// into the queue otherwise.
    pub(crate) fn enqueue(
        stream: &JsNativeObject<ReadableStream>,
        chunk: &JsValue,
        context: &mut Context,
    ) -> JsResult<()> {
        {
            let inner = stream.deref();
            if inner.close_requested {
                return Err(JsNativeError::typ()
                    .with_message("Cannot enqueue after close has been requested")
                    .into());
            }
            if inner.state != ReadableState::Readable {
                return Err(JsNativeError::typ()
                    .with_message("Cannot enqueue to a stream that is not readable")
                    .into());
            }
        }

        let pending_read = {
            let mut inner = stream.deref_mut();
            inner
                .reader
                .as_mut()
                .and_then(|reader| reader.read_requests.pop_front())
        };

        match pending_read {
            Some(request) => {
                let result = new_read_result(chunk.clone(), false, context);
                request.resolve(&result, context);
            }
            None => {
                let size = Self::chunk_size(stream, chunk, context)?;
                let mut inner = stream.deref_mut();
                inner.queue.push_back((chunk.clone(), size));
                inner.queue_total_size += size;
            }
        }

        Self::pull_if_needed(stream, context);
        Ok(())
    }

    /// Marks end-of-stream; buffered chunks remain deliverable until drained.
    pub(crate) fn request_close(
        stream: &JsNativeObject<ReadableStream>,
        context: &mut Context,
    ) -> JsResult<()> {
        let finalize = {
            let mut inner = stream.deref_mut();
            if inner.close_requested || inner.state != ReadableState::Readable {
                return Err(JsNativeError::typ()
                    .with_message("Cannot close a stream that is not readable")
                    .into());
            }
            inner.close_requested = true;
            inner.queue.is_empty()
        };
        if finalize {
            Self::finalize_close(stream, context);
        }
        Ok(())
    }

    fn finalize_close(
        stream: &JsNativeObject<ReadableStream>,
        context: &mut Context,
    ) {
        let (requests, closed) = {
            let mut inner = stream.deref_mut();
            if inner.state != ReadableState::Readable {
                return;
            }
            inner.state = ReadableState::Closed;
            match inner.reader.as_mut() {
                Some(reader) => (
                    std::mem::take(&mut reader.read_requests),
                    Some(reader.closed.clone()),
                ),
                None => (VecDeque::new(), None),
            }
        };
        for request in requests {
            let result = new_read_result(JsValue::undefined(), true, context);
            request.resolve(&result, context);
        }
        if let Some(closed) = closed {
            closed.resolve(&JsValue::undefined(), context);
        }
    }

    /// Transitions to errored: the queue is dropped and every pending read,
    /// present and future, rejects with `reason`.
    pub(crate) fn error(
        stream: &JsNativeObject<ReadableStream>,
        reason: &JsValue,
        context: &mut Context,
    ) {
        let (requests, closed) = {
            let mut inner = stream.deref_mut();
            if inner.state != ReadableState::Readable {
                return;
            }
            inner.state = ReadableState::Errored;
            inner.stored_error = reason.clone();
            inner.queue.clear();
            inner.queue_total_size = 0.0;
            inner.pulling = false;
            inner.pull_again = false;
            match inner.reader.as_mut() {
                Some(reader) => (
                    std::mem::take(&mut reader.read_requests),
                    Some(reader.closed.clone()),
                ),
                None => (VecDeque::new(), None),
            }
        };
        for request in requests {
            request.reject(reason, context);
        }
        if let Some(closed) = closed {
            closed.reject(reason, context);
        }
    }

    /// Acquires the exclusive lock and returns a default reader.
    pub fn acquire_reader(
        stream: &JsNativeObject<ReadableStream>,
        context: &mut Context,
    ) -> JsResult<JsNativeObject<ReadableStreamDefaultReader>> {
        let closed = Deferred::new(context)?;
        {
            let mut inner = stream.deref_mut();
            if inner.locked() {
                return Err(JsNativeError::typ()
                    .with_message("ReadableStream is already locked to a reader")
                    .into());
            }
            inner.reader = Some(ReaderState {
                read_requests: VecDeque::new(),
                closed: closed.clone(),
            });
        }
        let state = stream.deref().state;
        match state {
            ReadableState::Closed => closed.resolve(&JsValue::undefined(), context),
            ReadableState::Errored => {
                let reason = stream.deref().stored_error.clone();
                closed.reject(&reason, context);
            }
            ReadableState::Readable => {}
        }
        JsNativeObject::new::<ReadableStreamDefaultReaderClass>(
            ReadableStreamDefaultReader {
                stream: stream.to_inner(),
            },
            context,
        )
    }

    /// One read: front of the queue, or a pending request fulfilled in read
    /// order by later enqueues.
    pub(crate) fn read(
        stream: &JsNativeObject<ReadableStream>,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        stream.deref_mut().disturbed = true;
        let state = stream.deref().state;
        match state {
            ReadableState::Closed => {
                let result = new_read_result(JsValue::undefined(), true, context);
                JsPromise::resolve(result, context)
            }
            ReadableState::Errored => {
                let reason = stream.deref().stored_error.clone();
                JsPromise::reject(JsError::from_opaque(reason), context)
            }
            ReadableState::Readable => {
                let front = {
                    let mut inner = stream.deref_mut();
                    match inner.queue.pop_front() {
                        Some((chunk, size)) => {
                            inner.queue_total_size -= size;
                            Some(chunk)
                        }
                        None => None,
                    }
                };
                match front {
                    Some(chunk) => {
                        let drained = {
                            let inner = stream.deref();
                            inner.close_requested && inner.queue.is_empty()
                        };
                        if drained {
                            Self::finalize_close(stream, context);
                        } else {
                            Self::pull_if_needed(stream, context);
                        }
                        let result = new_read_result(chunk, false, context);
                        JsPromise::resolve(result, context)
                    }
                    None => {
                        let deferred = Deferred::new(context)?;
                        {
                            let mut inner = stream.deref_mut();
                            let Some(reader) = inner.reader.as_mut() else {
                                return Err(JsNativeError::typ()
                                    .with_message("Stream has no reader")
                                    .into());
                            };
                            reader.read_requests.push_back(deferred.clone());
                        }
                        Self::pull_if_needed(stream, context);
                        Ok(deferred.promise().clone())
                    }
                }
            }
        }
    }

    /// Releasing requires no in-flight read; the stream becomes unlocked and
    /// usable again.
    pub(crate) fn release_lock(
        stream: &JsNativeObject<ReadableStream>,
        context: &mut Context,
    ) -> JsResult<()> {
        let closed = {
            let mut inner = stream.deref_mut();
            let Some(reader) = inner.reader.as_ref() else {
                return Ok(());
            };
            if !reader.read_requests.is_empty() {
                return Err(JsNativeError::typ()
                    .with_message("Cannot release a reader with pending reads")
                    .into());
            }
            let state = inner.state;
            let reader = inner.reader.take().expect("checked above");
            (state == ReadableState::Readable).then_some(reader.closed)
        };
        if let Some(closed) = closed {
            let reason = JsNativeError::typ()
                .with_message("Reader was released")
                .to_opaque(context);
            closed.reject(&reason.into(), context);
        }
        Ok(())
    }

    /// Cancels the stream: drops the queue, settles reads with `{done}`,
    /// closes, then runs the source's cancel hook.
    pub(crate) fn cancel(
        stream: &JsNativeObject<ReadableStream>,
        reason: &JsValue,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        stream.deref_mut().disturbed = true;
        let state = stream.deref().state;
        match state {
            ReadableState::Closed => JsPromise::resolve(JsValue::undefined(), context),
            ReadableState::Errored => {
                let reason = stream.deref().stored_error.clone();
                JsPromise::reject(JsError::from_opaque(reason), context)
            }
            ReadableState::Readable => {
                {
                    let mut inner = stream.deref_mut();
                    inner.queue.clear();
                    inner.queue_total_size = 0.0;
                }
                Self::finalize_close(stream, context);

                let cancel = {
                    let inner = stream.deref();
                    inner
                        .source
                        .cancel
                        .clone()
                        .map(|cancel| (cancel, inner.source.this.clone()))
                };
                match cancel {
                    Some((cancel, this)) => {
                        let result = cancel.call(&this, &[reason.clone()], context)?;
                        let promise = promise_resolved_with(&result, context)?;
                        // The caller sees completion, not the hook's value.
                        let on_done = callback(
                            context,
                            JsValue::undefined(),
                            |_this, _args, _captures, _context| {
                                Ok(JsValue::undefined())
                            },
                        );
                        promise.then(Some(on_done), None, context)
                    }
                    None => JsPromise::resolve(JsValue::undefined(), context),
                }
            }
        }
    }

    /// Splits the stream into two branches with independent queues and
    /// locks. The source is cancelled only when both branches are.
    pub fn tee(
        stream: &JsNativeObject<ReadableStream>,
        context: &mut Context,
    ) -> JsResult<(JsValue, JsValue)> {
        let reader = Self::acquire_reader(stream, context)?;
        let cancel_deferred = Deferred::new(context)?;
        let tee = JsNativeObject::new_internal(
            TeeState {
                reader: reader.to_inner(),
                reading: false,
                read_again: false,
                canceled: [false, false],
                reasons: [JsValue::undefined(), JsValue::undefined()],
                branches: [JsValue::undefined(), JsValue::undefined()],
                cancel_deferred,
            },
            context,
        );

        let branch_0 = Self::tee_branch(&tee, 0, context)?;
        let branch_1 = Self::tee_branch(&tee, 1, context)?;
        {
            let mut state = tee.deref_mut();
            state.branches = [branch_0.clone(), branch_1.clone()];
        }

        // A source error fans out to both branches.
        let closed = {
            let reader_inner = reader.deref();
            let source: JsNativeObject<ReadableStream> =
                JsNativeObject::try_from(reader_inner.stream.clone())?;
            let closed = source
                .deref()
                .reader
                .as_ref()
                .map(|reader| reader.closed.clone());
            closed
        };
        if let Some(closed) = closed {
            let on_error = callback(context, tee.clone(), |_this, args, tee, context| {
                let reason = args.get_or_undefined(0).clone();
                TeeState::error_branches(tee, &reason, context);
                Ok(JsValue::undefined())
            });
            promise_then(closed.promise(), None, Some(on_error), context);
        }

        Ok((branch_0, branch_1))
    }

    fn tee_branch(
        tee: &JsNativeObject<TeeState>,
        index: usize,
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let pull = callback(context, tee.clone(), |_this, _args, tee, context| {
            TeeState::pull(tee, context);
            Ok(JsValue::undefined())
        });
        let cancel_0 = |_this: &JsValue,
                        args: &[JsValue],
                        tee: &mut JsNativeObject<TeeState>,
                        context: &mut Context|
         -> JsResult<JsValue> {
            let reason = args.get_or_undefined(0).clone();
            TeeState::cancel_branch(tee, 0, &reason, context)
        };
        let cancel_1 = |_this: &JsValue,
                        args: &[JsValue],
                        tee: &mut JsNativeObject<TeeState>,
                        context: &mut Context|
         -> JsResult<JsValue> {
            let reason = args.get_or_undefined(0).clone();
            TeeState::cancel_branch(tee, 1, &reason, context)
        };
        let cancel = if index == 0 {
            callback(context, tee.clone(), cancel_0)
        } else {
            callback(context, tee.clone(), cancel_1)
        };

        let source = UnderlyingSource {
            this: JsValue::undefined(),
            start: None,
            pull: Some(pull),
            cancel: Some(cancel),
        };
        let branch = Self::create(source, &QueuingStrategy::default(), context)?;
        Ok(branch.to_inner())
    }
}

/// Shared state of a `tee`: one reader on the source feeding two branches.
struct TeeState {
    reader: JsValue,
    reading: bool,
    read_again: bool,
    canceled: [bool; 2],
    reasons: [JsValue; 2],
    branches: [JsValue; 2],
    cancel_deferred: Deferred,
}

impl Finalize for TeeState {}

unsafe impl Trace for TeeState {
    custom_trace!(this, {
        mark(&this.reader);
        mark(&this.reasons);
        mark(&this.branches);
        mark(&this.cancel_deferred);
    });
}

impl TeeState {
    fn pull(tee: &JsNativeObject<TeeState>, context: &mut Context) {
        let reader = {
            let mut state = tee.deref_mut();
            if state.reading {
                state.read_again = true;
                return;
            }
            state.reading = true;
            state.reader.clone()
        };
        let reader: JsNativeObject<ReadableStreamDefaultReader> =
            match JsNativeObject::try_from(reader) {
                Ok(reader) => reader,
                Err(_) => return,
            };
        let promise = match ReadableStreamDefaultReader::read_impl(&reader, context) {
            Ok(promise) => promise,
            Err(err) => {
                let reason = err.to_opaque(context);
                Self::error_branches(tee, &reason, context);
                return;
            }
        };
        let on_chunk = callback(context, tee.clone(), |_this, args, tee, context| {
            let result = args.get_or_undefined(0);
            let Some(result) = result.as_object() else {
                return Ok(JsValue::undefined());
            };
            let done = result.get(js_string!("done"), context)?.to_boolean();
            let value = result.get(js_string!("value"), context)?;

            let (branches, canceled, read_again) = {
                let mut state = tee.deref_mut();
                state.reading = false;
                (
                    state.branches.clone(),
                    state.canceled,
                    std::mem::take(&mut state.read_again),
                )
            };

            for (index, branch) in branches.iter().enumerate() {
                if canceled[index] {
                    continue;
                }
                let branch: JsNativeObject<ReadableStream> =
                    JsNativeObject::try_from(branch.clone())?;
                if done {
                    let _ = ReadableStream::request_close(&branch, context);
                } else if let Err(err) =
                    ReadableStream::enqueue(&branch, &value, context)
                {
                    strand_core::event_loop::report_error(&err);
                }
            }
            if !done && read_again {
                TeeState::pull(tee, context);
            }
            Ok(JsValue::undefined())
        });
        let on_error = callback(context, tee.clone(), |_this, args, tee, context| {
            tee.deref_mut().reading = false;
            let reason = args.get_or_undefined(0).clone();
            TeeState::error_branches(tee, &reason, context);
            Ok(JsValue::undefined())
        });
        promise_then(&promise, Some(on_chunk), Some(on_error), context);
    }

    fn error_branches(
        tee: &JsNativeObject<TeeState>,
        reason: &JsValue,
        context: &mut Context,
    ) {
        let branches = tee.deref().branches.clone();
        for branch in branches {
            if let Ok(branch) =
                JsNativeObject::<ReadableStream>::try_from(branch.clone())
            {
                ReadableStream::error(&branch, reason, context);
            }
        }
    }

    /// If one branch is cancelled the other continues; only when both are is
    /// the source cancelled, with the pair of reasons.
    fn cancel_branch(
        tee: &JsNativeObject<TeeState>,
        index: usize,
        reason: &JsValue,
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let (both_canceled, reader, reasons, deferred) = {
            let mut state = tee.deref_mut();
            state.canceled[index] = true;
            state.reasons[index] = reason.clone();
            (
                state.canceled[0] && state.canceled[1],
                state.reader.clone(),
                state.reasons.clone(),
                state.cancel_deferred.clone(),
            )
        };

        if both_canceled {
            let composite: JsValue =
                JsArray::from_iter(reasons.to_vec(), context).into();
            let reader: JsNativeObject<ReadableStreamDefaultReader> =
                JsNativeObject::try_from(reader)?;
            let promise =
                ReadableStreamDefaultReader::cancel_impl(&reader, &composite, context)?;
            let on_done =
                callback(context, deferred.clone(), |_this, _args, deferred, context| {
                    deferred.resolve(&JsValue::undefined(), context);
                    Ok(JsValue::undefined())
                });
            let on_err =
                callback(context, deferred.clone(), |_this, args, deferred, context| {
                    deferred.reject(args.get_or_undefined(0), context);
                    Ok(JsValue::undefined())
                });
            promise_then(&promise, Some(on_done), Some(on_err), context);
        }

        Ok(deferred.promise().clone().into())
    }
}

/// The default controller handed to underlying source callbacks.
pub struct ReadableStreamDefaultController {
    stream: JsValue,
}

impl Finalize for ReadableStreamDefaultController {}

unsafe impl Trace for ReadableStreamDefaultController {
    custom_trace!(this, {
        mark(&this.stream);
    });
}

impl ReadableStreamDefaultController {
    fn stream(&self) -> JsResult<JsNativeObject<ReadableStream>> {
        JsNativeObject::try_from(self.stream.clone())
    }

    fn this_stream(value: &JsValue) -> JsResult<JsNativeObject<ReadableStream>> {
        let controller: JsNativeObject<ReadableStreamDefaultController> =
            JsNativeObject::try_from(value.clone())?;
        let stream = controller.deref().stream()?;
        Ok(stream)
    }
}

/// Resolves the stream behind a controller value handed to a source
/// callback; host-backed sources use this to reach the stream ops.
pub(crate) fn stream_of_controller(
    controller: &JsValue,
) -> JsResult<JsNativeObject<ReadableStream>> {
    ReadableStreamDefaultController::this_stream(controller)
}

pub struct ReadableStreamDefaultControllerClass;

impl ReadableStreamDefaultControllerClass {
    fn desired_size(context: &mut Context) -> Accessor {
        Accessor::new("desiredSize").get(
            NativeFunction::from_fn_ptr(|this, _args, _context| {
                let stream = ReadableStreamDefaultController::this_stream(this)?;
                let desired = stream.deref().desired_size();
                Ok(match desired {
                    Some(size) => JsValue::from(size),
                    None => JsValue::null(),
                })
            }),
            context,
        )
    }

    fn enqueue(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let stream = ReadableStreamDefaultController::this_stream(this)?;
        ReadableStream::enqueue(&stream, args.get_or_undefined(0), context)?;
        Ok(JsValue::undefined())
    }

    fn close(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let stream = ReadableStreamDefaultController::this_stream(this)?;
        ReadableStream::request_close(&stream, context)?;
        Ok(JsValue::undefined())
    }

    fn error(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let stream = ReadableStreamDefaultController::this_stream(this)?;
        ReadableStream::error(&stream, args.get_or_undefined(0), context);
        Ok(JsValue::undefined())
    }
}

impl NativeClass for ReadableStreamDefaultControllerClass {
    type Instance = ReadableStreamDefaultController;

    const NAME: &'static str = "ReadableStreamDefaultController";

    fn constructor(
        _this: &JsNativeObject<ReadableStreamDefaultController>,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<ReadableStreamDefaultController> {
        Err(JsNativeError::typ()
            .with_message("Illegal constructor")
            .into())
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let desired_size = Self::desired_size(class.context());
        class
            .accessor(js_string!("desiredSize"), desired_size, Attribute::all())
            .method(
                js_string!("enqueue"),
                1,
                NativeFunction::from_fn_ptr(Self::enqueue),
            )
            .method(
                js_string!("close"),
                0,
                NativeFunction::from_fn_ptr(Self::close),
            )
            .method(
                js_string!("error"),
                1,
                NativeFunction::from_fn_ptr(Self::error),
            );
        Ok(())
    }
}

/// The exclusive default reader.
pub struct ReadableStreamDefaultReader {
    stream: JsValue,
}

impl Finalize for ReadableStreamDefaultReader {}

unsafe impl Trace for ReadableStreamDefaultReader {
    custom_trace!(this, {
        mark(&this.stream);
    });
}

impl ReadableStreamDefaultReader {
    fn stream(&self) -> JsResult<JsNativeObject<ReadableStream>> {
        if self.stream.is_undefined() {
            return Err(JsNativeError::typ()
                .with_message("Reader has been released")
                .into());
        }
        JsNativeObject::try_from(self.stream.clone())
    }

    pub(crate) fn read_impl(
        reader: &JsNativeObject<ReadableStreamDefaultReader>,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        let stream = reader.deref().stream()?;
        ReadableStream::read(&stream, context)
    }

    pub(crate) fn cancel_impl(
        reader: &JsNativeObject<ReadableStreamDefaultReader>,
        reason: &JsValue,
        context: &mut Context,
    ) -> JsResult<JsPromise> {
        let stream = reader.deref().stream()?;
        ReadableStream::cancel(&stream, reason, context)
    }

    pub(crate) fn release_impl(
        reader: &JsNativeObject<ReadableStreamDefaultReader>,
        context: &mut Context,
    ) -> JsResult<()> {
        let stream = match reader.deref().stream() {
            Ok(stream) => stream,
            Err(_) => return Ok(()),
        };
        ReadableStream::release_lock(&stream, context)?;
        reader.deref_mut().stream = JsValue::undefined();
        Ok(())
    }
}

pub struct ReadableStreamDefaultReaderClass;

impl ReadableStreamDefaultReaderClass {
    fn closed(context: &mut Context) -> Accessor {
        Accessor::new("closed").get(
            NativeFunction::from_fn_ptr(|this, _args, context| {
                let reader: JsNativeObject<ReadableStreamDefaultReader> =
                    JsNativeObject::try_from(this.clone())?;
                let stream = reader.deref().stream()?;
                let closed = stream
                    .deref()
                    .reader
                    .as_ref()
                    .map(|state| state.closed.clone());
                match closed {
                    Some(closed) => Ok(closed.promise().clone().into()),
                    None => Ok(JsPromise::reject(
                        JsNativeError::typ().with_message("Reader has been released"),
                        context,
                    )?
                    .into()),
                }
            }),
            context,
        )
    }

    fn read(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let reader: JsNativeObject<ReadableStreamDefaultReader> =
            JsNativeObject::try_from(this.clone())?;
        Ok(ReadableStreamDefaultReader::read_impl(&reader, context)?.into())
    }

    fn release_lock(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let reader: JsNativeObject<ReadableStreamDefaultReader> =
            JsNativeObject::try_from(this.clone())?;
        ReadableStreamDefaultReader::release_impl(&reader, context)?;
        Ok(JsValue::undefined())
    }

    fn cancel(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let reader: JsNativeObject<ReadableStreamDefaultReader> =
            JsNativeObject::try_from(this.clone())?;
        Ok(ReadableStreamDefaultReader::cancel_impl(
            &reader,
            args.get_or_undefined(0),
            context,
        )?
        .into())
    }
}

impl NativeClass for ReadableStreamDefaultReaderClass {
    type Instance = ReadableStreamDefaultReader;

    const NAME: &'static str = "ReadableStreamDefaultReader";

    const LENGTH: usize = 1;

    fn constructor(
        _this: &JsNativeObject<ReadableStreamDefaultReader>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<ReadableStreamDefaultReader> {
        let stream: JsNativeObject<ReadableStream> =
            JsNativeObject::try_from(args.get_or_undefined(0).clone()).map_err(|_| {
                JsNativeError::typ()
                    .with_message("Expected a ReadableStream argument")
            })?;
        let reader = ReadableStream::acquire_reader(&stream, context)?;
        let inner = ReadableStreamDefaultReader {
            stream: reader.deref().stream.clone(),
        };
        // The freshly acquired handle is discarded; this instance takes over
        // the lock it installed.
        Ok(inner)
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let closed = Self::closed(class.context());
        class
            .accessor(js_string!("closed"), closed, Attribute::all())
            .method(
                js_string!("read"),
                0,
                NativeFunction::from_fn_ptr(Self::read),
            )
            .method(
                js_string!("releaseLock"),
                0,
                NativeFunction::from_fn_ptr(Self::release_lock),
            )
            .method(
                js_string!("cancel"),
                0,
                NativeFunction::from_fn_ptr(Self::cancel),
            );
        Ok(())
    }
}

pub struct ReadableStreamClass;

impl ReadableStreamClass {
    fn locked(context: &mut Context) -> Accessor {
        Accessor::new("locked").get(
            NativeFunction::from_fn_ptr(|this, _args, _context| {
                let stream: JsNativeObject<ReadableStream> =
                    JsNativeObject::try_from(this.clone())?;
                let locked = stream.deref().locked();
                Ok(locked.into())
            }),
            context,
        )
    }

    fn get_reader(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let stream: JsNativeObject<ReadableStream> =
            JsNativeObject::try_from(this.clone())?;
        let reader = ReadableStream::acquire_reader(&stream, context)?;
        Ok(reader.to_inner())
    }

    fn cancel(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let stream: JsNativeObject<ReadableStream> =
            JsNativeObject::try_from(this.clone())?;
        if stream.deref().locked() {
            return Err(JsNativeError::typ()
                .with_message("Cannot cancel a locked ReadableStream")
                .into());
        }
        Ok(ReadableStream::cancel(&stream, args.get_or_undefined(0), context)?.into())
    }

    fn tee(
        this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let stream: JsNativeObject<ReadableStream> =
            JsNativeObject::try_from(this.clone())?;
        let (branch_0, branch_1) = ReadableStream::tee(&stream, context)?;
        Ok(JsArray::from_iter([branch_0, branch_1], context).into())
    }

    fn pipe_to(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let stream: JsNativeObject<ReadableStream> =
            JsNativeObject::try_from(this.clone())?;
        let promise = pipe::pipe_to(
            &stream,
            args.get_or_undefined(0),
            args.get_or_undefined(1),
            context,
        )?;
        Ok(promise.into())
    }

    fn pipe_through(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let stream: JsNativeObject<ReadableStream> =
            JsNativeObject::try_from(this.clone())?;
        pipe::pipe_through(
            &stream,
            args.get_or_undefined(0),
            args.get_or_undefined(1),
            context,
        )
    }
}

impl NativeClass for ReadableStreamClass {
    type Instance = ReadableStream;

    const NAME: &'static str = "ReadableStream";

    fn constructor(
        _this: &JsNativeObject<ReadableStream>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<ReadableStream> {
        let source = match args.get_or_undefined(0) {
            value if value.is_undefined() => UnderlyingSource::empty(),
            value => {
                let obj = value.as_object().ok_or_else(|| {
                    JsNativeError::typ()
                        .with_message("Expected an underlying source object")
                })?;
                UnderlyingSource::from_object(obj, context)?
            }
        };
        let strategy =
            QueuingStrategy::from_value(args.get_or_undefined(1), context)?;

        Ok(ReadableStream {
            state: ReadableState::Readable,
            stored_error: JsValue::undefined(),
            queue: VecDeque::new(),
            queue_total_size: 0.0,
            high_water_mark: strategy.extract_high_water_mark(1.0),
            size_fn: strategy.size.clone(),
            source,
            started: false,
            pulling: false,
            pull_again: false,
            close_requested: false,
            disturbed: false,
            reader: None,
            controller: JsValue::undefined(),
        })
    }

    fn object_constructor(
        this: &JsNativeObject<Self::Instance>,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<()> {
        ReadableStream::attach_controller_and_start(this, context)
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let locked = Self::locked(class.context());
        class
            .accessor(js_string!("locked"), locked, Attribute::all())
            .method(
                js_string!("getReader"),
                0,
                NativeFunction::from_fn_ptr(Self::get_reader),
            )
            .method(
                js_string!("cancel"),
                0,
                NativeFunction::from_fn_ptr(Self::cancel),
            )
            .method(js_string!("tee"), 0, NativeFunction::from_fn_ptr(Self::tee))
            .method(
                js_string!("pipeTo"),
                1,
                NativeFunction::from_fn_ptr(Self::pipe_to),
            )
            .method(
                js_string!("pipeThrough"),
                1,
                NativeFunction::from_fn_ptr(Self::pipe_through),
            );
        Ok(())
    }
}

pub struct ReadableStreamApi;

impl strand_core::Api for ReadableStreamApi {
    fn init(self, context: &mut Context) {
        register_global_class::<ReadableStreamClass>(context)
            .expect("The `ReadableStream` class shouldn't exist yet");
        register_global_class::<ReadableStreamDefaultControllerClass>(context)
            .expect("The `ReadableStreamDefaultController` class shouldn't exist yet");
        register_global_class::<ReadableStreamDefaultReaderClass>(context)
            .expect("The `ReadableStreamDefaultReader` class shouldn't exist yet");
    }
}
