//! The streaming HTTP engine.
//!
//! A fetch is a background task on the I/O runtime talking to the loop
//! thread through three channels: an upload channel fed one chunk per credit
//! from the request's ReadableStream, a pull-credit channel that requests
//! one response chunk at a time (so stream backpressure reaches the socket),
//! and an abort channel fired by the request's AbortSignal. All engine-side
//! state lives in the loop-local handle table; the task ships only the
//! handle and plain bytes.

use boa_engine::{
    object::builtins::JsFunction, value::TryFromJs, Context, JsError, JsNativeError,
    JsValue,
};
use bytes::Bytes;
use once_cell::sync::Lazy;
use strand_core::{
    event_loop::with_event_loop, native::JsNativeObject, promise::Deferred,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use crate::{
    abort::{add_native_observer, AbortSignal},
    handles::{self, HandleId},
    idl::{bytes_to_uint8_array, BufferSource, JsBufferSource},
    stream::{
        callback, promise_then,
        readable::{
            stream_of_controller, ReadableStream, ReadableStreamDefaultReader,
            UnderlyingSource,
        },
        QueuingStrategy,
    },
};

use super::{body::Body, response::{Response, ResponseClass}};

static CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!("strand/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to build the HTTP client")
});

/// The two request-body shapes the engine sends, plus empty.
pub(crate) enum FetchBody {
    Empty,
    /// Materialized bytes, sent in one shot.
    Bytes(Vec<u8>),
    /// A ReadableStream pumped chunk-by-chunk; sent with
    /// `Transfer-Encoding: chunked`.
    Stream(JsValue),
}

struct UploadPump {
    reader: JsValue,
    chunk_tx: Option<UnboundedSender<Result<Bytes, std::io::Error>>>,
}

struct FetchOp {
    response: Option<Deferred>,
    body_stream: Option<JsNativeObject<ReadableStream>>,
    pending_pull: Option<Deferred>,
    pull_tx: Option<UnboundedSender<()>>,
    abort_tx: Option<UnboundedSender<()>>,
    upload: Option<UploadPump>,
    progress: Option<JsFunction>,
    abort_reason: Option<JsValue>,
}

fn type_error(message: String, context: &mut Context) -> JsValue {
    JsError::from_native(JsNativeError::typ().with_message(message)).to_opaque(context)
}

fn op_handle_value(op: HandleId) -> JsValue {
    JsValue::from(op as f64)
}

fn op_handle_of(value: &JsValue) -> HandleId {
    value.as_number().map(|id| id as HandleId).unwrap_or_default()
}

/// Starts a request. The deferred settles with a `Response` once status and
/// headers arrive, or rejects with a `TypeError` (or the abort reason).
pub(crate) fn execute(
    method: http::Method,
    url: url::Url,
    headers: http::HeaderMap,
    body: FetchBody,
    signal: Option<JsNativeObject<AbortSignal>>,
    progress: Option<JsFunction>,
    deferred: Deferred,
    context: &mut Context,
) -> boa_engine::JsResult<()> {
    let (abort_tx, mut abort_rx) = unbounded_channel::<()>();
    let (pull_tx, mut pull_rx) = unbounded_channel::<()>();

    let op = handles::insert(FetchOp {
        response: Some(deferred),
        body_stream: None,
        pending_pull: None,
        pull_tx: Some(pull_tx),
        abort_tx: Some(abort_tx),
        upload: None,
        progress,
        abort_reason: None,
    });

    // Streaming uploads read from the JS stream on the loop thread, one
    // chunk per credit from the network task.
    let mut upload_rx = None;
    if let FetchBody::Stream(stream_value) = &body {
        let stream: JsNativeObject<ReadableStream> =
            JsNativeObject::try_from(stream_value.clone()).map_err(|_| {
                JsNativeError::typ()
                    .with_message("Request body is not a ReadableStream")
            })?;
        let reader = ReadableStream::acquire_reader(&stream, context)?;
        let (chunk_tx, chunk_rx) = unbounded_channel();
        handles::with(op, |state: &mut FetchOp| {
            state.upload = Some(UploadPump {
                reader: reader.to_inner(),
                chunk_tx: Some(chunk_tx),
            });
        });
        upload_rx = Some(chunk_rx);
    }

    if let Some(signal) = &signal {
        let observer = callback(
            context,
            op_handle_value(op),
            |_this, args, op_value, context| {
                let reason = args.get_or_undefined(0).clone();
                handle_abort(op_handle_of(op_value), &reason, context);
                Ok(JsValue::undefined())
            },
        );
        add_native_observer(signal, observer.into(), context)?;
    }

    let (guard, sender) = with_event_loop(|event_loop| {
        (event_loop.op_guard(), event_loop.task_sender())
    });

    let task_sender = sender.clone();
    with_event_loop(|event_loop| {
        event_loop.io().spawn(async move {
            let _guard = guard;
            let sender = task_sender;

            let mut request = CLIENT.request(method, url).headers(headers);
            request = match body {
                FetchBody::Empty => request,
                FetchBody::Bytes(bytes) => request.body(bytes),
                FetchBody::Stream(_) => {
                    let chunk_rx = upload_rx.expect("stream body has a pump");
                    let upload_stream = futures::stream::unfold(
                        (chunk_rx, sender.clone()),
                        move |(mut chunk_rx, sender)| async move {
                            sender.post(move |context| pump_upload(op, context));
                            chunk_rx
                                .recv()
                                .await
                                .map(|item| (item, (chunk_rx, sender)))
                        },
                    );
                    request.body(reqwest::Body::wrap_stream(upload_stream))
                }
            };

            let send = request.send();
            tokio::pin!(send);
            let response = tokio::select! {
                _ = abort_rx.recv() => return,
                response = &mut send => response,
            };

            let mut response = match response {
                Ok(response) => response,
                Err(err) => {
                    let message = err.to_string();
                    sender.post(move |context| fail(op, message, context));
                    return;
                }
            };

            let status = response.status().as_u16();
            let status_text = response
                .status()
                .canonical_reason()
                .unwrap_or_default()
                .to_string();
            let response_headers = response.headers().clone();
            let final_url = response.url().clone();
            sender.post(move |context| {
                deliver_response(
                    op,
                    status,
                    status_text,
                    response_headers,
                    final_url,
                    context,
                )
            });

            // One response chunk per pull credit; the socket stalls while
            // the JS side is saturated.
            loop {
                let credit = tokio::select! {
                    _ = abort_rx.recv() => None,
                    credit = pull_rx.recv() => credit,
                };
                if credit.is_none() {
                    break;
                }
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        let bytes = bytes.to_vec();
                        sender.post(move |context| deliver_chunk(op, bytes, context));
                    }
                    Ok(None) => {
                        sender.post(move |context| finish_body(op, context));
                        break;
                    }
                    Err(err) => {
                        let message = err.to_string();
                        sender.post(move |context| fail(op, message, context));
                        break;
                    }
                }
            }
        });
    });

    Ok(())
}

/// Converts a stream chunk (string or BufferSource) into raw bytes.
fn chunk_to_bytes(
    value: &JsValue,
    context: &mut Context,
) -> Result<Vec<u8>, JsError> {
    if let Some(string) = value.as_string() {
        return Ok(String::from_utf16_lossy(string.as_slice()).into_bytes());
    }
    JsBufferSource::try_from_js(value, context)
        .and_then(|source| source.clone_data(context))
}

/// Reads one chunk from the request body stream and feeds the upload
/// channel. Closing the channel (on done or error) ends the wire body.
fn pump_upload(op: HandleId, context: &mut Context) {
    let reader = handles::with(op, |state: &mut FetchOp| {
        state.upload.as_ref().map(|upload| upload.reader.clone())
    })
    .flatten();
    let Some(reader) = reader else { return };
    let reader: JsNativeObject<ReadableStreamDefaultReader> =
        match JsNativeObject::try_from(reader) {
            Ok(reader) => reader,
            Err(_) => return,
        };
    let promise = match ReadableStreamDefaultReader::read_impl(&reader, context) {
        Ok(promise) => promise,
        Err(_) => {
            close_upload(op, Some("request body stream failed".into()));
            return;
        }
    };

    let on_chunk = callback(
        context,
        op_handle_value(op),
        |_this, args, op_value, context| {
            let op = op_handle_of(op_value);
            let result = args.get_or_undefined(0);
            let Some(result) = result.as_object() else {
                return Ok(JsValue::undefined());
            };
            let done = result
                .get(boa_engine::js_string!("done"), context)?
                .to_boolean();
            if done {
                close_upload(op, None);
                return Ok(JsValue::undefined());
            }
            let value = result.get(boa_engine::js_string!("value"), context)?;
            match chunk_to_bytes(&value, context) {
                Ok(bytes) => {
                    handles::with(op, |state: &mut FetchOp| {
                        if let Some(upload) = &state.upload {
                            if let Some(tx) = &upload.chunk_tx {
                                let _ = tx.send(Ok(Bytes::from(bytes)));
                            }
                        }
                    });
                }
                Err(_) => {
                    close_upload(
                        op,
                        Some("request body chunk was not bytes or text".into()),
                    );
                }
            }
            Ok(JsValue::undefined())
        },
    );
    let on_error = callback(
        context,
        op_handle_value(op),
        |_this, _args, op_value, _context| {
            close_upload(op_handle_of(op_value), Some("request body errored".into()));
            Ok(JsValue::undefined())
        },
    );
    promise_then(&promise, Some(on_chunk), Some(on_error), context);
}

fn close_upload(op: HandleId, error: Option<String>) {
    handles::with(op, |state: &mut FetchOp| {
        if let Some(upload) = state.upload.as_mut() {
            if let Some(tx) = upload.chunk_tx.take() {
                if let Some(message) = error {
                    let _ = tx.send(Err(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        message,
                    )));
                }
            }
        }
    });
}

/// Status and headers arrived: build the Response with a pull-driven body
/// stream and settle the fetch promise.
fn deliver_response(
    op: HandleId,
    status: u16,
    status_text: String,
    headers: http::HeaderMap,
    url: url::Url,
    context: &mut Context,
) {
    let pull = callback(
        context,
        op_handle_value(op),
        |_this, args, op_value, context| {
            let op = op_handle_of(op_value);
            // One credit per pull; the pull promise settles when the chunk
            // (or end-of-body) comes back, throttling re-pulls.
            let deferred = Deferred::new(context)?;
            let accepted = handles::with(op, |state: &mut FetchOp| {
                if let Some(tx) = &state.pull_tx {
                    if tx.send(()).is_ok() {
                        state.pending_pull = Some(deferred.clone());
                        return true;
                    }
                }
                false
            })
            .unwrap_or(false);
            if !accepted {
                let controller = args.get_or_undefined(0);
                if let Ok(stream) = stream_of_controller(controller) {
                    let _ = ReadableStream::request_close(&stream, context);
                }
                return Ok(JsValue::undefined());
            }
            Ok(deferred.to_value())
        },
    );
    let cancel = callback(
        context,
        op_handle_value(op),
        |_this, _args, op_value, _context| {
            // Cancelling the body tears the whole operation down.
            if let Some(mut state) = handles::take::<FetchOp>(op_handle_of(op_value)) {
                if let Some(abort_tx) = state.abort_tx.take() {
                    let _ = abort_tx.send(());
                }
            }
            Ok(JsValue::undefined())
        },
    );

    let stream = match ReadableStream::create(
        UnderlyingSource::native(Some(pull), Some(cancel)),
        &QueuingStrategy::default(),
        context,
    ) {
        Ok(stream) => stream,
        Err(err) => {
            strand_core::event_loop::report_error(&err);
            return;
        }
    };

    let deferred = match handles::with(op, |state: &mut FetchOp| {
        state.body_stream = Some(stream.clone());
        state.response.take()
    }) {
        Some(deferred) => deferred,
        None => return,
    };

    let response = Response::from_network(
        status,
        status_text,
        headers,
        Body::from_stream(stream.to_inner()),
        url,
        context,
    )
    .and_then(|response| JsNativeObject::new::<ResponseClass>(response, context));
    let Some(deferred) = deferred else { return };
    match response {
        Ok(response) => deferred.resolve(&response.to_inner(), context),
        Err(err) => deferred.reject_with(&err, context),
    }
}

/// One network chunk: progress hook, stream delivery, pull settle.
fn deliver_chunk(op: HandleId, bytes: Vec<u8>, context: &mut Context) {
    let parts = handles::with(op, |state: &mut FetchOp| {
        (
            state.body_stream.clone(),
            state.pending_pull.take(),
            state.progress.clone(),
        )
    });
    let Some((stream, pending_pull, progress)) = parts else {
        return;
    };

    if let Some(progress) = progress {
        let _ = progress.call(
            &JsValue::undefined(),
            &[JsValue::from(bytes.len() as f64), JsValue::from(false)],
            context,
        );
    }

    if let Some(stream) = stream {
        match bytes_to_uint8_array(bytes, context) {
            Ok(view) => {
                if let Err(err) = ReadableStream::enqueue(&stream, &view.into(), context)
                {
                    strand_core::event_loop::report_error(&err);
                }
            }
            Err(err) => strand_core::event_loop::report_error(&err),
        }
    }
    if let Some(pending_pull) = pending_pull {
        pending_pull.resolve(&JsValue::undefined(), context);
    }
}

/// End of body: final progress tick, close the stream, drop the operation.
fn finish_body(op: HandleId, context: &mut Context) {
    let Some(mut state) = handles::take::<FetchOp>(op) else {
        return;
    };
    if let Some(progress) = &state.progress {
        let _ = progress.call(
            &JsValue::undefined(),
            &[JsValue::from(0), JsValue::from(true)],
            context,
        );
    }
    if let Some(stream) = &state.body_stream {
        let _ = ReadableStream::request_close(stream, context);
    }
    if let Some(pending_pull) = state.pending_pull.take() {
        pending_pull.resolve(&JsValue::undefined(), context);
    }
}

/// A failure at any stage: DNS, connect, TLS, read, write or decode. The
/// caller-observable error is a `TypeError` unless the signal fired first,
/// in which case the abort reason wins.
fn fail(op: HandleId, message: String, context: &mut Context) {
    let Some(mut state) = handles::take::<FetchOp>(op) else {
        return;
    };
    let reason = state
        .abort_reason
        .take()
        .unwrap_or_else(|| type_error(format!("fetch failed: {message}"), context));
    if let Some(deferred) = state.response.take() {
        deferred.reject(&reason, context);
    }
    if let Some(stream) = &state.body_stream {
        ReadableStream::error(stream, &reason, context);
    }
    if let Some(pending_pull) = state.pending_pull.take() {
        pending_pull.reject(&reason, context);
    }
}

/// The request's signal fired: tear down the socket, error the body stream
/// with the exact reason, reject everything outstanding with that reason.
fn handle_abort(op: HandleId, reason: &JsValue, context: &mut Context) {
    let Some(mut state) = handles::take::<FetchOp>(op) else {
        return;
    };
    state.abort_reason = Some(reason.clone());
    if let Some(abort_tx) = state.abort_tx.take() {
        let _ = abort_tx.send(());
    }
    if let Some(deferred) = state.response.take() {
        deferred.reject(reason, context);
    }
    if let Some(stream) = &state.body_stream {
        ReadableStream::error(stream, reason, context);
    }
    if let Some(pending_pull) = state.pending_pull.take() {
        pending_pull.reject(reason, context);
    }
    close_upload_in_state(&mut state);
}

fn close_upload_in_state(state: &mut FetchOp) {
    if let Some(upload) = state.upload.as_mut() {
        upload.chunk_tx.take();
    }
}
