mod common;

use boa_engine::JsValue;
use common::{eval_wait, runtime, string_of};

#[test]
fn stream_echo_delivers_chunks_in_order() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const stream = new ReadableStream({
                start(controller) {
                    controller.enqueue("Hello");
                    controller.enqueue(" ");
                    controller.enqueue("World");
                    controller.close();
                },
            });
            const reader = stream.getReader();
            let text = "";
            let chunks = 0;
            for (;;) {
                const { value, done } = await reader.read();
                if (done) break;
                chunks += 1;
                text += value;
            }
            return `${chunks}:${text}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "3:Hello World");
}

#[test]
fn reads_are_fulfilled_in_call_order() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            let controller;
            const stream = new ReadableStream({
                start(c) { controller = c; },
            });
            const reader = stream.getReader();
            const first = reader.read();
            const second = reader.read();
            controller.enqueue("one");
            controller.enqueue("two");
            const results = await Promise.all([first, second]);
            return results.map((r) => r.value).join(",");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "one,two");
}

#[test]
fn close_drains_buffered_chunks_first() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const stream = new ReadableStream({
                start(controller) {
                    controller.enqueue("left over");
                    controller.close();
                },
            });
            const reader = stream.getReader();
            const first = await reader.read();
            const second = await reader.read();
            return `${first.value}/${first.done}/${second.done}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "left over/false/true");
}

#[test]
fn controller_error_rejects_queued_reads() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            let controller;
            const stream = new ReadableStream({ start(c) { controller = c; } });
            const reader = stream.getReader();
            const pending = reader.read();
            controller.error(new Error("kaboom"));
            try {
                await pending;
                return "resolved";
            } catch (err) {
                return err.message;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "kaboom");
}

#[test]
fn locking_is_exclusive_until_released() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const stream = new ReadableStream();
            const reader = stream.getReader();
            const lockedWhileHeld = stream.locked;
            let threw = false;
            try {
                stream.getReader();
            } catch (err) {
                threw = err instanceof TypeError;
            }
            reader.releaseLock();
            const lockedAfter = stream.locked;
            stream.getReader();
            return `${lockedWhileHeld},${threw},${lockedAfter}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true,true,false");
}

#[test]
fn tee_branches_both_observe_the_source() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const stream = new ReadableStream({
                start(controller) {
                    for (const chunk of ["a", "b", "c"]) controller.enqueue(chunk);
                    controller.close();
                },
            });
            const [left, right] = stream.tee();
            async function drain(branch) {
                const reader = branch.getReader();
                let text = "";
                for (;;) {
                    const { value, done } = await reader.read();
                    if (done) break;
                    text += value;
                }
                return text;
            }
            const [a, b] = await Promise.all([drain(left), drain(right)]);
            return `${a}|${b}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "abc|abc");
}

#[test]
fn writable_stream_serializes_sink_writes() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const written = [];
            let inFlight = 0;
            let overlapped = false;
            const sink = new WritableStream({
                write(chunk) {
                    if (inFlight > 0) overlapped = true;
                    inFlight += 1;
                    written.push(chunk);
                    return new Promise((resolve) => setTimeout(() => {
                        inFlight -= 1;
                        resolve();
                    }, 1));
                },
            });
            const writer = sink.getWriter();
            writer.write("x");
            writer.write("y");
            writer.write("z");
            await writer.close();
            return `${written.join("")},${overlapped}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "xyz,false");
}

#[test]
fn writable_abort_rejects_queued_writes() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const sink = new WritableStream({
                write() {
                    return new Promise(() => {});
                },
            });
            const writer = sink.getWriter();
            writer.write("first");
            const queued = writer.write("second");
            await writer.abort(new Error("stop"));
            try {
                await queued;
                return "resolved";
            } catch (err) {
                return err.message;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "stop");
}

#[test]
fn pipe_through_transforms_to_uppercase() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const source = new ReadableStream({
                start(controller) {
                    for (const chunk of ["hello", " ", "world"]) {
                        controller.enqueue(chunk);
                    }
                    controller.close();
                },
            });
            const upper = new TransformStream({
                transform(chunk, controller) {
                    controller.enqueue(chunk.toUpperCase());
                },
            });
            const piped = source.pipeThrough(upper);
            if (!(piped instanceof ReadableStream)) return "not a stream";
            const reader = piped.getReader();
            let text = "";
            for (;;) {
                const { value, done } = await reader.read();
                if (done) break;
                text += value;
            }
            return text;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "HELLO WORLD");
}

#[test]
fn pipe_through_rejects_malformed_pairs() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const source = new ReadableStream();
            const failures = [];
            for (const pair of [null, {}, { readable: new ReadableStream() }]) {
                try {
                    source.pipeThrough(pair);
                    failures.push("accepted");
                } catch (err) {
                    failures.push(err instanceof TypeError ? "TypeError" : "other");
                }
            }
            return failures.join();
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "TypeError,TypeError,TypeError");
}

#[test]
fn pipe_to_preserves_order_and_count() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const chunks = ["one", "two", "three", "four"];
            const source = new ReadableStream({
                start(controller) {
                    for (const chunk of chunks) controller.enqueue(chunk);
                    controller.close();
                },
            });
            const collected = [];
            const sink = new WritableStream({
                write(chunk) { collected.push(chunk); },
            });
            await source.pipeTo(sink);
            return collected.join(",");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "one,two,three,four");
}

#[test]
fn abort_during_pipe_to_rejects_with_the_signal_reason() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            let sent = 0;
            const source = new ReadableStream({
                start(controller) {
                    const id = setInterval(() => {
                        sent += 1;
                        if (sent > 20) {
                            clearInterval(id);
                            controller.close();
                            return;
                        }
                        controller.enqueue(`chunk-${sent}`);
                    }, 10);
                },
            });
            const received = [];
            const sink = new WritableStream({
                write(chunk) { received.push(chunk); },
            });
            const controller = new AbortController();
            setTimeout(() => controller.abort(), 50);
            try {
                await source.pipeTo(sink, { signal: controller.signal });
                return "completed";
            } catch (err) {
                const partial = received.length > 0 && received.length < 20;
                return `${err.name},${partial}`;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "AbortError,true");
}

#[test]
fn pipe_to_with_already_aborted_signal_never_reads() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const source = new ReadableStream({
                start(controller) {
                    controller.enqueue("never delivered");
                },
            });
            let writes = 0;
            const sink = new WritableStream({
                write() { writes += 1; },
            });
            try {
                await source.pipeTo(sink, { signal: AbortSignal.abort("early") });
                return "completed";
            } catch (err) {
                return `${err},${writes === 0}`;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "early,true");
}

#[test]
fn non_writable_destination_is_a_type_error() {
    let mut rt = runtime();
    let err = eval_wait(
        &mut rt,
        "new ReadableStream().pipeTo({ write() {} })",
    )
    .unwrap_err();
    assert!(format!("{err}").contains("WritableStream"));
}

#[test]
fn backpressure_defers_pulls_until_reads_drain() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            let pulls = 0;
            const stream = new ReadableStream(
                {
                    pull(controller) {
                        pulls += 1;
                        controller.enqueue(pulls);
                    },
                },
                new CountQueuingStrategy({ highWaterMark: 2 })
            );
            // Give the loop a turn: pulls stop once the queue reaches the
            // high water mark.
            await new Promise((resolve) => setTimeout(resolve, 10));
            const before = pulls;
            const reader = stream.getReader();
            await reader.read();
            await new Promise((resolve) => setTimeout(resolve, 10));
            return before <= 3 && pulls > before;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(value, JsValue::from(true));
}

#[test]
fn queuing_strategy_rejects_invalid_high_water_mark() {
    let mut rt = runtime();
    let err = eval_wait(
        &mut rt,
        "new ReadableStream({}, { highWaterMark: -1 })",
    )
    .unwrap_err();
    assert!(format!("{err}").contains("highWaterMark"));
}
