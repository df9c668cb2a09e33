mod common;

use common::{eval_wait, runtime, string_of};

#[test]
fn set_timeout_fires_after_delay() {
    let mut rt = runtime();
    let start = std::time::Instant::now();
    let value = eval_wait(
        &mut rt,
        r#"
        new Promise((resolve) => {
            setTimeout(() => resolve("fired"), 30);
        })
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "fired");
    assert!(start.elapsed() >= std::time::Duration::from_millis(30));
}

#[test]
fn zero_delay_runs_after_script_and_microtasks() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        new Promise((resolve) => {
            const order = [];
            setTimeout(() => {
                order.push("timer");
                resolve(order.join());
            }, 0);
            Promise.resolve().then(() => order.push("micro"));
            order.push("sync");
        })
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "sync,micro,timer");
}

#[test]
fn clear_timeout_before_expiry_prevents_invocation() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        new Promise((resolve) => {
            let fired = false;
            const id = setTimeout(() => { fired = true; }, 10);
            clearTimeout(id);
            setTimeout(() => resolve(fired), 50);
        })
        "#,
    )
    .unwrap();
    assert_eq!(value, boa_engine::JsValue::from(false));
}

#[test]
fn interval_repeats_until_cleared() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        new Promise((resolve) => {
            let count = 0;
            const id = setInterval(() => {
                count += 1;
                if (count === 3) {
                    clearInterval(id);
                    resolve(count);
                }
            }, 5);
        })
        "#,
    )
    .unwrap();
    assert_eq!(value, boa_engine::JsValue::from(3));
}

#[test]
fn timer_ids_are_unique_positive_integers() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const a = setTimeout(() => {}, 1000);
            const b = setTimeout(() => {}, 1000);
            clearTimeout(a);
            clearTimeout(b);
            return a > 0 && b > 0 && a !== b;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(value, boa_engine::JsValue::from(true));
}

#[test]
fn non_function_callback_is_a_registered_noop() {
    let mut rt = runtime();
    // Documented choice: a non-callable first argument still schedules and
    // returns an id.
    let value = eval_wait(
        &mut rt,
        r#"
        new Promise((resolve) => {
            const id = setTimeout("not-a-function", 0);
            setTimeout(() => resolve(id > 0), 10);
        })
        "#,
    )
    .unwrap();
    assert_eq!(value, boa_engine::JsValue::from(true));
}

#[test]
fn clearing_an_unknown_id_is_a_noop() {
    let mut rt = runtime();
    let value = eval_wait(&mut rt, "clearTimeout(123456); 'ok'").unwrap();
    assert_eq!(string_of(&value), "ok");
}

#[test]
fn queue_microtask_runs_before_timers() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        new Promise((resolve) => {
            const order = [];
            setTimeout(() => resolve(order.join()), 0);
            queueMicrotask(() => order.push("a"));
            queueMicrotask(() => order.push("b"));
        })
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "a,b");
}

#[test]
fn queue_microtask_requires_a_callable() {
    let mut rt = runtime();
    let err = eval_wait(&mut rt, "queueMicrotask(42)").unwrap_err();
    assert!(format!("{err}").contains("callable"));
}
