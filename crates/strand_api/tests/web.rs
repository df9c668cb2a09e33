mod common;

use boa_engine::JsValue;
use common::{eval_wait, runtime, string_of};

#[test]
fn btoa_atob_canonical_vectors() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const results = [];
            results.push(btoa("Man"));
            results.push(atob("c3VyZS4="));
            try {
                btoa("🚀");
                results.push("accepted");
            } catch (err) {
                results.push(String(err.message).includes("Latin1"));
            }
            return results.join("|");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "TWFu|sure.|true");
}

#[test]
fn atob_of_btoa_roundtrips_ascii() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const samples = ["", "a", "ab", "Hello, World!", "with spaces  "];
            return samples.every((s) => atob(btoa(s)) === s);
        })()
        "#,
    )
    .unwrap();
    assert_eq!(value, JsValue::from(true));
}

#[test]
fn text_codec_roundtrip_and_replacement() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const encoder = new TextEncoder();
            const decoder = new TextDecoder();
            const samples = ["Hello", "héllo wörld", "日本語", "🚀 emoji"];
            const roundtrip = samples.every(
                (s) => decoder.decode(encoder.encode(s)) === s
            );
            const replaced = decoder.decode(new Uint8Array([0xff, 0xfe, 0x41]));
            return `${roundtrip}|${replaced.endsWith("A")}|${encoder.encoding}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true|true|utf-8");
}

#[test]
fn fatal_decoder_throws_on_malformed_input() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const decoder = new TextDecoder("utf-8", { fatal: true });
            try {
                decoder.decode(new Uint8Array([0xff]));
                return "decoded";
            } catch (err) {
                return err.name;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "EncodingError");
}

#[test]
fn random_uuid_is_unique_and_well_formed() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const seen = new Set();
            const pattern = /^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$/;
            for (let i = 0; i < 100; i++) {
                const uuid = crypto.randomUUID();
                if (!pattern.test(uuid)) return `malformed: ${uuid}`;
                seen.add(uuid);
            }
            return seen.size;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(value, JsValue::from(100));
}

#[test]
fn get_random_values_fills_and_validates() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const bytes = new Uint8Array(64);
            const out = crypto.getRandomValues(bytes);
            const filled = out === bytes && bytes.some((b) => b !== 0);

            let floatRejected = false;
            try {
                crypto.getRandomValues(new Float64Array(4));
            } catch (err) {
                floatRejected = err instanceof TypeError;
            }

            let quotaRejected = false;
            try {
                crypto.getRandomValues(new Uint8Array(65537));
            } catch (err) {
                quotaRejected = err instanceof RangeError;
            }

            return `${filled},${floatRejected},${quotaRejected}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true,true,true");
}

#[test]
fn abort_controller_one_shot_semantics() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const controller = new AbortController();
            const signal = controller.signal;
            const events = [];
            signal.addEventListener("abort", () => events.push("before"));
            controller.abort("why");
            signal.addEventListener("abort", () => events.push("after"));
            controller.abort("again");
            return [
                signal.aborted,
                signal.reason,
                events.join("+"),
            ].join("|");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true|why|before");
}

#[test]
fn abort_reason_defaults_to_abort_error() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const controller = new AbortController();
            controller.abort();
            const signal = controller.signal;
            try {
                signal.throwIfAborted();
                return "no throw";
            } catch (err) {
                return err.name;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "AbortError");
}

#[test]
fn abort_signal_abort_is_born_aborted() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const signal = AbortSignal.abort("done");
            let fired = false;
            signal.addEventListener("abort", () => { fired = true; });
            return `${signal.aborted},${signal.reason},${fired}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true,done,false");
}

#[test]
fn event_dispatch_is_ordered_and_stoppable() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const target = new EventTarget();
            const calls = [];
            target.addEventListener("ping", () => calls.push("first"));
            target.addEventListener("ping", (ev) => {
                calls.push("second");
                ev.stopImmediatePropagation();
            });
            target.addEventListener("ping", () => calls.push("third"));
            target.dispatchEvent(new Event("ping"));
            return calls.join(",");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "first,second");
}

#[test]
fn once_listeners_fire_exactly_once() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const target = new EventTarget();
            let count = 0;
            target.addEventListener("tick", () => { count += 1; }, { once: true });
            target.dispatchEvent(new Event("tick"));
            target.dispatchEvent(new Event("tick"));
            return count;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(value, JsValue::from(1));
}

#[test]
fn listener_exceptions_do_not_stop_siblings() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const target = new EventTarget();
            const calls = [];
            target.addEventListener("go", () => { throw new Error("boom"); });
            target.addEventListener("go", () => calls.push("survived"));
            target.dispatchEvent(new Event("go"));
            return calls.join();
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "survived");
}

#[test]
fn dispatch_event_reports_default_prevented() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const target = new EventTarget();
            target.addEventListener("submit", (ev) => ev.preventDefault());
            const cancelable = target.dispatchEvent(
                new Event("submit", { cancelable: true })
            );
            const plain = target.dispatchEvent(new Event("submit"));
            return `${cancelable},${plain}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "false,true");
}

#[test]
fn custom_event_carries_detail() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const target = new EventTarget();
            let seen = null;
            target.addEventListener("data", (ev) => { seen = ev.detail.answer; });
            target.dispatchEvent(new CustomEvent("data", { detail: { answer: 42 } }));
            return seen;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(value, JsValue::from(42));
}

#[test]
fn remove_event_listener_matches_identity() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const target = new EventTarget();
            let count = 0;
            const listener = () => { count += 1; };
            target.addEventListener("e", listener);
            target.removeEventListener("e", listener);
            target.addEventListener("e", listener);
            target.removeEventListener("e", () => {});
            target.dispatchEvent(new Event("e"));
            return count;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(value, JsValue::from(1));
}

#[test]
fn url_parses_and_exposes_components() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const url = new URL("https://user:pw@example.com:8443/a/b?x=1&y=2#frag");
            return [
                url.protocol,
                url.hostname,
                url.port,
                url.pathname,
                url.search,
                url.hash,
                url.searchParams.get("y"),
            ].join("|");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(
        string_of(&value),
        "https:|example.com|8443|/a/b|?x=1&y=2|#frag|2"
    );
}

#[test]
fn invalid_url_throws_type_error() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            try {
                new URL("::not a url::");
                return "parsed";
            } catch (err) {
                return `${err instanceof TypeError},${URL.canParse("::nope::")}`;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true,false");
}

#[test]
fn search_params_mutations_write_back_to_url() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const url = new URL("https://example.com/path?a=1");
            url.searchParams.append("b", "2");
            url.searchParams.set("a", "9");
            return url.href;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "https://example.com/path?a=9&b=2");
}

#[test]
fn process_exposes_the_host_environment() {
    // env is seeded at registration, so the variable must exist first
    std::env::set_var("STRAND_TEST_MARKER", "present");
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const cwd = process.cwd();
            process.setenv("STRAND_TEST_SETENV", "written");
            return [
                process.pid > 0,
                Array.isArray(process.argv),
                typeof cwd === "string" && cwd.length > 0,
                process.env.STRAND_TEST_MARKER,
                process.getenv("STRAND_TEST_SETENV"),
            ].join("|");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true|true|true|present|written");
    assert_eq!(std::env::var("STRAND_TEST_SETENV").unwrap(), "written");
}

#[test]
fn chdir_validates_its_argument() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const results = [];
            try {
                process.chdir(42);
                results.push("accepted");
            } catch (err) {
                results.push(err instanceof TypeError);
            }
            try {
                process.chdir("/definitely/not/a/real/path/3141");
                results.push("accepted");
            } catch (err) {
                results.push("rejected");
            }
            return results.join(",");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true,rejected");
}
