mod common;

use common::{eval_wait, runtime, string_of};

#[test]
fn headers_surface() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const headers = new Headers({ "X-One": "1" });
            headers.append("Accept", "text/html");
            headers.append("accept", "application/json");
            headers.set("X-One", "replaced");
            headers.delete("missing");
            const entries = [...headers].map(([k, v]) => `${k}=${v}`);
            return [
                headers.get("ACCEPT"),
                headers.has("x-one"),
                entries.join(";"),
            ].join("|");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(
        string_of(&value),
        "text/html, application/json|true|accept=text/html, application/json;x-one=replaced"
    );
}

#[test]
fn invalid_header_names_throw_type_errors() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const headers = new Headers();
            const outcomes = [];
            for (const [name, value] of [["bad name", "v"], ["ok", "bad "]]) {
                try {
                    headers.set(name, value);
                    outcomes.push("accepted");
                } catch (err) {
                    outcomes.push(err instanceof TypeError);
                }
            }
            return outcomes.join();
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true,true");
}

#[test]
fn request_validation() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const outcomes = [];
            try {
                new Request("not a url");
            } catch (err) {
                outcomes.push(err instanceof TypeError);
            }
            try {
                new Request("https://example.com", { method: "TRACE" });
            } catch (err) {
                outcomes.push(err instanceof TypeError);
            }
            try {
                new Request("https://example.com", { method: "GET", body: "nope" });
            } catch (err) {
                outcomes.push(err instanceof TypeError);
            }
            const ok = new Request("https://example.com/x", {
                method: "post",
                body: "data",
            });
            outcomes.push(ok.method === "POST");
            outcomes.push(ok.headers.get("content-type").startsWith("text/plain"));
            return outcomes.join();
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true,true,true,true,true");
}

#[test]
fn response_constructor_validates_status() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const outcomes = [];
            for (const status of [199, 600, 250.5]) {
                try {
                    new Response("x", { status });
                    outcomes.push("accepted");
                } catch (err) {
                    outcomes.push(err instanceof RangeError);
                }
            }
            const resp = new Response("body", { status: 404, statusText: "Nope" });
            outcomes.push(`${resp.status}/${resp.statusText}/${resp.ok}`);
            return outcomes.join("|");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true|true|true|404/Nope/false");
}

#[test]
fn response_body_accessors() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const resp = Response.json({ message: "Hello" });
            const clone = resp.clone();
            const parsed = await resp.json();
            const text = await clone.text();
            let reused;
            try {
                await resp.text();
                reused = "allowed";
            } catch (err) {
                reused = err instanceof TypeError;
            }
            return [
                parsed.message,
                text,
                resp.headers.get("content-type"),
                resp.bodyUsed,
                reused,
            ].join("|");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(
        string_of(&value),
        "Hello|{\"message\":\"Hello\"}|application/json|true|true"
    );
}

#[test]
fn response_clone_requires_unused_body() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const resp = new Response("payload");
            await resp.text();
            try {
                resp.clone();
                return "cloned";
            } catch (err) {
                return err instanceof TypeError;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true");
}

#[test]
fn fetch_gets_a_body_from_a_local_server() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/hello")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("Hello from the wire")
        .create();

    let mut rt = runtime();
    let script = format!(
        r#"
        (async () => {{
            const resp = await fetch("{url}/hello");
            const text = await resp.text();
            return [resp.status, resp.ok, resp.headers.get("content-type"), text].join("|");
        }})()
        "#,
        url = server.url(),
    );
    let value = eval_wait(&mut rt, &script).unwrap();
    assert_eq!(string_of(&value), "200|true|text/plain|Hello from the wire");
    mock.assert();
}

#[test]
fn fetch_posts_a_string_body() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/echo")
        .match_body("ping")
        .with_status(201)
        .with_body("pong")
        .create();

    let mut rt = runtime();
    let script = format!(
        r#"
        (async () => {{
            const resp = await fetch("{url}/echo", {{ method: "POST", body: "ping" }});
            return `${{resp.status}}:${{await resp.text()}}`;
        }})()
        "#,
        url = server.url(),
    );
    let value = eval_wait(&mut rt, &script).unwrap();
    assert_eq!(string_of(&value), "201:pong");
    mock.assert();
}

#[test]
fn fetch_streams_a_readable_stream_request_body() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/upload")
        .match_body("{\"message\":\"Hello\"}")
        .with_status(200)
        .with_body("accepted")
        .create();

    let mut rt = runtime();
    let script = format!(
        r#"
        (async () => {{
            const encoder = new TextEncoder();
            const body = new ReadableStream({{
                start(controller) {{
                    controller.enqueue(encoder.encode('{{"message":'));
                    controller.enqueue(encoder.encode('"Hello"}}'));
                    controller.close();
                }},
            }});
            const resp = await fetch("{url}/upload", {{
                method: "POST",
                headers: {{ "content-type": "application/json" }},
                body,
            }});
            const text = await resp.text();
            return resp.status >= 200 && resp.status < 300 && text.length > 0
                ? `ok:${{text}}`
                : `bad:${{resp.status}}`;
        }})()
        "#,
        url = server.url(),
    );
    let value = eval_wait(&mut rt, &script).unwrap();
    assert_eq!(string_of(&value), "ok:accepted");
    mock.assert();
}

#[test]
fn fetch_response_body_is_a_readable_stream() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/stream")
        .with_status(200)
        .with_body("chunked body content")
        .create();

    let mut rt = runtime();
    let script = format!(
        r#"
        (async () => {{
            const resp = await fetch("{url}/stream");
            const body = resp.body;
            if (!(body instanceof ReadableStream)) return "not a stream";
            const reader = body.getReader();
            const decoder = new TextDecoder();
            let text = "";
            for (;;) {{
                const {{ value, done }} = await reader.read();
                if (done) break;
                text += decoder.decode(value, {{ stream: true }});
            }}
            return text;
        }})()
        "#,
        url = server.url(),
    );
    let value = eval_wait(&mut rt, &script).unwrap();
    assert_eq!(string_of(&value), "chunked body content");
}

#[test]
fn fetch_sends_multipart_form_data() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/form")
        .match_header(
            "content-type",
            mockito::Matcher::Regex("^multipart/form-data; boundary=.+$".into()),
        )
        .match_body(mockito::Matcher::Regex(
            "(?s)name=\"message\"\r\n\r\nHello.*filename=\"a.txt\"".into(),
        ))
        .with_status(200)
        .with_body("ok")
        .create();

    let mut rt = runtime();
    let script = format!(
        r#"
        (async () => {{
            const form = new FormData();
            form.append("message", "Hello");
            form.append("upload", new Blob(["attached"], {{ type: "text/plain" }}), "a.txt");
            const resp = await fetch("{url}/form", {{ method: "POST", body: form }});
            return `${{resp.status}}:${{await resp.text()}}`;
        }})()
        "#,
        url = server.url(),
    );
    let value = eval_wait(&mut rt, &script).unwrap();
    assert_eq!(string_of(&value), "200:ok");
    mock.assert();
}

#[test]
fn fetch_rejects_unresolvable_hosts_with_type_error() {
    let mut rt = runtime();
    let err = eval_wait(
        &mut rt,
        "fetch(\"https://nonexistent-domain-12345.invalid/\")",
    )
    .unwrap_err();
    let message = format!("{err}");
    assert!(message.contains("fetch failed"), "{message}");
}

#[test]
fn fetch_rejects_invalid_urls_synchronously() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            try {
                fetch("not a url at all");
                return "started";
            } catch (err) {
                return err instanceof TypeError;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "true");
}

#[test]
fn fetch_with_pre_aborted_signal_rejects_with_the_reason() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            try {
                await fetch("https://example.com/", {
                    signal: AbortSignal.abort("stopped before start"),
                });
                return "completed";
            } catch (err) {
                return err;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "stopped before start");
}

#[test]
fn aborting_fetch_mid_body_errors_the_stream() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/slow")
        .with_status(200)
        .with_chunked_body(|writer| {
            use std::io::Write;
            for _ in 0..200 {
                writer.write_all(&[b'x'; 1024])?;
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
            Ok(())
        })
        .create();

    let mut rt = runtime();
    let script = format!(
        r#"
        (async () => {{
            const controller = new AbortController();
            const resp = await fetch("{url}/slow", {{ signal: controller.signal }});
            const reader = resp.body.getReader();
            await reader.read();
            controller.abort();
            try {{
                for (;;) {{
                    const {{ done }} = await reader.read();
                    if (done) return "drained";
                }}
            }} catch (err) {{
                return err.name;
            }}
        }})()
        "#,
        url = server.url(),
    );
    let value = eval_wait(&mut rt, &script).unwrap();
    assert_eq!(string_of(&value), "AbortError");
}

#[test]
fn concurrent_fetches_are_not_serialized() {
    let mut server = mockito::Server::new();
    let _first = server
        .mock("GET", "/a")
        .with_status(200)
        .with_body("alpha")
        .create();
    let _second = server
        .mock("GET", "/b")
        .with_status(200)
        .with_body("beta")
        .create();

    let mut rt = runtime();
    let script = format!(
        r#"
        (async () => {{
            const [a, b] = await Promise.all([
                fetch("{url}/a").then((r) => r.text()),
                fetch("{url}/b").then((r) => r.text()),
            ]);
            return `${{a}},${{b}}`;
        }})()
        "#,
        url = server.url(),
    );
    let value = eval_wait(&mut rt, &script).unwrap();
    assert_eq!(string_of(&value), "alpha,beta");
}
