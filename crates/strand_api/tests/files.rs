mod common;

use boa_engine::JsValue;
use common::{eval_wait, runtime, string_of};
use std::io::Write;

#[test]
fn blob_construction_and_text() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const blob = new Blob(["Hello", " ", "World"], { type: "text/PLAIN" });
            const text = await blob.text();
            return `${blob.size}|${blob.type}|${text}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "11|text/plain|Hello World");
}

#[test]
fn blob_slice_is_share_backed() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const blob = new Blob(["Hello World"]);
            const sliced = blob.slice(6, 11, "text/x-word");
            const tail = blob.slice(-5);
            return [
                await sliced.text(),
                sliced.type,
                await tail.text(),
                blob.size,
            ].join("|");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "World|text/x-word|World|11");
}

#[test]
fn blob_array_buffer_and_nested_parts() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const inner = new Blob(["abc"]);
            const blob = new Blob([inner, new Uint8Array([33])]);
            const buffer = await blob.arrayBuffer();
            const view = new Uint8Array(buffer);
            return `${view.length}:${String.fromCharCode(...view)}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "4:abc!");
}

#[test]
fn blob_stream_delivers_bytes() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const blob = new Blob(["streamed bytes"]);
            const reader = blob.stream().getReader();
            const decoder = new TextDecoder();
            let text = "";
            for (;;) {
                const { value, done } = await reader.read();
                if (done) break;
                text += decoder.decode(value, { stream: true });
            }
            return text;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "streamed bytes");
}

#[test]
fn file_carries_name_and_last_modified() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const file = new File(["data"], "notes.txt", {
                type: "text/plain",
                lastModified: 1690000000000,
            });
            return `${file.name}|${file.size}|${file.type}|${file.lastModified}`;
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "notes.txt|4|text/plain|1690000000000");
}

#[test]
fn file_from_path_stats_and_reads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.json");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"{\"greeting\":\"hi\"}").unwrap();
    drop(file);

    let mut rt = runtime();
    let script = format!(
        r#"
        (async () => {{
            const file = File.fromPath({path:?});
            const text = await file.text();
            return [file.name, file.type, file.size, text].join("|");
        }})()
        "#,
        path = path.to_str().unwrap(),
    );
    let value = eval_wait(&mut rt, &script).unwrap();
    assert_eq!(
        string_of(&value),
        "hello.json|application/json|17|{\"greeting\":\"hi\"}"
    );
}

#[test]
fn file_from_path_rejects_missing_files() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            try {
                File.fromPath("/no/such/file/anywhere-2718");
                return "opened";
            } catch (err) {
                return err.name;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "NotFoundError");
}

#[test]
fn file_reader_state_sequence_and_events() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        new Promise((resolve) => {
            const reader = new FileReader();
            const states = [reader.readyState];
            const events = [];
            reader.onloadstart = () => events.push("loadstart");
            reader.onprogress = () => events.push("progress");
            reader.onload = () => events.push("load");
            reader.addEventListener("loadend", () => {
                states.push(reader.readyState);
                resolve(`${states.join(",")}|${events.join(",")}|${reader.result}`);
            });
            reader.readAsText(new Blob(["file body"]));
            states.push(reader.readyState);
        })
        "#,
    )
    .unwrap();
    assert_eq!(
        string_of(&value),
        "0,1,2|loadstart,progress,load|file body"
    );
}

#[test]
fn file_reader_rejects_concurrent_reads() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const reader = new FileReader();
            reader.readAsText(new Blob(["one"]));
            try {
                reader.readAsText(new Blob(["two"]));
                return "accepted";
            } catch (err) {
                return err.name;
            }
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "InvalidStateError");
}

#[test]
fn file_reader_abort_fires_abort_then_loadend() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        new Promise((resolve) => {
            const reader = new FileReader();
            const events = [];
            reader.onabort = () => events.push("abort");
            reader.onload = () => events.push("load");
            reader.onloadend = () => {
                resolve(`${events.join(",")}|${reader.readyState}|${reader.result}`);
            };
            reader.readAsText(new Blob(["never seen"]));
            reader.abort();
        })
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "abort|2|null");
}

#[test]
fn file_reader_data_url_includes_mime_and_base64() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        new Promise((resolve) => {
            const reader = new FileReader();
            reader.onloadend = () => resolve(reader.result);
            reader.readAsDataURL(new Blob(["Man"], { type: "text/plain" }));
        })
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "data:text/plain;base64,TWFu");
}

#[test]
fn file_reader_read_as_array_buffer() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        new Promise((resolve) => {
            const reader = new FileReader();
            reader.onloadend = () => {
                const view = new Uint8Array(reader.result);
                resolve(`${view.length}:${view[0]},${view[1]},${view[2]}`);
            };
            reader.readAsArrayBuffer(new Blob([new Uint8Array([7, 8, 9])]));
        })
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "3:7,8,9");
}

#[test]
fn form_data_surface() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (() => {
            const form = new FormData();
            form.append("name", "strand");
            form.append("name", "other");
            form.append("upload", new Blob(["bytes"], { type: "text/plain" }), "a.txt");
            form.set("name", "only");
            const uploaded = form.get("upload");
            return [
                form.get("name"),
                form.getAll("name").length,
                form.has("missing"),
                uploaded instanceof File,
                uploaded.name,
            ].join("|");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "only|1|false|true|a.txt");
}

#[test]
fn blob_text_is_asynchronous() {
    let mut rt = runtime();
    let value = eval_wait(
        &mut rt,
        r#"
        (async () => {
            const order = [];
            const pending = new Blob(["x"]).text().then(() => order.push("text"));
            order.push("sync");
            await pending;
            return order.join(",");
        })()
        "#,
    )
    .unwrap();
    assert_eq!(string_of(&value), "sync,text");
}
