//! Web-standard API facades for the Strand runtime.
//!
//! Everything here follows one recipe: native state behind a
//! [`strand_core::native::JsNativeObject`], a `NativeClass` (or plain
//! builtin callables) exposing the standards-shaped surface, and an `Api`
//! unit struct that registers it on a context. [`WebApi`] installs the whole
//! surface.

pub mod abort;
pub mod console;
pub mod crypto;
pub mod encoding;
pub mod event;
pub mod file;
pub(crate) mod handles;
pub mod http;
pub mod idl;
pub mod js_log;
pub mod process;
pub mod stream;
pub mod timers;
pub mod url;

use boa_engine::Context;
use strand_core::Api;

pub use js_log::{set_js_logger, JsLog, LogData, LogLevel};

/// Installs the full Web API surface on a context: console, events, abort,
/// codecs, crypto, timers, URL, streams, fetch/HTTP, files and process.
pub struct WebApi;

impl Api for WebApi {
    fn init(self, context: &mut Context) {
        console::ConsoleApi.init(context);
        event::EventApi.init(context);
        abort::AbortApi.init(context);
        encoding::EncodingApi.init(context);
        crypto::CryptoApi.init(context);
        timers::TimersApi.init(context);
        url::UrlApi.init(context);
        stream::StreamApi.init(context);
        http::HttpApi.init(context);
        file::FileApi.init(context);
        process::ProcessApi.init(context);
    }
}
