use boa_engine::Context;
use serde::{Deserialize, Serialize};
use std::cell::Cell;

#[derive(Serialize, Deserialize, PartialEq, PartialOrd, Clone, Copy, Debug)]
pub enum LogLevel {
    ERROR = 1,
    WARN = 2,
    INFO = 3,
    LOG = 4,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::ERROR => "ERROR",
            LogLevel::WARN => "WARN",
            LogLevel::INFO => "INFO",
            LogLevel::LOG => "LOG",
        };
        write!(f, "{s}")
    }
}

#[derive(Serialize, Deserialize)]
pub struct LogData {
    pub level: LogLevel,
    pub text: String,
    pub groups_len: usize,
}

/// The implementor of this trait controls how console.log/warn/error etc. is
/// handled: console output fans out to whatever sink is installed.
pub trait JsLog {
    fn log(&self, log_data: LogData, context: &mut Context);
    fn flush(&self) {}
}

/// The default sink forwards to the `log` facade.
struct FacadeLog;

impl JsLog for FacadeLog {
    fn log(&self, log_data: LogData, _context: &mut Context) {
        let indent = 2 * log_data.groups_len;
        let text = format!("{:>indent$}{}", "", log_data.text);
        match log_data.level {
            LogLevel::ERROR => log::error!(target: "console", "{text}"),
            LogLevel::WARN => log::warn!(target: "console", "{text}"),
            LogLevel::INFO => log::info!(target: "console", "{text}"),
            LogLevel::LOG => log::info!(target: "console", "{text}"),
        }
    }
}

thread_local! {
    /// Thread-local sink for console output
    static CONSOLE_LOGGER: Cell<&'static dyn JsLog> = Cell::new(&FacadeLog);
}

pub fn set_js_logger(logger: &'static dyn JsLog) {
    CONSOLE_LOGGER.with(|slot| slot.set(logger));
}

pub(crate) fn log(log_data: LogData, context: &mut Context) {
    CONSOLE_LOGGER.with(|logger| logger.get().log(log_data, context));
}
