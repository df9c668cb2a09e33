//! The `console` Web API object.
//!
//! Formatting is limited to stringification plus the `%d/%i/%f/%o/%O/%s/%%`
//! directives; output fans out to the sink installed through
//! [`crate::js_log::set_js_logger`].
//!
//! More information:
//!  - [WHATWG `console` specification][spec]
//!
//! [spec]: https://console.spec.whatwg.org/

use boa_engine::{
    js_string,
    object::{Object, ObjectInitializer},
    property::Attribute,
    value::Numeric,
    Context, JsArgs, JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{empty_trace, Finalize, GcRefMut, Trace};
use strand_core::value::IntoJs;

use crate::js_log::{log, LogData, LogLevel};

fn display_js(value: &JsValue) -> String {
    match value.as_string() {
        Some(value) => value.to_std_string_escaped(),
        None => value.display().to_string(),
    }
}

/// The `console` formatter.
///
/// More information:
///  - [WHATWG `formatter` specification][https://console.spec.whatwg.org/#formatter]
fn formatter(data: &[JsValue], context: &mut Context) -> JsResult<String> {
    match data {
        [] => Ok(String::new()),
        [val] => Ok(display_js(val)),
        data => {
            let mut formatted = String::new();
            let mut arg_index = 0;
            if let Some(target) = data
                .get_or_undefined(0)
                .as_string()
                .map(|x| x.to_std_string_escaped())
            {
                arg_index = 1;
                let mut chars = target.chars();
                while let Some(c) = chars.next() {
                    if c == '%' {
                        let fmt = chars.next().unwrap_or('%');
                        match fmt {
                            /* integer */
                            'd' | 'i' => {
                                let arg = match data
                                    .get_or_undefined(arg_index)
                                    .to_numeric(context)?
                                {
                                    Numeric::Number(r) => (r.floor() + 0.0).to_string(),
                                    Numeric::BigInt(int) => int.to_string(),
                                };
                                formatted.push_str(&arg);
                                arg_index += 1;
                            }
                            /* float */
                            'f' => {
                                let arg = data
                                    .get_or_undefined(arg_index)
                                    .to_number(context)?;
                                formatted.push_str(&format!("{arg:.6}"));
                                arg_index += 1;
                            }
                            /* object */
                            'o' | 'O' => {
                                let arg = data.get_or_undefined(arg_index);
                                formatted.push_str(&arg.display().to_string());
                                arg_index += 1;
                            }
                            /* string */
                            's' => {
                                let arg = data
                                    .get_or_undefined(arg_index)
                                    .to_string(context)?
                                    .to_std_string_escaped();
                                formatted.push_str(&arg);
                                arg_index += 1;
                            }
                            '%' => formatted.push('%'),
                            c => {
                                formatted.push('%');
                                formatted.push(c);
                            }
                        }
                    } else {
                        formatted.push(c);
                    }
                }
            }

            /* unformatted data */
            for rest in data.iter().skip(arg_index) {
                formatted.push_str(&format!(" {}", display_js(rest)));
            }

            Ok(formatted)
        }
    }
}

#[derive(Finalize, Default)]
struct Console {
    groups: Vec<String>,
}

unsafe impl Trace for Console {
    empty_trace!();
}

impl Console {
    fn write(
        &self,
        level: LogLevel,
        data: &[JsValue],
        context: &mut Context,
    ) -> JsResult<()> {
        log(
            LogData {
                level,
                text: formatter(data, context)?,
                groups_len: self.groups.len(),
            },
            context,
        );
        Ok(())
    }

    fn log(&self, data: &[JsValue], context: &mut Context) -> JsResult<()> {
        self.write(LogLevel::LOG, data, context)
    }

    fn info(&self, data: &[JsValue], context: &mut Context) -> JsResult<()> {
        self.write(LogLevel::INFO, data, context)
    }

    fn debug(&self, data: &[JsValue], context: &mut Context) -> JsResult<()> {
        self.write(LogLevel::LOG, data, context)
    }

    fn warn(&self, data: &[JsValue], context: &mut Context) -> JsResult<()> {
        self.write(LogLevel::WARN, data, context)
    }

    fn error(&self, data: &[JsValue], context: &mut Context) -> JsResult<()> {
        self.write(LogLevel::ERROR, data, context)
    }

    /// `console.assert(condition, ...data)`
    ///
    /// More information:
    ///  - [WHATWG `console` specification][spec]
    ///
    /// [spec]: https://console.spec.whatwg.org/#assert
    fn assert(
        &self,
        assertion: bool,
        data: &[JsValue],
        context: &mut Context,
    ) -> JsResult<()> {
        if !assertion {
            let mut args: Vec<JsValue> = Vec::from(data);
            let message = "Assertion failed".to_string();
            if args.is_empty() {
                args.push(message.into_js(context));
            } else if !args[0].is_string() {
                args.insert(0, message.into_js(context));
            } else {
                let concat = format!("{message}: {}", args[0].display());
                args[0] = concat.into_js(context);
            }

            self.write(LogLevel::ERROR, &args, context)?;
        }

        Ok(())
    }

    fn group(&mut self, data: &[JsValue], context: &mut Context) -> JsResult<()> {
        let group_label = formatter(data, context)?;
        self.write(LogLevel::LOG, &[group_label.clone().into_js(context)], context)?;
        self.groups.push(group_label);
        Ok(())
    }

    fn group_end(&mut self) {
        self.groups.pop();
    }

    fn clear(&mut self) {
        self.groups.clear()
    }
}

pub struct ConsoleApi;

impl Console {
    fn from_js_value(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message("Failed to convert js value into rust type `Console`")
                    .into()
            })
    }
}

macro_rules! variadic_console_function {
    ($name:ident) => {
        fn $name(
            this: &JsValue,
            args: &[JsValue],
            context: &mut Context,
        ) -> JsResult<JsValue> {
            let console = Console::from_js_value(this)?;

            console.$name(args, context)?;
            Ok(JsValue::undefined())
        }
    };
}

impl ConsoleApi {
    const NAME: &'static str = "console";

    variadic_console_function!(log);
    variadic_console_function!(error);
    variadic_console_function!(debug);
    variadic_console_function!(warn);
    variadic_console_function!(info);

    fn assert(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let console = Console::from_js_value(this)?;

        let assertion = args.get_or_undefined(0).to_boolean();
        let data = if !args.is_empty() { &args[1..] } else { &[] };
        console.assert(assertion, data, context)?;

        Ok(JsValue::undefined())
    }

    fn group(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut console = Console::from_js_value(this)?;
        console.group(args, context)?;
        Ok(JsValue::undefined())
    }

    fn group_end(
        this: &JsValue,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut console = Console::from_js_value(this)?;

        console.group_end();
        Ok(JsValue::undefined())
    }

    fn clear(
        this: &JsValue,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut console = Console::from_js_value(this)?;
        console.clear();
        Ok(JsValue::undefined())
    }
}

impl strand_core::Api for ConsoleApi {
    fn init(self, context: &mut Context) {
        let console = ObjectInitializer::with_native(Console::default(), context)
            .function(NativeFunction::from_fn_ptr(Self::log), js_string!("log"), 0)
            .function(
                NativeFunction::from_fn_ptr(Self::error),
                js_string!("error"),
                0,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::debug),
                js_string!("debug"),
                0,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::warn),
                js_string!("warn"),
                0,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::info),
                js_string!("info"),
                0,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::assert),
                js_string!("assert"),
                0,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::group),
                js_string!("group"),
                0,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::group),
                js_string!("groupCollapsed"),
                0,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::group_end),
                js_string!("groupEnd"),
                0,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::clear),
                js_string!("clear"),
                0,
            )
            .build();

        context
            .register_global_property(js_string!(Self::NAME), console, Attribute::all())
            .expect("console api should only be registered once!")
    }
}
