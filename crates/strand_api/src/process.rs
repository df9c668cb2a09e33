//! The `process` facade: environment, argv, pid, working directory and exit.
//!
//! `process.env` is seeded from the host environment at registration; a
//! runtime sharing the process with another runtime observes the same
//! underlying environment. `exit` terminates the process immediately with no
//! graceful drain.

use boa_engine::{
    js_string,
    object::ObjectInitializer,
    property::Attribute,
    Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use strand_core::value::IntoJs;

fn env_object(context: &mut Context) -> JsObject {
    let env = JsObject::with_object_proto(context.intrinsics());
    for (key, value) in std::env::vars() {
        let _ = env.create_data_property_or_throw(
            JsString::from(key),
            JsString::from(value),
            context,
        );
    }
    env
}

pub struct ProcessApi;

impl ProcessApi {
    const NAME: &'static str = "process";

    fn cwd(
        _this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let dir = std::env::current_dir().map_err(|err| {
            JsNativeError::error()
                .with_message(format!("cwd unavailable: {err}"))
        })?;
        Ok(dir.to_string_lossy().into_owned().into_js(context))
    }

    fn chdir(
        _this: &JsValue,
        args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<JsValue> {
        let arg = args.get_or_undefined(0);
        let Some(path) = arg.as_string() else {
            return Err(JsNativeError::typ()
                .with_message("chdir expects a path string")
                .into());
        };
        let path = path.to_std_string().map_err(|_| {
            JsNativeError::typ().with_message("chdir expects a valid path string")
        })?;
        std::env::set_current_dir(&path).map_err(|err| {
            JsNativeError::error()
                .with_message(format!("chdir to {path:?} failed: {err}"))
        })?;
        Ok(JsValue::undefined())
    }

    /// Reads a variable through the host, not the seeded snapshot.
    fn getenv(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        Ok(match std::env::var(&name) {
            Ok(value) => JsString::from(value).into(),
            Err(_) => JsValue::undefined(),
        })
    }

    /// Writes a variable through the host.
    fn setenv(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        if name.is_empty() || name.contains('=') || name.contains('\0') {
            return Err(JsNativeError::typ()
                .with_message("Invalid environment variable name")
                .into());
        }
        let value: String = args.get_or_undefined(1).try_js_into(context)?;
        std::env::set_var(name, value);
        Ok(JsValue::undefined())
    }

    fn exit(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let code = args.get_or_undefined(0).to_number(context).unwrap_or(0.0);
        let code = if code.is_finite() {
            code.clamp(0.0, 255.0) as i32
        } else {
            0
        };
        std::process::exit(code);
    }
}

impl strand_core::Api for ProcessApi {
    fn init(self, context: &mut Context) {
        let env = env_object(context);
        let argv: Vec<JsValue> = std::env::args()
            .map(|arg| JsString::from(arg).into())
            .collect();
        let argv = boa_engine::object::builtins::JsArray::from_iter(argv, context);

        let process = ObjectInitializer::new(context)
            .property(js_string!("env"), env, Attribute::all())
            .property(js_string!("argv"), argv, Attribute::all())
            .property(js_string!("pid"), std::process::id(), Attribute::all())
            .function(NativeFunction::from_fn_ptr(Self::cwd), js_string!("cwd"), 0)
            .function(
                NativeFunction::from_fn_ptr(Self::chdir),
                js_string!("chdir"),
                1,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::getenv),
                js_string!("getenv"),
                1,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::setenv),
                js_string!("setenv"),
                2,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::exit),
                js_string!("exit"),
                0,
            )
            .build();

        context
            .register_global_property(js_string!(Self::NAME), process, Attribute::all())
            .expect("process api should only be registered once!")
    }
}
